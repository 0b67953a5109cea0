pub mod io;

use crate::TriState;
use crate::card::MemoryCard;
use std::cell::RefCell;

/// A slot a [`MemoryCard`] can be inserted into.
///
/// Slots borrow cards rather than owning them: a card is created once and can
/// move between slots across its lifetime. Insertion powers the card on and
/// removal powers it off, and because a powered card refuses `power_on`, the
/// same card can never sit in two slots at once.
#[derive(Default)]
pub struct MemoryCardSlot<'card> {
    inserted: Option<&'card RefCell<MemoryCard>>,
}

impl<'card> MemoryCardSlot<'card> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_occupied(&self) -> bool {
        self.inserted.is_some()
    }

    /// Inserts a card, powering it on.
    ///
    /// Fails if the slot is already occupied, or if the card refuses to power
    /// on (meaning it is live in another slot).
    pub fn insert_card(&mut self, card: &'card RefCell<MemoryCard>) -> bool {
        if self.inserted.is_some() {
            return false;
        }
        if !card.borrow_mut().power_on() {
            tracing::debug!(target: "memcard_core::slot", "card refused power-on, insertion rejected");
            return false;
        }
        tracing::debug!(target: "memcard_core::slot", "card inserted");
        self.inserted = Some(card);
        true
    }

    /// Removes the inserted card, powering it off. Fails if the slot is empty.
    pub fn remove_card(&mut self) -> bool {
        match self.inserted.take() {
            Some(card) => {
                card.borrow_mut().power_off();
                tracing::debug!(target: "memcard_core::slot", "card removed");
                true
            }
            None => false,
        }
    }

    /// Forwards one byte exchange to the inserted card.
    ///
    /// An empty slot never ACKs and leaves `data` untouched.
    pub fn send(&mut self, command: TriState, data: &mut TriState) -> bool {
        match self.inserted {
            Some(card) => card.borrow_mut().send(command, data),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_lifecycle() {
        let card = RefCell::new(MemoryCard::new());
        let mut slot = MemoryCardSlot::new();
        assert!(!slot.remove_card());
        assert!(slot.insert_card(&card));
        assert!(slot.is_occupied());
        assert!(card.borrow().is_powered());
        assert!(!slot.insert_card(&card));
        assert!(slot.remove_card());
        assert!(!card.borrow().is_powered());
        assert!(!slot.remove_card());
    }

    #[test]
    fn card_cannot_sit_in_two_slots() {
        let card = RefCell::new(MemoryCard::new());
        let mut first = MemoryCardSlot::new();
        let mut second = MemoryCardSlot::new();
        assert!(first.insert_card(&card));
        assert!(!second.insert_card(&card));
        // once removed, the other slot may take it
        assert!(first.remove_card());
        assert!(second.insert_card(&card));
    }

    #[test]
    fn powered_card_cannot_be_inserted() {
        let card = RefCell::new(MemoryCard::new());
        assert!(card.borrow_mut().power_on());
        let mut slot = MemoryCardSlot::new();
        assert!(!slot.insert_card(&card));
        assert!(!slot.is_occupied());
    }

    #[test]
    fn empty_slot_never_acks() {
        let mut slot = MemoryCardSlot::new();
        for byte in 0x00..=0xFF {
            let mut data: TriState = None;
            assert!(!slot.send(Some(byte), &mut data));
            assert_eq!(data, None);
        }
    }

    #[test]
    fn slot_forwards_exactly_like_a_direct_card() {
        let sequences: &[&[TriState]] = &[
            // controller traffic, ignored by the card
            &[Some(0x01)],
            // high-impedance input
            &[None],
            // bare select with no command
            &[Some(0x81)],
            // unknown card command
            &[Some(0x81), Some(0x33)],
            // complete read header
            &[
                Some(0x81),
                Some(0x52),
                Some(0x00),
                Some(0x00),
                Some(0x01),
                Some(0x33),
                Some(0x00),
                Some(0x00),
                Some(0x00),
                Some(0x00),
            ],
            // write abandoned mid-header
            &[
                Some(0x81),
                Some(0x57),
                Some(0x00),
                Some(0x00),
                Some(0x00),
                Some(0x14),
                Some(0x00),
                Some(0x00),
            ],
            // full get-id transaction
            &[
                Some(0x81),
                Some(0x53),
                Some(0x00),
                Some(0x00),
                Some(0x00),
                Some(0x00),
                Some(0x00),
                Some(0x00),
                Some(0x00),
                Some(0x00),
            ],
        ];
        for sequence in sequences {
            let card = RefCell::new(MemoryCard::new());
            let mut slot = MemoryCardSlot::new();
            assert!(slot.insert_card(&card));
            let mut control = MemoryCard::new();
            assert!(control.power_on());
            for &command in *sequence {
                let mut via_slot: TriState = None;
                let mut direct: TriState = None;
                assert_eq!(
                    slot.send(command, &mut via_slot),
                    control.send(command, &mut direct)
                );
                assert_eq!(via_slot, direct);
            }
        }
    }
}
