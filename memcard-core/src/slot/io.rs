use super::MemoryCardSlot;
use crate::card::{
    CARD_ID_1, CARD_ID_2, CARD_SELECT, CMD_READ, CMD_WRITE, COMMAND_ACK_1, COMMAND_ACK_2,
    STATUS_BAD_CHECKSUM, STATUS_BAD_SECTOR, STATUS_GOOD,
};
use crate::{BLOCK_SECTOR_COUNT, BLOCK_SIZE, CARD_SIZE, SECTOR_SIZE, TriState};
use thiserror::Error;

/// Classified failure of a sector, block or whole-card transfer.
///
/// The driver validates every card response bit-exactly and reports the first
/// deviation; it never retries. Recovery is up to the caller (typically by
/// power-cycling the card through remove/insert).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    #[error("no card inserted in the slot")]
    NoCard,
    #[error("card did not acknowledge an exchange")]
    NoAck,
    #[error("card response did not match the expected byte")]
    InvalidResponse,
    #[error("card acknowledged the terminal byte of a transfer")]
    UnexpectedAck,
    #[error("sector checksum mismatch")]
    BadChecksum,
    #[error("card rejected the sector address")]
    BadSector,
    #[error("unrecognised end-status byte {0:#04X}")]
    UnknownStatus(u8),
}

pub type IoResult = Result<(), IoError>;

impl MemoryCardSlot<'_> {
    /// Sends one command byte, requiring an ACK and (when `expected` is set)
    /// a specific response byte.
    fn exchange(&mut self, command: u8, expected: Option<u8>) -> Result<TriState, IoError> {
        let mut response: TriState = None;
        if !self.send(Some(command), &mut response) {
            tracing::warn!(
                target: "memcard_core::io",
                cmd = format!("{:02X}", command),
                "exchange not acknowledged"
            );
            return Err(IoError::NoAck);
        }
        if let Some(expected) = expected
            && response != Some(expected)
        {
            tracing::warn!(
                target: "memcard_core::io",
                cmd = format!("{:02X}", command),
                expected = format!("{:02X}", expected),
                response = format!("{:02X?}", response),
                "unexpected response"
            );
            return Err(IoError::InvalidResponse);
        }
        Ok(response)
    }

    /// Sends the transaction's terminal byte, on which the ACK must drop.
    fn terminal_exchange(&mut self) -> Result<TriState, IoError> {
        let mut response: TriState = None;
        if self.send(Some(0x00), &mut response) {
            tracing::warn!(target: "memcard_core::io", "card acknowledged the end byte");
            return Err(IoError::UnexpectedAck);
        }
        Ok(response)
    }

    /// Reads one 128-byte sector through the byte protocol, verifying the
    /// response framing and the card's checksum.
    pub fn read_sector(&mut self, index: u16, out: &mut [u8; SECTOR_SIZE]) -> IoResult {
        if self.inserted.is_none() {
            return Err(IoError::NoCard);
        }
        let msb = ((index >> 8) & 0x03) as u8;
        let lsb = (index & 0xFF) as u8;
        // header exchange: command byte paired with the expected response
        // (None marks a don't-care)
        let header: [(u8, Option<u8>); 10] = [
            (CARD_SELECT, None),
            (CMD_READ, None),
            (0x00, Some(CARD_ID_1)),
            (0x00, Some(CARD_ID_2)),
            (msb, None),
            (lsb, None),
            (0x00, Some(COMMAND_ACK_1)),
            (0x00, Some(COMMAND_ACK_2)),
            (0x00, Some(msb)),
            (0x00, Some(lsb)),
        ];
        for (command, expected) in header {
            self.exchange(command, expected)?;
        }
        let mut checksum = msb ^ lsb;
        for byte in out.iter_mut() {
            // the card must keep driving the line for all 128 data bytes
            let Some(value) = self.exchange(0x00, None)? else {
                tracing::warn!(target: "memcard_core::io", "card stopped driving mid-sector");
                return Err(IoError::InvalidResponse);
            };
            *byte = value;
            checksum ^= value;
        }
        let card_checksum = self.exchange(0x00, None)?;
        let end = self.terminal_exchange()?;
        if end != Some(STATUS_GOOD) || card_checksum != Some(checksum) {
            tracing::warn!(
                target: "memcard_core::io",
                sector = format!("{:04X}", index),
                computed = format!("{:02X}", checksum),
                received = format!("{:02X?}", card_checksum),
                "sector read failed checksum validation"
            );
            return Err(IoError::BadChecksum);
        }
        Ok(())
    }

    /// Writes one 128-byte sector through the byte protocol and decodes the
    /// card's end-status byte.
    pub fn write_sector(&mut self, index: u16, data: &[u8; SECTOR_SIZE]) -> IoResult {
        if self.inserted.is_none() {
            return Err(IoError::NoCard);
        }
        let msb = ((index >> 8) & 0x03) as u8;
        let lsb = (index & 0xFF) as u8;
        let header: [(u8, Option<u8>); 6] = [
            (CARD_SELECT, None),
            (CMD_WRITE, None),
            (0x00, Some(CARD_ID_1)),
            (0x00, Some(CARD_ID_2)),
            (msb, None),
            (lsb, None),
        ];
        for (command, expected) in header {
            self.exchange(command, expected)?;
        }
        let mut checksum = msb ^ lsb;
        for &byte in data {
            self.exchange(byte, None)?;
            checksum ^= byte;
        }
        self.exchange(checksum, None)?;
        self.exchange(0x00, Some(COMMAND_ACK_1))?;
        self.exchange(0x00, Some(COMMAND_ACK_2))?;
        match self.terminal_exchange()? {
            Some(STATUS_GOOD) => Ok(()),
            Some(STATUS_BAD_CHECKSUM) => Err(IoError::BadChecksum),
            Some(STATUS_BAD_SECTOR) => Err(IoError::BadSector),
            Some(status) => Err(IoError::UnknownStatus(status)),
            None => Err(IoError::InvalidResponse),
        }
    }

    /// Reads one 8 KiB block (64 consecutive sectors). The first failing
    /// sector's error propagates; earlier sectors stay in `out`.
    pub fn read_block(&mut self, index: usize, out: &mut [u8; BLOCK_SIZE]) -> IoResult {
        let first_sector = (index * BLOCK_SECTOR_COUNT) as u16;
        for (offset, sector) in out.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let sector: &mut [u8; SECTOR_SIZE] = sector.try_into().unwrap();
            self.read_sector(first_sector + offset as u16, sector)?;
        }
        Ok(())
    }

    /// Writes one 8 KiB block. No rollback is attempted on failure: sectors
    /// before the failing one have already been committed to the card.
    pub fn write_block(&mut self, index: usize, data: &[u8; BLOCK_SIZE]) -> IoResult {
        let first_sector = (index * BLOCK_SECTOR_COUNT) as u16;
        for (offset, sector) in data.chunks_exact(SECTOR_SIZE).enumerate() {
            let sector: &[u8; SECTOR_SIZE] = sector.try_into().unwrap();
            self.write_sector(first_sector + offset as u16, sector)?;
        }
        Ok(())
    }

    /// Reads the entire 128 KiB card.
    pub fn read_card(&mut self, out: &mut [u8; CARD_SIZE]) -> IoResult {
        for (index, block) in out.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            let block: &mut [u8; BLOCK_SIZE] = block.try_into().unwrap();
            self.read_block(index, block)?;
        }
        Ok(())
    }

    /// Writes the entire 128 KiB card. Like [`MemoryCardSlot::write_block`],
    /// a failure leaves everything already sent in place.
    pub fn write_card(&mut self, data: &[u8; CARD_SIZE]) -> IoResult {
        for (index, block) in data.chunks_exact(BLOCK_SIZE).enumerate() {
            let block: &[u8; BLOCK_SIZE] = block.try_into().unwrap();
            self.write_block(index, block)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LAST_SECTOR;
    use crate::card::MemoryCard;
    use std::cell::RefCell;

    fn patterned_sector(seed: u8) -> [u8; SECTOR_SIZE] {
        std::array::from_fn(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
    }

    fn patterned_image() -> Box<[u8; CARD_SIZE]> {
        let mut image = Box::new([0u8; CARD_SIZE]);
        for (i, byte) in image.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(7).wrapping_add((i >> 8) as u8);
        }
        image
    }

    #[test]
    fn every_operation_reports_no_card_on_an_empty_slot() {
        let mut slot = MemoryCardSlot::new();
        let mut sector = [0u8; SECTOR_SIZE];
        assert_eq!(slot.read_sector(0, &mut sector), Err(IoError::NoCard));
        assert_eq!(slot.write_sector(0, &sector), Err(IoError::NoCard));
        let mut block = [0u8; BLOCK_SIZE];
        assert_eq!(slot.read_block(0, &mut block), Err(IoError::NoCard));
        assert_eq!(slot.write_block(0, &block), Err(IoError::NoCard));
        let mut image = Box::new([0u8; CARD_SIZE]);
        assert_eq!(slot.read_card(&mut image), Err(IoError::NoCard));
        assert_eq!(slot.write_card(&image), Err(IoError::NoCard));
    }

    #[test]
    fn sector_round_trip_preserves_data() {
        let card = RefCell::new(MemoryCard::new());
        let mut slot = MemoryCardSlot::new();
        assert!(slot.insert_card(&card));
        for (i, index) in [0x0000, 0x0001, 0x0115, LAST_SECTOR].into_iter().enumerate() {
            let data = patterned_sector(i as u8);
            assert_eq!(slot.write_sector(index, &data), Ok(()));
            let mut out = [0u8; SECTOR_SIZE];
            assert_eq!(slot.read_sector(index, &mut out), Ok(()));
            assert_eq!(out, data);
        }
    }

    #[test]
    fn read_sector_sees_bytes_written_through_views() {
        let card = RefCell::new(MemoryCard::new());
        let data = patterned_sector(0x5E);
        card.borrow_mut().get_sector(0x203).copy_from_slice(&data);
        let mut slot = MemoryCardSlot::new();
        assert!(slot.insert_card(&card));
        let mut out = [0u8; SECTOR_SIZE];
        assert_eq!(slot.read_sector(0x203, &mut out), Ok(()));
        assert_eq!(out, data);
    }

    #[test]
    fn block_round_trip_preserves_data() {
        let card = RefCell::new(MemoryCard::new());
        let mut slot = MemoryCardSlot::new();
        assert!(slot.insert_card(&card));
        let data: [u8; BLOCK_SIZE] = std::array::from_fn(|i| (i % 251) as u8);
        assert_eq!(slot.write_block(7, &data), Ok(()));
        let mut out = [0u8; BLOCK_SIZE];
        assert_eq!(slot.read_block(7, &mut out), Ok(()));
        assert!(out[..] == data[..]);
        // the write landed in the card's backing buffer, nowhere else
        assert!(card.borrow_mut().get_block(7)[..] == data[..]);
        assert!(card.borrow_mut().get_block(6).iter().all(|&b| b == 0));
    }

    #[test]
    fn whole_card_round_trip_preserves_data() {
        let image = patterned_image();
        let card = RefCell::new(MemoryCard::new());
        let mut slot = MemoryCardSlot::new();
        assert!(slot.insert_card(&card));
        assert_eq!(slot.write_card(&image), Ok(()));
        let mut out = Box::new([0u8; CARD_SIZE]);
        assert_eq!(slot.read_card(&mut out), Ok(()));
        assert!(out[..] == image[..]);
        assert!(card.borrow().bytes()[..] == image[..]);
    }

    #[test]
    fn read_card_matches_the_initial_image() {
        let image = patterned_image();
        let card = RefCell::new(MemoryCard::from_bytes(&image));
        let mut slot = MemoryCardSlot::new();
        assert!(slot.insert_card(&card));
        let mut out = Box::new([0u8; CARD_SIZE]);
        assert_eq!(slot.read_card(&mut out), Ok(()));
        assert!(out[..] == image[..]);
    }

    #[test]
    fn unpowered_card_reports_no_ack() {
        let card = RefCell::new(MemoryCard::new());
        let mut slot = MemoryCardSlot::new();
        assert!(slot.insert_card(&card));
        // yank power behind the slot's back
        assert!(card.borrow_mut().power_off());
        let mut sector = [0u8; SECTOR_SIZE];
        assert_eq!(slot.read_sector(0, &mut sector), Err(IoError::NoAck));
        assert_eq!(slot.write_sector(0, &sector), Err(IoError::NoAck));
    }

    #[test]
    fn desynchronised_card_is_detected() {
        let card = RefCell::new(MemoryCard::new());
        let mut slot = MemoryCardSlot::new();
        assert!(slot.insert_card(&card));
        // leave the card stranded in the middle of a read command
        let mut data: TriState = None;
        assert!(slot.send(Some(CARD_SELECT), &mut data));
        assert!(slot.send(Some(CMD_READ), &mut data));
        let mut sector = [0u8; SECTOR_SIZE];
        assert_eq!(
            slot.read_sector(0, &mut sector),
            Err(IoError::InvalidResponse)
        );
    }
}
