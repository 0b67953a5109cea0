mod get_id;
mod read;
mod write;

use crate::{BLOCK_SIZE, CARD_SIZE, SECTOR_SIZE, TriState};
use get_id::GetIdStep;
use proc_bitfield::bitfield;
use read::ReadStep;
use write::WriteStep;

/// Lead-in byte that selects the memory card on the shared serial bus.
pub const CARD_SELECT: u8 = 0x81;
pub const CMD_READ: u8 = 0x52;
pub const CMD_WRITE: u8 = 0x57;
pub const CMD_GET_ID: u8 = 0x53;

/// Fixed two-byte card identifier sent near the start of every command.
pub const CARD_ID_1: u8 = 0x5A;
pub const CARD_ID_2: u8 = 0x5D;
/// Two-byte command acknowledgement preceding the data/status phase.
pub const COMMAND_ACK_1: u8 = 0x5C;
pub const COMMAND_ACK_2: u8 = 0x5D;

pub const STATUS_GOOD: u8 = 0x47;
pub const STATUS_BAD_CHECKSUM: u8 = 0x4E;
pub const STATUS_BAD_SECTOR: u8 = 0xFF;

// Out-of-range sector addresses are replaced with this sentinel so the
// remaining framing bytes can still be exchanged without touching the buffer.
const POISON_ADDRESS: u16 = 0xFFFF;

bitfield! {
    /// The FLAG status register, reported in reply to the command selector
    /// byte. Power-on leaves only `fresh` set (0x08); no command currently
    /// updates the register afterwards.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct CardFlag(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub write_error: bool @ 2,
        pub fresh: bool @ 3,
    }
}

const FLAG_INIT: CardFlag = CardFlag(0x08);

/// Scratchpad carried across the bytes of one Read/Write transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Transfer {
    address: u16,
    checksum: u8,
    counter: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolState {
    Idle,
    AwaitingCommand,
    Reading {
        step: ReadStep,
        xfer: Transfer,
    },
    Writing {
        step: WriteStep,
        xfer: Transfer,
        bad_checksum: bool,
    },
    GettingId {
        step: GetIdStep,
    },
}

/// A virtual PS1 memory card: 128 KiB of storage behind a byte-at-a-time
/// command protocol.
///
/// Each call to [`MemoryCard::send`] advances the protocol state machine by
/// exactly one byte exchange. The card only participates while powered on;
/// inserting it into a [`crate::slot::MemoryCardSlot`] handles power for you.
pub struct MemoryCard {
    powered: bool,
    flag: CardFlag,
    state: ProtocolState,
    bytes: Box<[u8; CARD_SIZE]>,
}

impl Default for MemoryCard {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCard {
    /// Creates a card with all data bytes zeroed, powered off.
    pub fn new() -> Self {
        Self {
            powered: false,
            flag: FLAG_INIT,
            state: ProtocolState::Idle,
            bytes: Box::new([0u8; CARD_SIZE]),
        }
    }

    /// Creates a card pre-populated with the given image, powered off.
    pub fn from_bytes(data: &[u8; CARD_SIZE]) -> Self {
        let mut card = Self::new();
        card.bytes.copy_from_slice(data);
        card
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn flag(&self) -> CardFlag {
        self.flag
    }

    /// Powers the card up, resetting FLAG and the protocol state machine.
    ///
    /// Returns `false` (with no side effect) if the card is already on, which
    /// is also what prevents one card from being inserted into two slots.
    pub fn power_on(&mut self) -> bool {
        if self.powered {
            return false;
        }
        tracing::debug!(target: "memcard_core::card", "card powered on");
        self.powered = true;
        self.flag = FLAG_INIT;
        self.state = ProtocolState::Idle;
        true
    }

    /// Powers the card down. Card data survives; protocol state does not.
    ///
    /// Returns `false` if the card is already off.
    pub fn power_off(&mut self) -> bool {
        if !self.powered {
            return false;
        }
        tracing::debug!(target: "memcard_core::card", "card powered off");
        self.powered = false;
        true
    }

    /// Exchanges one byte with the card.
    ///
    /// `command` is the host-driven byte (`None` for high-Z) and `data`
    /// receives the card-driven reply. The card leaves `data` untouched
    /// whenever it is not driving the line, so callers should initialise it
    /// to `None`. The return value is the ACK signal; its falling edge marks
    /// the last byte of a transaction.
    pub fn send(&mut self, command: TriState, data: &mut TriState) -> bool {
        // an unpowered card never ACKs and never drives the line
        if !self.powered {
            return false;
        }
        match self.state {
            ProtocolState::Idle => {
                if command == Some(CARD_SELECT) {
                    tracing::debug!(target: "memcard_core::card", "card selected");
                    self.state = ProtocolState::AwaitingCommand;
                    true
                } else {
                    // traffic for some other device on the bus
                    false
                }
            }
            ProtocolState::AwaitingCommand => {
                // FLAG is always reported in reply to the command selector
                *data = Some(self.flag.0);
                match command.unwrap_or(0x00) {
                    CMD_READ => {
                        tracing::debug!(target: "memcard_core::card", "read-data command");
                        self.state = ProtocolState::Reading {
                            step: ReadStep::CardId1,
                            xfer: Transfer::default(),
                        };
                        true
                    }
                    CMD_WRITE => {
                        tracing::debug!(target: "memcard_core::card", "write-data command");
                        self.state = ProtocolState::Writing {
                            step: WriteStep::CardId1,
                            xfer: Transfer::default(),
                            bad_checksum: false,
                        };
                        true
                    }
                    CMD_GET_ID => {
                        tracing::debug!(target: "memcard_core::card", "get-id command");
                        self.state = ProtocolState::GettingId {
                            step: GetIdStep::CardId1,
                        };
                        true
                    }
                    cmd => {
                        tracing::debug!(
                            target: "memcard_core::card",
                            cmd = format!("{:02X}", cmd),
                            "unknown card command"
                        );
                        self.state = ProtocolState::Idle;
                        false
                    }
                }
            }
            ProtocolState::Reading { step, xfer } => self.read_step(command, data, step, xfer),
            ProtocolState::Writing {
                step,
                xfer,
                bad_checksum,
            } => self.write_step(command, data, step, xfer, bad_checksum),
            ProtocolState::GettingId { step } => self.get_id_step(data, step),
        }
    }

    /// Mutable view of one 128-byte sector.
    ///
    /// Panics if `index` is not in `0..1024`.
    pub fn get_sector(&mut self, index: usize) -> &mut [u8; SECTOR_SIZE] {
        let start = index * SECTOR_SIZE;
        (&mut self.bytes[start..start + SECTOR_SIZE])
            .try_into()
            .unwrap()
    }

    /// Mutable view of one 8 KiB save block.
    ///
    /// Panics if `index` is not in `0..16`.
    pub fn get_block(&mut self, index: usize) -> &mut [u8; BLOCK_SIZE] {
        let start = index * BLOCK_SIZE;
        (&mut self.bytes[start..start + BLOCK_SIZE])
            .try_into()
            .unwrap()
    }

    pub fn bytes(&self) -> &[u8; CARD_SIZE] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; CARD_SIZE] {
        &mut self.bytes
    }
}
