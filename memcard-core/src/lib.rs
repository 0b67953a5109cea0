pub mod card;
pub mod slot;

/// A byte on the shared serial line. `None` models the high-impedance
/// (Z) state: no device is driving the line.
pub type TriState = Option<u8>;

pub const SECTOR_SIZE: usize = 128;
pub const BLOCK_SECTOR_COUNT: usize = 64;
pub const CARD_BLOCK_COUNT: usize = 16;
pub const BLOCK_SIZE: usize = BLOCK_SECTOR_COUNT * SECTOR_SIZE;
pub const CARD_SIZE: usize = CARD_BLOCK_COUNT * BLOCK_SIZE;

/// Number of addressable sectors on a card (16-bit big-endian addressing).
pub const SECTOR_COUNT: u16 = (CARD_BLOCK_COUNT * BLOCK_SECTOR_COUNT) as u16;
pub const LAST_SECTOR: u16 = SECTOR_COUNT - 1;
