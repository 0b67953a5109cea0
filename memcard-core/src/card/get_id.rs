use super::{CARD_ID_1, CARD_ID_2, COMMAND_ACK_1, COMMAND_ACK_2, MemoryCard, ProtocolState};
use crate::{SECTOR_COUNT, SECTOR_SIZE, TriState};

/// One step of the Get-Memory-Card-ID command. The command byte is a
/// don't-care throughout; the card just clocks out eight fixed replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum GetIdStep {
    CardId1,
    CardId2,
    CommandAck1,
    CommandAck2,
    Info1,
    Info2,
    Info3,
    Info4,
}

// The info payload describes the card geometry: sector count then sector
// size, both big-endian.
const SECTOR_COUNT_BYTES: [u8; 2] = SECTOR_COUNT.to_be_bytes();
const SECTOR_SIZE_BYTES: [u8; 2] = (SECTOR_SIZE as u16).to_be_bytes();

impl MemoryCard {
    pub(super) fn get_id_step(&mut self, data: &mut TriState, step: GetIdStep) -> bool {
        let next = match step {
            GetIdStep::CardId1 => {
                *data = Some(CARD_ID_1);
                GetIdStep::CardId2
            }
            GetIdStep::CardId2 => {
                *data = Some(CARD_ID_2);
                GetIdStep::CommandAck1
            }
            GetIdStep::CommandAck1 => {
                *data = Some(COMMAND_ACK_1);
                GetIdStep::CommandAck2
            }
            GetIdStep::CommandAck2 => {
                *data = Some(COMMAND_ACK_2);
                GetIdStep::Info1
            }
            GetIdStep::Info1 => {
                *data = Some(SECTOR_COUNT_BYTES[0]);
                GetIdStep::Info2
            }
            GetIdStep::Info2 => {
                *data = Some(SECTOR_COUNT_BYTES[1]);
                GetIdStep::Info3
            }
            GetIdStep::Info3 => {
                *data = Some(SECTOR_SIZE_BYTES[0]);
                GetIdStep::Info4
            }
            GetIdStep::Info4 => {
                *data = Some(SECTOR_SIZE_BYTES[1]);
                self.state = ProtocolState::Idle;
                return false;
            }
        };
        self.state = ProtocolState::GettingId { step: next };
        true
    }
}
