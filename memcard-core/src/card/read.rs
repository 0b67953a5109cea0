use super::{
    CARD_ID_1, CARD_ID_2, COMMAND_ACK_1, COMMAND_ACK_2, MemoryCard, POISON_ADDRESS, ProtocolState,
    STATUS_GOOD, Transfer,
};
use crate::{LAST_SECTOR, SECTOR_SIZE, TriState};

/// One step of the Read-Data command, advanced one byte exchange at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ReadStep {
    CardId1,
    CardId2,
    AddressMsb,
    AddressLsb,
    CommandAck1,
    CommandAck2,
    ConfirmMsb,
    ConfirmLsb,
    DataSector,
    Checksum,
    EndByte,
}

impl MemoryCard {
    pub(super) fn read_step(
        &mut self,
        command: TriState,
        data: &mut TriState,
        step: ReadStep,
        mut xfer: Transfer,
    ) -> bool {
        let next = match step {
            // the command byte is a don't-care for the ID and ack steps
            ReadStep::CardId1 => {
                *data = Some(CARD_ID_1);
                ReadStep::CardId2
            }
            ReadStep::CardId2 => {
                *data = Some(CARD_ID_2);
                ReadStep::AddressMsb
            }
            ReadStep::AddressMsb => {
                // the address MSB also seeds the checksum; high-Z reads as 0xFF
                xfer.checksum = command.unwrap_or(0xFF);
                xfer.address = u16::from(xfer.checksum) << 8;
                *data = Some(0x00);
                ReadStep::AddressLsb
            }
            ReadStep::AddressLsb => {
                xfer.address |= u16::from(command.unwrap_or(0xFF));
                xfer.checksum ^= (xfer.address & 0x00FF) as u8;
                if xfer.address > LAST_SECTOR {
                    tracing::debug!(
                        target: "memcard_core::card",
                        address = format!("{:04X}", xfer.address),
                        "read address out of range"
                    );
                    xfer.address = POISON_ADDRESS;
                }
                *data = Some(0x00);
                ReadStep::CommandAck1
            }
            ReadStep::CommandAck1 => {
                *data = Some(COMMAND_ACK_1);
                ReadStep::CommandAck2
            }
            ReadStep::CommandAck2 => {
                *data = Some(COMMAND_ACK_2);
                ReadStep::ConfirmMsb
            }
            ReadStep::ConfirmMsb => {
                *data = Some((xfer.address >> 8) as u8);
                ReadStep::ConfirmLsb
            }
            ReadStep::ConfirmLsb => {
                *data = Some((xfer.address & 0x00FF) as u8);
                // a poisoned address terminates the transaction here: the
                // host sees ACK drop before any data bytes flow
                if xfer.address == POISON_ADDRESS {
                    self.state = ProtocolState::Idle;
                    return false;
                }
                xfer.counter = 0;
                ReadStep::DataSector
            }
            ReadStep::DataSector => {
                let byte = self.get_sector(usize::from(xfer.address))[usize::from(xfer.counter)];
                *data = Some(byte);
                xfer.checksum ^= byte;
                xfer.counter += 1;
                if usize::from(xfer.counter) == SECTOR_SIZE {
                    ReadStep::Checksum
                } else {
                    ReadStep::DataSector
                }
            }
            ReadStep::Checksum => {
                *data = Some(xfer.checksum);
                ReadStep::EndByte
            }
            ReadStep::EndByte => {
                tracing::debug!(
                    target: "memcard_core::card",
                    address = format!("{:04X}", xfer.address),
                    "sector read complete"
                );
                *data = Some(STATUS_GOOD);
                self.state = ProtocolState::Idle;
                return false;
            }
        };
        self.state = ProtocolState::Reading { step: next, xfer };
        true
    }
}
