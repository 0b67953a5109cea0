use super::{
    CARD_ID_1, CARD_ID_2, COMMAND_ACK_1, COMMAND_ACK_2, MemoryCard, POISON_ADDRESS, ProtocolState,
    STATUS_BAD_CHECKSUM, STATUS_BAD_SECTOR, STATUS_GOOD, Transfer,
};
use crate::{LAST_SECTOR, SECTOR_SIZE, TriState};

/// One step of the Write-Data command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum WriteStep {
    CardId1,
    CardId2,
    AddressMsb,
    AddressLsb,
    DataSector,
    Checksum,
    CommandAck1,
    CommandAck2,
    EndByte,
}

impl MemoryCard {
    pub(super) fn write_step(
        &mut self,
        command: TriState,
        data: &mut TriState,
        step: WriteStep,
        mut xfer: Transfer,
        mut bad_checksum: bool,
    ) -> bool {
        let next = match step {
            WriteStep::CardId1 => {
                *data = Some(CARD_ID_1);
                WriteStep::CardId2
            }
            WriteStep::CardId2 => {
                *data = Some(CARD_ID_2);
                WriteStep::AddressMsb
            }
            WriteStep::AddressMsb => {
                xfer.checksum = command.unwrap_or(0xFF);
                xfer.address = u16::from(xfer.checksum) << 8;
                *data = Some(0x00);
                WriteStep::AddressLsb
            }
            WriteStep::AddressLsb => {
                xfer.address |= u16::from(command.unwrap_or(0xFF));
                xfer.checksum ^= (xfer.address & 0x00FF) as u8;
                if xfer.address > LAST_SECTOR {
                    tracing::debug!(
                        target: "memcard_core::card",
                        address = format!("{:04X}", xfer.address),
                        "write address out of range"
                    );
                    xfer.address = POISON_ADDRESS;
                }
                xfer.counter = 0;
                *data = Some(0x00);
                WriteStep::DataSector
            }
            WriteStep::DataSector => {
                let byte = command.unwrap_or(0xFF);
                // a poisoned address keeps the framing alive but must never
                // reach the buffer
                if xfer.address != POISON_ADDRESS {
                    self.get_sector(usize::from(xfer.address))[usize::from(xfer.counter)] = byte;
                }
                xfer.checksum ^= byte;
                xfer.counter += 1;
                *data = Some(0x00);
                if usize::from(xfer.counter) == SECTOR_SIZE {
                    WriteStep::Checksum
                } else {
                    WriteStep::DataSector
                }
            }
            WriteStep::Checksum => {
                // a high-Z checksum byte can never match
                let sent = command.unwrap_or(!xfer.checksum);
                bad_checksum = sent != xfer.checksum;
                if bad_checksum {
                    tracing::debug!(
                        target: "memcard_core::card",
                        sent = format!("{:02X}", sent),
                        computed = format!("{:02X}", xfer.checksum),
                        "write checksum mismatch"
                    );
                }
                *data = Some(0x00);
                WriteStep::CommandAck1
            }
            WriteStep::CommandAck1 => {
                *data = Some(COMMAND_ACK_1);
                WriteStep::CommandAck2
            }
            WriteStep::CommandAck2 => {
                *data = Some(COMMAND_ACK_2);
                WriteStep::EndByte
            }
            WriteStep::EndByte => {
                let status = if xfer.address == POISON_ADDRESS {
                    STATUS_BAD_SECTOR
                } else if bad_checksum {
                    STATUS_BAD_CHECKSUM
                } else {
                    STATUS_GOOD
                };
                tracing::debug!(
                    target: "memcard_core::card",
                    address = format!("{:04X}", xfer.address),
                    status = format!("{:02X}", status),
                    "sector write complete"
                );
                *data = Some(status);
                self.state = ProtocolState::Idle;
                return false;
            }
        };
        self.state = ProtocolState::Writing {
            step: next,
            xfer,
            bad_checksum,
        };
        true
    }
}
