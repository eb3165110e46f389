//! Memory-card session: optional sector authentication, then one command
//! per block in queue order.

use tracing::{debug, info, warn};
use transit_common::CardFamily;

use super::{Operation, Queue, ReadHandle, SessionOutput, SessionReport};
use crate::apdu::{memory, ApduCommand, ApduResponse};
use crate::error::{CardError, SecurityError};
use crate::layout::SectorAuthentication;
use crate::reader::CardReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryState {
    Init,
    Authenticated,
    Queueing,
    Committed,
    /// Some blocks were written before a failure
    PartiallyCommitted { completed_writes: usize },
}

pub struct MemorySession<'a> {
    reader: &'a mut dyn CardReader,
    authentication: Option<SectorAuthentication>,
    queue: Queue,
    state: MemoryState,
}

/// Block numbers `first..first + count`, stopping at the end of the address space.
fn block_range(first: u8, count: u8) -> impl Iterator<Item = u8> {
    (0..count).filter_map(move |offset| first.checked_add(offset))
}

impl<'a> MemorySession<'a> {
    pub fn new(reader: &'a mut dyn CardReader, authentication: Option<SectorAuthentication>) -> Self {
        Self {
            reader,
            authentication,
            queue: Queue::default(),
            state: MemoryState::Init,
        }
    }

    /// Queue a block operation. Blocks outside the authenticated sector are
    /// refused here, before anything is sent.
    pub fn prepare(&mut self, operation: Operation) -> Result<ReadHandle, CardError> {
        let blocks: Vec<u8> = match &operation {
            Operation::ReadBlocks { first, count, .. } => block_range(*first, *count).collect(),
            Operation::WriteBlocks {
                first,
                block_size,
                data,
            } => {
                if *block_size == 0 || data.is_empty() || data.len() % block_size != 0 {
                    return Err(CardError::Unsupported {
                        operation: "write of a partial block",
                        family: CardFamily::Memory,
                    });
                }
                block_range(*first, (data.len() / block_size) as u8).collect()
            }
            _ => return Err(operation.unsupported(CardFamily::Memory)),
        };

        if let Some(auth) = &self.authentication {
            if let Some(&block) = blocks.iter().find(|&&b| !auth.covers(b)) {
                return Err(CardError::UnauthenticatedBlock { block });
            }
        }
        Ok(self.queue.push(operation))
    }

    pub fn queued_writes(&self) -> usize {
        self.queue.writes()
    }

    /// Run the queue. Writes are not atomic: on failure the error carries
    /// the number of blocks already written, and those stay written.
    pub fn commit(mut self) -> Result<SessionOutput, CardError> {
        let mut output = SessionOutput::with_capacity(self.queue.operations.len());

        if let Some(auth) = self.authentication {
            let command = memory::authenticate(auth.block, auth.key_type, auth.key_slot);
            let response = self.transmit(&command, &mut output.report)?;
            if !response.is_success() {
                return Err(SecurityError::SectorAuthentication {
                    block: auth.block,
                    sw: response.status_word(),
                }
                .into());
            }
            self.transition(MemoryState::Authenticated);
        }

        self.transition(MemoryState::Queueing);
        if let Err(err) = self.run_queue(&mut output) {
            let completed_writes = output.report.writes;
            if completed_writes > 0 {
                self.transition(MemoryState::PartiallyCommitted { completed_writes });
                warn!(
                    error = %err,
                    completed_writes,
                    "Memory card partially written"
                );
            }
            return Err(err);
        }

        self.transition(MemoryState::Committed);
        info!(
            commands = output.report.commands,
            writes = output.report.writes,
            "Memory card commit done"
        );
        Ok(output)
    }

    fn run_queue(&mut self, output: &mut SessionOutput) -> Result<(), CardError> {
        let operations = std::mem::take(&mut self.queue.operations);
        for (index, operation) in operations.iter().enumerate() {
            match operation {
                Operation::ReadBlocks {
                    first,
                    count,
                    block_size,
                } => {
                    let mut data = Vec::with_capacity(*count as usize * block_size);
                    for block in block_range(*first, *count) {
                        let command = memory::read_block(block, *block_size);
                        let response = self.checked("READ BINARY", &command, &mut output.report)?;
                        // Ultralight READ answers four pages; keep the one asked for
                        if response.data.len() > *block_size {
                            debug!(
                                block,
                                answered = response.data.len(),
                                kept = *block_size,
                                "Trimming READ BINARY answer"
                            );
                        }
                        let len = response.data.len().min(*block_size);
                        data.extend_from_slice(&response.data[..len]);
                    }
                    output.reads[index] = Some(data);
                    output.report.reads += 1;
                }
                Operation::WriteBlocks {
                    first,
                    block_size,
                    data,
                } => {
                    for (block, chunk) in block_range(*first, u8::MAX).zip(data.chunks(*block_size)) {
                        let command = memory::write_block(block, chunk.to_vec());
                        self.checked("UPDATE BINARY", &command, &mut output.report)?;
                        output.report.writes += 1;
                    }
                }
                _ => return Err(operation.unsupported(CardFamily::Memory)),
            }
        }
        Ok(())
    }

    fn checked(
        &mut self,
        name: &'static str,
        command: &ApduCommand,
        report: &mut SessionReport,
    ) -> Result<ApduResponse, CardError> {
        let response = self.transmit(command, report)?;
        if !response.is_success() {
            return Err(CardError::CommandRejected {
                command: name,
                sw: response.status_word(),
                completed_writes: report.writes,
            });
        }
        Ok(response)
    }

    fn transmit(&mut self, command: &ApduCommand, report: &mut SessionReport) -> Result<ApduResponse, CardError> {
        let raw = self.reader.transmit(&command.build())?;
        report.commands += 1;
        Ok(ApduResponse::from_raw(&raw)?)
    }

    fn transition(&mut self, next: MemoryState) {
        debug!(from = ?self.state, to = ?next, "Memory session state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_range() {
        assert_eq!(block_range(4, 4).collect::<Vec<_>>(), vec![4, 5, 6, 7]);
        assert_eq!(block_range(254, 4).collect::<Vec<_>>(), vec![254, 255]);
    }
}
