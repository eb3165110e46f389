//! Secure-card session: every queued operation runs inside one keyed
//! secure session and takes effect only when the card accepts the close.

use tracing::{debug, info, warn};
use transit_common::codec::counters;
use transit_common::constants::COUNTER_SIZE;
use transit_common::CardFamily;

use super::{Operation, Queue, ReadHandle, SessionOutput, SessionReport};
use crate::apdu::{secure, ApduCommand, ApduResponse};
use crate::error::{CardError, SecurityError};
use crate::reader::CardReader;
use crate::security::{AccessLevel, SecurityModule};

/// Minimum open response: challenge (4), ratification, KIF, KVC, length
const OPEN_RESPONSE_HEADER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureState {
    Init,
    SessionOpen(AccessLevel),
    Queueing,
    SessionClose,
    Committed,
    /// The card dropped the session; none of the queued writes applied
    Discarded,
    /// The card accepted the close, so the writes applied, but the security
    /// module rejected its signature
    Unverified,
}

pub struct SecureSession<'a> {
    reader: &'a mut dyn CardReader,
    security: &'a mut dyn SecurityModule,
    level: AccessLevel,
    kif: Option<u8>,
    open_read: Option<(u8, u8)>,
    queue: Queue,
    state: SecureState,
}

impl<'a> SecureSession<'a> {
    pub fn new(
        reader: &'a mut dyn CardReader,
        security: &'a mut dyn SecurityModule,
        level: AccessLevel,
    ) -> Self {
        Self {
            reader,
            security,
            level,
            kif: None,
            open_read: None,
            queue: Queue::default(),
            state: SecureState::Init,
        }
    }

    /// Expect key `kif` instead of the security module's default for the level.
    pub fn with_kif(mut self, kif: u8) -> Self {
        self.kif = Some(kif);
        self
    }

    /// Read `record` of `sfi` with the open command. Overridden by the
    /// counter file when counter updates are queued.
    pub fn reading_at_open(mut self, sfi: u8, record: u8) -> Self {
        self.open_read = Some((sfi, record));
        self
    }

    pub fn prepare(&mut self, operation: Operation) -> Result<ReadHandle, CardError> {
        if operation.family() != CardFamily::Secure {
            return Err(operation.unsupported(CardFamily::Secure));
        }
        Ok(self.queue.push(operation))
    }

    pub fn queued_writes(&self) -> usize {
        self.queue.writes()
    }

    pub fn commit(mut self) -> Result<SessionOutput, CardError> {
        let mut output = SessionOutput::with_capacity(self.queue.operations.len());
        let counter_file = self.counter_file()?;
        let open_read = match counter_file {
            Some(sfi) => Some((sfi, 1)),
            None => self.open_read,
        };

        let kif = match self.kif {
            Some(kif) => kif,
            None => self.security.default_kif(self.level),
        };
        let challenge = self.security.terminal_challenge()?;
        let (sfi, record) = open_read.unwrap_or((0, 0));
        let open = secure::open_secure_session(self.level.key_index(), sfi, record, &challenge);
        let response = self.transmit(&open, &mut output.report)?;
        if !response.is_success() {
            return Err(SecurityError::OpenRejected {
                sw: response.status_word(),
            }
            .into());
        }
        self.transition(SecureState::SessionOpen(self.level));
        info!(level = ?self.level, kif = format_args!("{kif:02X}"), "Secure session opened");

        let signature = match self.run_opened(kif, &response.data, open_read.is_some(), counter_file.is_some(), &mut output) {
            Ok(signature) => signature,
            Err(err) => {
                warn!(error = %err, "Aborting secure session; queued changes discarded");
                self.abort(&mut output.report);
                return Err(err);
            }
        };

        self.transition(SecureState::SessionClose);
        let response = self.transmit(&secure::close_secure_session(&signature), &mut output.report)?;
        if !response.is_success() {
            self.transition(SecureState::Discarded);
            warn!(
                sw = format_args!("{:04X}", response.status_word()),
                writes = output.report.writes,
                counter_updates = output.report.counter_updates,
                "Session close rejected; queued changes discarded"
            );
            return Err(SecurityError::CloseRejected {
                sw: response.status_word(),
            }
            .into());
        }
        if let Err(err) = self.security.authenticate_card(&response.data) {
            // The close was accepted: the card holds the writes
            self.transition(SecureState::Unverified);
            warn!(
                error = %err,
                writes = output.report.writes,
                counter_updates = output.report.counter_updates,
                "Card committed the session but its signature did not verify"
            );
            return Err(SecurityError::CardUnverified {
                writes: output.report.writes,
                counter_updates: output.report.counter_updates,
                source: Box::new(err),
            }
            .into());
        }
        self.transition(SecureState::Committed);

        let report = output.report;
        info!(
            commands = report.commands,
            writes = report.writes,
            counter_updates = report.counter_updates,
            "Secure session committed"
        );
        Ok(output)
    }

    /// Counter file targeted by the queued counter updates, if any.
    fn counter_file(&self) -> Result<Option<u8>, CardError> {
        let mut files = self.queue.operations.iter().filter_map(|op| match op {
            Operation::SetCounter { sfi, .. } => Some(*sfi),
            _ => None,
        });
        let Some(first) = files.next() else {
            return Ok(None);
        };
        if files.any(|sfi| sfi != first) {
            return Err(CardError::Unsupported {
                operation: "counter updates across several counter files",
                family: CardFamily::Secure,
            });
        }
        Ok(Some(first))
    }

    /// Everything between a successful open and the close. Returns the
    /// terminal signature.
    fn run_opened(
        &mut self,
        kif: u8,
        open_data: &[u8],
        has_record: bool,
        record_is_counters: bool,
        output: &mut SessionOutput,
    ) -> Result<Vec<u8>, CardError> {
        let record = parse_open_response(open_data, kif)?;
        self.security.open_digest(kif, open_data)?;
        if has_record {
            output.open_record = Some(record.to_vec());
        }

        self.transition(SecureState::Queueing);
        let mut counter_values = if record_is_counters {
            counters::decode_file(record, record.len() / COUNTER_SIZE)?
        } else {
            Vec::new()
        };
        let operations = std::mem::take(&mut self.queue.operations);

        for (index, operation) in operations.iter().enumerate() {
            match operation {
                Operation::ReadRecord { sfi, record, size } => {
                    let command = secure::read_record(*sfi, *record, *size);
                    let response = self.exchange("READ RECORD", &command, &mut output.report)?;
                    output.reads[index] = Some(response.data);
                    output.report.reads += 1;
                }
                Operation::UpdateRecord { sfi, record, data } => {
                    let command = secure::update_record(*sfi, *record, data.clone());
                    self.exchange("UPDATE RECORD", &command, &mut output.report)?;
                    output.report.writes += 1;
                }
                Operation::SetCounter { sfi, counter, value } => {
                    let count = counter_values.len();
                    let current = (*counter as usize)
                        .checked_sub(1)
                        .and_then(|slot| counter_values.get_mut(slot))
                        .ok_or(CardError::InvalidContract {
                            number: *counter,
                            count: count as u8,
                        })?;
                    let delta = i64::from(value.get()) - i64::from(current.get());
                    if delta == 0 {
                        debug!(counter, "Counter unchanged");
                        continue;
                    }
                    let command = secure::change_counter(
                        *sfi,
                        *counter,
                        delta > 0,
                        delta.unsigned_abs() as u32,
                    );
                    let name = if delta > 0 { "INCREASE" } else { "DECREASE" };
                    self.exchange(name, &command, &mut output.report)?;
                    *current = *value;
                    output.report.counter_updates += 1;
                }
                Operation::ReadBlocks { .. } | Operation::WriteBlocks { .. } => {
                    return Err(operation.unsupported(CardFamily::Secure));
                }
            }
        }

        Ok(self.security.close_digest()?)
    }

    /// Send an in-session command and feed the exchange to the digest.
    fn exchange(
        &mut self,
        name: &'static str,
        command: &ApduCommand,
        report: &mut SessionReport,
    ) -> Result<ApduResponse, CardError> {
        let bytes = command.build();
        let raw = self.reader.transmit(&bytes)?;
        report.commands += 1;
        let response = ApduResponse::from_raw(&raw)?;
        if !response.is_success() {
            return Err(CardError::CommandRejected {
                command: name,
                sw: response.status_word(),
                completed_writes: 0,
            });
        }
        self.security.update_digest(&bytes, &raw)?;
        Ok(response)
    }

    fn transmit(&mut self, command: &ApduCommand, report: &mut SessionReport) -> Result<ApduResponse, CardError> {
        let raw = self.reader.transmit(&command.build())?;
        report.commands += 1;
        Ok(ApduResponse::from_raw(&raw)?)
    }

    fn abort(&mut self, report: &mut SessionReport) {
        if let Err(err) = self.transmit(&secure::abort_secure_session(), report) {
            warn!(error = %err, "Abort close failed");
        }
        self.transition(SecureState::Discarded);
    }

    fn transition(&mut self, next: SecureState) {
        debug!(from = ?self.state, to = ?next, "Secure session state");
        self.state = next;
    }
}

/// Check the open response and return the record it carries.
fn parse_open_response(data: &[u8], expected_kif: u8) -> Result<&[u8], SecurityError> {
    if data.len() < OPEN_RESPONSE_HEADER {
        return Err(SecurityError::MalformedOpenResponse(data.len()));
    }
    let actual = data[5];
    if actual != expected_kif {
        return Err(SecurityError::KeyMismatch {
            expected: expected_kif,
            actual,
        });
    }
    let len = data[7] as usize;
    data.get(OPEN_RESPONSE_HEADER..OPEN_RESPONSE_HEADER + len)
        .ok_or(SecurityError::MalformedOpenResponse(data.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_open_response() {
        let data = [1, 2, 3, 4, 0x00, 0x27, 0x79, 3, 0xAA, 0xBB, 0xCC];
        assert_eq!(parse_open_response(&data, 0x27).unwrap(), &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_parse_open_response_without_record() {
        let data = [1, 2, 3, 4, 0x00, 0x21, 0x79, 0];
        assert!(parse_open_response(&data, 0x21).unwrap().is_empty());
    }

    #[test]
    fn test_parse_open_response_key_mismatch() {
        let data = [1, 2, 3, 4, 0x00, 0x30, 0x79, 0];
        assert!(matches!(
            parse_open_response(&data, 0x27),
            Err(SecurityError::KeyMismatch {
                expected: 0x27,
                actual: 0x30
            })
        ));
    }

    #[test]
    fn test_parse_open_response_truncated() {
        assert!(matches!(
            parse_open_response(&[1, 2, 3], 0x27),
            Err(SecurityError::MalformedOpenResponse(3))
        ));
        let data = [1, 2, 3, 4, 0x00, 0x27, 0x79, 5, 0xAA];
        assert!(matches!(
            parse_open_response(&data, 0x27),
            Err(SecurityError::MalformedOpenResponse(9))
        ));
    }
}
