//! Transaction sessions
//!
//! A session collects prepared operations and commits them as one unit.
//! The two card families commit differently:
//!
//! - [`SecureSession`]: everything runs inside one keyed secure session and
//!   the card applies the writes only when the close is accepted. A failed
//!   close, or any failure before it, leaves the card untouched. If the
//!   card accepts the close but the security module then rejects the card's
//!   signature, the writes are on the card and the commit fails with
//!   [`SecurityError::CardUnverified`](crate::SecurityError::CardUnverified),
//!   which reports what was written.
//! - [`MemorySession`]: blocks are written one after the other. The card
//!   offers no atomicity, so a failure or power loss mid-commit can leave
//!   the earlier blocks written and the later ones not. The error returned
//!   in that case reports how many writes completed.

mod memory;
mod secure;

pub use memory::{MemorySession, MemoryState};
pub use secure::{SecureSession, SecureState};

use transit_common::{CardFamily, CounterValue};

use crate::error::CardError;

/// A prepared card operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ReadRecord { sfi: u8, record: u8, size: usize },
    UpdateRecord { sfi: u8, record: u8, data: Vec<u8> },
    /// Bring counter `counter` of the counter file to `value`
    SetCounter { sfi: u8, counter: u8, value: CounterValue },
    /// Read `count` blocks from `first` and concatenate them
    ReadBlocks { first: u8, count: u8, block_size: usize },
    /// Write `data` over consecutive blocks starting at `first`
    WriteBlocks { first: u8, block_size: usize, data: Vec<u8> },
}

impl Operation {
    pub fn family(&self) -> CardFamily {
        match self {
            Operation::ReadRecord { .. }
            | Operation::UpdateRecord { .. }
            | Operation::SetCounter { .. } => CardFamily::Secure,
            Operation::ReadBlocks { .. } | Operation::WriteBlocks { .. } => CardFamily::Memory,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::ReadRecord { .. } | Operation::ReadBlocks { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            Operation::ReadRecord { .. } => "read record",
            Operation::UpdateRecord { .. } => "update record",
            Operation::SetCounter { .. } => "set counter",
            Operation::ReadBlocks { .. } => "read blocks",
            Operation::WriteBlocks { .. } => "write blocks",
        }
    }

    fn unsupported(&self, family: CardFamily) -> CardError {
        CardError::Unsupported {
            operation: self.name(),
            family,
        }
    }
}

/// Identifies the data of a queued read in the [`SessionOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHandle(usize);

/// Commands issued by a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Every command sent, session bookkeeping included
    pub commands: usize,
    pub reads: usize,
    /// Record or block writes
    pub writes: usize,
    /// INCREASE / DECREASE commands
    pub counter_updates: usize,
}

/// Data read by a committed session.
#[derive(Debug, Default)]
pub struct SessionOutput {
    reads: Vec<Option<Vec<u8>>>,
    open_record: Option<Vec<u8>>,
    report: SessionReport,
}

impl SessionOutput {
    fn with_capacity(len: usize) -> Self {
        Self {
            reads: vec![None; len],
            ..Self::default()
        }
    }

    /// Take the bytes of a queued read. Empty if the read was not run.
    pub fn take(&mut self, handle: ReadHandle) -> Vec<u8> {
        self.reads
            .get_mut(handle.0)
            .and_then(Option::take)
            .unwrap_or_default()
    }

    /// Record read by OPEN SECURE SESSION, if one was requested.
    pub fn open_record(&self) -> Option<&[u8]> {
        self.open_record.as_deref()
    }

    pub fn report(&self) -> SessionReport {
        self.report
    }
}

/// A session for whichever family the active card belongs to.
pub enum TransactionSession<'a> {
    Secure(SecureSession<'a>),
    Memory(MemorySession<'a>),
}

impl<'a> TransactionSession<'a> {
    pub fn family(&self) -> CardFamily {
        match self {
            TransactionSession::Secure(_) => CardFamily::Secure,
            TransactionSession::Memory(_) => CardFamily::Memory,
        }
    }

    /// Queue an operation. Nothing reaches the card before [`commit`].
    ///
    /// [`commit`]: TransactionSession::commit
    pub fn prepare(&mut self, operation: Operation) -> Result<ReadHandle, CardError> {
        match self {
            TransactionSession::Secure(session) => session.prepare(operation),
            TransactionSession::Memory(session) => session.prepare(operation),
        }
    }

    pub fn queued_writes(&self) -> usize {
        match self {
            TransactionSession::Secure(session) => session.queued_writes(),
            TransactionSession::Memory(session) => session.queued_writes(),
        }
    }

    pub fn commit(self) -> Result<SessionOutput, CardError> {
        match self {
            TransactionSession::Secure(session) => session.commit(),
            TransactionSession::Memory(session) => session.commit(),
        }
    }
}

impl<'a> From<SecureSession<'a>> for TransactionSession<'a> {
    fn from(session: SecureSession<'a>) -> Self {
        TransactionSession::Secure(session)
    }
}

impl<'a> From<MemorySession<'a>> for TransactionSession<'a> {
    fn from(session: MemorySession<'a>) -> Self {
        TransactionSession::Memory(session)
    }
}

/// Operations queued by a session, in order.
#[derive(Debug, Default)]
struct Queue {
    operations: Vec<Operation>,
}

impl Queue {
    fn push(&mut self, operation: Operation) -> ReadHandle {
        self.operations.push(operation);
        ReadHandle(self.operations.len() - 1)
    }

    fn writes(&self) -> usize {
        self.operations.iter().filter(|op| op.is_write()).count()
    }
}
