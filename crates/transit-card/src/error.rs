//! Error taxonomy for card access

use thiserror::Error;
use transit_common::{CardFamily, CodecError};

/// Reader I/O failure. Passed through as reported by the reader.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    #[error("response too short: {0} bytes")]
    ResponseTooShort(usize),

    #[error("no card present in reader {0}")]
    NoCard(String),

    #[error("reader error: {0}")]
    Reader(String),
}

/// No candidate of the selection scenario matched the card.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no candidate application matched the card")]
    NoMatch,

    #[error("captured selection refers to candidate {index}, scenario has {len}")]
    UnknownCandidate { index: usize, len: usize },

    #[error("invalid selection document: {0}")]
    Document(#[from] serde_json::Error),
}

/// Session open, authentication or close failure. Nothing is committed,
/// except for [`SecurityError::CardUnverified`].
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("no security module available for secure sessions")]
    Unavailable,

    #[error("card refused to open the secure session (status {sw:04X})")]
    OpenRejected { sw: u16 },

    #[error("card answered with key {actual:02X}, expected {expected:02X}")]
    KeyMismatch { expected: u8, actual: u8 },

    #[error("malformed secure session response ({0} bytes)")]
    MalformedOpenResponse(usize),

    #[error("card rejected the session close (status {sw:04X}); queued changes discarded")]
    CloseRejected { sw: u16 },

    #[error("card signature did not verify")]
    CardAuthenticationFailed,

    #[error("card committed {writes} write(s) and {counter_updates} counter update(s) but its signature did not verify")]
    CardUnverified {
        writes: usize,
        counter_updates: usize,
        #[source]
        source: Box<SecurityError>,
    },

    #[error("sector authentication failed at block {block} (status {sw:04X})")]
    SectorAuthentication { block: u8, sw: u16 },

    #[error("security module error: {0}")]
    Module(String),
}

/// Layout table configuration error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("no layout entry for product {0:?}")]
    MissingProduct(transit_common::ProductType),

    #[error("duplicate layout entry for product {0:?}")]
    DuplicateProduct(transit_common::ProductType),

    #[error("layout for {product:?}: {reason}")]
    Inconsistent {
        product: transit_common::ProductType,
        reason: String,
    },
}

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Any failure of a card operation.
#[derive(Debug, Error)]
pub enum CardError {
    #[error("selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error("security failure: {0}")]
    Security(#[from] SecurityError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("card rejected {command} (status {sw:04X}) after {completed_writes} write(s)")]
    CommandRejected {
        command: &'static str,
        sw: u16,
        completed_writes: usize,
    },

    #[error("{operation} is not supported on {family:?} cards")]
    Unsupported {
        operation: &'static str,
        family: CardFamily,
    },

    #[error("block {block} lies outside the authenticated sector")]
    UnauthenticatedBlock { block: u8 },

    #[error("contract {number} does not exist (card has {count})")]
    InvalidContract { number: u8, count: u8 },

    #[error("{0} must be decoded before it can be written")]
    MissingStructure(&'static str),

    #[error("date outside the card's date range")]
    DateOutOfRange,
}
