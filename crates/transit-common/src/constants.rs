//! Card layout constants shared by every ticketing application.

/// Application identifiers tried during selection, in scenario order.
pub mod aids {
    /// Keyple generic test application
    pub const KEYPLE_GENERIC: &[u8] = &[0xA0, 0x00, 0x00, 0x02, 0x91, 0xFF, 0x91, 0x01];

    /// Calypso Light ("1TIC.ICA3")
    pub const CALYPSO_LIGHT: &[u8] = &[0x31, 0x54, 0x49, 0x43, 0x2E, 0x49, 0x43, 0x41, 0x33];

    /// CD Light / GTML ("1TIC.ICA1")
    pub const CD_LIGHT_GTML: &[u8] = &[0x31, 0x54, 0x49, 0x43, 0x2E, 0x49, 0x43, 0x41, 0x31];

    /// Normalized IDF application
    pub const NORMALIZED_IDF: &[u8] = &[0xA0, 0x00, 0x00, 0x04, 0x04, 0x01, 0x25, 0x09, 0x01, 0x01];
}

/// Short file identifiers of the secure-card ticketing files.
pub mod sfi {
    pub const ENVIRONMENT_AND_HOLDER: u8 = 0x07;
    pub const EVENTS_LOG: u8 = 0x08;
    pub const CONTRACTS: u8 = 0x09;
    pub const COUNTERS: u8 = 0x19;
}

/// Default key identifiers per session access level.
pub mod kif {
    pub const PERSONALIZATION: u8 = 0x21;
    pub const LOAD: u8 = 0x27;
    pub const DEBIT: u8 = 0x30;
}

/// Secure-card record length for environment, contract and event files.
pub const SECURE_RECORD_SIZE: usize = 29;

/// Length of one counter inside the counter file.
pub const COUNTER_SIZE: usize = 3;

/// Length of one structure on a memory card, whatever its block split.
pub const MEMORY_STRUCTURE_SIZE: usize = 16;

/// Offset of the embedded counter inside a memory-card contract frame.
pub const MEMORY_COUNTER_OFFSET: usize = 13;

/// Significant bytes of each structure; the remainder of a frame is padding.
pub const ENVIRONMENT_FIELDS_SIZE: usize = 15;
pub const CONTRACT_FIELDS_SIZE: usize = 13;
pub const EVENT_FIELDS_SIZE: usize = 14;

/// Number of mirrored priority codes carried by an event.
pub const EVENT_PRIORITY_SLOTS: usize = 4;

/// Memory-card block numbers.
pub mod blocks {
    /// Single-block layout: one 16-byte block per structure.
    pub const SINGLE_ENVIRONMENT: u8 = 4;
    pub const SINGLE_CONTRACT: u8 = 5;
    pub const SINGLE_EVENT: u8 = 6;
    pub const SINGLE_BLOCK_SIZE: usize = 16;

    /// Multi-block layout: four 4-byte blocks per structure.
    pub const MULTI_ENVIRONMENT_FIRST: u8 = 4;
    pub const MULTI_CONTRACT_FIRST: u8 = 8;
    pub const MULTI_EVENT_FIRST: u8 = 12;
    pub const MULTI_BLOCK_COUNT: u8 = 4;
    pub const MULTI_BLOCK_SIZE: usize = 4;

    /// Block used to authenticate the ticketing sector.
    pub const AUTHENTICATION_BLOCK: u8 = 4;
    /// Reader key slot holding the sector key.
    pub const AUTHENTICATION_KEY_SLOT: u8 = 0;
}

/// Environment validity, in years, written at personalization.
pub const ENVIRONMENT_VALIDITY_YEARS: i32 = 6;
