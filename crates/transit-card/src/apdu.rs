//! APDU framing for secure-card and memory-card commands

use crate::error::TransportError;

/// Status words this layer reacts to
pub mod sw {
    pub const SUCCESS: u16 = 0x9000;
    pub const MEMORY_FAILURE: u16 = 0x6581;
    pub const WRONG_LENGTH: u16 = 0x6700;
    pub const SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    pub const INCORRECT_SM_DATA: u16 = 0x6988;
    pub const FILE_NOT_FOUND: u16 = 0x6A82;
    pub const RECORD_NOT_FOUND: u16 = 0x6A83;
    pub const INCORRECT_P1_P2: u16 = 0x6A86;
    pub const AUTHENTICATION_FAILED: u16 = 0x6300;
    pub const INS_NOT_SUPPORTED: u16 = 0x6D00;
    pub const CLA_NOT_SUPPORTED: u16 = 0x6E00;
}

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    /// Split a raw response into data and status word
    pub fn from_raw(raw: &[u8]) -> Result<Self, TransportError> {
        if raw.len() < 2 {
            return Err(TransportError::ResponseTooShort(raw.len()));
        }
        let (data, status) = raw.split_at(raw.len() - 2);
        Ok(Self {
            data: data.to_vec(),
            sw1: status[0],
            sw2: status[1],
        })
    }

    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        Self {
            data,
            sw1: (sw >> 8) as u8,
            sw2: sw as u8,
        }
    }

    /// Raw bytes as they travel on the wire
    pub fn to_raw(&self) -> Vec<u8> {
        let mut raw = self.data.clone();
        raw.push(self.sw1);
        raw.push(self.sw2);
        raw
    }

    /// Check if the response indicates success (9000)
    pub fn is_success(&self) -> bool {
        self.status_word() == sw::SUCCESS
    }

    /// Get the full status word as a 16-bit value
    pub fn status_word(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }
}

/// APDU command builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Build the APDU command bytes
    pub fn build(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            apdu.push(self.data.len() as u8);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        apdu
    }
}

/// Instruction bytes
pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const OPEN_SECURE_SESSION: u8 = 0x8A;
    pub const CLOSE_SECURE_SESSION: u8 = 0x8E;
    pub const READ_RECORD: u8 = 0xB2;
    pub const UPDATE_RECORD: u8 = 0xDC;
    pub const INCREASE: u8 = 0x32;
    pub const DECREASE: u8 = 0x30;
    pub const GENERAL_AUTHENTICATE: u8 = 0x86;
    pub const READ_BINARY: u8 = 0xB0;
    pub const UPDATE_BINARY: u8 = 0xD6;
}

/// Secure-card commands (ISO 7816-4 class)
pub mod secure {
    use super::{ins, ApduCommand};

    const CLA: u8 = 0x00;

    /// SELECT by DF name
    pub fn select(aid: &[u8]) -> ApduCommand {
        ApduCommand::new(CLA, ins::SELECT, 0x04, 0x00)
            .data(aid.to_vec())
            .le(0x00)
    }

    /// OPEN SECURE SESSION; optionally reads `record` of `sfi` in the same command
    pub fn open_secure_session(
        key_index: u8,
        sfi: u8,
        record: u8,
        terminal_challenge: &[u8],
    ) -> ApduCommand {
        ApduCommand::new(
            CLA,
            ins::OPEN_SECURE_SESSION,
            (record << 3) | key_index,
            (sfi << 3) | 0x01,
        )
        .data(terminal_challenge.to_vec())
        .le(0x00)
    }

    /// CLOSE SECURE SESSION carrying the terminal signature
    pub fn close_secure_session(terminal_signature: &[u8]) -> ApduCommand {
        ApduCommand::new(CLA, ins::CLOSE_SECURE_SESSION, 0x00, 0x00)
            .data(terminal_signature.to_vec())
            .le(0x00)
    }

    /// CLOSE SECURE SESSION without signature: discards the session
    pub fn abort_secure_session() -> ApduCommand {
        ApduCommand::new(CLA, ins::CLOSE_SECURE_SESSION, 0x00, 0x00).le(0x00)
    }

    /// READ RECORD command
    pub fn read_record(sfi: u8, record: u8, size: usize) -> ApduCommand {
        ApduCommand::new(CLA, ins::READ_RECORD, record, (sfi << 3) | 0x04).le(size as u8)
    }

    /// UPDATE RECORD command
    pub fn update_record(sfi: u8, record: u8, data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(CLA, ins::UPDATE_RECORD, record, (sfi << 3) | 0x04).data(data)
    }

    /// INCREASE or DECREASE a counter by a 24-bit amount
    pub fn change_counter(sfi: u8, counter: u8, increase: bool, amount: u32) -> ApduCommand {
        let [_, a, b, c] = amount.to_be_bytes();
        let ins = if increase { ins::INCREASE } else { ins::DECREASE };
        ApduCommand::new(CLA, ins, counter, sfi << 3)
            .data(vec![a, b, c])
            .le(0x00)
    }
}

/// Memory-card commands (PC/SC part 3 pseudo-APDUs)
pub mod memory {
    use super::{ins, ApduCommand};

    const CLA: u8 = 0xFF;

    /// Sector key type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub enum KeyType {
        A,
        B,
    }

    impl KeyType {
        pub fn code(self) -> u8 {
            match self {
                KeyType::A => 0x60,
                KeyType::B => 0x61,
            }
        }
    }

    /// GENERAL AUTHENTICATE against the sector holding `block`
    pub fn authenticate(block: u8, key_type: KeyType, key_slot: u8) -> ApduCommand {
        ApduCommand::new(CLA, ins::GENERAL_AUTHENTICATE, 0x00, 0x00).data(vec![
            0x01,
            0x00,
            block,
            key_type.code(),
            key_slot,
        ])
    }

    /// READ BINARY of one block
    pub fn read_block(block: u8, block_size: usize) -> ApduCommand {
        ApduCommand::new(CLA, ins::READ_BINARY, 0x00, block).le(block_size as u8)
    }

    /// UPDATE BINARY of one block
    pub fn write_block(block: u8, data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(CLA, ins::UPDATE_BINARY, 0x00, block).data(data)
    }
}
