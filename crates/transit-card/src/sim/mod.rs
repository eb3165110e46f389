//! In-process card simulator
//!
//! Stands in for a PC/SC reader with a card in its field, so the repository
//! can be exercised without hardware. Secure cards buffer session writes and
//! apply them only on a correctly signed close; memory cards apply each block
//! write immediately and can be told to fail partway through a commit.

mod memory;
mod secure;

pub use memory::SimulatedMemoryCard;
pub use secure::SimulatedSecureCard;

use sha2::{Digest, Sha256};
use tracing::debug;
use transit_common::{CardFamily, ProductType};

use crate::apdu::{sw, ApduResponse};
use crate::error::{SecurityError, TransportError};
use crate::reader::CardReader;
use crate::security::{AccessLevel, DefaultKifs, SecurityModule};

/// Session key shared by simulated cards and security modules
pub const DEFAULT_KEY: [u8; 16] = [
    0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A, 0x4B, 0x4C, 0x4D, 0x4E, 0x4F,
];

/// Session signature: truncated SHA-256 over key, role and transcript
fn signature(key: &[u8], role: &[u8], transcript: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(role);
    hasher.update(transcript);
    hasher.finalize()[..4].to_vec()
}

const TERMINAL: &[u8] = b"T";
const CARD: &[u8] = b"C";

/// A command APDU as received by a simulated card
#[derive(Debug, Clone, PartialEq, Eq)]
struct Command {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
}

impl Command {
    /// Short APDUs only: header, optional Lc and data, optional Le.
    fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < 4 {
            return None;
        }
        let (header, body) = raw.split_at(4);
        let data = match body {
            [] | [_] => Vec::new(),
            [lc, rest @ ..] => {
                let lc = *lc as usize;
                if rest.len() != lc && rest.len() != lc + 1 {
                    return None;
                }
                rest[..lc].to_vec()
            }
        };
        Some(Self {
            cla: header[0],
            ins: header[1],
            p1: header[2],
            p2: header[3],
            data,
        })
    }
}

/// A card in the simulated reader's field
#[derive(Debug, Clone)]
pub enum SimulatedCard {
    Secure(SimulatedSecureCard),
    Memory(SimulatedMemoryCard),
}

impl SimulatedCard {
    /// Blank card of the given product
    pub fn blank(product: ProductType) -> Self {
        match product.family() {
            CardFamily::Secure => SimulatedSecureCard::new(product).into(),
            CardFamily::Memory => SimulatedMemoryCard::new(product).into(),
        }
    }

    fn atr(&self) -> Vec<u8> {
        match self {
            SimulatedCard::Secure(card) => card.atr(),
            SimulatedCard::Memory(card) => card.atr(),
        }
    }

    fn process(&mut self, raw: &[u8]) -> ApduResponse {
        let Some(command) = Command::parse(raw) else {
            return ApduResponse::new(Vec::new(), sw::WRONG_LENGTH);
        };
        match self {
            SimulatedCard::Secure(card) => card.process(raw, &command),
            SimulatedCard::Memory(card) => card.process(&command),
        }
    }
}

impl From<SimulatedSecureCard> for SimulatedCard {
    fn from(card: SimulatedSecureCard) -> Self {
        SimulatedCard::Secure(card)
    }
}

impl From<SimulatedMemoryCard> for SimulatedCard {
    fn from(card: SimulatedMemoryCard) -> Self {
        SimulatedCard::Memory(card)
    }
}

/// One command and the card's raw answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub command: Vec<u8>,
    pub response: Vec<u8>,
}

/// Reader with a simulated card permanently in its field
#[derive(Debug, Clone)]
pub struct SimulatedReader {
    name: String,
    card: SimulatedCard,
    exchanges: Vec<Exchange>,
}

impl SimulatedReader {
    pub fn new(card: impl Into<SimulatedCard>) -> Self {
        Self {
            name: "Simulated reader 0".to_string(),
            card: card.into(),
            exchanges: Vec::new(),
        }
    }

    /// Reader holding a blank card of `product`
    pub fn blank(product: ProductType) -> Self {
        Self::new(SimulatedCard::blank(product))
    }

    pub fn card(&self) -> &SimulatedCard {
        &self.card
    }

    pub fn secure_card(&self) -> Option<&SimulatedSecureCard> {
        match &self.card {
            SimulatedCard::Secure(card) => Some(card),
            SimulatedCard::Memory(_) => None,
        }
    }

    pub fn secure_card_mut(&mut self) -> Option<&mut SimulatedSecureCard> {
        match &mut self.card {
            SimulatedCard::Secure(card) => Some(card),
            SimulatedCard::Memory(_) => None,
        }
    }

    pub fn memory_card(&self) -> Option<&SimulatedMemoryCard> {
        match &self.card {
            SimulatedCard::Memory(card) => Some(card),
            SimulatedCard::Secure(_) => None,
        }
    }

    pub fn memory_card_mut(&mut self) -> Option<&mut SimulatedMemoryCard> {
        match &mut self.card {
            SimulatedCard::Memory(card) => Some(card),
            SimulatedCard::Secure(_) => None,
        }
    }

    /// Every exchange since creation or the last [`clear_log`](Self::clear_log)
    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn clear_log(&mut self) {
        self.exchanges.clear();
    }

    /// Number of logged commands with instruction byte `ins`
    pub fn count_ins(&self, ins: u8) -> usize {
        self.exchanges
            .iter()
            .filter(|e| e.command.get(1) == Some(&ins))
            .count()
    }
}

impl CardReader for SimulatedReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn atr(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(self.card.atr())
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let response = self.card.process(command).to_raw();
        debug!(
            reader = %self.name,
            command = %hex::encode_upper(command),
            response = %hex::encode_upper(&response),
            "APDU exchange"
        );
        self.exchanges.push(Exchange {
            command: command.to_vec(),
            response: response.clone(),
        });
        Ok(response)
    }
}

/// Security module computing the simulator's session signatures
#[derive(Debug, Clone)]
pub struct SimulatedSecurityModule {
    key: [u8; 16],
    kifs: DefaultKifs,
    transcript: Option<Vec<u8>>,
    challenges: u32,
}

impl SimulatedSecurityModule {
    pub fn new(key: [u8; 16]) -> Self {
        Self {
            key,
            kifs: DefaultKifs::default(),
            transcript: None,
            challenges: 0,
        }
    }

    pub fn with_kifs(mut self, kifs: DefaultKifs) -> Self {
        self.kifs = kifs;
        self
    }

    fn transcript(&mut self) -> Result<&mut Vec<u8>, SecurityError> {
        self.transcript
            .as_mut()
            .ok_or_else(|| SecurityError::Module("no session digest in progress".to_string()))
    }
}

impl Default for SimulatedSecurityModule {
    fn default() -> Self {
        Self::new(DEFAULT_KEY)
    }
}

impl SecurityModule for SimulatedSecurityModule {
    fn default_kif(&self, level: AccessLevel) -> u8 {
        self.kifs.kif(level)
    }

    fn terminal_challenge(&mut self) -> Result<Vec<u8>, SecurityError> {
        self.challenges = self.challenges.wrapping_add(1);
        Ok(self.challenges.to_be_bytes().to_vec())
    }

    fn open_digest(&mut self, _kif: u8, open_response: &[u8]) -> Result<(), SecurityError> {
        self.transcript = Some(open_response.to_vec());
        Ok(())
    }

    fn update_digest(&mut self, command: &[u8], response: &[u8]) -> Result<(), SecurityError> {
        let transcript = self.transcript()?;
        transcript.extend_from_slice(command);
        transcript.extend_from_slice(response);
        Ok(())
    }

    fn close_digest(&mut self) -> Result<Vec<u8>, SecurityError> {
        let key = self.key;
        let transcript = self.transcript()?;
        Ok(signature(&key, TERMINAL, transcript))
    }

    fn authenticate_card(&mut self, card_signature: &[u8]) -> Result<(), SecurityError> {
        let transcript = self.transcript.take().ok_or(SecurityError::CardAuthenticationFailed)?;
        if signature(&self.key, CARD, &transcript) != card_signature {
            return Err(SecurityError::CardAuthenticationFailed);
        }
        Ok(())
    }
}
