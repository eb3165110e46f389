//! Reader capability and its PC/SC implementation

use pcsc::{Attribute, Card, Context, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use tracing::debug;

use crate::error::TransportError;

/// Transmit one command to the card in the field and return its raw
/// response (data followed by SW1 SW2).
///
/// Timeouts and transport-level retries belong to the implementation.
pub trait CardReader {
    fn name(&self) -> &str;

    /// Answer-to-reset of the card currently in the field.
    fn atr(&mut self) -> Result<Vec<u8>, TransportError>;

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError>;
}

impl<R: CardReader + ?Sized> CardReader for &mut R {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn atr(&mut self) -> Result<Vec<u8>, TransportError> {
        (**self).atr()
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transmit(command)
    }
}

impl<R: CardReader + ?Sized> CardReader for Box<R> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn atr(&mut self) -> Result<Vec<u8>, TransportError> {
        (**self).atr()
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transmit(command)
    }
}

/// PC/SC context used to enumerate readers and connect to cards
pub struct PcscContext {
    context: Context,
}

impl PcscContext {
    /// Establish a user-scope PC/SC context
    pub fn establish() -> Result<Self, TransportError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<String>, TransportError> {
        let mut readers_buf = [0; 2048];
        let readers = self.context.list_readers(&mut readers_buf)?;

        Ok(readers
            .map(|r| r.to_string_lossy().into_owned())
            .collect())
    }

    /// Connect to the card on the first available reader
    pub fn connect_first(&self) -> Result<PcscReader, TransportError> {
        let mut readers_buf = [0; 2048];
        let mut readers = self.context.list_readers(&mut readers_buf)?;

        let reader = readers.next().ok_or(pcsc::Error::NoReadersAvailable)?;
        let name = reader.to_string_lossy().into_owned();
        let card = self.connect_card(reader, &name)?;
        Ok(PcscReader { card, name })
    }

    /// Connect to the card on a reader given by name
    pub fn connect(&self, reader_name: &str) -> Result<PcscReader, TransportError> {
        let c_name = std::ffi::CString::new(reader_name)
            .map_err(|_| TransportError::Reader(format!("invalid reader name {reader_name:?}")))?;
        let card = self.connect_card(&c_name, reader_name)?;
        Ok(PcscReader {
            card,
            name: reader_name.to_string(),
        })
    }

    fn connect_card(&self, reader: &std::ffi::CStr, name: &str) -> Result<Card, TransportError> {
        match self.context.connect(reader, ShareMode::Shared, Protocols::ANY) {
            Ok(card) => Ok(card),
            Err(pcsc::Error::NoSmartcard) | Err(pcsc::Error::RemovedCard) => {
                Err(TransportError::NoCard(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// A card connected through a PC/SC reader
pub struct PcscReader {
    card: Card,
    name: String,
}

impl CardReader for PcscReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn atr(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(self.card.get_attribute_owned(Attribute::AtrString)?)
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut rapdu_buf = [0; MAX_BUFFER_SIZE];
        let rapdu = self.card.transmit(command, &mut rapdu_buf)?;
        debug!(
            reader = %self.name,
            command = %hex::encode_upper(command),
            response = %hex::encode_upper(rapdu),
            "APDU exchange"
        );
        Ok(rapdu.to_vec())
    }
}
