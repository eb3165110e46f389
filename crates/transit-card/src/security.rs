//! Security module seam for secure-card sessions

use serde::{Deserialize, Serialize};
use transit_common::constants::kif;

use crate::error::SecurityError;

/// Keyset a secure session unlocks. Fixed for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Personalization,
    Load,
    Debit,
}

impl AccessLevel {
    /// Key index sent in OPEN SECURE SESSION
    pub fn key_index(self) -> u8 {
        match self {
            AccessLevel::Personalization => 1,
            AccessLevel::Load => 2,
            AccessLevel::Debit => 3,
        }
    }
}

/// Default key identifiers per access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultKifs {
    pub personalization: u8,
    pub load: u8,
    pub debit: u8,
}

impl DefaultKifs {
    pub fn kif(&self, level: AccessLevel) -> u8 {
        match level {
            AccessLevel::Personalization => self.personalization,
            AccessLevel::Load => self.load,
            AccessLevel::Debit => self.debit,
        }
    }
}

impl Default for DefaultKifs {
    fn default() -> Self {
        Self {
            personalization: kif::PERSONALIZATION,
            load: kif::LOAD,
            debit: kif::DEBIT,
        }
    }
}

/// Cryptographic side of a secure session.
///
/// One instance serves one session at a time: the digest is started by
/// [`open_digest`](SecurityModule::open_digest), fed every command/response
/// pair, and closed by [`close_digest`](SecurityModule::close_digest).
pub trait SecurityModule {
    fn default_kif(&self, level: AccessLevel) -> u8;

    /// Challenge sent with OPEN SECURE SESSION.
    fn terminal_challenge(&mut self) -> Result<Vec<u8>, SecurityError>;

    /// Start the session digest from the open response data.
    fn open_digest(&mut self, kif: u8, open_response: &[u8]) -> Result<(), SecurityError>;

    fn update_digest(&mut self, command: &[u8], response: &[u8]) -> Result<(), SecurityError>;

    /// Terminal signature for CLOSE SECURE SESSION.
    fn close_digest(&mut self) -> Result<Vec<u8>, SecurityError>;

    /// Verify the signature returned by the card on close.
    fn authenticate_card(&mut self, card_signature: &[u8]) -> Result<(), SecurityError>;
}

impl<S: SecurityModule + ?Sized> SecurityModule for &mut S {
    fn default_kif(&self, level: AccessLevel) -> u8 {
        (**self).default_kif(level)
    }

    fn terminal_challenge(&mut self) -> Result<Vec<u8>, SecurityError> {
        (**self).terminal_challenge()
    }

    fn open_digest(&mut self, kif: u8, open_response: &[u8]) -> Result<(), SecurityError> {
        (**self).open_digest(kif, open_response)
    }

    fn update_digest(&mut self, command: &[u8], response: &[u8]) -> Result<(), SecurityError> {
        (**self).update_digest(command, response)
    }

    fn close_digest(&mut self) -> Result<Vec<u8>, SecurityError> {
        (**self).close_digest()
    }

    fn authenticate_card(&mut self, card_signature: &[u8]) -> Result<(), SecurityError> {
        (**self).authenticate_card(card_signature)
    }
}

impl<S: SecurityModule + ?Sized> SecurityModule for Box<S> {
    fn default_kif(&self, level: AccessLevel) -> u8 {
        (**self).default_kif(level)
    }

    fn terminal_challenge(&mut self) -> Result<Vec<u8>, SecurityError> {
        (**self).terminal_challenge()
    }

    fn open_digest(&mut self, kif: u8, open_response: &[u8]) -> Result<(), SecurityError> {
        (**self).open_digest(kif, open_response)
    }

    fn update_digest(&mut self, command: &[u8], response: &[u8]) -> Result<(), SecurityError> {
        (**self).update_digest(command, response)
    }

    fn close_digest(&mut self) -> Result<Vec<u8>, SecurityError> {
        (**self).close_digest()
    }

    fn authenticate_card(&mut self, card_signature: &[u8]) -> Result<(), SecurityError> {
        (**self).authenticate_card(card_signature)
    }
}

/// Placeholder for deployments that only handle memory cards.
/// Every secure session fails with [`SecurityError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurityModule;

impl SecurityModule for NoSecurityModule {
    fn default_kif(&self, level: AccessLevel) -> u8 {
        DefaultKifs::default().kif(level)
    }

    fn terminal_challenge(&mut self) -> Result<Vec<u8>, SecurityError> {
        Err(SecurityError::Unavailable)
    }

    fn open_digest(&mut self, _kif: u8, _open_response: &[u8]) -> Result<(), SecurityError> {
        Err(SecurityError::Unavailable)
    }

    fn update_digest(&mut self, _command: &[u8], _response: &[u8]) -> Result<(), SecurityError> {
        Err(SecurityError::Unavailable)
    }

    fn close_digest(&mut self) -> Result<Vec<u8>, SecurityError> {
        Err(SecurityError::Unavailable)
    }

    fn authenticate_card(&mut self, _card_signature: &[u8]) -> Result<(), SecurityError> {
        Err(SecurityError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_indexes() {
        assert_eq!(AccessLevel::Personalization.key_index(), 1);
        assert_eq!(AccessLevel::Load.key_index(), 2);
        assert_eq!(AccessLevel::Debit.key_index(), 3);
    }

    #[test]
    fn test_default_kifs() {
        let kifs = DefaultKifs::default();
        assert_eq!(kifs.kif(AccessLevel::Personalization), 0x21);
        assert_eq!(kifs.kif(AccessLevel::Load), 0x27);
        assert_eq!(kifs.kif(AccessLevel::Debit), 0x30);
    }

    #[test]
    fn test_no_security_module_refuses_sessions() {
        let mut module = NoSecurityModule;
        assert!(matches!(
            module.terminal_challenge(),
            Err(SecurityError::Unavailable)
        ));
        assert_eq!(module.default_kif(AccessLevel::Load), 0x27);
    }
}
