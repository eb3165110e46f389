//! Transit Card - Ticketing card access over PC/SC readers
//!
//! This crate selects transit cards, runs transactions against them and maps
//! their records and blocks to the ticketing model of `transit-common`.
//! Secure microprocessor cards are accessed through keyed secure sessions
//! whose writes are all-or-nothing; memory cards are accessed block by block
//! with best-effort commits.

pub mod apdu;
pub mod config;
pub mod error;
pub mod layout;
pub mod reader;
pub mod repository;
pub mod security;
pub mod selection;
pub mod session;
pub mod sim;

pub use config::{AccessPolicy, TransitConfig};
pub use error::{CardError, ConfigError, LayoutError, SecurityError, SelectionError, TransportError};
pub use layout::{LayoutResolver, Location, ProductProfile};
pub use reader::{CardReader, PcscContext, PcscReader};
pub use repository::CardRepository;
pub use security::{AccessLevel, DefaultKifs, NoSecurityModule, SecurityModule};
pub use selection::{ActiveCard, CapturedSelection, CardSelector, SelectionScenario};
pub use session::{SessionReport, TransactionSession};

/// Re-export commonly used types
pub use transit_common::{Card, CardFamily, CardUpdate, ProductType};
