//! Transit Common - Ticketing data model and card structure codec
//!
//! Shared by the card access layer and its front ends: the typed
//! environment/contract/event structures, the product type table that fixes
//! contract counts, and the codec that maps them to the fixed-length card
//! records (secure cards) and blocks (memory cards).

pub mod codec;
pub mod constants;
pub mod model;
pub mod product;
pub mod tlv;
pub mod types;

pub use codec::{decode, encode, CodecError, Content, Frame, Structure, StructureKind};
pub use model::{Card, CardUpdate, Contract, ContractSlot, Decoded, Environment, Event, Holder};
pub use product::{CardFamily, MemoryLayout, ProductType};
pub use types::{CounterValue, DateCompact, PriorityCode, TimeCompact, VersionNumber};
