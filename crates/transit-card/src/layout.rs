//! Where each structure lives, per product type
//!
//! The table is data: adding a product means adding a row, and a table that
//! leaves a product unmapped is refused when the resolver is built.

use serde::{Deserialize, Serialize};
use transit_common::constants::{blocks, sfi, COUNTER_SIZE, MEMORY_STRUCTURE_SIZE, SECURE_RECORD_SIZE};
use transit_common::{CardFamily, MemoryLayout, ProductType, StructureKind};

use crate::apdu::memory::KeyType;
use crate::error::LayoutError;

/// Location of one structure kind on a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Location {
    /// `count` records of a secure-card file, numbered from `first`.
    Records { sfi: u8, first: u8, count: u8, size: usize },
    /// `count` consecutive memory-card blocks holding one structure.
    Blocks { first: u8, count: u8, block_size: usize },
    /// Stored inside each contract frame at `offset` (memory-card counters).
    EmbeddedInContract { offset: usize },
}

impl Location {
    /// Record number of the `number`-th (1-based) entry, if in range.
    pub fn record(&self, number: u8) -> Option<(u8, u8, usize)> {
        match *self {
            Location::Records { sfi, first, count, size } if (1..=count).contains(&number) => {
                Some((sfi, first.checked_add(number - 1)?, size))
            }
            _ => None,
        }
    }

    /// Physical block numbers spanned by a block location.
    pub fn block_numbers(&self) -> Vec<u8> {
        match *self {
            Location::Blocks { first, count, .. } => {
                (0..count).filter_map(|offset| first.checked_add(offset)).collect()
            }
            _ => Vec::new(),
        }
    }

    fn frame_len(&self) -> Option<usize> {
        match *self {
            Location::Records { size, .. } => Some(size),
            Location::Blocks { count, block_size, .. } => Some(count as usize * block_size),
            Location::EmbeddedInContract { .. } => None,
        }
    }
}

/// Sector authentication required before touching memory-card blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorAuthentication {
    /// Any block of the sector to unlock
    pub block: u8,
    pub key_type: KeyType,
    /// Reader key slot holding the sector key
    pub key_slot: u8,
    /// Blocks per sector
    pub sector_size: u8,
}

impl SectorAuthentication {
    pub fn covers(&self, block: u8) -> bool {
        block / self.sector_size == self.block / self.sector_size
    }
}

/// One row of the layout table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductProfile {
    pub product: ProductType,
    pub environment: Location,
    pub contracts: Location,
    pub event: Location,
    pub counters: Location,
    #[serde(default)]
    pub authentication: Option<SectorAuthentication>,
}

impl ProductProfile {
    pub fn family(&self) -> CardFamily {
        self.product.family()
    }

    pub fn contract_count(&self) -> u8 {
        self.product.contract_count()
    }

    pub fn location(&self, kind: StructureKind) -> Location {
        match kind {
            StructureKind::Environment => self.environment,
            StructureKind::Contract => self.contracts,
            StructureKind::Event => self.event,
            StructureKind::Counters => self.counters,
        }
    }

    fn secure(product: ProductType) -> Self {
        let count = product.contract_count();
        let record = |sfi, count| Location::Records {
            sfi,
            first: 1,
            count,
            size: SECURE_RECORD_SIZE,
        };
        Self {
            product,
            environment: record(sfi::ENVIRONMENT_AND_HOLDER, 1),
            contracts: record(sfi::CONTRACTS, count),
            event: record(sfi::EVENTS_LOG, 1),
            counters: Location::Records {
                sfi: sfi::COUNTERS,
                first: 1,
                count: 1,
                size: count as usize * COUNTER_SIZE,
            },
            authentication: None,
        }
    }

    fn memory(product: ProductType, layout: MemoryLayout) -> Self {
        let span = |first| match layout {
            MemoryLayout::SingleBlock => Location::Blocks {
                first,
                count: 1,
                block_size: blocks::SINGLE_BLOCK_SIZE,
            },
            MemoryLayout::MultiBlock => Location::Blocks {
                first,
                count: blocks::MULTI_BLOCK_COUNT,
                block_size: blocks::MULTI_BLOCK_SIZE,
            },
        };
        let (environment, contract, event) = match layout {
            MemoryLayout::SingleBlock => (
                blocks::SINGLE_ENVIRONMENT,
                blocks::SINGLE_CONTRACT,
                blocks::SINGLE_EVENT,
            ),
            MemoryLayout::MultiBlock => (
                blocks::MULTI_ENVIRONMENT_FIRST,
                blocks::MULTI_CONTRACT_FIRST,
                blocks::MULTI_EVENT_FIRST,
            ),
        };
        Self {
            product,
            environment: span(environment),
            contracts: span(contract),
            event: span(event),
            counters: Location::EmbeddedInContract {
                offset: transit_common::constants::MEMORY_COUNTER_OFFSET,
            },
            authentication: product.requires_authentication().then_some(SectorAuthentication {
                block: blocks::AUTHENTICATION_BLOCK,
                key_type: KeyType::A,
                key_slot: blocks::AUTHENTICATION_KEY_SLOT,
                sector_size: 4,
            }),
        }
    }

    fn validate(&self) -> Result<(), LayoutError> {
        let inconsistent = |reason: &str| LayoutError::Inconsistent {
            product: self.product,
            reason: reason.to_string(),
        };
        let structures = [self.environment, self.contracts, self.event];

        match self.family() {
            CardFamily::Secure => {
                if !structures.iter().all(|l| matches!(l, Location::Records { .. })) {
                    return Err(inconsistent("secure cards are addressed by records"));
                }
                if !matches!(self.contracts, Location::Records { count, .. } if count == self.contract_count()) {
                    return Err(inconsistent("contract record count differs from product"));
                }
                match self.counters {
                    Location::Records { size, .. }
                        if size == self.contract_count() as usize * COUNTER_SIZE => {}
                    _ => return Err(inconsistent("counter record must hold one counter per contract")),
                }
                if self.authentication.is_some() {
                    return Err(inconsistent("secure cards use session keys, not sector keys"));
                }
            }
            CardFamily::Memory => {
                if !structures.iter().all(|l| matches!(l, Location::Blocks { .. })) {
                    return Err(inconsistent("memory cards are addressed by blocks"));
                }
                if structures.iter().any(|l| l.frame_len() != Some(MEMORY_STRUCTURE_SIZE)) {
                    return Err(inconsistent("memory structures span 16 bytes"));
                }
                if !matches!(self.counters, Location::EmbeddedInContract { .. }) {
                    return Err(inconsistent("memory-card counters live in the contract frame"));
                }
                match (self.product.requires_authentication(), &self.authentication) {
                    (true, None) => return Err(inconsistent("sector authentication missing")),
                    (false, Some(_)) => return Err(inconsistent("product has no sector keys")),
                    (true, Some(auth)) => {
                        let all_covered = structures
                            .iter()
                            .flat_map(Location::block_numbers)
                            .all(|b| auth.covers(b));
                        if auth.sector_size == 0 || !all_covered {
                            return Err(inconsistent("structures must lie in the authenticated sector"));
                        }
                    }
                    (false, None) => {}
                }
            }
        }
        Ok(())
    }
}

/// Lookup table from product type to structure locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutResolver {
    /// Indexed by [`ProductType::index`]
    profiles: Vec<ProductProfile>,
}

impl LayoutResolver {
    /// Build a resolver; every product type must have exactly one
    /// consistent row.
    pub fn new(rows: Vec<ProductProfile>) -> Result<Self, LayoutError> {
        let mut slots: Vec<Option<ProductProfile>> = vec![None; ProductType::ALL.len()];
        for row in rows {
            row.validate()?;
            let slot = &mut slots[row.product.index()];
            if slot.is_some() {
                return Err(LayoutError::DuplicateProduct(row.product));
            }
            *slot = Some(row);
        }

        let profiles = slots
            .into_iter()
            .zip(ProductType::ALL)
            .map(|(slot, product)| slot.ok_or(LayoutError::MissingProduct(product)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { profiles })
    }

    /// The built-in table.
    pub fn default_rows() -> Vec<ProductProfile> {
        ProductType::ALL
            .into_iter()
            .map(|product| match product.memory_layout() {
                None => ProductProfile::secure(product),
                Some(layout) => ProductProfile::memory(product, layout),
            })
            .collect()
    }

    pub fn profile(&self, product: ProductType) -> &ProductProfile {
        &self.profiles[product.index()]
    }

    pub fn resolve(&self, product: ProductType, kind: StructureKind) -> Location {
        self.profile(product).location(kind)
    }

    pub fn rows(&self) -> &[ProductProfile] {
        &self.profiles
    }
}

impl Default for LayoutResolver {
    fn default() -> Self {
        Self {
            profiles: Self::default_rows(),
        }
    }
}
