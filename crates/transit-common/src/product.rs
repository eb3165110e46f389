//! Card families and product types

use serde::{Deserialize, Serialize};

/// How a card is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardFamily {
    /// Microprocessor card; every access goes through a keyed secure session.
    Secure,
    /// Storage card addressed block by block.
    Memory,
}

/// Split of a memory-card structure over physical blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayout {
    /// One 16-byte block per structure
    SingleBlock,
    /// Four 4-byte blocks per structure
    MultiBlock,
}

/// Card product type. Fixes the contract count and, for memory cards,
/// the block layout and whether sector authentication is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    CalypsoBasic,
    CalypsoLight,
    CalypsoPrime,
    MifareClassic1k,
    MifareUltralight,
    St25Srt512,
}

impl ProductType {
    pub const ALL: [ProductType; 6] = [
        ProductType::CalypsoBasic,
        ProductType::CalypsoLight,
        ProductType::CalypsoPrime,
        ProductType::MifareClassic1k,
        ProductType::MifareUltralight,
        ProductType::St25Srt512,
    ];

    /// Position in [`ProductType::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn family(self) -> CardFamily {
        match self {
            ProductType::CalypsoBasic | ProductType::CalypsoLight | ProductType::CalypsoPrime => {
                CardFamily::Secure
            }
            ProductType::MifareClassic1k
            | ProductType::MifareUltralight
            | ProductType::St25Srt512 => CardFamily::Memory,
        }
    }

    pub fn contract_count(self) -> u8 {
        match self {
            ProductType::CalypsoBasic => 1,
            ProductType::CalypsoLight => 2,
            ProductType::CalypsoPrime => 4,
            ProductType::MifareClassic1k
            | ProductType::MifareUltralight
            | ProductType::St25Srt512 => 1,
        }
    }

    pub fn memory_layout(self) -> Option<MemoryLayout> {
        match self {
            ProductType::MifareClassic1k => Some(MemoryLayout::SingleBlock),
            ProductType::MifareUltralight | ProductType::St25Srt512 => {
                Some(MemoryLayout::MultiBlock)
            }
            _ => None,
        }
    }

    pub fn requires_authentication(self) -> bool {
        matches!(self, ProductType::MifareClassic1k)
    }

    /// Secure product from the application type byte of the startup info.
    pub fn from_application_type(application_type: u8) -> Option<Self> {
        match application_type {
            0x00 | 0xFF => None,
            0x20..=0x27 => Some(ProductType::CalypsoLight),
            0x28..=0x2F => Some(ProductType::CalypsoBasic),
            _ => Some(ProductType::CalypsoPrime),
        }
    }

    /// Memory product from the PC/SC part 3 card name carried in the ATR.
    pub fn from_card_name(card_name: u16) -> Option<Self> {
        match card_name {
            0x0001 => Some(ProductType::MifareClassic1k),
            0x0003 => Some(ProductType::MifareUltralight),
            0x0007 => Some(ProductType::St25Srt512),
            _ => None,
        }
    }

    pub fn card_name(self) -> Option<u16> {
        match self {
            ProductType::MifareClassic1k => Some(0x0001),
            ProductType::MifareUltralight => Some(0x0003),
            ProductType::St25Srt512 => Some(0x0007),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProductType::CalypsoBasic => "Calypso Basic",
            ProductType::CalypsoLight => "Calypso Light",
            ProductType::CalypsoPrime => "Calypso Prime",
            ProductType::MifareClassic1k => "MIFARE Classic 1K",
            ProductType::MifareUltralight => "MIFARE Ultralight",
            ProductType::St25Srt512 => "ST25 SRT512",
        }
    }
}
