//! Ticketing structures held on a card

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::codec::{field, CodecError, Content, Structure, StructureKind};
use crate::constants::{
    CONTRACT_FIELDS_SIZE, ENVIRONMENT_FIELDS_SIZE, ENVIRONMENT_VALIDITY_YEARS, EVENT_FIELDS_SIZE,
    EVENT_PRIORITY_SLOTS,
};
use crate::types::{
    first_of_month_after_years, CounterValue, DateCompact, PriorityCode, TimeCompact,
    VersionNumber,
};

/// Result of decoding one structure of a card read.
pub type Decoded<T> = Result<Content<T>, CodecError>;

/// Optional card holder identity stored with the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Holder {
    pub company: u8,
    pub id_number: u32,
}

/// Environment and holder structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub version: VersionNumber,
    pub application_number: u32,
    pub issuing_date: DateCompact,
    pub end_date: DateCompact,
    pub holder: Option<Holder>,
}

impl Environment {
    /// Environment written at personalization: issued `today`, valid until
    /// the first of the month six years later.
    pub fn personalized(today: NaiveDate) -> Option<Self> {
        let end = first_of_month_after_years(today, ENVIRONMENT_VALIDITY_YEARS)?;
        Some(Self {
            version: VersionNumber::CURRENT,
            application_number: 1,
            issuing_date: DateCompact::from_date(today)?,
            end_date: DateCompact::from_date(end)?,
            holder: None,
        })
    }
}

impl Structure for Environment {
    const KIND: StructureKind = StructureKind::Environment;
    const FIELDS_SIZE: usize = ENVIRONMENT_FIELDS_SIZE;

    fn write_fields(&self, out: &mut [u8]) {
        out[0] = self.version.get();
        field::put_u32(out, 1, self.application_number);
        field::put_u16(out, 5, self.issuing_date.0);
        field::put_u16(out, 7, self.end_date.0);
        if let Some(holder) = self.holder {
            out[9] = 1;
            out[10] = holder.company;
            field::put_u32(out, 11, holder.id_number);
        }
    }

    fn read_fields(fields: &[u8]) -> Result<Self, CodecError> {
        let holder = match fields[9] {
            0 if fields[10..15].iter().all(|&b| b == 0) => None,
            1 => Some(Holder {
                company: fields[10],
                id_number: field::u32_at(fields, 11),
            }),
            flag => {
                return Err(CodecError::InvalidField {
                    kind: Self::KIND,
                    field: "holder flag",
                    value: flag,
                })
            }
        };
        Ok(Self {
            version: read_version(Self::KIND, fields[0])?,
            application_number: field::u32_at(fields, 1),
            issuing_date: DateCompact(field::u16_at(fields, 5)),
            end_date: DateCompact(field::u16_at(fields, 7)),
            holder,
        })
    }
}

/// Fare contract. Its counter lives in a separate structure, see [`ContractSlot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub version: VersionNumber,
    pub tariff: PriorityCode,
    pub sale_date: DateCompact,
    pub validity_end_date: DateCompact,
    /// Serial number of the security module that sold the contract
    pub sale_sam: u32,
    pub sale_counter: CounterValue,
}

impl Structure for Contract {
    const KIND: StructureKind = StructureKind::Contract;
    const FIELDS_SIZE: usize = CONTRACT_FIELDS_SIZE;

    fn write_fields(&self, out: &mut [u8]) {
        out[0] = self.version.get();
        out[1] = self.tariff.code();
        field::put_u16(out, 2, self.sale_date.0);
        field::put_u16(out, 4, self.validity_end_date.0);
        field::put_u32(out, 6, self.sale_sam);
        out[10..13].copy_from_slice(&self.sale_counter.to_be_bytes());
    }

    fn read_fields(fields: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            version: read_version(Self::KIND, fields[0])?,
            tariff: read_priority(Self::KIND, "tariff", fields[1])?,
            sale_date: DateCompact(field::u16_at(fields, 2)),
            validity_end_date: DateCompact(field::u16_at(fields, 4)),
            sale_sam: field::u32_at(fields, 6),
            sale_counter: CounterValue::from_be_bytes([fields[10], fields[11], fields[12]]),
        })
    }
}

/// Last usage event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub version: VersionNumber,
    pub date_stamp: DateCompact,
    pub time_stamp: TimeCompact,
    pub location: u32,
    /// 1-based number of the contract used, 0 when none
    pub contract_used: u8,
    /// One priority per contract slot; slots the card does not have are
    /// [`PriorityCode::Forbidden`].
    pub priorities: [PriorityCode; EVENT_PRIORITY_SLOTS],
}

impl Structure for Event {
    const KIND: StructureKind = StructureKind::Event;
    const FIELDS_SIZE: usize = EVENT_FIELDS_SIZE;

    fn write_fields(&self, out: &mut [u8]) {
        out[0] = self.version.get();
        field::put_u16(out, 1, self.date_stamp.0);
        field::put_u16(out, 3, self.time_stamp.0);
        field::put_u32(out, 5, self.location);
        out[9] = self.contract_used;
        for (slot, priority) in self.priorities.iter().enumerate() {
            out[10 + slot] = priority.code();
        }
    }

    fn read_fields(fields: &[u8]) -> Result<Self, CodecError> {
        let mut priorities = [PriorityCode::Forbidden; EVENT_PRIORITY_SLOTS];
        for (slot, priority) in priorities.iter_mut().enumerate() {
            *priority = read_priority(Self::KIND, "priority", fields[10 + slot])?;
        }
        Ok(Self {
            version: read_version(Self::KIND, fields[0])?,
            date_stamp: DateCompact(field::u16_at(fields, 1)),
            time_stamp: TimeCompact(field::u16_at(fields, 3)),
            location: field::u32_at(fields, 5),
            contract_used: fields[9],
            priorities,
        })
    }
}

fn read_version(kind: StructureKind, value: u8) -> Result<VersionNumber, CodecError> {
    VersionNumber::new(value).ok_or(CodecError::InvalidField {
        kind,
        field: "version",
        value,
    })
}

fn read_priority(
    kind: StructureKind,
    field: &'static str,
    value: u8,
) -> Result<PriorityCode, CodecError> {
    PriorityCode::from_code(value).ok_or(CodecError::InvalidField { kind, field, value })
}

/// A contract slot and the counter linked to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSlot {
    /// 1-based contract number, as used on the card
    pub number: u8,
    pub contract: Decoded<Contract>,
    pub counter: CounterValue,
}

impl ContractSlot {
    /// Tariff mirrored into the event for this slot.
    pub fn priority(&self) -> PriorityCode {
        match &self.contract {
            Ok(Content::Present(contract)) => contract.tariff,
            _ => PriorityCode::Forbidden,
        }
    }
}

/// Everything read from a card in one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub environment: Decoded<Environment>,
    /// Exactly the product type's contract count, slot 1 first.
    pub contracts: Vec<ContractSlot>,
    pub event: Decoded<Event>,
}

impl Card {
    pub fn contract(&self, number: u8) -> Option<&ContractSlot> {
        self.contracts.iter().find(|slot| slot.number == number)
    }

    pub fn contract_mut(&mut self, number: u8) -> Option<&mut ContractSlot> {
        self.contracts.iter_mut().find(|slot| slot.number == number)
    }

    /// Event priorities derived from the contract slots.
    pub fn mirrored_priorities(&self) -> [PriorityCode; EVENT_PRIORITY_SLOTS] {
        let mut priorities = [PriorityCode::Forbidden; EVENT_PRIORITY_SLOTS];
        for (priority, slot) in priorities.iter_mut().zip(&self.contracts) {
            *priority = slot.priority();
        }
        priorities
    }
}

/// Structures a write must touch. Everything else stays as it is on the card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardUpdate {
    /// 1-based contract numbers
    pub updated_contracts: BTreeSet<u8>,
    pub event_updated: bool,
}

impl CardUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contract(mut self, number: u8) -> Self {
        self.updated_contracts.insert(number);
        self
    }

    pub fn event(mut self) -> Self {
        self.event_updated = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updated_contracts.is_empty() && !self.event_updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode, Frame};
    use crate::constants::SECURE_RECORD_SIZE;

    fn sample_contract(tariff: PriorityCode) -> Contract {
        Contract {
            version: VersionNumber::CURRENT,
            tariff,
            sale_date: DateCompact(6000),
            validity_end_date: DateCompact(6030),
            sale_sam: 0x1122_3344,
            sale_counter: CounterValue::new(42).unwrap(),
        }
    }

    fn slot(number: u8, contract: Decoded<Contract>) -> ContractSlot {
        ContractSlot {
            number,
            contract,
            counter: CounterValue::ZERO,
        }
    }

    #[test]
    fn test_environment_layout() {
        let env = Environment {
            version: VersionNumber::CURRENT,
            application_number: 0x0102_0304,
            issuing_date: DateCompact(0x1234),
            end_date: DateCompact(0x5678),
            holder: Some(Holder {
                company: 7,
                id_number: 0xCAFE_BABE,
            }),
        };
        let bytes = encode(&Content::Present(env), Frame::SecureRecord);
        assert_eq!(bytes.len(), SECURE_RECORD_SIZE);
        assert_eq!(
            &bytes[..15],
            &[0x01, 0x01, 0x02, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78, 0x01, 0x07, 0xCA, 0xFE, 0xBA, 0xBE]
        );
        assert!(bytes[15..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_environment_rejects_bad_holder_flag() {
        let mut bytes = vec![0u8; 16];
        bytes[0] = 1;
        bytes[9] = 2;
        let err = decode::<Environment>(&bytes, Frame::MemoryStructure).unwrap_err();
        assert!(matches!(err, CodecError::InvalidField { field: "holder flag", .. }));
    }

    #[test]
    fn test_environment_rejects_holder_bytes_without_flag() {
        let mut bytes = vec![0u8; 16];
        bytes[0] = 1;
        bytes[12] = 9;
        assert!(decode::<Environment>(&bytes, Frame::MemoryStructure).is_err());
    }

    #[test]
    fn test_personalized_environment() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let env = Environment::personalized(today).unwrap();
        assert_eq!(env.issuing_date.to_date(), Some(today));
        assert_eq!(env.end_date.to_date(), NaiveDate::from_ymd_opt(2032, 10, 1));
        assert!(env.version.is_current());
        assert_eq!(env.holder, None);
    }

    #[test]
    fn test_contract_rejects_unknown_tariff() {
        let mut bytes = encode(
            &Content::Present(sample_contract(PriorityCode::MultiTrip)),
            Frame::SecureRecord,
        );
        bytes[1] = 0x09;
        let err = decode::<Contract>(&bytes, Frame::SecureRecord).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidField {
                kind: StructureKind::Contract,
                field: "tariff",
                value: 0x09
            }
        );
    }

    #[test]
    fn test_zero_version_is_corrupt() {
        let mut bytes = vec![0u8; SECURE_RECORD_SIZE];
        bytes[1] = 2;
        let err = decode::<Contract>(&bytes, Frame::SecureRecord).unwrap_err();
        assert!(err.is_corrupt_record());
    }

    #[test]
    fn test_mirrored_priorities_pad_with_forbidden() {
        let card = Card {
            environment: Ok(Content::Uninitialized),
            contracts: vec![
                slot(1, Ok(Content::Present(sample_contract(PriorityCode::SeasonPass)))),
                slot(2, Ok(Content::Uninitialized)),
            ],
            event: Ok(Content::Uninitialized),
        };
        assert_eq!(
            card.mirrored_priorities(),
            [
                PriorityCode::SeasonPass,
                PriorityCode::Forbidden,
                PriorityCode::Forbidden,
                PriorityCode::Forbidden
            ]
        );
    }

    #[test]
    fn test_card_update_builder() {
        let update = CardUpdate::new().contract(2).event();
        assert!(update.updated_contracts.contains(&2));
        assert!(update.event_updated);
        assert!(CardUpdate::new().is_empty());
    }
}
