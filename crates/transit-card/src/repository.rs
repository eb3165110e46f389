//! Card repository: read, partial write and personalization of transit
//! cards, over whichever session the active card's family calls for.

use chrono::{Local, NaiveDate};
use tracing::info;
use transit_common::codec::counters;
use transit_common::{
    decode, encode, Card, CardFamily, CardUpdate, Content, ContractSlot, CounterValue, Environment,
    Event, Frame, StructureKind, VersionNumber,
};

use crate::config::{AccessPolicy, TransitConfig};
use crate::error::{CardError, ConfigError};
use crate::layout::{LayoutResolver, Location, ProductProfile};
use crate::reader::CardReader;
use crate::security::{AccessLevel, DefaultKifs, NoSecurityModule, SecurityModule};
use crate::selection::{ActiveCard, CardSelector};
use crate::session::{
    MemorySession, Operation, ReadHandle, SecureSession, SessionOutput, SessionReport,
    TransactionSession,
};

/// Entry point for card operations.
///
/// Holds only injected collaborators; nothing is kept between calls, so
/// one repository serves any number of cards in sequence.
pub struct CardRepository<R, S = NoSecurityModule> {
    reader: R,
    security: S,
    layout: LayoutResolver,
    selector: CardSelector,
    access: AccessPolicy,
    kifs: Option<DefaultKifs>,
}

impl<R: CardReader> CardRepository<R> {
    /// Repository without a security module. Only memory cards can be used.
    pub fn new(reader: R) -> Self {
        Self::with_security_module(reader, NoSecurityModule)
    }
}

impl<R: CardReader, S: SecurityModule> CardRepository<R, S> {
    pub fn with_security_module(reader: R, security: S) -> Self {
        Self {
            reader,
            security,
            layout: LayoutResolver::default(),
            selector: CardSelector::default(),
            access: AccessPolicy::default(),
            kifs: None,
        }
    }

    pub fn from_config(reader: R, security: S, config: &TransitConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            reader,
            security,
            layout: config.layout_resolver()?,
            selector: config.selector(),
            access: config.access,
            kifs: Some(config.default_kifs),
        })
    }

    pub fn with_layout(mut self, layout: LayoutResolver) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_selector(mut self, selector: CardSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_access_policy(mut self, access: AccessPolicy) -> Self {
        self.access = access;
        self
    }

    /// Key identifiers expected at session open, in place of the security
    /// module's defaults.
    pub fn with_default_kifs(mut self, kifs: DefaultKifs) -> Self {
        self.kifs = Some(kifs);
        self
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn selector(&self) -> &CardSelector {
        &self.selector
    }

    /// Select the card currently in the reader's field.
    pub fn select_card(&mut self) -> Result<ActiveCard, CardError> {
        self.selector.select_live(&mut self.reader)
    }

    pub fn export_scenario(&self) -> Result<Vec<u8>, CardError> {
        Ok(self.selector.export_scenario()?)
    }

    pub fn resolve_from_captured(&self, raw: &[u8]) -> Result<ActiveCard, CardError> {
        Ok(self.selector.resolve_from_captured(raw)?)
    }

    /// Read environment, contracts with their counters, and event.
    ///
    /// Structures that fail to decode are reported in the returned [`Card`].
    /// The counters are needed to build the contracts, so a counter
    /// structure that fails to decode fails the whole read.
    pub fn read_card(&mut self, active: &ActiveCard) -> Result<Card, CardError> {
        let profile = self.layout.profile(active.product).clone();
        let count = profile.contract_count();
        let frame = frame_for(profile.family());
        let mut session = self.session(&profile, self.access.read);

        let environment = session.prepare(read_operation(&profile, StructureKind::Environment, 1)?)?;
        let event = session.prepare(read_operation(&profile, StructureKind::Event, 1)?)?;
        let contracts = match profile.family() {
            CardFamily::Secure => (1..=count)
                .map(|number| session.prepare(read_operation(&profile, StructureKind::Contract, number)?))
                .collect::<Result<Vec<ReadHandle>, CardError>>()?,
            CardFamily::Memory => vec![session.prepare(read_operation(&profile, StructureKind::Contract, 1)?)?],
        };
        let mut output = session.commit()?;

        let counter_values = match profile.family() {
            CardFamily::Secure => {
                let record = output.open_record().unwrap_or_default();
                counters::decode_file(record, count as usize)?
            }
            CardFamily::Memory => Vec::new(),
        };

        let mut slots = Vec::with_capacity(count as usize);
        for (index, handle) in contracts.into_iter().enumerate() {
            let bytes = output.take(handle);
            let counter = match profile.family() {
                CardFamily::Secure => counter_values[index],
                CardFamily::Memory => counters::read_embedded(&bytes)?,
            };
            slots.push(ContractSlot {
                number: index as u8 + 1,
                contract: decode(&bytes, frame),
                counter,
            });
        }

        let card = Card {
            environment: decode(&output.take(environment), frame),
            contracts: slots,
            event: decode(&output.take(event), frame),
        };
        info!(product = ?active.product, contracts = count, "Card read");
        Ok(card)
    }

    /// Write the structures flagged in `update`, taking their values from
    /// `card`. Unflagged structures are not written; an empty update sends
    /// nothing to the card.
    ///
    /// A written event carries the current version and priorities mirrored
    /// from the card's contracts.
    pub fn write_card(
        &mut self,
        active: &ActiveCard,
        card: &Card,
        update: &CardUpdate,
    ) -> Result<SessionReport, CardError> {
        let profile = self.layout.profile(active.product).clone();
        let count = profile.contract_count();
        if let Some(&number) = update
            .updated_contracts
            .iter()
            .find(|&&n| n == 0 || n > count)
        {
            return Err(CardError::InvalidContract { number, count });
        }
        if update.is_empty() {
            info!(product = ?active.product, "Nothing to write");
            return Ok(SessionReport::default());
        }

        let frame = frame_for(profile.family());
        let mut operations = Vec::new();
        for &number in &update.updated_contracts {
            let slot = card
                .contract(number)
                .ok_or(CardError::InvalidContract { number, count })?;
            let contract = slot
                .contract
                .as_ref()
                .map_err(|_| CardError::MissingStructure("contract"))?;
            let mut bytes = encode(contract, frame);
            match profile.family() {
                CardFamily::Secure => {
                    operations.push(write_operation(&profile, StructureKind::Contract, number, bytes)?);
                    operations.push(counter_operation(&profile, number, slot.counter)?);
                }
                CardFamily::Memory => {
                    counters::write_embedded(&mut bytes, slot.counter);
                    operations.push(write_operation(&profile, StructureKind::Contract, 1, bytes)?);
                }
            }
        }

        if update.event_updated {
            let event = card
                .event
                .as_ref()
                .map_err(|_| CardError::MissingStructure("event"))?;
            let event = match event {
                Content::Present(event) => Content::Present(Event {
                    version: VersionNumber::CURRENT,
                    priorities: card.mirrored_priorities(),
                    ..event.clone()
                }),
                Content::Uninitialized => Content::Uninitialized,
            };
            operations.push(write_operation(&profile, StructureKind::Event, 1, encode(&event, frame))?);
        }

        self.run(&profile, self.access.write, operations)
    }

    /// Personalize a blank card as of today.
    pub fn init_card(&mut self, active: &ActiveCard) -> Result<SessionReport, CardError> {
        self.init_card_on(active, Local::now().date_naive())
    }

    /// Personalize a blank card: a fresh environment issued `today`, and
    /// zeroed contracts, counters and event.
    pub fn init_card_on(&mut self, active: &ActiveCard, today: NaiveDate) -> Result<SessionReport, CardError> {
        let profile = self.layout.profile(active.product).clone();
        let count = profile.contract_count();
        let frame = frame_for(profile.family());
        let environment = Environment::personalized(today).ok_or(CardError::DateOutOfRange)?;

        let mut operations = vec![write_operation(
            &profile,
            StructureKind::Environment,
            1,
            encode(&Content::Present(environment), frame),
        )?];
        match profile.family() {
            CardFamily::Secure => {
                for number in 1..=count {
                    operations.push(write_operation(&profile, StructureKind::Contract, number, blank(frame))?);
                }
                let zeros = counters::encode_file(&vec![CounterValue::ZERO; count as usize]);
                operations.push(write_operation(&profile, StructureKind::Counters, 1, zeros)?);
            }
            CardFamily::Memory => {
                // The embedded counter is zeroed with the frame
                operations.push(write_operation(&profile, StructureKind::Contract, 1, blank(frame))?);
            }
        }
        operations.push(write_operation(&profile, StructureKind::Event, 1, blank(frame))?);

        let report = self.run(&profile, self.access.personalize, operations)?;
        info!(product = ?active.product, %today, writes = report.writes, "Card personalized");
        Ok(report)
    }

    fn session(&mut self, profile: &ProductProfile, level: AccessLevel) -> TransactionSession<'_> {
        match profile.family() {
            CardFamily::Secure => {
                let mut session = SecureSession::new(&mut self.reader, &mut self.security, level);
                if let Some(kifs) = &self.kifs {
                    session = session.with_kif(kifs.kif(level));
                }
                match profile.counters.record(1) {
                    Some((sfi, record, _)) => session.reading_at_open(sfi, record).into(),
                    None => session.into(),
                }
            }
            CardFamily::Memory => MemorySession::new(&mut self.reader, profile.authentication).into(),
        }
    }

    fn run(
        &mut self,
        profile: &ProductProfile,
        level: AccessLevel,
        operations: Vec<Operation>,
    ) -> Result<SessionReport, CardError> {
        let mut session = self.session(profile, level);
        for operation in operations {
            session.prepare(operation)?;
        }
        let output: SessionOutput = session.commit()?;
        Ok(output.report())
    }
}

fn frame_for(family: CardFamily) -> Frame {
    match family {
        CardFamily::Secure => Frame::SecureRecord,
        CardFamily::Memory => Frame::MemoryStructure,
    }
}

fn blank(frame: Frame) -> Vec<u8> {
    vec![0; frame.len()]
}

fn out_of_layout(kind: StructureKind) -> CardError {
    CardError::MissingStructure(match kind {
        StructureKind::Environment => "environment",
        StructureKind::Contract => "contract",
        StructureKind::Event => "event",
        StructureKind::Counters => "counters",
    })
}

/// Read of entry `number` (1-based) of a structure.
fn read_operation(profile: &ProductProfile, kind: StructureKind, number: u8) -> Result<Operation, CardError> {
    match profile.location(kind) {
        location @ Location::Records { .. } => {
            let (sfi, record, size) = location.record(number).ok_or_else(|| out_of_layout(kind))?;
            Ok(Operation::ReadRecord { sfi, record, size })
        }
        Location::Blocks {
            first,
            count,
            block_size,
        } => Ok(Operation::ReadBlocks {
            first,
            count,
            block_size,
        }),
        Location::EmbeddedInContract { .. } => Err(out_of_layout(kind)),
    }
}

fn write_operation(
    profile: &ProductProfile,
    kind: StructureKind,
    number: u8,
    data: Vec<u8>,
) -> Result<Operation, CardError> {
    match profile.location(kind) {
        location @ Location::Records { .. } => {
            let (sfi, record, _) = location.record(number).ok_or_else(|| out_of_layout(kind))?;
            Ok(Operation::UpdateRecord { sfi, record, data })
        }
        Location::Blocks {
            first, block_size, ..
        } => Ok(Operation::WriteBlocks {
            first,
            block_size,
            data,
        }),
        Location::EmbeddedInContract { .. } => Err(out_of_layout(kind)),
    }
}

fn counter_operation(profile: &ProductProfile, number: u8, value: CounterValue) -> Result<Operation, CardError> {
    let (sfi, _, _) = profile
        .counters
        .record(1)
        .ok_or_else(|| out_of_layout(StructureKind::Counters))?;
    Ok(Operation::SetCounter {
        sfi,
        counter: number,
        value,
    })
}
