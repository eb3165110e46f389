//! Repository behavior against the in-process simulator

use chrono::NaiveDate;
use transit_card::apdu::ins;
use transit_card::sim::{SimulatedReader, SimulatedSecureCard, SimulatedSecurityModule};
use transit_card::{
    AccessLevel, AccessPolicy, ActiveCard, CardError, CardRepository, CardSelector, DefaultKifs,
    SecurityError, TransitConfig,
};
use transit_common::codec::counters;
use transit_common::constants::sfi;
use transit_common::{
    CardUpdate, Content, Contract, CounterValue, DateCompact, Environment, Event, PriorityCode,
    ProductType, TimeCompact, VersionNumber,
};

type SecureRepository = CardRepository<SimulatedReader, SimulatedSecurityModule>;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> DateCompact {
    DateCompact::from_date(NaiveDate::from_ymd_opt(y, m, d).unwrap()).unwrap()
}

fn repository(reader: SimulatedReader) -> SecureRepository {
    CardRepository::with_security_module(reader, SimulatedSecurityModule::default())
}

/// Blank card of `product`, selected and personalized.
fn personalized(product: ProductType) -> (SecureRepository, ActiveCard) {
    let mut repo = repository(SimulatedReader::blank(product));
    let active = repo.select_card().unwrap();
    assert_eq!(active.product, product);
    repo.init_card_on(&active, today()).unwrap();
    (repo, active)
}

fn contract(tariff: PriorityCode, sam: u32) -> Content<Contract> {
    Content::Present(Contract {
        version: VersionNumber::CURRENT,
        tariff,
        sale_date: date(2024, 3, 1),
        validity_end_date: date(2024, 12, 31),
        sale_sam: sam,
        sale_counter: CounterValue::new(7).unwrap(),
    })
}

fn event() -> Content<Event> {
    Content::Present(Event {
        version: VersionNumber::CURRENT,
        date_stamp: date(2024, 3, 16),
        time_stamp: TimeCompact(8 * 60 + 30),
        location: 0x0001_2345,
        contract_used: 1,
        priorities: [PriorityCode::Expired; 4],
    })
}

fn secure_records(repo: &SecureRepository, sfi: u8, count: u8) -> Vec<Vec<u8>> {
    let card = repo.reader().secure_card().unwrap();
    (1..=count)
        .map(|n| card.record(sfi, n).unwrap().to_vec())
        .collect()
}

#[test]
fn test_init_then_read_secure_card() {
    let (mut repo, active) = personalized(ProductType::CalypsoPrime);
    let card = repo.read_card(&active).unwrap();

    let environment = card.environment.unwrap().into_present().unwrap();
    assert_eq!(environment, Environment::personalized(today()).unwrap());
    assert_eq!(environment.end_date, date(2030, 3, 1));

    assert_eq!(card.contracts.len(), 4);
    for (index, slot) in card.contracts.iter().enumerate() {
        assert_eq!(slot.number as usize, index + 1);
        assert_eq!(slot.contract, Ok(Content::Uninitialized));
        assert_eq!(slot.counter, CounterValue::ZERO);
    }
    assert_eq!(card.event, Ok(Content::Uninitialized));
}

#[test]
fn test_contract_counts_follow_product() {
    for (product, count) in [
        (ProductType::CalypsoBasic, 1),
        (ProductType::CalypsoLight, 2),
        (ProductType::CalypsoPrime, 4),
    ] {
        let (mut repo, active) = personalized(product);
        assert_eq!(repo.read_card(&active).unwrap().contracts.len(), count);
    }
}

#[test]
fn test_counters_are_linked_to_contracts() {
    let (mut repo, active) = personalized(ProductType::CalypsoPrime);
    let mut card = repo.read_card(&active).unwrap();
    let mut update = CardUpdate::new();
    for number in 1..=4u8 {
        let slot = card.contract_mut(number).unwrap();
        slot.contract = Ok(contract(PriorityCode::MultiTrip, number as u32));
        slot.counter = CounterValue::new(10 * number as u32).unwrap();
        update = update.contract(number);
    }
    repo.write_card(&active, &card, &update).unwrap();

    let stored = repo
        .reader()
        .secure_card()
        .unwrap()
        .record(sfi::COUNTERS, 1)
        .unwrap()
        .to_vec();
    let counter_file = counters::decode_file(&stored, 4).unwrap();

    let read = repo.read_card(&active).unwrap();
    for (slot, counter) in read.contracts.iter().zip(&counter_file) {
        assert_eq!(slot.counter, *counter);
        assert_eq!(slot.counter.get(), 10 * slot.number as u32);
    }
}

#[test]
fn test_writing_one_contract_leaves_the_rest_untouched() {
    let (mut repo, active) = personalized(ProductType::CalypsoPrime);
    let mut card = repo.read_card(&active).unwrap();
    for number in 1..=4u8 {
        card.contract_mut(number).unwrap().contract = Ok(contract(PriorityCode::SeasonPass, number as u32));
    }
    card.event = Ok(event());
    let all = (1..=4).fold(CardUpdate::new().event(), |u, n| u.contract(n));
    repo.write_card(&active, &card, &all).unwrap();

    let contracts_before = secure_records(&repo, sfi::CONTRACTS, 4);
    let event_before = secure_records(&repo, sfi::EVENTS_LOG, 1);

    let mut card = repo.read_card(&active).unwrap();
    card.contract_mut(2).unwrap().contract = Ok(contract(PriorityCode::StoredValue, 99));
    repo.write_card(&active, &card, &CardUpdate::new().contract(2)).unwrap();

    let contracts_after = secure_records(&repo, sfi::CONTRACTS, 4);
    assert_eq!(contracts_after[0], contracts_before[0]);
    assert_ne!(contracts_after[1], contracts_before[1]);
    assert_eq!(contracts_after[2], contracts_before[2]);
    assert_eq!(contracts_after[3], contracts_before[3]);
    assert_eq!(secure_records(&repo, sfi::EVENTS_LOG, 1), event_before);
}

#[test]
fn test_empty_update_writes_nothing() {
    let (mut repo, active) = personalized(ProductType::CalypsoLight);
    let card = repo.read_card(&active).unwrap();
    repo.reader_mut().clear_log();

    let report = repo.write_card(&active, &card, &CardUpdate::new()).unwrap();
    assert_eq!(report.writes, 0);
    assert_eq!(report.counter_updates, 0);
    assert_eq!(repo.reader().count_ins(ins::UPDATE_RECORD), 0);
    assert!(repo.reader().exchanges().is_empty());
}

#[test]
fn test_event_priorities_are_mirrored() {
    let (mut repo, active) = personalized(ProductType::CalypsoLight);
    let mut card = repo.read_card(&active).unwrap();
    card.contract_mut(1).unwrap().contract = Ok(contract(PriorityCode::SeasonPass, 1));
    card.event = Ok(event());
    repo.write_card(&active, &card, &CardUpdate::new().contract(1).event())
        .unwrap();

    let read = repo.read_card(&active).unwrap();
    let event = read.event.unwrap().into_present().unwrap();
    assert_eq!(
        event.priorities,
        [
            PriorityCode::SeasonPass,
            PriorityCode::Forbidden,
            PriorityCode::Forbidden,
            PriorityCode::Forbidden,
        ]
    );
    assert_eq!(event.location, 0x0001_2345);
}

#[test]
fn test_counter_changes_become_increase_and_decrease() {
    let (mut repo, active) = personalized(ProductType::CalypsoBasic);
    let mut card = repo.read_card(&active).unwrap();
    card.contract_mut(1).unwrap().contract = Ok(contract(PriorityCode::StoredValue, 1));

    for (value, increases, decreases) in [(10, 1, 0), (4, 0, 1), (4, 0, 0)] {
        card.contract_mut(1).unwrap().counter = CounterValue::new(value).unwrap();
        repo.reader_mut().clear_log();
        let report = repo
            .write_card(&active, &card, &CardUpdate::new().contract(1))
            .unwrap();
        assert_eq!(repo.reader().count_ins(ins::INCREASE), increases);
        assert_eq!(repo.reader().count_ins(ins::DECREASE), decreases);
        assert_eq!(report.counter_updates, increases + decreases);
        assert_eq!(repo.read_card(&active).unwrap().contracts[0].counter.get(), value);
    }
}

#[test]
fn test_rejected_close_discards_everything() {
    let card = SimulatedSecureCard::new(ProductType::CalypsoBasic).with_key([0x11; 16]);
    let mut repo = repository(SimulatedReader::new(card));
    let active = repo.select_card().unwrap();

    let err = repo.init_card_on(&active, today()).unwrap_err();
    assert!(matches!(
        err,
        CardError::Security(SecurityError::CloseRejected { sw: 0x6988 })
    ));

    let card = repo.reader().secure_card().unwrap();
    assert_eq!(card.commits(), 0);
    assert!(!card.in_session());
    assert!(card
        .record(sfi::ENVIRONMENT_AND_HOLDER, 1)
        .unwrap()
        .iter()
        .all(|&b| b == 0));
}

#[test]
fn test_failed_command_aborts_the_session() {
    let mut repo = repository(SimulatedReader::blank(ProductType::CalypsoLight));
    let active = repo.select_card().unwrap();
    repo.reader_mut()
        .secure_card_mut()
        .unwrap()
        .reject_next(ins::UPDATE_RECORD, 0x6581);
    repo.reader_mut().clear_log();

    let err = repo.init_card_on(&active, today()).unwrap_err();
    assert!(matches!(
        err,
        CardError::CommandRejected {
            command: "UPDATE RECORD",
            sw: 0x6581,
            ..
        }
    ));

    // Open, rejected update, then a close without signature
    let close = repo.reader().exchanges().last().unwrap();
    assert_eq!(close.command, vec![0x00, 0x8E, 0x00, 0x00, 0x00]);
    let card = repo.reader().secure_card().unwrap();
    assert_eq!(card.commits(), 0);
    assert!(!card.in_session());
}

#[test]
fn test_unverified_card_signature_reports_the_commit() {
    let mut repo = repository(SimulatedReader::blank(ProductType::CalypsoBasic));
    let active = repo.select_card().unwrap();
    repo.reader_mut()
        .secure_card_mut()
        .unwrap()
        .garble_next_signature();

    let err = repo.init_card_on(&active, today()).unwrap_err();
    match err {
        CardError::Security(SecurityError::CardUnverified {
            writes,
            counter_updates,
            source,
        }) => {
            // Environment, one contract, counter file and event
            assert_eq!(writes, 4);
            assert_eq!(counter_updates, 0);
            assert!(matches!(*source, SecurityError::CardAuthenticationFailed));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The card took the writes even though its signature was refused
    let card = repo.reader().secure_card().unwrap();
    assert_eq!(card.commits(), 1);
    assert_eq!(card.record(sfi::ENVIRONMENT_AND_HOLDER, 1).unwrap()[0], 1);
}

#[test]
fn test_rejected_open_sends_nothing_else() {
    let mut repo = repository(SimulatedReader::blank(ProductType::CalypsoPrime));
    let active = repo.select_card().unwrap();
    repo.reader_mut()
        .secure_card_mut()
        .unwrap()
        .reject_next(ins::OPEN_SECURE_SESSION, 0x6985);
    repo.reader_mut().clear_log();

    let err = repo.init_card_on(&active, today()).unwrap_err();
    assert!(matches!(
        err,
        CardError::Security(SecurityError::OpenRejected { sw: 0x6985 })
    ));
    assert_eq!(repo.reader().exchanges().len(), 1);
    assert_eq!(repo.reader().count_ins(ins::UPDATE_RECORD), 0);
    assert_eq!(repo.reader().secure_card().unwrap().commits(), 0);
}

#[test]
fn test_configured_kifs_are_expected_at_open() {
    let mut config = TransitConfig::default();
    config.default_kifs = DefaultKifs {
        personalization: 0x99,
        load: 0x99,
        debit: 0x99,
    };
    let mut repo = CardRepository::from_config(
        SimulatedReader::blank(ProductType::CalypsoBasic),
        SimulatedSecurityModule::default(),
        &config,
    )
    .unwrap();
    let active = repo.select_card().unwrap();

    assert!(matches!(
        repo.read_card(&active),
        Err(CardError::Security(SecurityError::KeyMismatch {
            expected: 0x99,
            actual: 0x27,
        }))
    ));
    assert!(!repo.reader().secure_card().unwrap().in_session());

    let mut repo = CardRepository::from_config(
        SimulatedReader::blank(ProductType::CalypsoBasic),
        SimulatedSecurityModule::default(),
        &TransitConfig::default(),
    )
    .unwrap();
    let active = repo.select_card().unwrap();
    assert!(repo.read_card(&active).is_ok());
}

#[test]
fn test_security_module_kifs_apply_without_configuration() {
    let security = SimulatedSecurityModule::default().with_kifs(DefaultKifs {
        load: 0x2A,
        ..DefaultKifs::default()
    });
    let mut repo = CardRepository::with_security_module(
        SimulatedReader::blank(ProductType::CalypsoLight),
        security,
    );
    let active = repo.select_card().unwrap();
    assert!(matches!(
        repo.read_card(&active),
        Err(CardError::Security(SecurityError::KeyMismatch {
            expected: 0x2A,
            actual: 0x27,
        }))
    ));
}

#[test]
fn test_secure_card_needs_a_security_module() {
    let mut repo = CardRepository::new(SimulatedReader::blank(ProductType::CalypsoPrime));
    let active = repo.select_card().unwrap();
    assert!(matches!(
        repo.read_card(&active),
        Err(CardError::Security(SecurityError::Unavailable))
    ));
}

#[test]
fn test_access_policy_selects_the_session_key() {
    let (repo, active) = personalized(ProductType::CalypsoPrime);
    let mut repo = repo.with_access_policy(AccessPolicy {
        read: AccessLevel::Debit,
        ..AccessPolicy::default()
    });
    repo.reader_mut().clear_log();
    repo.read_card(&active).unwrap();

    let open = &repo.reader().exchanges()[0].command;
    assert_eq!(open[1], ins::OPEN_SECURE_SESSION);
    assert_eq!(open[2] & 0x07, AccessLevel::Debit.key_index());
}

#[test]
fn test_unknown_contract_number_is_rejected() {
    let (mut repo, active) = personalized(ProductType::CalypsoLight);
    let card = repo.read_card(&active).unwrap();
    assert!(matches!(
        repo.write_card(&active, &card, &CardUpdate::new().contract(3)),
        Err(CardError::InvalidContract { number: 3, count: 2 })
    ));
}

#[test]
fn test_captured_selection_matches_live_selection() {
    for product in [
        ProductType::CalypsoBasic,
        ProductType::CalypsoPrime,
        ProductType::MifareClassic1k,
        ProductType::St25Srt512,
    ] {
        let mut repo = repository(SimulatedReader::blank(product));
        let scenario = repo.export_scenario().unwrap();

        // Remote side: import the scenario and capture the card's answers
        let mut remote_reader = SimulatedReader::blank(product);
        let remote = CardSelector::from_exported(&scenario).unwrap();
        let captured = remote.capture(&mut remote_reader).unwrap().to_bytes().unwrap();

        let resolved = repo.resolve_from_captured(&captured).unwrap();
        let live = repo.select_card().unwrap();
        assert_eq!(resolved, live);
        assert_eq!(resolved.product, product);
    }
}

#[test]
fn test_secure_card_with_other_application() {
    let card = SimulatedSecureCard::new(ProductType::CalypsoLight)
        .with_df_name(transit_common::constants::aids::NORMALIZED_IDF);
    let mut repo = repository(SimulatedReader::new(card));
    let active = repo.select_card().unwrap();
    assert_eq!(active.product, ProductType::CalypsoLight);
    assert_eq!(
        active.df_name.as_deref(),
        Some(transit_common::constants::aids::NORMALIZED_IDF)
    );
}
