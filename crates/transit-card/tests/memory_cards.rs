//! Memory-card transactions against the simulator

use chrono::NaiveDate;
use transit_card::apdu::ins;
use transit_card::apdu::memory::KeyType;
use transit_card::sim::SimulatedReader;
use transit_card::{
    ActiveCard, CardError, CardRepository, LayoutResolver, ProductType, SecurityError,
};
use transit_common::{
    CardUpdate, Content, Contract, CounterValue, DateCompact, PriorityCode, VersionNumber,
};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 2).unwrap()
}

fn selected(product: ProductType) -> (CardRepository<SimulatedReader>, ActiveCard) {
    let mut repo = CardRepository::new(SimulatedReader::blank(product));
    let active = repo.select_card().unwrap();
    assert_eq!(active, ActiveCard::storage(product));
    repo.reader_mut().clear_log();
    (repo, active)
}

fn season_pass() -> Content<Contract> {
    let day = DateCompact::from_date(today()).unwrap();
    Content::Present(Contract {
        version: VersionNumber::CURRENT,
        tariff: PriorityCode::SeasonPass,
        sale_date: day,
        validity_end_date: DateCompact(day.0 + 30),
        sale_sam: 0xCAFE,
        sale_counter: CounterValue::new(1).unwrap(),
    })
}

#[test]
fn test_init_then_read_memory_cards() {
    for product in [
        ProductType::MifareClassic1k,
        ProductType::MifareUltralight,
        ProductType::St25Srt512,
    ] {
        let (mut repo, active) = selected(product);
        repo.init_card_on(&active, today()).unwrap();
        let card = repo.read_card(&active).unwrap();

        assert!(card.environment.unwrap().present().is_some());
        assert_eq!(card.contracts.len(), 1);
        assert_eq!(card.contracts[0].contract, Ok(Content::Uninitialized));
        assert_eq!(card.contracts[0].counter, CounterValue::ZERO);
        assert_eq!(card.event, Ok(Content::Uninitialized));
    }
}

#[test]
fn test_authentication_precedes_block_access() {
    let (mut repo, active) = selected(ProductType::MifareClassic1k);
    repo.read_card(&active).unwrap();

    let exchanges = repo.reader().exchanges();
    assert_eq!(
        exchanges[0].command,
        vec![0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, 0x04, 0x60, 0x00]
    );
    let blocks: Vec<u8> = exchanges[1..].iter().map(|e| e.command[3]).collect();
    assert_eq!(blocks, vec![4, 6, 5]);
}

#[test]
fn test_multi_block_card_skips_authentication() {
    let (mut repo, active) = selected(ProductType::MifareUltralight);
    repo.read_card(&active).unwrap();

    assert_eq!(repo.reader().count_ins(ins::GENERAL_AUTHENTICATE), 0);
    assert_eq!(repo.reader().count_ins(ins::READ_BINARY), 12);
}

#[test]
fn test_counter_is_stored_in_the_contract_frame() {
    let (mut repo, active) = selected(ProductType::MifareClassic1k);
    repo.init_card_on(&active, today()).unwrap();
    let mut card = repo.read_card(&active).unwrap();
    let slot = card.contract_mut(1).unwrap();
    slot.contract = Ok(season_pass());
    slot.counter = CounterValue::new(42).unwrap();
    repo.write_card(&active, &card, &CardUpdate::new().contract(1))
        .unwrap();

    let block = repo.reader().memory_card().unwrap().block(5).unwrap().to_vec();
    assert_eq!(&block[13..16], &[0x00, 0x00, 0x2A]);

    let read = repo.read_card(&active).unwrap();
    assert_eq!(read.contracts[0].counter.get(), 42);
    assert_eq!(read.contracts[0].contract, Ok(season_pass()));
}

#[test]
fn test_interrupted_commit_is_reported_as_partial() {
    let (mut repo, active) = selected(ProductType::MifareUltralight);
    repo.reader_mut().memory_card_mut().unwrap().fail_after_writes(6);

    let err = repo.init_card_on(&active, today()).unwrap_err();
    assert!(matches!(
        err,
        CardError::CommandRejected {
            command: "UPDATE BINARY",
            sw: 0x6581,
            completed_writes: 6,
        }
    ));

    // Environment blocks 4-7 and the first two contract blocks were written
    let card = repo.reader().memory_card().unwrap();
    assert!(card.block(4).unwrap().iter().any(|&b| b != 0));
    assert_eq!(card.writes(), 6);
    assert_eq!(repo.reader().count_ins(ins::UPDATE_BINARY), 7);
}

#[test]
fn test_memory_card_has_a_single_contract() {
    let (mut repo, active) = selected(ProductType::St25Srt512);
    let card = repo.read_card(&active).unwrap();
    assert!(matches!(
        repo.write_card(&active, &card, &CardUpdate::new().contract(2)),
        Err(CardError::InvalidContract { number: 2, count: 1 })
    ));
}

#[test]
fn test_failed_sector_authentication_writes_nothing() {
    let mut rows = LayoutResolver::default_rows();
    for row in &mut rows {
        if let Some(auth) = &mut row.authentication {
            auth.key_type = KeyType::B;
        }
    }
    let (repo, active) = selected(ProductType::MifareClassic1k);
    let mut repo = repo.with_layout(LayoutResolver::new(rows).unwrap());

    let err = repo.init_card_on(&active, today()).unwrap_err();
    assert!(matches!(
        err,
        CardError::Security(SecurityError::SectorAuthentication { block: 4, sw: 0x6300 })
    ));

    // Only the authentication went out
    assert_eq!(repo.reader().exchanges().len(), 1);
    assert_eq!(repo.reader().count_ins(ins::GENERAL_AUTHENTICATE), 1);
    assert_eq!(repo.reader().memory_card().unwrap().writes(), 0);
    assert!((4..16).all(|block| {
        repo.reader()
            .memory_card()
            .unwrap()
            .block(block)
            .unwrap()
            .iter()
            .all(|&b| b == 0)
    }));
}
