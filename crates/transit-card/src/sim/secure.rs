use std::collections::BTreeMap;

use transit_common::constants::{aids, sfi, COUNTER_SIZE, SECURE_RECORD_SIZE};
use transit_common::ProductType;

use super::{signature, Command, CARD, DEFAULT_KEY, TERMINAL};
use crate::apdu::{ins, sw, ApduResponse};
use crate::security::{AccessLevel, DefaultKifs};

/// Key version reported in open responses
const KEY_VERSION: u8 = 0x79;

/// Files by SFI; records are numbered from 1
type Files = BTreeMap<u8, Vec<Vec<u8>>>;

#[derive(Debug, Clone)]
struct OpenSession {
    working: Files,
    transcript: Vec<u8>,
}

/// Calypso-style microprocessor card with the ticketing files
#[derive(Debug, Clone)]
pub struct SimulatedSecureCard {
    product: ProductType,
    df_name: Vec<u8>,
    serial_number: [u8; 8],
    key: [u8; 16],
    kifs: DefaultKifs,
    files: Files,
    selected: bool,
    session: Option<OpenSession>,
    challenges: u32,
    commits: usize,
    reject_next: Option<(u8, u16)>,
    garble_signature: bool,
}

impl SimulatedSecureCard {
    /// Blank card: every record zeroed
    pub fn new(product: ProductType) -> Self {
        let count = product.contract_count() as usize;
        let mut files = Files::new();
        files.insert(sfi::ENVIRONMENT_AND_HOLDER, vec![vec![0; SECURE_RECORD_SIZE]]);
        files.insert(sfi::EVENTS_LOG, vec![vec![0; SECURE_RECORD_SIZE]]);
        files.insert(sfi::CONTRACTS, vec![vec![0; SECURE_RECORD_SIZE]; count]);
        files.insert(sfi::COUNTERS, vec![vec![0; COUNTER_SIZE * count]]);
        Self {
            product,
            df_name: aids::KEYPLE_GENERIC.to_vec(),
            serial_number: [0x00, 0x00, 0x00, 0x00, 0xC0, 0xFF, 0xEE, 0x01],
            key: DEFAULT_KEY,
            kifs: DefaultKifs::default(),
            files,
            selected: false,
            session: None,
            challenges: 0,
            commits: 0,
            reject_next: None,
            garble_signature: false,
        }
    }

    pub fn with_df_name(mut self, df_name: &[u8]) -> Self {
        self.df_name = df_name.to_vec();
        self
    }

    /// Card keys differing from the security module's make every close fail.
    pub fn with_key(mut self, key: [u8; 16]) -> Self {
        self.key = key;
        self
    }

    /// Answer the next command with instruction `ins` with `sw`.
    pub fn reject_next(&mut self, ins: u8, sw: u16) {
        self.reject_next = Some((ins, sw));
    }

    /// Commit the next session but answer the close with a wrong signature.
    pub fn garble_next_signature(&mut self) {
        self.garble_signature = true;
    }

    pub fn product(&self) -> ProductType {
        self.product
    }

    /// Committed content of a record
    pub fn record(&self, sfi: u8, record: u8) -> Option<&[u8]> {
        let index = (record as usize).checked_sub(1)?;
        self.files.get(&sfi)?.get(index).map(Vec::as_slice)
    }

    /// Sessions committed so far
    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn in_session(&self) -> bool {
        self.session.is_some()
    }

    pub(super) fn atr(&self) -> Vec<u8> {
        vec![0x3B, 0x88, 0x80, 0x01, 0x00, 0x00, 0x00, 0x00, 0x33, 0x81, 0x81, 0x00, 0x3A]
    }

    fn application_type(&self) -> u8 {
        match self.product {
            ProductType::CalypsoLight => 0x20,
            ProductType::CalypsoBasic => 0x28,
            _ => 0x30,
        }
    }

    fn fci(&self) -> Vec<u8> {
        let startup = [0x0A, 0x3C, self.application_type(), 0x01, 0x01, 0x01, 0x01];

        let mut discretionary = vec![0xC7, self.serial_number.len() as u8];
        discretionary.extend_from_slice(&self.serial_number);
        discretionary.extend_from_slice(&[0x53, startup.len() as u8]);
        discretionary.extend_from_slice(&startup);

        let mut proprietary = vec![0xBF, 0x0C, discretionary.len() as u8];
        proprietary.extend_from_slice(&discretionary);

        let mut body = vec![0x84, self.df_name.len() as u8];
        body.extend_from_slice(&self.df_name);
        body.extend_from_slice(&[0xA5, proprietary.len() as u8]);
        body.extend_from_slice(&proprietary);

        let mut fci = vec![0x6F, body.len() as u8];
        fci.extend_from_slice(&body);
        fci
    }

    pub(super) fn process(&mut self, raw: &[u8], command: &Command) -> ApduResponse {
        if let Some((ins, status)) = self.reject_next {
            if ins == command.ins {
                self.reject_next = None;
                return ApduResponse::new(Vec::new(), status);
            }
        }
        if command.cla != 0x00 {
            return status(sw::CLA_NOT_SUPPORTED);
        }
        if command.ins == ins::SELECT {
            return self.select(command);
        }
        if !self.selected {
            return status(sw::CONDITIONS_NOT_SATISFIED);
        }

        let response = match command.ins {
            ins::OPEN_SECURE_SESSION => return self.open(command),
            ins::CLOSE_SECURE_SESSION => return self.close(command),
            ins::READ_RECORD => self.read_record(command),
            ins::UPDATE_RECORD => self.update_record(command),
            ins::INCREASE | ins::DECREASE => self.change_counter(command),
            _ => status(sw::INS_NOT_SUPPORTED),
        };

        if let Some(session) = &mut self.session {
            session.transcript.extend_from_slice(raw);
            session.transcript.extend_from_slice(&response.to_raw());
        }
        response
    }

    fn select(&mut self, command: &Command) -> ApduResponse {
        self.session = None;
        if command.p1 != 0x04 || command.data.is_empty() || !self.df_name.starts_with(&command.data) {
            self.selected = false;
            return status(sw::FILE_NOT_FOUND);
        }
        self.selected = true;
        ApduResponse::new(self.fci(), sw::SUCCESS)
    }

    fn open(&mut self, command: &Command) -> ApduResponse {
        let level = match command.p1 & 0x07 {
            1 => AccessLevel::Personalization,
            2 => AccessLevel::Load,
            3 => AccessLevel::Debit,
            _ => return status(sw::INCORRECT_P1_P2),
        };
        let record_number = command.p1 >> 3;
        let record = if record_number == 0 {
            Vec::new()
        } else {
            match self.record(command.p2 >> 3, record_number) {
                Some(record) => record.to_vec(),
                None => return status(sw::RECORD_NOT_FOUND),
            }
        };

        self.challenges = self.challenges.wrapping_add(1);
        let mut data = self.challenges.to_be_bytes().to_vec();
        data.extend_from_slice(&[0x00, self.kifs.kif(level), KEY_VERSION, record.len() as u8]);
        data.extend_from_slice(&record);

        self.session = Some(OpenSession {
            working: self.files.clone(),
            transcript: data.clone(),
        });
        ApduResponse::new(data, sw::SUCCESS)
    }

    fn close(&mut self, command: &Command) -> ApduResponse {
        let Some(session) = self.session.take() else {
            return status(sw::CONDITIONS_NOT_SATISFIED);
        };
        if command.data.is_empty() {
            // Abort
            return status(sw::SUCCESS);
        }
        if command.data != signature(&self.key, TERMINAL, &session.transcript) {
            return status(sw::INCORRECT_SM_DATA);
        }
        self.files = session.working;
        self.commits += 1;
        let mut card_signature = signature(&self.key, CARD, &session.transcript);
        if std::mem::take(&mut self.garble_signature) {
            if let Some(byte) = card_signature.first_mut() {
                *byte ^= 0xFF;
            }
        }
        ApduResponse::new(card_signature, sw::SUCCESS)
    }

    /// Record `p1` of file `p2 >> 3`, from the session's working copy when a
    /// session is open.
    fn target(&mut self, command: &Command) -> Option<&mut Vec<u8>> {
        let files = match &mut self.session {
            Some(session) => &mut session.working,
            None => &mut self.files,
        };
        let index = (command.p1 as usize).checked_sub(1)?;
        files.get_mut(&(command.p2 >> 3))?.get_mut(index)
    }

    fn read_record(&mut self, command: &Command) -> ApduResponse {
        match self.target(command) {
            Some(record) => ApduResponse::new(record.clone(), sw::SUCCESS),
            None => status(sw::RECORD_NOT_FOUND),
        }
    }

    fn update_record(&mut self, command: &Command) -> ApduResponse {
        if self.session.is_none() {
            return status(sw::SECURITY_STATUS_NOT_SATISFIED);
        }
        let data = command.data.clone();
        let Some(record) = self.target(command) else {
            return status(sw::RECORD_NOT_FOUND);
        };
        if data.len() > record.len() {
            return status(sw::WRONG_LENGTH);
        }
        record[..data.len()].copy_from_slice(&data);
        status(sw::SUCCESS)
    }

    fn change_counter(&mut self, command: &Command) -> ApduResponse {
        if self.session.is_none() {
            return status(sw::SECURITY_STATUS_NOT_SATISFIED);
        }
        if command.data.len() != COUNTER_SIZE {
            return status(sw::WRONG_LENGTH);
        }
        let amount = u32::from_be_bytes([0, command.data[0], command.data[1], command.data[2]]);
        let increase = command.ins == ins::INCREASE;
        let counter = command.p1 as usize;

        // Counters live in record 1 of the counter file
        let files = match &mut self.session {
            Some(session) => &mut session.working,
            None => &mut self.files,
        };
        let Some(record) = files.get_mut(&(command.p2 >> 3)).and_then(|f| f.first_mut()) else {
            return status(sw::FILE_NOT_FOUND);
        };
        let Some(slot) = counter
            .checked_sub(1)
            .and_then(|i| record.get_mut(i * COUNTER_SIZE..(i + 1) * COUNTER_SIZE))
        else {
            return status(sw::INCORRECT_P1_P2);
        };

        let current = u32::from_be_bytes([0, slot[0], slot[1], slot[2]]);
        let updated = if increase {
            current.checked_add(amount).filter(|v| *v <= 0x00FF_FFFF)
        } else {
            current.checked_sub(amount)
        };
        let Some(updated) = updated else {
            return status(sw::CONDITIONS_NOT_SATISFIED);
        };
        let [_, a, b, c] = updated.to_be_bytes();
        slot.copy_from_slice(&[a, b, c]);
        ApduResponse::new(vec![a, b, c], sw::SUCCESS)
    }
}

fn status(sw: u16) -> ApduResponse {
    ApduResponse::new(Vec::new(), sw)
}
