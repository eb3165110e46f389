use transit_common::ProductType;

use super::Command;
use crate::apdu::{ins, sw, ApduResponse};

const BLOCKS_PER_SECTOR: u8 = 4;
const KEY_A: u8 = 0x60;
const KEY_SLOT: u8 = 0;

/// Storage card: raw blocks, no transactions
#[derive(Debug, Clone)]
pub struct SimulatedMemoryCard {
    product: ProductType,
    block_size: usize,
    blocks: Vec<Vec<u8>>,
    authenticated_sector: Option<u8>,
    writes: usize,
    fail_after_writes: Option<usize>,
}

impl SimulatedMemoryCard {
    /// Blank card sized for `product`
    pub fn new(product: ProductType) -> Self {
        let (count, block_size) = match product {
            ProductType::MifareClassic1k => (64, 16),
            _ => (16, 4),
        };
        Self {
            product,
            block_size,
            blocks: vec![vec![0; block_size]; count],
            authenticated_sector: None,
            writes: 0,
            fail_after_writes: None,
        }
    }

    /// Accept `writes` more block writes, then fail every further one with
    /// a memory failure, as a card torn from the field would.
    pub fn fail_after_writes(&mut self, writes: usize) {
        self.fail_after_writes = Some(self.writes + writes);
    }

    pub fn product(&self) -> ProductType {
        self.product
    }

    pub fn block(&self, number: u8) -> Option<&[u8]> {
        self.blocks.get(number as usize).map(Vec::as_slice)
    }

    /// Block writes applied so far
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub(super) fn atr(&self) -> Vec<u8> {
        let [hi, lo] = self.product.card_name().unwrap_or_default().to_be_bytes();
        vec![
            0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, hi, lo,
            0x00, 0x00, 0x00, 0x00, 0x68,
        ]
    }

    pub(super) fn process(&mut self, command: &Command) -> ApduResponse {
        if command.cla != 0xFF {
            return status(sw::CLA_NOT_SUPPORTED);
        }
        match command.ins {
            ins::GENERAL_AUTHENTICATE => self.authenticate(command),
            ins::READ_BINARY => self.read(command.p2),
            ins::UPDATE_BINARY => self.write(command.p2, &command.data),
            _ => status(sw::INS_NOT_SUPPORTED),
        }
    }

    fn authenticate(&mut self, command: &Command) -> ApduResponse {
        match command.data.as_slice() {
            [0x01, 0x00, block, KEY_A, KEY_SLOT] if (*block as usize) < self.blocks.len() => {
                self.authenticated_sector = Some(block / BLOCKS_PER_SECTOR);
                status(sw::SUCCESS)
            }
            _ => {
                self.authenticated_sector = None;
                status(sw::AUTHENTICATION_FAILED)
            }
        }
    }

    fn accessible(&self, block: u8) -> Result<usize, u16> {
        if block as usize >= self.blocks.len() {
            return Err(sw::INCORRECT_P1_P2);
        }
        if self.product.requires_authentication()
            && self.authenticated_sector != Some(block / BLOCKS_PER_SECTOR)
        {
            return Err(sw::SECURITY_STATUS_NOT_SATISFIED);
        }
        Ok(block as usize)
    }

    fn read(&self, block: u8) -> ApduResponse {
        match self.accessible(block) {
            Ok(index) => ApduResponse::new(self.blocks[index].clone(), sw::SUCCESS),
            Err(sw) => status(sw),
        }
    }

    fn write(&mut self, block: u8, data: &[u8]) -> ApduResponse {
        let index = match self.accessible(block) {
            Ok(index) => index,
            Err(sw) => return status(sw),
        };
        if data.len() != self.block_size {
            return status(sw::WRONG_LENGTH);
        }
        if self.fail_after_writes.is_some_and(|limit| self.writes >= limit) {
            return status(sw::MEMORY_FAILURE);
        }
        self.blocks[index].copy_from_slice(data);
        self.writes += 1;
        status(sw::SUCCESS)
    }
}

fn status(sw: u16) -> ApduResponse {
    ApduResponse::new(Vec::new(), sw)
}
