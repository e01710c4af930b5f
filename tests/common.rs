#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

pub const SECTOR_SIZE: usize = 4096;
pub const WORD_SIZE: usize = 4;

pub const PAGE_HEADER_SIZE: usize = 32;
pub const ENTRY_STATE_MAP_OFFSET: usize = PAGE_HEADER_SIZE;
pub const ENTRY_STATE_MAP_SIZE: usize = 32;
pub const ENTRY_OFFSET: usize = PAGE_HEADER_SIZE + ENTRY_STATE_MAP_SIZE;
pub const ENTRY_SIZE: usize = 32;
pub const ENTRY_COUNT: usize = 126;
pub const CHUNK_MAX_SIZE: usize = ENTRY_SIZE * (ENTRY_COUNT - 1);

/// RAM-backed NOR flash with the semantics the store depends on: writes
/// can only clear bits, erases are sector-granular, and every operation
/// can be made to fail after a configurable count to simulate power loss.
#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xFFu8; SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(sectors: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xFFu8; SECTOR_SIZE * sectors],
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    pub fn clear_log(&mut self) {
        self.operations.clear();
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn mutations(&self) -> usize {
        self.writes() + self.erases()
    }

    fn faulted(&self) -> bool {
        self.operations.len() >= self.fail_after_operation
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if self.faulted() {
            return Err(FlashError);
        }
        self.operations.push(Operation::Read { offset, len: bytes.len() });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;
    const ERASE_SIZE: usize = SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as u32));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as u32));

        if self.faulted() {
            return Err(FlashError);
        }
        self.operations.push(Operation::Erase { offset: from, len: (to - from) as usize });

        self.buf[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as u32));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE));
        assert!(!bytes.is_empty());

        if self.faulted() {
            return Err(FlashError);
        }
        self.operations.push(Operation::Write { offset, len: bytes.len() });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // NOR flash can only flip bits from 1 to 0 between erases
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

/// Decoded header of one written item found by a raw flash scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawEntry {
    pub ns_index: u8,
    pub datatype: u8,
    pub span: u8,
    pub chunk_index: u8,
    pub key: [u8; 16],
    pub value: [u8; 8],
}

/// Walks every initialized page and returns the written item headers,
/// skipping payload entries via the span field.
pub fn scan_entries(buf: &[u8]) -> Vec<RawEntry> {
    let mut entries = vec![];
    for sector in buf.chunks(SECTOR_SIZE) {
        if sector[..PAGE_HEADER_SIZE].iter().all(|&b| b == 0xFF) {
            continue;
        }
        let bitmap = &sector[ENTRY_STATE_MAP_OFFSET..ENTRY_OFFSET];
        let mut slot = 0;
        while slot < ENTRY_COUNT {
            let bits = (bitmap[slot / 4] >> ((slot % 4) * 2)) & 0b11;
            if bits != 0b10 {
                slot += 1;
                continue;
            }
            let entry = &sector[ENTRY_OFFSET + slot * ENTRY_SIZE..][..ENTRY_SIZE];
            entries.push(RawEntry {
                ns_index: entry[0],
                datatype: entry[1],
                span: entry[2],
                chunk_index: entry[3],
                key: entry[8..24].try_into().unwrap(),
                value: entry[24..32].try_into().unwrap(),
            });
            slot += entry[2].max(1) as usize;
        }
    }
    entries
}

pub fn count_type(buf: &[u8], datatype: u8) -> usize {
    scan_entries(buf).iter().filter(|e| e.datatype == datatype).count()
}

/// Stamps an ACTIVE page header, as the store itself would write it.
pub fn craft_page_header(buf: &mut [u8], sector: usize, sequence: u32, version: u8) {
    let base = sector * SECTOR_SIZE;
    let mut header = [0xFFu8; 32];
    header[0..4].copy_from_slice(&0xFFFF_FFFEu32.to_le_bytes()); // ACTIVE
    header[4..8].copy_from_slice(&sequence.to_le_bytes());
    header[8] = version;
    let crc = norkv::crc::crc32_le(u32::MAX, &header[4..28]);
    header[28..32].copy_from_slice(&crc.to_le_bytes());
    buf[base..base + 32].copy_from_slice(&header);
}

/// Writes a sealed item header (and optional payload entries) into a
/// crafted page and marks the whole span WRITTEN in the state table.
pub fn craft_item(
    buf: &mut [u8],
    sector: usize,
    slot: usize,
    ns_index: u8,
    datatype: u8,
    chunk_index: u8,
    key: &[u8],
    value: [u8; 8],
    payload: Option<&[u8]>,
) {
    let span = 1 + payload.map_or(0, |p| p.len().div_ceil(ENTRY_SIZE));
    let base = sector * SECTOR_SIZE;

    let mut entry = [0xFFu8; ENTRY_SIZE];
    entry[0] = ns_index;
    entry[1] = datatype;
    entry[2] = span as u8;
    entry[3] = chunk_index;
    entry[8..24].fill(0);
    entry[8..8 + key.len()].copy_from_slice(key);
    entry[24..32].copy_from_slice(&value);
    let mut crc = norkv::crc::crc32_le(u32::MAX, &entry[0..4]);
    crc = norkv::crc::crc32_le(crc, &entry[8..24]);
    crc = norkv::crc::crc32_le(crc, &entry[24..32]);
    entry[4..8].copy_from_slice(&crc.to_le_bytes());

    let entry_base = base + ENTRY_OFFSET + slot * ENTRY_SIZE;
    buf[entry_base..entry_base + ENTRY_SIZE].copy_from_slice(&entry);
    if let Some(payload) = payload {
        buf[entry_base + ENTRY_SIZE..entry_base + ENTRY_SIZE + payload.len()]
            .copy_from_slice(payload);
    }

    for index in slot..slot + span {
        let byte = base + ENTRY_STATE_MAP_OFFSET + index / 4;
        let mask = !(0b01u8 << ((index % 4) * 2)); // EMPTY 0b11 -> WRITTEN 0b10
        buf[byte] &= mask;
    }
}

/// Value field of a variable-length item: size and payload CRC.
pub fn var_value(payload: &[u8]) -> [u8; 8] {
    let mut value = [0xFFu8; 8];
    value[0..2].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    value[4..8].copy_from_slice(&norkv::crc::crc32_le(u32::MAX, payload).to_le_bytes());
    value
}
