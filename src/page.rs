//! One flash sector: a 32-byte header, a 32-byte entry-state table and 126
//! entry slots.
//!
//! Both the page state word and the per-entry state bits are encoded so
//! that every forward transition only clears bits, which is the only
//! in-place mutation NOR flash allows between erases. The authoritative
//! state lives on flash; the struct mirrors it together with the rebuilt
//! [`HashList`] index.

use crate::crc::crc32_le;
use crate::error::Error;
use crate::hash_list::HashList;
use crate::item::{ENTRY_SIZE, Item, ItemType, VarMeta, VerOffset};
use crate::partition::{align_ceil, align_floor, Partition, SECTOR_SIZE};
use crate::Key;
use alloc::vec;
use alloc::vec::Vec;
use embedded_storage::nor_flash::NorFlash;

#[cfg(feature = "defmt")]
use defmt::trace;

pub(crate) const ENTRY_COUNT: usize = 126;
pub(crate) const ENTRY_TABLE_SIZE: usize = 32;

const HEADER_OFFSET: u32 = 0;
const ENTRY_TABLE_OFFSET: u32 = 32;
const ENTRY_DATA_OFFSET: u32 = 64;

/// Largest payload a single variable-length item can carry: every entry of
/// a page except the one taken by the item header.
pub(crate) const CHUNK_MAX_SIZE: usize = ENTRY_SIZE * (ENTRY_COUNT - 1);

/// On-flash format version. Decremented for incompatible upgrades, so a
/// smaller value on flash means a newer format than this code implements.
pub(crate) const FORMAT_VERSION: u8 = 0xFE;

/// Namespace id of the namespace table itself.
pub(crate) const NS_INDEX: u8 = 0;
/// Wildcard namespace id for lookups.
pub(crate) const NS_ANY: u8 = 0xFF;

const _: () = assert!(32 + ENTRY_TABLE_SIZE + ENTRY_COUNT * ENTRY_SIZE == SECTOR_SIZE);

const PSB_INIT: u32 = 0x1;
const PSB_FULL: u32 = 0x2;
const PSB_FREEING: u32 = 0x4;
const PSB_CORRUPT: u32 = 0x8;

#[derive(strum::FromRepr, strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub(crate) enum PageState {
    /// All bits set, the state right after a sector erase.
    Uninitialized = u32::MAX,
    /// Header stamped, accepting writes.
    Active = u32::MAX & !PSB_INIT,
    /// No further writes accepted.
    Full = u32::MAX & !PSB_INIT & !PSB_FULL,
    /// Surviving items are being moved to a fresh page.
    Freeing = u32::MAX & !PSB_INIT & !PSB_FULL & !PSB_FREEING,
    /// Structurally inconsistent; kept for diagnostics and erased only when
    /// the free pool runs dry.
    Corrupt = u32::MAX & !PSB_INIT & !PSB_FULL & !PSB_FREEING & !PSB_CORRUPT,
    /// Not loaded from flash.
    Invalid = 0,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum EntryState {
    Empty = 0b11,
    Written = 0b10,
    Erased = 0b00,
    Illegal = 0b01,
}

impl EntryState {
    fn from_bits(bits: u8) -> EntryState {
        match bits & 0b11 {
            0b11 => EntryState::Empty,
            0b10 => EntryState::Written,
            0b01 => EntryState::Illegal,
            _ => EntryState::Erased,
        }
    }
}

struct PageHeader {
    state: u32,
    sequence: u32,
    version: u8,
    crc: u32,
}

impl PageHeader {
    fn encode(&self) -> [u8; 32] {
        let mut buf = [0xFFu8; 32];
        buf[0..4].copy_from_slice(&self.state.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8] = self.version;
        buf[28..32].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; 32]) -> PageHeader {
        PageHeader {
            state: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            sequence: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            version: buf[8],
            crc: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        }
    }

    /// Header CRC covers everything between the state word and the CRC
    /// field itself; the state word keeps mutating after the header is
    /// written.
    fn calculate_crc32(&self) -> u32 {
        let buf = self.encode();
        crc32_le(u32::MAX, &buf[4..28])
    }
}

pub(crate) struct Page {
    base: u32,
    state: PageState,
    sequence: u32,
    entry_table: [u8; ENTRY_TABLE_SIZE],
    next_free_entry: usize,
    first_used_entry: usize,
    used_entry_count: u16,
    erased_entry_count: u16,
    hash_list: HashList,
}

impl Page {
    pub fn uninitialized(base: u32) -> Page {
        Page {
            base,
            state: PageState::Uninitialized,
            sequence: 0,
            entry_table: [0xFF; ENTRY_TABLE_SIZE],
            next_free_entry: 0,
            first_used_entry: ENTRY_COUNT,
            used_entry_count: 0,
            erased_entry_count: 0,
            hash_list: HashList::new(),
        }
    }

    #[cfg(feature = "defmt")]
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn used_entry_count(&self) -> usize {
        self.used_entry_count as usize
    }

    pub fn erased_entry_count(&self) -> usize {
        self.erased_entry_count as usize
    }

    /// Payload bytes a variable-length item can still store here, keeping
    /// one entry for its header.
    pub fn var_data_tailroom(&self) -> usize {
        match self.state {
            PageState::Uninitialized => CHUNK_MAX_SIZE,
            PageState::Active => {
                ENTRY_SIZE * (ENTRY_COUNT - self.next_free_entry).saturating_sub(1)
            }
            _ => 0,
        }
    }

    /// Reads a sector and reconstructs the page, repairing the damage an
    /// interrupted write can leave behind:
    /// - WRITTEN slots failing their header CRC are erased one slot at a
    ///   time (the span field cannot be trusted);
    /// - WRITTEN variable-length items failing their payload CRC are erased
    ///   with their whole span;
    /// - ILLEGAL slots are erased;
    /// - EMPTY slots holding a valid entry (power loss between the entry
    ///   write and its state bit) are adopted as WRITTEN;
    /// - EMPTY holes below the high-water mark are erased so allocation
    ///   stays strictly sequential.
    pub fn load<F: NorFlash>(part: &mut Partition<F>, base: u32) -> Result<Page, Error> {
        #[cfg(feature = "defmt")]
        trace!("page load @{:#08x}", base);

        let mut sector = vec![0u8; SECTOR_SIZE];
        part.read(base, &mut sector)?;

        let mut page = Page::uninitialized(base);

        let header_raw: [u8; 32] = sector[..32].try_into().unwrap();
        if header_raw == [0xFF; 32] {
            if sector.iter().any(|&b| b != 0xFF) {
                // erased header over non-erased data: interrupted erase
                page.state = PageState::Corrupt;
            }
            return Ok(page);
        }

        let header = PageHeader::decode(&header_raw);
        let Some(state) = PageState::from_repr(header.state) else {
            page.state = PageState::Corrupt;
            return Ok(page);
        };
        page.state = state;
        page.sequence = header.sequence;

        match state {
            PageState::Uninitialized | PageState::Corrupt | PageState::Invalid => {
                page.state = PageState::Corrupt;
                return Ok(page);
            }
            PageState::Active | PageState::Full | PageState::Freeing => {}
        }

        if header.crc != header.calculate_crc32() {
            page.state = PageState::Corrupt;
            return Ok(page);
        }

        if header.version < FORMAT_VERSION {
            return Err(Error::NewVersionFound);
        }

        page.entry_table
            .copy_from_slice(&sector[ENTRY_TABLE_OFFSET as usize..ENTRY_DATA_OFFSET as usize]);
        page.scan_entries(part, &sector)?;
        Ok(page)
    }

    fn scan_entries<F: NorFlash>(
        &mut self,
        part: &mut Partition<F>,
        sector: &[u8],
    ) -> Result<(), Error> {
        let mut index = 0usize;
        let mut last_non_empty: Option<usize> = None;

        while index < ENTRY_COUNT {
            let state = self.entry_state(index);

            match state {
                EntryState::Erased => {
                    self.erased_entry_count += 1;
                    last_non_empty = Some(index);
                    index += 1;
                    continue;
                }
                EntryState::Illegal => {
                    self.alter_entry_state(part, index, EntryState::Erased)?;
                    self.erased_entry_count += 1;
                    last_non_empty = Some(index);
                    index += 1;
                    continue;
                }
                EntryState::Empty | EntryState::Written => {}
            }

            let raw: [u8; ENTRY_SIZE] = entry_slice(sector, index).try_into().unwrap();
            let adopted = state == EntryState::Empty;
            if adopted && raw == [0xFF; ENTRY_SIZE] {
                index += 1;
                continue;
            }

            let item = match Item::decode(&raw) {
                Some(item) if item.crc == item.calculate_crc32() => item,
                _ if adopted => {
                    // torn write without a state bit; leave the hole, it is
                    // swept below
                    index += 1;
                    continue;
                }
                _ => {
                    #[cfg(feature = "defmt")]
                    trace!("page @{:#08x}: bad entry crc at {}", self.base, index);
                    self.alter_entry_state(part, index, EntryState::Erased)?;
                    self.erased_entry_count += 1;
                    last_non_empty = Some(index);
                    index += 1;
                    continue;
                }
            };

            let span = item.span as usize;
            if span == 0 || index + span > ENTRY_COUNT {
                self.alter_entry_state(part, index, EntryState::Erased)?;
                self.erased_entry_count += 1;
                last_non_empty = Some(index);
                index += 1;
                continue;
            }

            if item.datatype.is_variable_length() {
                let meta = item.var_meta();
                let payload_ok = span == 1 + (meta.size as usize).div_ceil(ENTRY_SIZE)
                    && {
                        let start = (ENTRY_DATA_OFFSET as usize) + (index + 1) * ENTRY_SIZE;
                        let payload = &sector[start..start + meta.size as usize];
                        crc32_le(u32::MAX, payload) == meta.crc
                    };
                if !payload_ok {
                    #[cfg(feature = "defmt")]
                    trace!("page @{:#08x}: bad payload crc at {}", self.base, index);
                    self.alter_entry_range_state(part, index, index + span, EntryState::Erased)?;
                    self.erased_entry_count += span as u16;
                    last_non_empty = Some(index + span - 1);
                    index += span;
                    continue;
                }
            }

            if adopted {
                self.alter_entry_range_state(part, index, index + span, EntryState::Written)?;
            }

            self.hash_list.insert(&item, index as u8);
            self.used_entry_count += span as u16;
            if self.first_used_entry == ENTRY_COUNT {
                self.first_used_entry = index;
            }
            last_non_empty = Some(index + span - 1);
            index += span;
        }

        self.next_free_entry = last_non_empty.map_or(0, |last| last + 1);

        // sweep EMPTY holes left by interrupted multi-entry writes
        for hole in 0..self.next_free_entry {
            if self.entry_state(hole) == EntryState::Empty {
                self.alter_entry_state(part, hole, EntryState::Erased)?;
                self.erased_entry_count += 1;
            }
        }

        Ok(())
    }

    /// Stamps the header of an erased sector, turning it ACTIVE.
    pub fn initialize<F: NorFlash>(
        &mut self,
        part: &mut Partition<F>,
        sequence: u32,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("page initialize @{:#08x} seq {}", self.base, sequence);

        debug_assert_eq!(self.state, PageState::Uninitialized);

        let mut header = PageHeader {
            state: PageState::Active as u32,
            sequence,
            version: FORMAT_VERSION,
            crc: 0,
        };
        header.crc = header.calculate_crc32();
        part.write(self.base + HEADER_OFFSET, &header.encode())?;

        self.state = PageState::Active;
        self.sequence = sequence;
        Ok(())
    }

    pub fn mark_full<F: NorFlash>(&mut self, part: &mut Partition<F>) -> Result<(), Error> {
        self.alter_page_state(part, PageState::Full)
    }

    pub fn mark_freeing<F: NorFlash>(&mut self, part: &mut Partition<F>) -> Result<(), Error> {
        self.alter_page_state(part, PageState::Freeing)
    }

    fn alter_page_state<F: NorFlash>(
        &mut self,
        part: &mut Partition<F>,
        state: PageState,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("page @{:#08x}: -> {}", self.base, state);

        part.write(self.base + HEADER_OFFSET, &(state as u32).to_le_bytes())?;
        self.state = state;
        Ok(())
    }

    /// Erases the sector and resets the mirror to the uninitialized state.
    pub fn erase<F: NorFlash>(&mut self, part: &mut Partition<F>) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("page erase @{:#08x}", self.base);

        part.erase_range(self.base, SECTOR_SIZE as u32)?;
        *self = Page::uninitialized(self.base);
        Ok(())
    }

    pub(crate) fn entry_state(&self, index: usize) -> EntryState {
        let byte = self.entry_table[index / 4];
        EntryState::from_bits(byte >> ((index % 4) * 2))
    }

    fn alter_entry_state<F: NorFlash>(
        &mut self,
        part: &mut Partition<F>,
        index: usize,
        state: EntryState,
    ) -> Result<(), Error> {
        self.alter_entry_range_state(part, index, index + 1, state)
    }

    /// Clears the state bits for `begin..end` in the mirror, then writes
    /// the touched bytes back. Surrounding entries in the same byte are
    /// unaffected: their bits are rewritten with their current value, and
    /// flash writes can only clear.
    fn alter_entry_range_state<F: NorFlash>(
        &mut self,
        part: &mut Partition<F>,
        begin: usize,
        end: usize,
        state: EntryState,
    ) -> Result<(), Error> {
        debug_assert!(begin < end && end <= ENTRY_COUNT);

        for index in begin..end {
            let shift = (index % 4) * 2;
            let mask = 0b11u8 << shift;
            let bits = (state as u8) << shift;
            self.entry_table[index / 4] &= bits | !mask;
        }

        let first_byte = align_floor(begin / 4, F::WRITE_SIZE);
        let end_byte = align_ceil((end - 1) / 4 + 1, F::WRITE_SIZE).min(ENTRY_TABLE_SIZE);
        part.write(
            self.base + ENTRY_TABLE_OFFSET + first_byte as u32,
            &self.entry_table[first_byte..end_byte],
        )
    }

    fn entry_address(&self, index: usize) -> u32 {
        debug_assert!(index < ENTRY_COUNT);
        self.base + ENTRY_DATA_OFFSET + (index * ENTRY_SIZE) as u32
    }

    /// Reads and verifies the entry header at `index`.
    pub fn read_item<F: NorFlash>(
        &self,
        part: &mut Partition<F>,
        index: usize,
    ) -> Result<Item, Error> {
        let mut buf = [0u8; ENTRY_SIZE];
        part.read(self.entry_address(index), &mut buf)?;

        if buf == [0xFF; ENTRY_SIZE] {
            return Err(Error::KeyNotFound);
        }
        match Item::decode(&buf) {
            Some(item) if item.crc == item.calculate_crc32() => Ok(item),
            _ => Err(Error::KeyNotFound),
        }
    }

    /// Reads the raw payload entries following a variable-length item
    /// header. The caller decides whether to CRC-check.
    pub fn read_payload<F: NorFlash>(
        &self,
        part: &mut Partition<F>,
        index: usize,
        item: &Item,
    ) -> Result<Vec<u8>, Error> {
        debug_assert!(item.datatype.is_variable_length());

        let size = item.var_meta().size as usize;
        let mut buf = vec![0u8; Partition::<F>::align_read(size)];
        part.read(self.entry_address(index + 1), &mut buf)?;
        buf.truncate(size);
        Ok(buf)
    }

    /// Reads and CRC-checks the payload; on mismatch the damaged item is
    /// erased and `CorruptedData` reported.
    pub fn read_payload_checked<F: NorFlash>(
        &mut self,
        part: &mut Partition<F>,
        index: usize,
        item: &Item,
    ) -> Result<Vec<u8>, Error> {
        let buf = self.read_payload(part, index, item)?;
        if crc32_le(u32::MAX, &buf) != item.var_meta().crc {
            self.erase_entry_and_span(part, index)?;
            return Err(Error::CorruptedData);
        }
        Ok(buf)
    }

    /// Appends an item. `data` is the value: raw LE bytes for primitives
    /// (at most 8), the payload for variable-length types, the encoded
    /// 8-byte metadata for a blob index.
    ///
    /// The write order backs the crash-safety argument: payload state bits,
    /// payload bytes, header entry, header state bit. A power cut anywhere
    /// in between leaves either unreferenced payload slots (erased on the
    /// next load) or a complete, adoptable entry.
    pub fn write_item<F: NorFlash>(
        &mut self,
        part: &mut Partition<F>,
        ns_index: u8,
        datatype: ItemType,
        key: &Key,
        data: &[u8],
        chunk_index: u8,
    ) -> Result<(), Error> {
        if self.state != PageState::Active {
            return Err(Error::PageFull);
        }

        let index = self.next_free_entry;

        if datatype.is_variable_length() {
            if data.len() > CHUNK_MAX_SIZE {
                return Err(Error::ValueTooLong);
            }
            let payload_entries = data.len().div_ceil(ENTRY_SIZE);
            let span = payload_entries + 1;
            if index + span > ENTRY_COUNT {
                return Err(Error::PageFull);
            }

            #[cfg(feature = "defmt")]
            trace!("page @{:#08x}: write [{}..{}]", self.base, index, index + span);

            let meta = VarMeta { size: data.len() as u16, crc: crc32_le(u32::MAX, data) };
            let item =
                Item::var_length(ns_index, datatype, span as u8, chunk_index, *key, meta);

            if payload_entries > 0 {
                self.alter_entry_range_state(part, index + 1, index + span, EntryState::Written)?;
                part.write(self.entry_address(index + 1), data)?;
            }
            part.write(self.entry_address(index), &item.encode())?;
            self.alter_entry_state(part, index, EntryState::Written)?;

            self.hash_list.insert(&item, index as u8);
            self.used_entry_count += span as u16;
            self.next_free_entry += span;
        } else {
            if index + 1 > ENTRY_COUNT {
                return Err(Error::PageFull);
            }

            #[cfg(feature = "defmt")]
            trace!("page @{:#08x}: write [{}]", self.base, index);

            let item = Item::new(ns_index, datatype, 1, chunk_index, *key, data);
            part.write(self.entry_address(index), &item.encode())?;
            self.alter_entry_state(part, index, EntryState::Written)?;

            self.hash_list.insert(&item, index as u8);
            self.used_entry_count += 1;
            self.next_free_entry += 1;
        }

        if self.first_used_entry == ENTRY_COUNT {
            self.first_used_entry = index;
        }
        Ok(())
    }

    /// Locates an item by identity via the hash list. A candidate whose
    /// identity matches but whose datatype differs fails with
    /// `TypeMismatch`; a hash collision just moves the probe on.
    pub fn find_item<F: NorFlash>(
        &self,
        part: &mut Partition<F>,
        ns_index: u8,
        datatype: ItemType,
        key: &Key,
        chunk_index: u8,
        chunk_start: VerOffset,
    ) -> Result<(usize, Item), Error> {
        let hash = Item::hash_of(ns_index, key, chunk_index);
        let mut start = 0u8;

        while let Some(slot) = self.hash_list.find_hash(start, hash) {
            let index = slot as usize;
            match self.read_item(part, index) {
                Ok(item) => {
                    if item.ns_index == ns_index
                        && item.chunk_index == chunk_index
                        && item.key == *key
                    {
                        if item.datatype == ItemType::BlobIndex
                            && !chunk_start.matches(item.blob_index_meta().chunk_start)
                        {
                            // other generation of the same blob
                        } else if datatype != ItemType::Any && item.datatype != datatype {
                            return Err(Error::TypeMismatch(item.datatype));
                        } else {
                            return Ok((index, item));
                        }
                    }
                }
                Err(Error::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
            if index + 1 == ENTRY_COUNT {
                break;
            }
            start = slot + 1;
        }

        Err(Error::KeyNotFound)
    }

    /// Linear walk over WRITTEN items starting at `start`, with optional
    /// namespace and datatype filters. Non-matching items are skipped
    /// without error; used by recovery scans and the public iterator.
    pub fn next_item<F: NorFlash>(
        &self,
        part: &mut Partition<F>,
        start: usize,
        ns_index: u8,
        datatype: ItemType,
    ) -> Result<Option<(usize, Item)>, Error> {
        let mut index = start.max(self.first_used_entry);
        while index < self.next_free_entry {
            if self.entry_state(index) != EntryState::Written {
                index += 1;
                continue;
            }
            let item = match self.read_item(part, index) {
                Ok(item) => item,
                Err(Error::KeyNotFound) => {
                    index += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let span = (item.span as usize).max(1);
            let matches = (ns_index == NS_ANY || item.ns_index == ns_index)
                && (datatype == ItemType::Any || item.datatype == datatype);
            if matches {
                return Ok(Some((index, item)));
            }
            index += span;
        }
        Ok(None)
    }

    /// Compares the stored value at `index` against `data` without
    /// erasing anything.
    pub fn cmp_item<F: NorFlash>(
        &self,
        part: &mut Partition<F>,
        index: usize,
        item: &Item,
        data: &[u8],
    ) -> Result<bool, Error> {
        if item.datatype.is_variable_length() {
            let meta = item.var_meta();
            if meta.size as usize != data.len() || meta.crc != crc32_le(u32::MAX, data) {
                return Ok(false);
            }
            let stored = self.read_payload(part, index, item)?;
            Ok(stored == data)
        } else if data.len() > 8 {
            Ok(false)
        } else {
            Ok(item.data[..data.len()] == *data)
        }
    }

    /// Erases the item at `index` together with its payload span. The span
    /// is taken from the entry only if its CRC still verifies; otherwise a
    /// single slot is erased.
    pub fn erase_entry_and_span<F: NorFlash>(
        &mut self,
        part: &mut Partition<F>,
        index: usize,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("page @{:#08x}: erase entry {}", self.base, index);

        let span = match self.read_item(part, index) {
            Ok(item) => (item.span as usize).clamp(1, ENTRY_COUNT - index),
            Err(Error::KeyNotFound) => 1,
            Err(e) => return Err(e),
        };

        self.hash_list.erase(index as u8);
        self.alter_entry_range_state(part, index, index + span, EntryState::Erased)?;
        self.used_entry_count = self.used_entry_count.saturating_sub(span as u16);
        self.erased_entry_count += span as u16;

        if index == self.first_used_entry {
            self.first_used_entry = (index + span..self.next_free_entry)
                .find(|&i| self.entry_state(i) == EntryState::Written)
                .unwrap_or(ENTRY_COUNT);
        }
        Ok(())
    }

    /// Copies all surviving items into `dest`, skipping any the
    /// destination already holds. Skipping makes the copy idempotent, so
    /// an interrupted freeing pass can simply run again.
    pub fn copy_items<F: NorFlash>(
        &self,
        part: &mut Partition<F>,
        dest: &mut Page,
    ) -> Result<(), Error> {
        let mut index = self.first_used_entry;

        while index < self.next_free_entry {
            if self.entry_state(index) != EntryState::Written {
                index += 1;
                continue;
            }
            let item = match self.read_item(part, index) {
                Ok(item) => item,
                Err(Error::KeyNotFound) => {
                    index += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let span = (item.span as usize).max(1);

            let chunk_start = if item.datatype == ItemType::BlobIndex {
                VerOffset::of_chunk(item.blob_index_meta().chunk_start)
            } else {
                VerOffset::Any
            };
            let already_copied = dest
                .find_item(part, item.ns_index, ItemType::Any, &item.key, item.chunk_index, chunk_start)
                .is_ok();
            if already_copied {
                index += span;
                continue;
            }

            if item.datatype.is_variable_length() {
                let payload = self.read_payload(part, index, &item)?;
                dest.write_item(part, item.ns_index, item.datatype, &item.key, &payload, item.chunk_index)?;
            } else {
                dest.write_item(part, item.ns_index, item.datatype, &item.key, &item.data, item.chunk_index)?;
            }

            index += span;
        }
        Ok(())
    }
}

fn entry_slice(sector: &[u8], index: usize) -> &[u8] {
    let start = ENTRY_DATA_OFFSET as usize + index * ENTRY_SIZE;
    &sector[start..start + ENTRY_SIZE]
}
