//! Top-level coordinator for one partition: namespace table, typed item
//! operations, multi-page blobs and the recovery scans run at load time.
//!
//! A container is constructed over a [`Partition`] and is immediately
//! usable; reopening after power loss replays the same recovery path. All
//! mutation goes through the page manager's current active page.

use crate::Key;
use crate::error::Error;
use crate::handle::{Handle, OpenMode};
use crate::item::{BlobIndexMeta, CHUNK_ANY, ENTRY_SIZE, Item, ItemType, VerOffset};
use crate::iterator::EntryIter;
use crate::page::{CHUNK_MAX_SIZE, NS_ANY, NS_INDEX};
use crate::page_manager::{PageManager, Stats};
use crate::partition::Partition;
use alloc::vec::Vec;
use embedded_storage::nor_flash::NorFlash;

#[cfg(feature = "defmt")]
use defmt::{trace, warn};

#[derive(PartialEq, Eq, Copy, Clone)]
enum ContainerState {
    Invalid,
    Active,
}

struct NamespaceEntry {
    name: Key,
    index: u8,
}

/// Location of an item found by a container-wide lookup. The indices stay
/// valid only until the next mutation; callers re-resolve after a page
/// roll.
type ItemLocation = (usize, usize, Item);

pub struct Container<F> {
    partition: Partition<F>,
    page_manager: PageManager,
    namespaces: Vec<NamespaceEntry>,
    namespace_usage: [u8; 32],
    state: ContainerState,
}

impl<F: NorFlash> Container<F> {
    /// Loads the container from an existing partition, running the full
    /// recovery scan: rebuild the namespace table, collect blob indices
    /// and erase orphaned blob chunks.
    pub fn new(partition: Partition<F>) -> Result<Container<F>, Error> {
        let mut container = Container {
            partition,
            page_manager: PageManager::new(),
            namespaces: Vec::new(),
            namespace_usage: [0; 32],
            state: ContainerState::Invalid,
        };
        container.init()?;
        Ok(container)
    }

    /// Convenience constructor wrapping `flash` in a [`Partition`] first.
    pub fn open(flash: F, offset: u32, size: u32) -> Result<Container<F>, Error> {
        Container::new(Partition::new(flash, offset, size)?)
    }

    /// Tears the container down and hands the flash device back, e.g. to
    /// reopen it later.
    pub fn into_flash(self) -> F {
        self.partition.release()
    }

    fn init(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("container init");

        self.state = ContainerState::Invalid;
        self.page_manager.load(&mut self.partition)?;

        self.load_namespaces()?;

        let blob_indices = self.collect_blob_indices()?;
        self.erase_orphan_chunks(&blob_indices)?;

        self.state = ContainerState::Active;
        Ok(())
    }

    fn load_namespaces(&mut self) -> Result<(), Error> {
        self.namespaces.clear();
        self.namespace_usage = [0; 32];
        mark_usage(&mut self.namespace_usage, 0);
        mark_usage(&mut self.namespace_usage, 255);

        let part = &mut self.partition;
        for page in self.page_manager.list() {
            let mut index = 0;
            while let Some((item_index, item)) = page.next_item(part, index, NS_INDEX, ItemType::U8)? {
                index = item_index + (item.span as usize).max(1);
                let entry = NamespaceEntry { name: item.key, index: item.data[0] };
                mark_usage(&mut self.namespace_usage, entry.index);
                self.namespaces.push(entry);
            }
        }
        Ok(())
    }

    fn collect_blob_indices(&mut self) -> Result<Vec<(u8, Key, BlobIndexMeta)>, Error> {
        let part = &mut self.partition;
        let mut indices = Vec::new();
        for page in self.page_manager.list() {
            let mut index = 0;
            while let Some((item_index, item)) =
                page.next_item(part, index, NS_ANY, ItemType::BlobIndex)?
            {
                index = item_index + (item.span as usize).max(1);
                indices.push((item.ns_index, item.key, item.blob_index_meta()));
            }
        }
        Ok(indices)
    }

    /// Erases every BLOB_DATA chunk no index claims. Orphans appear when
    /// power is lost after chunks are written but before their index, or
    /// after an index is erased but before its chunks.
    fn erase_orphan_chunks(
        &mut self,
        indices: &[(u8, Key, BlobIndexMeta)],
    ) -> Result<(), Error> {
        for page_index in 0..self.page_manager.list().len() {
            let mut index = 0;
            loop {
                let next = self.page_manager.list()[page_index].next_item(
                    &mut self.partition,
                    index,
                    NS_ANY,
                    ItemType::BlobData,
                )?;
                let Some((item_index, item)) = next else { break };
                index = item_index + (item.span as usize).max(1);

                let claimed = indices.iter().any(|(ns, key, meta)| {
                    *ns == item.ns_index
                        && *key == item.key
                        && item.chunk_index >= meta.chunk_start
                        && item.chunk_index < meta.chunk_start.saturating_add(meta.chunk_count)
                });
                if !claimed {
                    #[cfg(feature = "defmt")]
                    warn!("erasing orphan blob chunk, chunk index {}", item.chunk_index);
                    self.page_manager.list_mut()[page_index]
                        .erase_entry_and_span(&mut self.partition, item_index)?;
                }
            }
        }
        Ok(())
    }

    fn check_active(&self) -> Result<(), Error> {
        if self.state != ContainerState::Active {
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    /// Searches all pages, oldest first, for an item by identity. A
    /// `TypeMismatch` on one page does not stop the search but is reported
    /// if nothing matches anywhere.
    fn find_item(
        &mut self,
        ns_index: u8,
        datatype: ItemType,
        key: &Key,
        chunk_index: u8,
        chunk_start: VerOffset,
    ) -> Result<ItemLocation, Error> {
        let part = &mut self.partition;
        let mut mismatch: Option<Error> = None;

        for (page_index, page) in self.page_manager.list().iter().enumerate() {
            match page.find_item(part, ns_index, datatype, key, chunk_index, chunk_start) {
                Ok((item_index, item)) => return Ok((page_index, item_index, item)),
                Err(Error::KeyNotFound) => {}
                Err(e @ Error::TypeMismatch(_)) => mismatch = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(mismatch.unwrap_or(Error::KeyNotFound))
    }

    /// Stores a value, collapsing writes of bit-identical content into a
    /// no-op. `Blob` dispatches to the multi-page path with a generation
    /// toggle; everything else is a single entry on the current page, with
    /// one page roll retry. The obsolete copy is erased last, so a crash
    /// in between leaves a duplicate for the next load to clean up, never
    /// a lost value.
    pub fn write_item(
        &mut self,
        ns_index: u8,
        datatype: ItemType,
        key: &Key,
        data: &[u8],
    ) -> Result<(), Error> {
        self.check_active()?;
        check_key(key)?;

        let lookup_type = if datatype == ItemType::Blob { ItemType::BlobIndex } else { datatype };
        let existing = match self.find_item(ns_index, lookup_type, key, CHUNK_ANY, VerOffset::Any) {
            Ok(location) => Some(location),
            Err(Error::KeyNotFound | Error::TypeMismatch(_)) => None,
            Err(e) => return Err(e),
        };

        if datatype == ItemType::Blob {
            return self.write_blob(ns_index, key, data, existing);
        }

        if let Some((page_index, item_index, item)) = &existing {
            let page = &self.page_manager.list()[*page_index];
            if page.cmp_item(&mut self.partition, *item_index, item, data)? {
                #[cfg(feature = "defmt")]
                trace!("write avoided, content identical");
                return Ok(());
            }
        }

        match self
            .page_manager
            .back_mut()
            .write_item(&mut self.partition, ns_index, datatype, key, data, CHUNK_ANY)
        {
            Ok(()) => {}
            Err(Error::PageFull) => {
                self.page_manager.request_new_page(&mut self.partition)?;
                match self.page_manager.back_mut().write_item(
                    &mut self.partition,
                    ns_index,
                    datatype,
                    key,
                    data,
                    CHUNK_ANY,
                ) {
                    Ok(()) => {}
                    Err(Error::PageFull) => return Err(Error::NotEnoughSpace),
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }

        if existing.is_some() {
            // compaction may have moved the old copy; re-resolve. The old
            // copy always sorts before the one just written.
            let (page_index, item_index, _) =
                self.find_item(ns_index, lookup_type, key, CHUNK_ANY, VerOffset::Any)?;
            self.page_manager.list_mut()[page_index]
                .erase_entry_and_span(&mut self.partition, item_index)?;
        }

        Ok(())
    }

    fn write_blob(
        &mut self,
        ns_index: u8,
        key: &Key,
        data: &[u8],
        existing: Option<ItemLocation>,
    ) -> Result<(), Error> {
        let prev_start = existing.as_ref().map(|(_, _, item)| {
            VerOffset::of_chunk(item.blob_index_meta().chunk_start)
        });

        if existing.is_some() && self.cmp_multi_page_blob(ns_index, key, data)? {
            #[cfg(feature = "defmt")]
            trace!("blob write avoided, content identical");
            return Ok(());
        }

        let next_start = prev_start.map_or(VerOffset::V0, VerOffset::invert);
        self.write_multi_page_blob(ns_index, key, data, next_start)?;

        if let Some(prev) = prev_start {
            // the new generation is durable; the old one goes, index first
            self.erase_multi_page_blob(ns_index, key, prev)?;
        } else {
            // pre-index single-entry blob: upgraded on this write
            match self.find_item(ns_index, ItemType::Blob, key, CHUNK_ANY, VerOffset::Any) {
                Ok((page_index, item_index, _)) => {
                    self.page_manager.list_mut()[page_index]
                        .erase_entry_and_span(&mut self.partition, item_index)?;
                }
                Err(Error::KeyNotFound | Error::TypeMismatch(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Splits `data` greedily into BLOB_DATA chunks, each filling the
    /// current page's tailroom, then stores the BLOB_IDX entry. On any
    /// failure every chunk written so far is erased before returning.
    fn write_multi_page_blob(
        &mut self,
        ns_index: u8,
        key: &Key,
        data: &[u8],
        chunk_start: VerOffset,
    ) -> Result<(), Error> {
        let max_pages = (self.page_manager.page_count() - 1).min((CHUNK_ANY as usize - 1) / 2);
        if data.len() > max_pages * CHUNK_MAX_SIZE {
            return Err(Error::ValueTooLong);
        }

        let version = chunk_start as u8;
        let mut chunk_count: u8 = 0;
        let mut offset = 0usize;

        let result: Result<(), Error> = loop {
            let tailroom = self.page_manager.back_mut().var_data_tailroom();
            let remaining = data.len() - offset;

            if chunk_count == 0
                && (tailroom == 0 || tailroom < data.len())
                && tailroom < CHUNK_MAX_SIZE / 10
            {
                // don't shred the blob's first chunk into a tiny fragment
                match self.page_manager.request_new_page(&mut self.partition) {
                    Ok(()) => {}
                    Err(e) => break Err(e),
                }
                if self.page_manager.back_mut().var_data_tailroom() == tailroom {
                    break Err(Error::NotEnoughSpace);
                }
                continue;
            }
            if tailroom == 0 && remaining > 0 {
                break Err(Error::NotEnoughSpace);
            }

            if chunk_count as usize >= (CHUNK_ANY as usize - 1) / 2 {
                // chunk indices 0x00..0x7E per generation
                break Err(Error::NotEnoughSpace);
            }

            let chunk_size = remaining.min(tailroom);
            match self.page_manager.back_mut().write_item(
                &mut self.partition,
                ns_index,
                ItemType::BlobData,
                key,
                &data[offset..offset + chunk_size],
                version + chunk_count,
            ) {
                Ok(()) => {}
                Err(e) => break Err(e),
            }
            chunk_count += 1;
            offset += chunk_size;

            if offset < data.len() || tailroom - chunk_size < ENTRY_SIZE {
                // out of room for further chunks or for the index entry
                match self.page_manager.request_new_page(&mut self.partition) {
                    Ok(()) => {}
                    Err(e) => break Err(e),
                }
            }

            if offset == data.len() {
                let meta = BlobIndexMeta {
                    size: data.len() as u32,
                    chunk_count,
                    chunk_start: version,
                };
                break match self.page_manager.back_mut().write_item(
                    &mut self.partition,
                    ns_index,
                    ItemType::BlobIndex,
                    key,
                    &meta.encode(),
                    CHUNK_ANY,
                ) {
                    Err(Error::PageFull) => Err(Error::NotEnoughSpace),
                    other => other,
                };
            }
        };

        if let Err(e) = result {
            #[cfg(feature = "defmt")]
            warn!("blob write failed, erasing {} partial chunks", chunk_count);
            for chunk in 0..chunk_count {
                match self.find_item(
                    ns_index,
                    ItemType::BlobData,
                    key,
                    version + chunk,
                    VerOffset::Any,
                ) {
                    Ok((page_index, item_index, _)) => {
                        self.page_manager.list_mut()[page_index]
                            .erase_entry_and_span(&mut self.partition, item_index)?;
                    }
                    Err(Error::KeyNotFound) => {}
                    Err(err) => return Err(err),
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn cmp_multi_page_blob(
        &mut self,
        ns_index: u8,
        key: &Key,
        data: &[u8],
    ) -> Result<bool, Error> {
        let (_, _, index_item) =
            match self.find_item(ns_index, ItemType::BlobIndex, key, CHUNK_ANY, VerOffset::Any) {
                Ok(found) => found,
                Err(Error::KeyNotFound | Error::TypeMismatch(_)) => return Ok(false),
                Err(e) => return Err(e),
            };
        let meta = index_item.blob_index_meta();
        if meta.size as usize != data.len() {
            return Ok(false);
        }

        let mut offset = 0usize;
        for chunk in 0..meta.chunk_count {
            let (page_index, item_index, item) = match self.find_item(
                ns_index,
                ItemType::BlobData,
                key,
                meta.chunk_start.wrapping_add(chunk),
                VerOffset::Any,
            ) {
                Ok(found) => found,
                Err(Error::KeyNotFound) => return Ok(false),
                Err(e) => return Err(e),
            };
            let chunk_size = item.var_meta().size as usize;
            if offset + chunk_size > data.len() {
                return Ok(false);
            }
            let page = &self.page_manager.list()[page_index];
            if !page.cmp_item(
                &mut self.partition,
                item_index,
                &item,
                &data[offset..offset + chunk_size],
            )? {
                return Ok(false);
            }
            offset += chunk_size;
        }
        Ok(offset == data.len())
    }

    fn read_multi_page_blob(
        &mut self,
        ns_index: u8,
        key: &Key,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let (_, _, index_item) =
            self.find_item(ns_index, ItemType::BlobIndex, key, CHUNK_ANY, VerOffset::Any)?;
        let meta = index_item.blob_index_meta();
        if buf.len() < meta.size as usize {
            return Err(Error::InvalidLength);
        }

        let mut offset = 0usize;
        for chunk in 0..meta.chunk_count {
            let found = self.find_item(
                ns_index,
                ItemType::BlobData,
                key,
                meta.chunk_start.wrapping_add(chunk),
                VerOffset::Any,
            );
            let (page_index, item_index, item) = match found {
                Ok(found) => found,
                Err(Error::KeyNotFound) => {
                    // a chunk is gone, the blob is unrecoverable
                    #[cfg(feature = "defmt")]
                    warn!("blob chunk {} missing, erasing the index", chunk);
                    self.erase_multi_page_blob(ns_index, key, VerOffset::Any)?;
                    return Err(Error::KeyNotFound);
                }
                Err(e) => return Err(e),
            };

            let payload = self.page_manager.list_mut()[page_index].read_payload_checked(
                &mut self.partition,
                item_index,
                &item,
            )?;
            if offset + payload.len() > meta.size as usize {
                return Err(Error::CorruptedData);
            }
            buf[offset..offset + payload.len()].copy_from_slice(&payload);
            offset += payload.len();
        }

        if offset != meta.size as usize {
            return Err(Error::CorruptedData);
        }
        Ok(offset)
    }

    /// Reads a value into `buf`, returning the byte count. For `Blob` the
    /// multi-page format is tried first and the legacy single-entry format
    /// second.
    pub fn read_item(
        &mut self,
        ns_index: u8,
        datatype: ItemType,
        key: &Key,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        self.check_active()?;
        check_key(key)?;

        if datatype == ItemType::Blob {
            match self.read_multi_page_blob(ns_index, key, buf) {
                Err(Error::KeyNotFound) => {} // fall back to the legacy format
                other => return other,
            }
        }

        let (page_index, item_index, item) =
            self.find_item(ns_index, datatype, key, CHUNK_ANY, VerOffset::Any)?;

        if item.datatype.is_variable_length() {
            let size = item.var_meta().size as usize;
            if buf.len() < size {
                return Err(Error::InvalidLength);
            }
            let payload = self.page_manager.list_mut()[page_index].read_payload_checked(
                &mut self.partition,
                item_index,
                &item,
            )?;
            buf[..size].copy_from_slice(&payload);
            Ok(size)
        } else {
            let width = item.datatype.primitive_width()?;
            if buf.len() < width {
                return Err(Error::InvalidLength);
            }
            buf[..width].copy_from_slice(&item.data[..width]);
            Ok(width)
        }
    }

    /// Size in bytes of the stored value, without reading the payload.
    pub fn get_item_data_size(
        &mut self,
        ns_index: u8,
        datatype: ItemType,
        key: &Key,
    ) -> Result<usize, Error> {
        self.check_active()?;
        check_key(key)?;

        if let Ok(width) = datatype.primitive_width() {
            return Ok(width);
        }

        match self.find_item(ns_index, datatype, key, CHUNK_ANY, VerOffset::Any) {
            Ok((_, _, item)) => return Ok(item.data_size()),
            Err(Error::KeyNotFound | Error::TypeMismatch(_)) if datatype == ItemType::Blob => {}
            Err(e) => return Err(e),
        }

        let (_, _, item) =
            self.find_item(ns_index, ItemType::BlobIndex, key, CHUNK_ANY, VerOffset::Any)?;
        Ok(item.data_size())
    }

    /// Erases one item. Blobs are dismantled index first, so an
    /// interrupted erase degrades into orphan chunks that the next load
    /// sweeps up.
    pub fn erase_item(
        &mut self,
        ns_index: u8,
        datatype: ItemType,
        key: &Key,
    ) -> Result<(), Error> {
        self.check_active()?;
        check_key(key)?;

        if datatype == ItemType::Blob {
            return self.erase_multi_page_blob(ns_index, key, VerOffset::Any);
        }

        let (page_index, item_index, item) =
            self.find_item(ns_index, datatype, key, CHUNK_ANY, VerOffset::Any)?;

        if item.datatype == ItemType::BlobIndex || item.datatype == ItemType::BlobData {
            return self.erase_multi_page_blob(ns_index, key, VerOffset::Any);
        }

        self.page_manager.list_mut()[page_index]
            .erase_entry_and_span(&mut self.partition, item_index)
    }

    fn erase_multi_page_blob(
        &mut self,
        ns_index: u8,
        key: &Key,
        chunk_start: VerOffset,
    ) -> Result<(), Error> {
        let (page_index, item_index, item) =
            self.find_item(ns_index, ItemType::BlobIndex, key, CHUNK_ANY, chunk_start)?;
        let meta = item.blob_index_meta();

        // index goes first: from here on the chunks are orphans and the
        // blob is gone even if we lose power mid-way
        self.page_manager.list_mut()[page_index]
            .erase_entry_and_span(&mut self.partition, item_index)?;

        for chunk in 0..meta.chunk_count {
            match self.find_item(
                ns_index,
                ItemType::BlobData,
                key,
                meta.chunk_start.wrapping_add(chunk),
                VerOffset::Any,
            ) {
                Ok((page_index, item_index, _)) => {
                    self.page_manager.list_mut()[page_index]
                        .erase_entry_and_span(&mut self.partition, item_index)?;
                }
                Err(Error::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Erases every item stored under `ns_index`. The namespace stays
    /// allocated in the table.
    pub fn erase_namespace(&mut self, ns_index: u8) -> Result<(), Error> {
        self.check_active()?;

        for page_index in 0..self.page_manager.list().len() {
            loop {
                let next = self.page_manager.list()[page_index].next_item(
                    &mut self.partition,
                    0,
                    ns_index,
                    ItemType::Any,
                )?;
                let Some((item_index, _)) = next else { break };
                self.page_manager.list_mut()[page_index]
                    .erase_entry_and_span(&mut self.partition, item_index)?;
            }
        }
        Ok(())
    }

    /// Resolves a namespace name to its id, creating a table entry with
    /// the lowest unused id when permitted. Name comparison ignores ASCII
    /// case.
    pub fn create_or_open_namespace(
        &mut self,
        name: &Key,
        can_create: bool,
    ) -> Result<u8, Error> {
        self.check_active()?;
        check_namespace_name(name)?;

        if let Some(entry) = self
            .namespaces
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
        {
            return Ok(entry.index);
        }
        if !can_create {
            return Err(Error::NamespaceNotFound);
        }

        let index = (1u8..255)
            .find(|&candidate| !usage(&self.namespace_usage, candidate))
            .ok_or(Error::NotEnoughSpace)?;

        self.write_item(NS_INDEX, ItemType::U8, name, &[index])?;

        mark_usage(&mut self.namespace_usage, index);
        self.namespaces.push(NamespaceEntry { name: *name, index });
        Ok(index)
    }

    /// Opens a per-namespace view. `ReadOnly` refuses to create the
    /// namespace and refuses mutation through the handle. The handle
    /// mutably borrows the container, which is what pins it open.
    pub fn open_handle(&mut self, ns_name: &Key, mode: OpenMode) -> Result<Handle<'_, F>, Error> {
        let ns_index = self.create_or_open_namespace(ns_name, mode == OpenMode::ReadWrite)?;
        Ok(Handle::new(self, ns_index, mode == OpenMode::ReadOnly))
    }

    /// Lazy traversal of stored items, optionally restricted to one
    /// namespace and datatype. See [`EntryIter`] for the skip rules.
    pub fn find_entries(
        &mut self,
        namespace: Option<&Key>,
        datatype: ItemType,
    ) -> Result<EntryIter<'_, F>, Error> {
        self.check_active()?;
        let ns_index = match namespace {
            Some(name) => self.create_or_open_namespace(name, false)?,
            None => NS_ANY,
        };
        Ok(EntryIter::new(self, ns_index, datatype))
    }

    pub fn stats(&mut self) -> Result<Stats, Error> {
        self.check_active()?;
        let mut stats = Stats {
            used_entries: 0,
            erased_entries: 0,
            free_entries: 0,
            total_entries: 0,
            namespace_count: self.namespaces.len(),
        };
        self.page_manager.fill_stats(&mut stats);
        Ok(stats)
    }

    /// Entries (headers plus payload spans) used by one namespace.
    pub fn calc_entries_in_namespace(&mut self, ns_index: u8) -> Result<usize, Error> {
        self.check_active()?;

        let part = &mut self.partition;
        let mut used = 0usize;
        for page in self.page_manager.list() {
            let mut index = 0;
            while let Some((item_index, item)) = page.next_item(part, index, ns_index, ItemType::Any)? {
                let span = (item.span as usize).max(1);
                used += span;
                index = item_index + span;
            }
        }
        Ok(used)
    }

    pub(crate) fn parts(&mut self) -> (&mut Partition<F>, &PageManager) {
        (&mut self.partition, &self.page_manager)
    }
}

fn check_key(key: &Key) -> Result<(), Error> {
    if key.as_bytes()[15] != 0 {
        return Err(Error::KeyMalformed);
    }
    Ok(())
}

fn check_namespace_name(name: &Key) -> Result<(), Error> {
    if name.as_bytes()[15] != 0 {
        return Err(Error::NamespaceMalformed);
    }
    if name.as_bytes()[0] == 0 {
        return Err(Error::NamespaceMalformed);
    }
    Ok(())
}

fn mark_usage(bitmap: &mut [u8; 32], index: u8) {
    bitmap[index as usize / 8] |= 1 << (index % 8);
}

fn usage(bitmap: &[u8; 32], index: u8) -> bool {
    bitmap[index as usize / 8] & (1 << (index % 8)) != 0
}
