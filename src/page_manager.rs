//! Owns every page of a partition.
//!
//! Live pages are kept sorted by ascending sequence number; the active
//! page, when one exists, is always the tail. Fully-erased sectors form the
//! free pool, and one of them is permanently held back as the compaction
//! target — giving up the reserve would make wear-leveling impossible.

use crate::error::Error;
use crate::item::{CHUNK_ANY, ItemType};
use crate::page::{ENTRY_COUNT, NS_ANY, NS_INDEX, Page, PageState};
use crate::partition::{Partition, SECTOR_SIZE};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use embedded_storage::nor_flash::NorFlash;

#[cfg(feature = "defmt")]
use defmt::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub used_entries: usize,
    pub erased_entries: usize,
    pub free_entries: usize,
    pub total_entries: usize,
    pub namespace_count: usize,
}

#[derive(Default)]
pub(crate) struct PageManager {
    page_list: Vec<Page>,
    free_page_list: Vec<Page>,
    corrupt_page_list: Vec<Page>,
}

impl PageManager {
    pub fn new() -> PageManager {
        PageManager::default()
    }

    pub fn list(&self) -> &[Page] {
        &self.page_list
    }

    pub fn list_mut(&mut self) -> &mut [Page] {
        &mut self.page_list
    }

    /// The current active page. Always present after a successful `load`.
    pub fn back_mut(&mut self) -> &mut Page {
        debug_assert!(matches!(
            self.page_list.last().map(Page::state),
            Some(PageState::Active | PageState::Full)
        ));
        self.page_list.last_mut().expect("page list is empty")
    }

    pub fn page_count(&self) -> usize {
        self.page_list.len() + self.free_page_list.len() + self.corrupt_page_list.len()
    }

    fn next_sequence(&self) -> u32 {
        self.page_list.iter().map(Page::sequence).max().map_or(1, |seq| seq + 1)
    }

    /// Loads all sectors and restores every cross-page invariant: one
    /// active page at the tail, an interrupted freeing pass completed,
    /// older duplicates of rewritten items erased, and at least one erased
    /// sector in reserve.
    pub fn load<F: NorFlash>(&mut self, part: &mut Partition<F>) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("page manager: loading {} sectors", part.sector_count());

        self.page_list.clear();
        self.free_page_list.clear();
        self.corrupt_page_list.clear();

        for sector in 0..part.sector_count() {
            let page = Page::load(part, (sector * SECTOR_SIZE) as u32)?;
            match page.state() {
                PageState::Uninitialized => self.free_page_list.push(page),
                PageState::Corrupt | PageState::Invalid => self.corrupt_page_list.push(page),
                _ => self.page_list.push(page),
            }
        }

        self.page_list.sort_by_key(Page::sequence);

        self.demote_duplicate_active(part)?;
        self.resume_freeing(part)?;

        if !self
            .page_list
            .last()
            .is_some_and(|page| page.state() == PageState::Active)
        {
            if self.free_page_list.is_empty() && !self.corrupt_page_list.is_empty() {
                self.reclaim_corrupt_page(part)?;
            }
            self.activate_page(part)?;
        }

        self.erase_duplicate_items(part)?;

        if self.free_page_list.is_empty() {
            if self.corrupt_page_list.is_empty() {
                return Err(Error::NoFreePages);
            }
            self.reclaim_corrupt_page(part)?;
        }

        Ok(())
    }

    /// A crash between stamping a new active page and filling the previous
    /// one's state word can leave two ACTIVE pages; only the youngest stays
    /// writable.
    fn demote_duplicate_active<F: NorFlash>(
        &mut self,
        part: &mut Partition<F>,
    ) -> Result<(), Error> {
        let active: Vec<usize> = self
            .page_list
            .iter()
            .enumerate()
            .filter(|(_, page)| page.state() == PageState::Active)
            .map(|(index, _)| index)
            .collect();

        for &index in active.iter().rev().skip(1) {
            #[cfg(feature = "defmt")]
            warn!("duplicate active page @{:#08x}, marking full", self.page_list[index].base());
            self.page_list[index].mark_full(part)?;
        }
        Ok(())
    }

    /// Completes a freeing pass that was cut short by power loss. The copy
    /// is idempotent, so partially-moved items are simply skipped.
    fn resume_freeing<F: NorFlash>(&mut self, part: &mut Partition<F>) -> Result<(), Error> {
        let Some(position) = self
            .page_list
            .iter()
            .position(|page| page.state() == PageState::Freeing)
        else {
            return Ok(());
        };

        #[cfg(feature = "defmt")]
        trace!("resuming interrupted freeing @{:#08x}", self.page_list[position].base());

        let mut victim = self.page_list.remove(position);

        if !self
            .page_list
            .last()
            .is_some_and(|page| page.state() == PageState::Active)
        {
            self.activate_page(part)?;
        }
        let target = self.page_list.last_mut().expect("no active page");
        victim.copy_items(part, target)?;

        victim.erase(part)?;
        self.free_page_list.push(victim);
        Ok(())
    }

    /// Promotes a free sector to the new active page with the next
    /// sequence number.
    fn activate_page<F: NorFlash>(&mut self, part: &mut Partition<F>) -> Result<(), Error> {
        let mut page = self.free_page_list.pop().ok_or(Error::NoFreePages)?;
        page.initialize(part, self.next_sequence())?;
        self.page_list.push(page);
        Ok(())
    }

    /// Erases a corrupt page back into the free pool.
    fn reclaim_corrupt_page<F: NorFlash>(&mut self, part: &mut Partition<F>) -> Result<(), Error> {
        let mut page = self.corrupt_page_list.pop().ok_or(Error::NoFreePages)?;
        page.erase(part)?;
        self.free_page_list.push(page);
        Ok(())
    }

    /// Finds items that exist on more than one page — a crash between
    /// writing the new copy and erasing the old one — and erases all but
    /// the newest. Blob data chunks are versioned and reconciled by the
    /// container instead; namespace-table entries are immutable and never
    /// duplicated.
    fn erase_duplicate_items<F: NorFlash>(&mut self, part: &mut Partition<F>) -> Result<(), Error> {
        type Location = (usize, usize, u32);
        let mut newest: BTreeMap<(u8, [u8; 16]), Location> = BTreeMap::new();
        let mut stale: Vec<(usize, usize)> = Vec::new();

        for (page_index, page) in self.page_list.iter().enumerate() {
            let mut index = 0;
            while let Some((item_index, item)) = page.next_item(part, index, NS_ANY, ItemType::Any)? {
                index = item_index + (item.span as usize).max(1);

                if item.ns_index == NS_INDEX
                    || item.datatype == ItemType::BlobData
                    || item.chunk_index != CHUNK_ANY
                {
                    continue;
                }

                let identity = (item.ns_index, *item.key.as_bytes());
                let location = (page_index, item_index, page.sequence());
                match newest.get_mut(&identity) {
                    None => {
                        newest.insert(identity, location);
                    }
                    Some(current) => {
                        // same page: the later entry wins; otherwise the
                        // higher sequence number does
                        let replace = (location.2, item_index) > (current.2, current.1);
                        if replace {
                            stale.push((current.0, current.1));
                            *current = location;
                        } else {
                            stale.push((page_index, item_index));
                        }
                    }
                }
            }
        }

        for (page_index, item_index) in stale {
            #[cfg(feature = "defmt")]
            warn!("erasing duplicate item at page {} entry {}", page_index, item_index);
            self.page_list[page_index].erase_entry_and_span(part, item_index)?;
        }
        Ok(())
    }

    /// Makes the tail of the page list a fresh ACTIVE page. If the free
    /// pool is down to its permanent reserve, a victim page is compacted
    /// first: the FULL page with the most erased entries (ties to the
    /// oldest) donates its reserve, has its survivors copied onto the new
    /// active page, and returns to the pool erased.
    pub fn request_new_page<F: NorFlash>(&mut self, part: &mut Partition<F>) -> Result<(), Error> {
        if let Some(back) = self.page_list.last_mut()
            && back.state() == PageState::Active
        {
            back.mark_full(part)?;
        }

        if self.free_page_list.len() > 1 {
            return self.activate_page(part);
        }

        if !self.corrupt_page_list.is_empty() {
            // a corrupt page is cheaper to reclaim than compacting
            self.reclaim_corrupt_page(part)?;
            return self.activate_page(part);
        }

        if self.free_page_list.is_empty() {
            return Err(Error::NoFreePages);
        }

        let victim_position = self
            .page_list
            .iter()
            .enumerate()
            .filter(|(_, page)| {
                page.state() == PageState::Full && page.erased_entry_count() > 0
            })
            .max_by_key(|(_, page)| (page.erased_entry_count(), core::cmp::Reverse(page.sequence())))
            .map(|(index, _)| index)
            .ok_or(Error::NotEnoughSpace)?;

        #[cfg(feature = "defmt")]
        trace!(
            "compacting page @{:#08x} ({} erased entries)",
            self.page_list[victim_position].base(),
            self.page_list[victim_position].erased_entry_count()
        );

        let mut victim = self.page_list.remove(victim_position);
        victim.mark_freeing(part)?;

        self.activate_page(part)?;
        let target = self.page_list.last_mut().expect("no active page");
        victim.copy_items(part, target)?;

        victim.erase(part)?;
        self.free_page_list.push(victim);
        Ok(())
    }

    pub fn fill_stats(&self, stats: &mut Stats) {
        stats.total_entries = self.page_count() * ENTRY_COUNT;
        stats.used_entries = 0;
        stats.erased_entries = 0;
        for page in &self.page_list {
            stats.used_entries += page.used_entry_count();
            stats.erased_entries += page.erased_entry_count();
        }
        // corrupt pages are dead weight until reclaimed
        stats.erased_entries += self.corrupt_page_list.len() * ENTRY_COUNT;
        stats.free_entries = stats.total_entries - stats.used_entries - stats.erased_entries;
    }
}
