//! Lazy traversal of stored items.
//!
//! Pages are visited in sequence-number order, entries within a page in
//! slot order. Namespace-table entries and blob plumbing are hidden: a
//! blob shows up exactly once, as its first chunk, reported with datatype
//! `Blob`. The iterator reads flash lazily, so each step can fail; it
//! yields `Result` items and stops after the first error.
//!
//! Mutating the container between steps invalidates the cursor; behavior
//! past the next advance is unspecified (though never unsafe).

use crate::Key;
use crate::container::Container;
use crate::error::Error;
use crate::item::{CHUNK_ANY, ItemType};
use embedded_storage::nor_flash::NorFlash;

/// Descriptor of one stored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub namespace_index: u8,
    pub key: Key,
    pub datatype: ItemType,
}

pub struct EntryIter<'c, F: NorFlash> {
    container: &'c mut Container<F>,
    ns_index: u8,
    datatype: ItemType,
    page_position: usize,
    entry_index: usize,
    done: bool,
}

impl<'c, F: NorFlash> EntryIter<'c, F> {
    pub(crate) fn new(container: &'c mut Container<F>, ns_index: u8, datatype: ItemType) -> Self {
        EntryIter {
            container,
            ns_index,
            datatype,
            page_position: 0,
            entry_index: 0,
            done: false,
        }
    }

    fn advance(&mut self) -> Result<Option<EntryInfo>, Error> {
        let ns_filter = self.ns_index;
        let (part, pages) = self.container.parts();

        while self.page_position < pages.list().len() {
            let page = &pages.list()[self.page_position];
            match page.next_item(part, self.entry_index, ns_filter, ItemType::Any)? {
                None => {
                    self.page_position += 1;
                    self.entry_index = 0;
                }
                Some((item_index, item)) => {
                    self.entry_index = item_index + (item.span as usize).max(1);

                    if item.ns_index == crate::page::NS_INDEX {
                        continue;
                    }
                    let datatype = match item.datatype {
                        ItemType::BlobIndex => continue,
                        // only a generation's first chunk represents the blob
                        ItemType::BlobData if item.chunk_index & (CHUNK_ANY >> 1) != 0 => continue,
                        ItemType::BlobData | ItemType::Blob => ItemType::Blob,
                        other => other,
                    };
                    if self.datatype != ItemType::Any && datatype != self.datatype {
                        continue;
                    }

                    return Ok(Some(EntryInfo {
                        namespace_index: item.ns_index,
                        key: item.key,
                        datatype,
                    }));
                }
            }
        }
        Ok(None)
    }
}

impl<F: NorFlash> Iterator for EntryIter<'_, F> {
    type Item = Result<EntryInfo, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(info)) => Some(Ok(info)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
