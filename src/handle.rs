//! Per-namespace view onto a container.
//!
//! The handle holds a mutable borrow of the container for its whole
//! lifetime; that borrow is what keeps the container from being reopened
//! or torn down underneath it.

use crate::Key;
use crate::container::Container;
use crate::error::Error;
use crate::get::Get;
use crate::item::ItemType;
use crate::set::Set;
use embedded_storage::nor_flash::NorFlash;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

pub struct Handle<'c, F: NorFlash> {
    container: &'c mut Container<F>,
    ns_index: u8,
    read_only: bool,
}

impl<'c, F: NorFlash> Handle<'c, F> {
    pub(crate) fn new(container: &'c mut Container<F>, ns_index: u8, read_only: bool) -> Self {
        Handle { container, ns_index, read_only }
    }

    pub fn ns_index(&self) -> u8 {
        self.ns_index
    }

    /// Reads a value. The type is picked by the call site:
    /// `handle.get::<u32>(&key)`.
    pub fn get<T>(&mut self, key: &Key) -> Result<T, Error>
    where
        Self: Get<T>,
    {
        Get::get(self, key)
    }

    /// Stores a value of any supported type.
    pub fn set<T>(&mut self, key: &Key, value: T) -> Result<(), Error>
    where
        Self: Set<T>,
    {
        self.check_writable()?;
        Set::set(self, key, value)
    }

    /// Deletes a key of any type; missing keys are not an error.
    pub fn erase(&mut self, key: &Key) -> Result<(), Error> {
        self.check_writable()?;
        match self.container.erase_item(self.ns_index, ItemType::Any, key) {
            Err(Error::KeyNotFound) => Ok(()),
            other => other,
        }
    }

    /// Deletes everything stored under this namespace.
    pub fn erase_all(&mut self) -> Result<(), Error> {
        self.check_writable()?;
        self.container.erase_namespace(self.ns_index)
    }

    /// Stored size in bytes of a string or blob value.
    pub fn data_size(&mut self, datatype: ItemType, key: &Key) -> Result<usize, Error> {
        self.container.get_item_data_size(self.ns_index, datatype, key)
    }

    pub(crate) fn check_writable(&self) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    pub(crate) fn container(&mut self) -> &mut Container<F> {
        self.container
    }
}
