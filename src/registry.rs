//! Application-owned registry of open containers.
//!
//! Replaces the process-wide partition manager pattern: the registry is an
//! explicit value passed to whoever opens partitions, and it refuses to
//! open the same label twice, so two owners can never race on one
//! partition's pages.

use crate::container::Container;
use crate::error::Error;
use crate::partition::Partition;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use embedded_storage::nor_flash::NorFlash;

#[derive(Default)]
pub struct PartitionRegistry<F> {
    containers: Vec<(String, Container<F>)>,
}

impl<F: NorFlash> PartitionRegistry<F> {
    pub fn new() -> Self {
        PartitionRegistry { containers: Vec::new() }
    }

    /// Loads the partition and registers the container under `label`.
    pub fn open_container(
        &mut self,
        label: &str,
        flash: F,
        offset: u32,
        size: u32,
    ) -> Result<&mut Container<F>, Error> {
        if self.containers.iter().any(|(name, _)| name == label) {
            return Err(Error::AlreadyOpen);
        }
        let container = Container::new(Partition::new(flash, offset, size)?)?;
        self.containers.push((label.to_string(), container));
        // safe, pushed right above
        Ok(&mut self.containers.last_mut().unwrap().1)
    }

    pub fn container(&mut self, label: &str) -> Option<&mut Container<F>> {
        self.containers
            .iter_mut()
            .find(|(name, _)| name == label)
            .map(|(_, container)| container)
    }

    /// Unregisters the container and returns its flash device.
    pub fn close_container(&mut self, label: &str) -> Option<F> {
        let position = self.containers.iter().position(|(name, _)| name == label)?;
        let (_, container) = self.containers.remove(position);
        Some(container.into_flash())
    }

    pub fn is_open(&self, label: &str) -> bool {
        self.containers.iter().any(|(name, _)| name == label)
    }
}
