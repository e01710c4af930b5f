//! Thin adapter between the page layer and an
//! [`embedded_storage`](embedded_storage) NOR-flash device.
//!
//! All offsets above this layer are partition-relative. Writes may only
//! clear bits; the device enforces that, this layer only takes care of
//! `WRITE_SIZE` alignment so callers can hand over arbitrary byte runs.

use crate::error::Error;
use alloc::vec;
use embedded_storage::nor_flash::NorFlash;

#[cfg(feature = "defmt")]
use defmt::trace;

/// One NOR-flash sector, which is also one page of the on-flash format.
pub const SECTOR_SIZE: usize = 4096;

pub struct Partition<F> {
    flash: F,
    base: u32,
    size: u32,
}

impl<F: NorFlash> Partition<F> {
    /// Wraps `flash`, exposing `size` bytes starting at `offset`. Both must
    /// be sector-aligned; the sector count is capped at `u16::MAX` to bound
    /// the in-memory page table.
    pub fn new(flash: F, offset: u32, size: u32) -> Result<Self, Error> {
        if !(offset as usize).is_multiple_of(SECTOR_SIZE) {
            return Err(Error::InvalidPartitionOffset);
        }
        if size == 0 || !(size as usize).is_multiple_of(SECTOR_SIZE) {
            return Err(Error::InvalidPartitionSize);
        }
        if (size as usize) / SECTOR_SIZE > u16::MAX as usize {
            return Err(Error::InvalidPartitionSize);
        }
        Ok(Self { flash, base: offset, size })
    }

    /// Consumes the adapter and returns the flash device.
    pub fn release(self) -> F {
        self.flash
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn sector_count(&self) -> usize {
        self.size as usize / SECTOR_SIZE
    }

    /// Rounds a read length up to the device's read granularity.
    pub fn align_read(len: usize) -> usize {
        align_ceil(len, F::READ_SIZE)
    }

    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("partition read @{:#08x}[{}]", offset, buf.len());

        self.flash
            .read(self.base + offset, buf)
            .map_err(|_| Error::FlashOpFail)
    }

    /// Writes `bytes` at `offset`, splitting off an unaligned tail and
    /// padding it with 0xFF up to `WRITE_SIZE`. An all-0xFF tail is skipped
    /// entirely: erased flash already reads back as ones.
    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("partition write @{:#08x}[{}]", offset, bytes.len());

        let offset = self.base + offset;
        if bytes.len().is_multiple_of(F::WRITE_SIZE) {
            return self.flash.write(offset, bytes).map_err(|_| Error::FlashOpFail);
        }

        let pivot = align_floor(bytes.len(), F::WRITE_SIZE);
        let (head, tail) = bytes.split_at(pivot);
        if !head.is_empty() {
            self.flash.write(offset, head).map_err(|_| Error::FlashOpFail)?;
        }

        if tail.iter().any(|&b| b != 0xFF) {
            let mut buf = vec![0xFFu8; F::WRITE_SIZE];
            buf[..tail.len()].copy_from_slice(tail);
            self.flash
                .write(offset + pivot as u32, &buf)
                .map_err(|_| Error::FlashOpFail)?;
        }

        Ok(())
    }

    pub fn erase_range(&mut self, offset: u32, len: u32) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("partition erase @{:#08x}[{}]", offset, len);

        let from = self.base + offset;
        self.flash.erase(from, from + len).map_err(|_| Error::FlashOpFail)
    }
}

#[inline(always)]
pub(crate) const fn align_ceil(len: usize, alignment: usize) -> usize {
    len.div_ceil(alignment) * alignment
}

#[inline(always)]
pub(crate) const fn align_floor(len: usize, alignment: usize) -> usize {
    len / alignment * alignment
}
