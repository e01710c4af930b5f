//! The `Set<T>` trait mirrors [`Get`](crate::get::Get) for writes.

use crate::Key;
use crate::error::Error;
use crate::handle::Handle;
use crate::item::ItemType;
use crate::page::CHUNK_MAX_SIZE;
use alloc::vec::Vec;
use embedded_storage::nor_flash::NorFlash;

pub trait Set<T> {
    fn set(&mut self, key: &Key, value: T) -> Result<(), Error>;
}

macro_rules! set_primitive {
    ($ty:ty, $item_type:expr) => {
        impl<F: NorFlash> Set<$ty> for Handle<'_, F> {
            fn set(&mut self, key: &Key, value: $ty) -> Result<(), Error> {
                let ns = self.ns_index();
                self.container()
                    .write_item(ns, $item_type, key, &value.to_le_bytes())
            }
        }
    };
}

set_primitive!(u8, ItemType::U8);
set_primitive!(i8, ItemType::I8);
set_primitive!(u16, ItemType::U16);
set_primitive!(i16, ItemType::I16);
set_primitive!(u32, ItemType::U32);
set_primitive!(i32, ItemType::I32);
set_primitive!(u64, ItemType::U64);
set_primitive!(i64, ItemType::I64);

impl<F: NorFlash> Set<bool> for Handle<'_, F> {
    fn set(&mut self, key: &Key, value: bool) -> Result<(), Error> {
        self.set(key, value as u8)
    }
}

impl<F: NorFlash> Set<&str> for Handle<'_, F> {
    fn set(&mut self, key: &Key, value: &str) -> Result<(), Error> {
        // stored with its terminator, which counts toward the size
        if value.len() + 1 > CHUNK_MAX_SIZE {
            return Err(Error::ValueTooLong);
        }
        let mut buf = Vec::with_capacity(value.len() + 1);
        buf.extend_from_slice(value.as_bytes());
        buf.push(b'\0');
        let ns = self.ns_index();
        self.container().write_item(ns, ItemType::Str, key, &buf)
    }
}

impl<F: NorFlash> Set<&[u8]> for Handle<'_, F> {
    fn set(&mut self, key: &Key, value: &[u8]) -> Result<(), Error> {
        let ns = self.ns_index();
        self.container().write_item(ns, ItemType::Blob, key, value)
    }
}
