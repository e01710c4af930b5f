//! The `Get<T>` trait and its implementations provide a single generic,
//! overloaded `get<T>()` for every type the store supports.

use crate::Key;
use crate::error::Error;
use crate::handle::Handle;
use crate::item::ItemType;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use embedded_storage::nor_flash::NorFlash;

pub trait Get<T> {
    fn get(&mut self, key: &Key) -> Result<T, Error>;
}

macro_rules! get_primitive {
    ($ty:ty, $item_type:expr) => {
        impl<F: NorFlash> Get<$ty> for Handle<'_, F> {
            fn get(&mut self, key: &Key) -> Result<$ty, Error> {
                let mut buf = [0u8; size_of::<$ty>()];
                let ns = self.ns_index();
                self.container().read_item(ns, $item_type, key, &mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }
        }
    };
}

get_primitive!(u8, ItemType::U8);
get_primitive!(i8, ItemType::I8);
get_primitive!(u16, ItemType::U16);
get_primitive!(i16, ItemType::I16);
get_primitive!(u32, ItemType::U32);
get_primitive!(i32, ItemType::I32);
get_primitive!(u64, ItemType::U64);
get_primitive!(i64, ItemType::I64);

impl<F: NorFlash> Get<bool> for Handle<'_, F> {
    fn get(&mut self, key: &Key) -> Result<bool, Error> {
        let value: u8 = self.get(key)?;
        Ok(value != 0)
    }
}

impl<F: NorFlash> Get<String> for Handle<'_, F> {
    fn get(&mut self, key: &Key) -> Result<String, Error> {
        let size = self.data_size(ItemType::Str, key)?;
        let mut buf = vec![0u8; size];
        let ns = self.ns_index();
        let read = self.container().read_item(ns, ItemType::Str, key, &mut buf)?;
        // the stored terminator is not part of the string
        let text = buf[..read.saturating_sub(1)].to_vec();
        String::from_utf8(text).map_err(|_| Error::CorruptedData)
    }
}

impl<F: NorFlash> Get<Vec<u8>> for Handle<'_, F> {
    fn get(&mut self, key: &Key) -> Result<Vec<u8>, Error> {
        let size = self.data_size(ItemType::Blob, key)?;
        let mut buf = vec![0u8; size];
        let ns = self.ns_index();
        let read = self.container().read_item(ns, ItemType::Blob, key, &mut buf)?;
        buf.truncate(read);
        Ok(buf)
    }
}
