//! The 32-byte entry codec.
//!
//! Every record on flash is one entry: an item header, possibly followed by
//! payload entries holding raw bytes. The wire layout is bit-exact and
//! little-endian:
//!
//! ```text
//! 0   ns_index     1   datatype     2   span     3   chunk_index
//! 4   crc32 (over bytes 0..4 and 8..32)
//! 8   key, NUL-padded, 15 usable bytes
//! 24  value: inline primitive | {size:u16, _:u16, data_crc:u32}
//!            | {size:u32, chunk_count:u8, chunk_start:u8, _:u16}
//! ```
//!
//! The value field is decoded through the typed views [`VarMeta`] and
//! [`BlobIndexMeta`] instead of overlapping representations.

use crate::Key;
use crate::crc::crc32_le;
use crate::error::Error;
use crate::u24::u24;

pub(crate) const ENTRY_SIZE: usize = 32;

/// Chunk index carried by every non-chunk entry.
pub(crate) const CHUNK_ANY: u8 = 0xFF;

#[derive(strum::FromRepr, strum::Display, Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ItemType {
    U8 = 0x01,
    I8 = 0x11,
    U16 = 0x02,
    I16 = 0x12,
    U32 = 0x04,
    I32 = 0x14,
    U64 = 0x08,
    I64 = 0x18,
    Str = 0x21,
    /// Caller-facing blob type. On flash it only appears in the legacy
    /// single-entry format; current blobs are stored as `BlobData` chunks
    /// under a `BlobIndex`.
    Blob = 0x41,
    BlobData = 0x42,
    BlobIndex = 0x48,
    Any = 0xFF,
}

impl ItemType {
    /// Byte width of a primitive type, encoded in the tag's low nibble.
    pub(crate) fn primitive_width(self) -> Result<usize, Error> {
        match self {
            ItemType::U8 | ItemType::I8 => Ok(1),
            ItemType::U16 | ItemType::I16 => Ok(2),
            ItemType::U32 | ItemType::I32 => Ok(4),
            ItemType::U64 | ItemType::I64 => Ok(8),
            _ => Err(Error::TypeMismatch(self)),
        }
    }

    /// Types whose payload lives in the entries following the header.
    pub(crate) fn is_variable_length(self) -> bool {
        matches!(self, ItemType::Str | ItemType::Blob | ItemType::BlobData)
    }
}

/// Blob generation marker held in the high bit of a chunk index. Toggling
/// it on rewrite lets old and new chunk families coexist until the new
/// index entry is durable.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub(crate) enum VerOffset {
    V0 = 0x00,
    V1 = 0x80,
    Any = 0xFF,
}

impl VerOffset {
    pub(crate) fn invert(self) -> VerOffset {
        match self {
            VerOffset::V0 => VerOffset::V1,
            VerOffset::V1 => VerOffset::V0,
            VerOffset::Any => VerOffset::Any,
        }
    }

    /// The generation a chunk index belongs to.
    pub(crate) fn of_chunk(chunk_index: u8) -> VerOffset {
        if chunk_index < VerOffset::V1 as u8 { VerOffset::V0 } else { VerOffset::V1 }
    }

    pub(crate) fn matches(self, chunk_start: u8) -> bool {
        self == VerOffset::Any || self as u8 == chunk_start
    }
}

/// Value-field view for `Str` and `BlobData` items: payload byte count and
/// payload CRC.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct VarMeta {
    pub size: u16,
    pub crc: u32,
}

/// Value-field view for `BlobIndex` items.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct BlobIndexMeta {
    pub size: u32,
    pub chunk_count: u8,
    pub chunk_start: u8,
}

impl BlobIndexMeta {
    pub(crate) fn encode(&self) -> [u8; 8] {
        let mut data = [0xFFu8; 8];
        data[..4].copy_from_slice(&self.size.to_le_bytes());
        data[4] = self.chunk_count;
        data[5] = self.chunk_start;
        data
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Item {
    pub ns_index: u8,
    pub datatype: ItemType,
    pub span: u8,
    pub chunk_index: u8,
    pub crc: u32,
    pub key: Key,
    pub data: [u8; 8],
}

impl Item {
    /// Builds an unsealed item; `data` shorter than eight bytes is padded
    /// with 0xFF so untouched value bits stay in the erased state.
    pub(crate) fn new(
        ns_index: u8,
        datatype: ItemType,
        span: u8,
        chunk_index: u8,
        key: Key,
        data: &[u8],
    ) -> Item {
        debug_assert!(data.len() <= 8);
        let mut value = [0xFFu8; 8];
        value[..data.len()].copy_from_slice(data);
        let mut item = Item { ns_index, datatype, span, chunk_index, crc: 0, key, data: value };
        item.crc = item.calculate_crc32();
        item
    }

    pub(crate) fn var_length(
        ns_index: u8,
        datatype: ItemType,
        span: u8,
        chunk_index: u8,
        key: Key,
        meta: VarMeta,
    ) -> Item {
        let mut data = [0xFFu8; 8];
        data[..2].copy_from_slice(&meta.size.to_le_bytes());
        data[4..].copy_from_slice(&meta.crc.to_le_bytes());
        Item::new(ns_index, datatype, span, chunk_index, key, &data)
    }

    pub(crate) fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = self.ns_index;
        buf[1] = self.datatype as u8;
        buf[2] = self.span;
        buf[3] = self.chunk_index;
        buf[4..8].copy_from_slice(&self.crc.to_le_bytes());
        buf[8..24].copy_from_slice(self.key.as_bytes());
        buf[24..32].copy_from_slice(&self.data);
        buf
    }

    /// Parses an entry; `None` for an unknown datatype tag, which only
    /// happens on damaged flash.
    pub(crate) fn decode(buf: &[u8; ENTRY_SIZE]) -> Option<Item> {
        let datatype = ItemType::from_repr(buf[1])?;
        let mut key = [0u8; 16];
        key.copy_from_slice(&buf[8..24]);
        let mut data = [0u8; 8];
        data.copy_from_slice(&buf[24..32]);
        Some(Item {
            ns_index: buf[0],
            datatype,
            span: buf[2],
            chunk_index: buf[3],
            crc: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            key: Key::from_raw(key),
            data,
        })
    }

    pub(crate) fn var_meta(&self) -> VarMeta {
        VarMeta {
            size: u16::from_le_bytes(self.data[..2].try_into().unwrap()),
            crc: u32::from_le_bytes(self.data[4..].try_into().unwrap()),
        }
    }

    pub(crate) fn blob_index_meta(&self) -> BlobIndexMeta {
        BlobIndexMeta {
            size: u32::from_le_bytes(self.data[..4].try_into().unwrap()),
            chunk_count: self.data[4],
            chunk_start: self.data[5],
        }
    }

    /// Stored payload size in bytes, independent of where it lives.
    pub(crate) fn data_size(&self) -> usize {
        match self.datatype {
            ItemType::BlobIndex => self.blob_index_meta().size as usize,
            t if t.is_variable_length() => self.var_meta().size as usize,
            t => t.primitive_width().unwrap_or(0),
        }
    }

    /// Header CRC: bytes 0..4 (identity and span), the key, and the value
    /// field. The CRC field itself is skipped.
    pub(crate) fn calculate_crc32(&self) -> u32 {
        let buf = self.encode();
        let mut result = crc32_le(u32::MAX, &buf[0..4]);
        result = crc32_le(result, &buf[8..24]);
        crc32_le(result, &buf[24..32])
    }

    /// 24-bit identity hash: everything that names the item, nothing of its
    /// value. Collisions are tolerated, the page verifies candidates.
    pub(crate) fn calculate_hash(&self) -> u24 {
        Item::hash_of(self.ns_index, &self.key, self.chunk_index)
    }

    pub(crate) fn hash_of(ns_index: u8, key: &Key, chunk_index: u8) -> u24 {
        let mut result = crc32_le(u32::MAX, &[ns_index]);
        result = crc32_le(result, key.as_bytes());
        result = crc32_le(result, &[chunk_index]);
        u24::from_u32(result & 0x00FF_FFFF)
    }
}
