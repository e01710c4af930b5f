use crate::item::ItemType;
use thiserror::Error;

/// Errors reported by container, page and partition operations. Marked
/// non-exhaustive so variants can be added without breaking callers; most
/// callers only need to handle `KeyNotFound` and `NamespaceNotFound`, the
/// rest are static misuse or hardware faults.
#[derive(Error, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The partition offset has to be aligned to the flash sector size (4k).
    #[error("invalid partition offset")]
    InvalidPartitionOffset,

    /// The partition size has to be a non-zero multiple of the flash sector
    /// size (4k).
    #[error("invalid partition size")]
    InvalidPartitionSize,

    /// The flash device refused or failed a read, write or erase.
    #[error("flash operation failed")]
    FlashOpFail,

    /// Namespace not found: nothing was ever written under this name, or
    /// the entry was lost to corruption and repaired away on init.
    #[error("namespace not found")]
    NamespaceNotFound,

    /// The max namespace name length is 15 bytes plus null terminator.
    #[error("namespace too long")]
    NamespaceTooLong,

    /// Key not found under the given namespace.
    #[error("key not found")]
    KeyNotFound,

    /// The stored item has a different datatype than requested; carries the
    /// type found on flash.
    #[error("item type mismatch: {0}")]
    TypeMismatch(ItemType),

    /// Key or namespace name exceeds 15 bytes.
    #[error("key too long")]
    KeyTooLong,

    /// The key's final byte must be the NUL terminator.
    #[error("key malformed")]
    KeyMalformed,

    /// The namespace name's final byte must be the NUL terminator.
    #[error("namespace malformed")]
    NamespaceMalformed,

    /// Output buffer too small for the stored value.
    #[error("invalid length")]
    InvalidLength,

    /// Strings are limited to one page of payload; blobs to
    /// `(sector count - 1) * CHUNK_MAX_SIZE` bytes.
    #[error("value too long")]
    ValueTooLong,

    /// No sector has room for the item, even after compaction.
    #[error("not enough space")]
    NotEnoughSpace,

    /// Internal: the current page cannot fit the item and the page manager
    /// should activate the next one. Never surfaced to callers.
    #[error("page full")]
    PageFull,

    /// Stored payload failed its CRC check; the damaged item has been
    /// erased.
    #[error("corrupted data")]
    CorruptedData,

    /// Operation on an uninitialized or invalidated container.
    #[error("invalid state")]
    InvalidState,

    /// A page on flash carries a newer format version than this
    /// implementation understands.
    #[error("new format version found")]
    NewVersionFound,

    /// No fully-erased sector exists, so no compaction target is available.
    #[error("no free pages")]
    NoFreePages,

    /// Mutation attempted through a handle opened read-only.
    #[error("handle is read-only")]
    ReadOnly,

    /// The registry already holds an open container for this partition
    /// label.
    #[error("partition already open")]
    AlreadyOpen,
}
