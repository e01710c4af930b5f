#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

extern crate alloc;

pub mod error;
/// Public so that callers can verify or compute CRCs over stored data
/// independently of the container API.
pub mod crc;
mod container;
mod get;
mod handle;
mod hash_list;
mod item;
mod iterator;
mod page;
mod page_manager;
mod partition;
mod registry;
mod set;
mod u24;

pub use container::Container;
pub use error::Error;
pub use get::Get;
pub use handle::{Handle, OpenMode};
pub use item::ItemType;
pub use iterator::{EntryInfo, EntryIter};
pub use page_manager::Stats;
pub use partition::Partition;
pub use registry::PartitionRegistry;
pub use set::Set;

use core::fmt;

/// Maximum key length is 15 bytes + 1 byte for the null terminator.
const MAX_KEY_LENGTH: usize = 15;
const MAX_KEY_NUL_TERMINATED_LENGTH: usize = MAX_KEY_LENGTH + 1;

/// A 16-byte key used for values and namespace names (15 characters plus
/// null terminator).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Key([u8; MAX_KEY_NUL_TERMINATED_LENGTH]);

impl Key {
    /// Creates a 16 byte, null-padded byte array used as key for values and
    /// namespaces.
    ///
    /// Usage: `Key::from_array(b"my_key")`
    ///
    /// Tip: use a const context if possible to ensure that the key is
    /// transformed at compile time: `const { Key::from_array(b"my_key") }`.
    pub const fn from_array<const M: usize>(src: &[u8; M]) -> Self {
        assert!(M <= MAX_KEY_LENGTH);
        let mut dst = [0u8; MAX_KEY_NUL_TERMINATED_LENGTH];
        let mut i = 0;
        while i < M {
            dst[i] = src[i];
            i += 1;
        }
        Self(dst)
    }

    /// Creates a 16 byte, null-padded byte array used as key for values and
    /// namespaces. Panics if `src` exceeds 15 bytes; use
    /// [`Key::try_from_slice`] for runtime input.
    pub const fn from_slice(src: &[u8]) -> Self {
        assert!(src.len() <= MAX_KEY_LENGTH);
        let mut dst = [0u8; MAX_KEY_NUL_TERMINATED_LENGTH];
        let mut i = 0;
        while i < src.len() {
            dst[i] = src[i];
            i += 1;
        }
        Self(dst)
    }

    /// Creates a 16 byte, null-padded byte array used as key for values and
    /// namespaces.
    ///
    /// Usage: `Key::from_str("my_key")`
    pub const fn from_str(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }

    /// Fallible constructor for runtime-supplied keys.
    pub fn try_from_slice(src: &[u8]) -> Result<Self, Error> {
        if src.len() > MAX_KEY_LENGTH {
            return Err(Error::KeyTooLong);
        }
        Ok(Self::from_slice(src))
    }

    pub fn try_from_str(s: &str) -> Result<Self, Error> {
        Self::try_from_slice(s.as_bytes())
    }

    /// Fallible constructor for runtime-supplied namespace names. Names
    /// share the key's 15-byte limit but report their own error.
    pub fn try_namespace_from_slice(src: &[u8]) -> Result<Self, Error> {
        if src.len() > MAX_KEY_LENGTH {
            return Err(Error::NamespaceTooLong);
        }
        Ok(Self::from_slice(src))
    }

    pub fn try_namespace_from_str(s: &str) -> Result<Self, Error> {
        Self::try_namespace_from_slice(s.as_bytes())
    }

    /// The key as a byte array, including the null padding.
    pub const fn as_bytes(&self) -> &[u8; MAX_KEY_NUL_TERMINATED_LENGTH] {
        &self.0
    }

    /// Namespace names compare case-insensitively; keys compare exactly.
    pub(crate) fn eq_ignore_ascii_case(&self, other: &Key) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    pub(crate) const fn from_raw(raw: [u8; MAX_KEY_NUL_TERMINATED_LENGTH]) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // for debug representation, print as binary string
        write!(f, "Key(b\"")?;

        // skip the terminator slot, which would only add a confusing \0
        // when a full 15-byte key is printed
        for &byte in &self.0[..self.0.len() - 1] {
            // escape_default would escape 0 as \x00, but \0 is more readable
            if byte == 0 {
                write!(f, "\\0")?;
                continue;
            }

            write!(f, "{}", core::ascii::escape_default(byte))?;
        }

        write!(f, "\")")
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
