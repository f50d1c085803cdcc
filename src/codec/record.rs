//! Composite record types: key-value pairs and tombstoned values.

use crate::error::{Result, TierError};

use super::{ensure_len, FixedCodec};

/// Values that may carry a deletion marker
pub trait Removable {
    /// True when the value marks a deleted key
    fn is_removed(&self) -> bool {
        false
    }
}

/// A record that can live in a sorted storage: it has a key, and it may be
/// a tombstone.
pub trait Record: FixedCodec + Clone + Send + Sync + 'static {
    type Key: FixedCodec + Ord + Clone + Send + Sync + 'static;

    fn key(&self) -> &Self::Key;

    fn is_tombstone(&self) -> bool {
        false
    }
}

// =============================================================================
// KeyValue
// =============================================================================

/// The unit stored in a record storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> KeyValue<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

impl<K: FixedCodec, V: FixedCodec> FixedCodec for KeyValue<K, V> {
    const SIZE: usize = K::SIZE + V::SIZE;

    fn encode_into(&self, out: &mut [u8]) {
        self.key.encode_into(&mut out[..K::SIZE]);
        self.value.encode_into(&mut out[K::SIZE..Self::SIZE]);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, Self::SIZE, "key-value")?;
        Ok(Self {
            key: K::decode(&bytes[..K::SIZE])?,
            value: V::decode(&bytes[K::SIZE..Self::SIZE])?,
        })
    }
}

impl<K, V> Record for KeyValue<K, V>
where
    K: FixedCodec + Ord + Clone + Send + Sync + 'static,
    V: FixedCodec + Removable + Clone + Send + Sync + 'static,
{
    type Key = K;

    fn key(&self) -> &K {
        &self.key
    }

    fn is_tombstone(&self) -> bool {
        self.value.is_removed()
    }
}

// =============================================================================
// MaybeRemovedValue
// =============================================================================

const PRESENT_FLAG: u8 = 0;
const REMOVED_FLAG: u8 = 1;

/// A value or a deletion marker. A tombstone still reserves the full value
/// width on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaybeRemovedValue<T> {
    pub value: T,
    pub removed: bool,
}

impl<T> MaybeRemovedValue<T> {
    pub fn present(value: T) -> Self {
        Self {
            value,
            removed: false,
        }
    }

    /// `None` for a tombstone
    pub fn into_option(self) -> Option<T> {
        if self.removed {
            None
        } else {
            Some(self.value)
        }
    }
}

impl<T: Default> MaybeRemovedValue<T> {
    /// Deletion marker with a zeroed payload
    pub fn tombstone() -> Self {
        Self {
            value: T::default(),
            removed: true,
        }
    }
}

impl<T> Removable for MaybeRemovedValue<T> {
    fn is_removed(&self) -> bool {
        self.removed
    }
}

impl<T: FixedCodec> FixedCodec for MaybeRemovedValue<T> {
    const SIZE: usize = 1 + T::SIZE;

    fn encode_into(&self, out: &mut [u8]) {
        out[0] = if self.removed { REMOVED_FLAG } else { PRESENT_FLAG };
        self.value.encode_into(&mut out[1..Self::SIZE]);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, Self::SIZE, "maybe-removed value")?;
        let removed = match bytes[0] {
            PRESENT_FLAG => false,
            REMOVED_FLAG => true,
            other => {
                return Err(TierError::Corruption(format!(
                    "invalid tombstone flag: {:#04x}",
                    other
                )))
            }
        };
        Ok(Self {
            value: T::decode(&bytes[1..Self::SIZE])?,
            removed,
        })
    }
}
