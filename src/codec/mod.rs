//! Codec Module
//!
//! Fixed-size binary encoding for everything written to a record file.
//!
//! ## Responsibilities
//! - Encode/decode primitive integers (little-endian, fixed width)
//! - Fixed-length byte arrays and keys
//! - Key-value pairs and maybe-removed (tombstoned) values
//!
//! Every type reports its encoded width as a compile-time constant
//! ([`FixedCodec::SIZE`]), so all records of one type share a single stride
//! and a record's offset is always `index * SIZE`.
//!
//! ## Record Layout
//! ```text
//! ┌──────────────────┬──────────────┬──────────────────┐
//! │ Key (KeyLen)     │ Removed (1)  │ Value (Len)      │
//! └──────────────────┴──────────────┴──────────────────┘
//! ```

mod array;
mod record;

pub use array::{ByteArray, Key};
pub use record::{KeyValue, MaybeRemovedValue, Record, Removable};

use crate::error::{Result, TierError};

/// A type with a fixed-width binary representation
pub trait FixedCodec: Sized {
    /// Encoded width in bytes; identical for every value of the type
    const SIZE: usize;

    /// Write exactly `SIZE` bytes into the front of `out`.
    ///
    /// `out` must be at least `SIZE` bytes long.
    fn encode_into(&self, out: &mut [u8]);

    /// Read a value from the first `SIZE` bytes of `bytes`
    fn decode(bytes: &[u8]) -> Result<Self>;

    /// Encode into a freshly allocated buffer
    fn serialize(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        self.encode_into(&mut out);
        out
    }
}

/// Encoded width of `T`
pub const fn deserialized_size<T: FixedCodec>() -> usize {
    T::SIZE
}

/// Decode a `T` from the front of `bytes`
pub fn deserialize<T: FixedCodec>(bytes: &[u8]) -> Result<T> {
    T::decode(bytes)
}

/// Fail with `Corruption` when fewer than `size` bytes are available
pub(crate) fn ensure_len(bytes: &[u8], size: usize, what: &str) -> Result<()> {
    if bytes.len() < size {
        return Err(TierError::Corruption(format!(
            "truncated {}: need {} bytes, got {}",
            what,
            size,
            bytes.len()
        )));
    }
    Ok(())
}

// =============================================================================
// Primitive Codecs
// =============================================================================

macro_rules! impl_int_codec {
    ($($t:ty),* $(,)?) => {
        $(
            impl FixedCodec for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn encode_into(&self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Result<Self> {
                    ensure_len(bytes, Self::SIZE, stringify!($t))?;
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    Ok(<$t>::from_le_bytes(raw))
                }
            }

            impl Removable for $t {}
        )*
    };
}

impl_int_codec!(u8, u16, u32, u64, i32, i64);

impl FixedCodec for bool {
    const SIZE: usize = 1;

    fn encode_into(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        ensure_len(bytes, 1, "bool")?;
        match bytes[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(TierError::Corruption(format!(
                "invalid bool byte: {:#04x}",
                other
            ))),
        }
    }
}
