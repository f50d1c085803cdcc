//! Fixed-length byte arrays and keys.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TierError};

use super::{ensure_len, FixedCodec, Removable};

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name<const N: usize>([u8; N]);

        impl<const N: usize> $name<N> {
            /// Wrap raw bytes
            pub const fn new(bytes: [u8; N]) -> Self {
                Self(bytes)
            }

            /// Copy exactly `N` bytes into a new value.
            pub fn from_slice(bytes: &[u8]) -> Result<Self> {
                if bytes.len() != N {
                    return Err(TierError::InvalidArgument(format!(
                        "{} must be exactly {} bytes, got {}",
                        $what,
                        N,
                        bytes.len()
                    )));
                }
                let mut raw = [0u8; N];
                raw.copy_from_slice(bytes);
                Ok(Self(raw))
            }

            /// Copy up to `N` bytes, zero-padding on the right.
            ///
            /// Input ending in a zero byte is rejected: it would pad to the
            /// same value as its shorter prefix.
            pub fn from_padded(bytes: &[u8]) -> Result<Self> {
                if bytes.len() > N {
                    return Err(TierError::InvalidArgument(format!(
                        "{} of {} bytes does not fit into {} bytes",
                        $what,
                        bytes.len(),
                        N
                    )));
                }
                if bytes.last() == Some(&0) {
                    return Err(TierError::InvalidArgument(format!(
                        "padded {} must not end in a zero byte",
                        $what
                    )));
                }
                let mut raw = [0u8; N];
                raw[..bytes.len()].copy_from_slice(bytes);
                Ok(Self(raw))
            }

            pub fn as_bytes(&self) -> &[u8; N] {
                &self.0
            }

            pub fn into_inner(self) -> [u8; N] {
                self.0
            }
        }

        impl<const N: usize> Default for $name<N> {
            fn default() -> Self {
                Self([0u8; N])
            }
        }

        impl<const N: usize> From<[u8; N]> for $name<N> {
            fn from(bytes: [u8; N]) -> Self {
                Self(bytes)
            }
        }

        impl<const N: usize> AsRef<[u8]> for $name<N> {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl<const N: usize> FromStr for $name<N> {
            type Err = TierError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_padded(s.as_bytes())
            }
        }

        /// Text up to the first zero byte, lossily decoded
        impl<const N: usize> fmt::Display for $name<N> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
                write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
            }
        }

        impl<const N: usize> fmt::Debug for $name<N> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.to_string())
            }
        }

        impl<const N: usize> FixedCodec for $name<N> {
            const SIZE: usize = N;

            fn encode_into(&self, out: &mut [u8]) {
                out[..N].copy_from_slice(&self.0);
            }

            fn decode(bytes: &[u8]) -> Result<Self> {
                ensure_len(bytes, N, $what)?;
                let mut raw = [0u8; N];
                raw.copy_from_slice(&bytes[..N]);
                Ok(Self(raw))
            }
        }
    };
}

fixed_bytes!(
    /// Fixed-length value payload
    ByteArray,
    "byte array"
);

fixed_bytes!(
    /// Fixed-length key, ordered byte-lexicographically
    Key,
    "key"
);

impl<const N: usize> Removable for ByteArray<N> {}
