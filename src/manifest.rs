//! Manifest
//!
//! Names the files that make up the engine's current state so it can be
//! reopened after a restart.
//!
//! ## File Format
//! ```text
//! ┌──────────────┬───────────────────┬──────────────┬──────────────────┐
//! │ Magic "TKVM" │ Payload Len (u32) │ CRC32 (u32)  │ Payload (bincode)│
//! └──────────────┴───────────────────┴──────────────┴──────────────────┘
//! ```
//!
//! ## Crash Safety
//! The manifest is rewritten atomically: write `MANIFEST.tmp`, fsync, then
//! rename over `MANIFEST`. Writing it is the commit point of every shrink;
//! files it does not name are leftovers and are removed on open.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TierError};

/// Name of the manifest file within the data directory
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Temporary file used during atomic manifest writes
pub const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

const MAGIC: &[u8; 4] = b"TKVM";

/// Magic (4) + Payload Len (4) + CRC32 (4)
const HEADER_SIZE: usize = 12;

/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// File name of the unsorted head storage
    pub head: String,
    /// File names of the sorted generations, newest first
    pub generations: Vec<String>,
}

impl Manifest {
    pub fn new(head: String, generations: Vec<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            head,
            generations,
        }
    }

    /// Every file name the manifest references
    pub fn files(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.head.as_str()).chain(self.generations.iter().map(|s| s.as_str()))
    }

    /// Load `dir/MANIFEST`, or `None` when the directory has none yet
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILENAME);
        if !path.exists() {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        File::open(&path)?.read_to_end(&mut bytes)?;

        if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
            return Err(TierError::Corruption(format!(
                "invalid manifest header in {}",
                path.display()
            )));
        }

        let payload_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let stored_crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let payload = &bytes[HEADER_SIZE..];
        if payload.len() != payload_len {
            return Err(TierError::Corruption(format!(
                "manifest payload is {} bytes, header says {}",
                payload.len(),
                payload_len
            )));
        }
        if crc32fast::hash(payload) != stored_crc {
            return Err(TierError::Corruption("manifest checksum mismatch".to_string()));
        }

        let manifest: Manifest = bincode::deserialize(payload)
            .map_err(|e| TierError::Corruption(format!("undecodable manifest: {}", e)))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(TierError::Corruption(format!(
                "unsupported manifest version: {}",
                manifest.version
            )));
        }
        Ok(Some(manifest))
    }

    /// Persist atomically into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let payload = bincode::serialize(self)?;
        let tmp_path = dir.join(MANIFEST_TMP_FILENAME);

        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(MAGIC)?;
            file.write_all(&(payload.len() as u32).to_le_bytes())?;
            file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, dir.join(MANIFEST_FILENAME))?;
        tracing::debug!(
            "Saved manifest: head={}, generations={}",
            self.head,
            self.generations.len()
        );
        Ok(())
    }
}
