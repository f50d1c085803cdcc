//! # TierKV
//!
//! An embedded, disk-backed key-value storage engine for fixed-size records:
//! - Writes append to an unsorted head file
//! - Shrink sorts the head and merges it into sorted generation files
//! - Bloom-filter registers let lookups skip files without reading them
//! - A manifest makes every shrink an atomic, crash-safe switch
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ShrinkableStorage                        │
//! │        (write lock / maintenance lock / publish lock)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌────────────────┐
//!   │    Head     │          │ GenerationList │
//!   │ (Indexed)   │          │ (Sorted + Reg) │
//!   └──────┬──────┘          └───────┬────────┘
//!          │                         │
//!          └────────────┬────────────┘
//!                       ▼
//!               ┌──────────────┐      ┌──────────┐
//!               │  ByteStore   │      │ Manifest │
//!               │ (disk / RAM) │      │          │
//!               └──────────────┘      └──────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod store;
pub mod storage;
pub mod register;
pub mod generations;
pub mod manifest;
pub mod engine;
pub mod sharded;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TierError};
pub use config::{Backend, Config};
pub use codec::{ByteArray, Key};
pub use engine::{ShrinkableStorage, StorageStats};
pub use sharded::ShardedStorage;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TierKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
