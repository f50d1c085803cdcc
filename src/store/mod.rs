//! Byte Store Module
//!
//! Named files viewed as linear byte arrays.
//!
//! ## Responsibilities
//! - Read/write at offset, append, size
//! - Share one file between several logical storages
//! - Atomically swap the file behind a store while readers are in flight
//!
//! ## Ownership
//! ```text
//!   ByteStore ──┐                       ┌── ReadHandle (pinned)
//!   ByteStore ──┼──► slot ──► Arc<Backing> ◄──┤
//!   (share)     │   (RwLock)   Disk | Memory  └── ReadHandle (pinned)
//! ```
//! `share()` clones the slot: both handles see later swaps. `snapshot()`
//! clones the backing: the handle keeps reading the old bytes after a swap.
//! A backing marked discarded deletes its file when the last `Arc` drops.

mod backing;
mod directory;
mod handle;

pub use directory::{StoreDirectory, DATA_EXTENSION};
pub use handle::{ByteStore, ReadHandle};
