//! Storage Module
//!
//! Record storages built on byte stores.
//!
//! ## Responsibilities
//! - Fixed-stride record files with positional access ([`IndexedStorage`])
//! - Key-ordered, immutable record files with binary search ([`SortedStorage`])
//! - Sorting raw input and k-way merging sorted storages, newest wins
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Record 0          (T::SIZE bytes)      │
//! ├────────────────────────────────────────┤
//! │ Record 1          (T::SIZE bytes)      │
//! ├────────────────────────────────────────┤
//! │ ...                                    │
//! └────────────────────────────────────────┘
//! ```
//! No header, no footer: record `i` starts at `i * T::SIZE`. Sorted files
//! hold strictly ascending keys.

mod indexed;
mod iterator;
mod merge;
mod sorted;

pub use indexed::{IndexedStorage, RecordView};
pub use iterator::RecordIter;
pub use merge::MergeIterator;
pub use sorted::{sorted_end, SortedStorage};
