//! Storage layer for Chronicle
//!
//! This crate implements the transactional key-value substrate with:
//! - MemStore: BTreeMap-per-partition storage behind a `parking_lot::RwLock`
//! - Single-writer / many-reader transactions with rollback on error
//! - Prefix-restricted and descending cursors
//! - Key and value size limits
//!
//! Readers work on an immutable snapshot, so a long `view` never blocks a
//! writer and never observes a partially applied `update`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mem;

pub use mem::{MemStore, MemStoreConfig, DEFAULT_MAX_KEY_SIZE, DEFAULT_MAX_VALUE_SIZE};
