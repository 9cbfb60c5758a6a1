//! Core traits for the transactional key-value substrate
//!
//! This module defines the KvStore, Tx, Partition and ForwardCursor traits
//! that the stores above are written against. Implementations provide
//! named partitions of byte-ordered keys inside atomic transactions.
//!
//! ## Transactions
//!
//! - `view` runs a read-only closure. Any number may run concurrently.
//! - `update` runs a read-write closure. At most one runs at a time. If the
//!   closure returns an error, none of its writes become visible.
//!
//! ## Cursors
//!
//! A cursor starts at `seek` and walks in the configured direction:
//! - ascending: first key `>= seek` (or the first key when `seek` is `None`)
//! - descending: last key `<= seek` (or the last key when `seek` is `None`)
//!
//! With a prefix, iteration stops at the first key that does not carry it.
//! There is no way to anchor a descending cursor at "the end of a prefix"
//! without knowing the last key under that prefix.

use crate::context::Context;
use crate::error::{Result, StorageError};

/// Traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorDirection {
    /// Increasing byte order
    #[default]
    Ascending,
    /// Decreasing byte order
    Descending,
}

/// Cursor configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorOptions {
    /// Restrict iteration to keys starting with these bytes
    pub prefix: Option<Vec<u8>>,
    /// Walk direction
    pub direction: CursorDirection,
}

impl CursorOptions {
    /// Restrict to keys with `prefix`
    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Walk in decreasing key order
    pub fn descending(mut self) -> Self {
        self.direction = CursorDirection::Descending;
        self
    }
}

/// Ordered traversal over one partition
pub trait ForwardCursor {
    /// Next key/value pair, or `None` once exhausted or failed.
    ///
    /// After `None`, check [`ForwardCursor::err`] to tell the two apart.
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)>;

    /// Error that stopped iteration early, if any
    fn err(&self) -> Option<StorageError>;

    /// Release the cursor
    fn close(&mut self) -> std::result::Result<(), StorageError>;
}

/// A named keyspace inside a transaction
pub trait Partition {
    /// Fetch a value. Missing keys yield [`StorageError::NotFound`].
    fn get(&self, key: &[u8]) -> std::result::Result<Vec<u8>, StorageError>;

    /// Insert or overwrite a value
    fn put(&self, key: &[u8], value: &[u8]) -> std::result::Result<(), StorageError>;

    /// Remove a key. Removing a missing key is not an error.
    fn delete(&self, key: &[u8]) -> std::result::Result<(), StorageError>;

    /// Open a cursor positioned at `seek`
    fn forward_cursor<'a>(
        &'a self,
        seek: Option<&[u8]>,
        opts: CursorOptions,
    ) -> std::result::Result<Box<dyn ForwardCursor + 'a>, StorageError>;
}

/// A read or read-write transaction
pub trait Tx {
    /// Open an existing partition
    fn partition<'a>(
        &'a self,
        name: &[u8],
    ) -> std::result::Result<Box<dyn Partition + 'a>, StorageError>;

    /// Create a partition unless it already exists (write transactions only)
    fn create_partition_if_not_exists(&self, name: &[u8]) -> std::result::Result<(), StorageError>;

    /// Whether writes are permitted
    fn writable(&self) -> bool;

    /// Context the transaction was opened with
    fn context(&self) -> &Context;
}

/// Transactional store of named partitions
///
/// Thread safety: all methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait KvStore: Send + Sync {
    /// Run `f` inside a read-only transaction
    fn view<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Tx) -> Result<T>;

    /// Run `f` inside a read-write transaction, committing only on `Ok`
    fn update<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Tx) -> Result<T>;
}
