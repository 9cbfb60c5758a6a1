//! Core types and traits for Chronicle
//!
//! This crate defines the foundational types used throughout the system:
//! - PlatformId: fixed-width identity shared by organizations, buckets, tasks and runs
//! - Error: error taxonomy with machine-readable codes
//! - Context: cancellation and deadline propagation
//! - Traits: the transactional key-value substrate (KvStore, Tx, Partition, ForwardCursor)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod id;
pub mod traits;

pub use context::Context;
pub use error::{Error, ErrorCode, Result, StorageError};
pub use id::{IdError, PlatformId, ID_LENGTH};
pub use traits::{CursorDirection, CursorOptions, ForwardCursor, KvStore, Partition, Tx};
