//! Error types for Chronicle
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Codes
//!
//! Every error maps onto one machine-readable [`ErrorCode`]:
//!
//! | Code | Meaning |
//! |------|---------|
//! | Internal | Substrate failure, encoding failure, invariant violation |
//! | NotFound | Entity or index entry absent |
//! | Conflict | Duplicate name, incompatible value |
//! | Invalid | Malformed request or filter |
//! | UnprocessableEntity | Entity could not be serialized |
//! | EmptyValue | Required key or name missing |
//! | TooLarge | Key or value exceeds substrate limits |
//! | Cancelled | Caller cancelled or deadline passed |
//!
//! Substrate errors cross the store boundary as [`Error::Storage`], which
//! keeps the originating [`StorageError`] and the name of the operation that
//! failed. Domain conditions (duplicate name, system bucket rename, ...) are
//! their own variants and are never re-wrapped.

use crate::id::{IdError, PlatformId};
use std::fmt;
use thiserror::Error;

/// Result type alias for Chronicle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Bug, substrate failure or invariant violation
    Internal,
    /// Entity not found
    NotFound,
    /// Action conflicts with existing state
    Conflict,
    /// Validation failed
    Invalid,
    /// Entity is well-typed but could not be processed
    UnprocessableEntity,
    /// A required value was empty
    EmptyValue,
    /// Key or value too large
    TooLarge,
    /// Cancelled by the caller or by a deadline
    Cancelled,
}

impl ErrorCode {
    /// Canonical string form
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Internal => "internal error",
            ErrorCode::NotFound => "not found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Invalid => "invalid",
            ErrorCode::UnprocessableEntity => "unprocessable entity",
            ErrorCode::EmptyValue => "empty value",
            ErrorCode::TooLarge => "request too large",
            ErrorCode::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the transactional key-value substrate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Key absent from the partition
    #[error("key not found")]
    NotFound,

    /// Empty key passed to a write
    #[error("key required")]
    KeyRequired,

    /// Empty partition name
    #[error("partition name required")]
    PartitionNameRequired,

    /// Value cannot be stored under this key
    #[error("incompatible value")]
    IncompatibleValue,

    /// Partition does not exist
    #[error("partition {0:?} not found")]
    PartitionNotFound(String),

    /// Partition already exists
    #[error("partition {0:?} already exists")]
    PartitionExists(String),

    /// Key exceeds the configured maximum
    #[error("key too large: {len} bytes (max {max})")]
    KeyTooLarge {
        /// Offending length
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Value exceeds the configured maximum
    #[error("value too large: {len} bytes (max {max})")]
    ValueTooLarge {
        /// Offending length
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Write attempted inside a read-only transaction
    #[error("transaction not writable")]
    TxNotWritable,

    /// Cursor seek key outside the requested prefix
    #[error("seek missing prefix bytes")]
    SeekMissingPrefix,

    /// Caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Caller deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Any other substrate failure
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Classify the substrate error
    pub fn code(&self) -> ErrorCode {
        match self {
            StorageError::NotFound | StorageError::PartitionNotFound(_) => ErrorCode::NotFound,
            StorageError::KeyRequired | StorageError::PartitionNameRequired => {
                ErrorCode::EmptyValue
            }
            StorageError::IncompatibleValue | StorageError::PartitionExists(_) => {
                ErrorCode::Conflict
            }
            StorageError::KeyTooLarge { .. } | StorageError::ValueTooLarge { .. } => {
                ErrorCode::TooLarge
            }
            StorageError::Cancelled | StorageError::DeadlineExceeded => ErrorCode::Cancelled,
            StorageError::TxNotWritable
            | StorageError::SeekMissingPrefix
            | StorageError::Other(_) => ErrorCode::Internal,
        }
    }

    /// Whether this is a missing-key condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }
}

fn op_prefix(op: &Option<&'static str>) -> String {
    match op {
        Some(op) => format!("{}: ", op),
        None => String::new(),
    }
}

/// All Chronicle errors
#[derive(Debug, Error)]
pub enum Error {
    /// Bucket primary record absent
    #[error("bucket not found")]
    BucketNotFound,

    /// No index entry for the organization/name pair
    #[error("bucket {name:?} not found")]
    BucketNotFoundByName {
        /// Requested name
        name: String,
    },

    /// Bucket name was empty
    #[error("bucket name is empty")]
    BucketNameEmpty,

    /// Organization already owns a bucket with this name
    #[error("bucket with name {name} already exists")]
    BucketAlreadyExists {
        /// Conflicting name
        name: String,
    },

    /// Rename attempted on a system bucket
    #[error("system buckets cannot be renamed")]
    RenameSystemBucket,

    /// Non-system bucket named with the reserved underscore prefix
    #[error("bucket name {name} is invalid; names beginning with an underscore are reserved for system buckets")]
    ReservedBucketName {
        /// Rejected name
        name: String,
    },

    /// Bucket name contains quotation marks
    #[error("bucket names may not include quotation marks")]
    BucketNameInvalidChars,

    /// List filter combined organization and name
    #[error("cannot list buckets filtered by both organization and name")]
    InvalidBucketListRequest,

    /// Stored bucket record failed to decode
    #[error("bucket is corrupt: {0}")]
    CorruptBucket(String),

    /// Bucket failed to encode
    #[error("bucket is unprocessable: {0}")]
    UnprocessableBucket(String),

    /// Identity could not be encoded or decoded
    #[error("invalid id: {0}")]
    InvalidId(#[from] IdError),

    /// ID generator kept producing identities already in use
    #[error("unable to generate a unique id")]
    IdGenerationFailed,

    /// Task does not exist
    #[error("task not found")]
    TaskNotFound,

    /// Run does not exist in the tier that was asked
    #[error("run not found")]
    RunNotFound,

    /// Page limit negative or above the maximum
    #[error("limit {limit} is out of bounds, must be between 1 and {max}")]
    OutOfBoundsLimit {
        /// Requested limit
        limit: i64,
        /// Maximum page size
        max: usize,
    },

    /// A time bound was not valid RFC-3339
    #[error("failed parsing {bound} time: {message}")]
    InvalidTimeBound {
        /// "after" or "before"
        bound: &'static str,
        /// Parser message
        message: String,
    },

    /// After time not strictly before before time
    #[error("given after time must be prior to before time")]
    InvalidTimeRange,

    /// More than one archived record for a single run identity
    #[error("found multiple runs with id {run_id}")]
    MultipleArchivedRuns {
        /// The duplicated run
        run_id: PlatformId,
    },

    /// Archival gateway failure
    #[error("query failed: {message}")]
    Query {
        /// Gateway message
        message: String,
    },

    /// Configuration rejected
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What was wrong
        message: String,
    },

    /// Caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Caller deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Substrate failure, classified and tagged with the failing operation
    #[error("{}{source}", op_prefix(.op))]
    Storage {
        /// Classification derived from the substrate error
        code: ErrorCode,
        /// Operation that observed the failure
        op: Option<&'static str>,
        /// Underlying substrate error
        source: StorageError,
    },

    /// Internal failure not covered by another variant
    #[error("{}{message}", op_prefix(.op))]
    Internal {
        /// Operation that observed the failure
        op: Option<&'static str>,
        /// Description
        message: String,
    },
}

impl Error {
    /// Create an untagged internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            op: None,
            message: message.into(),
        }
    }

    /// Machine-readable classification
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::BucketNotFound
            | Error::BucketNotFoundByName { .. }
            | Error::TaskNotFound
            | Error::RunNotFound => ErrorCode::NotFound,
            Error::BucketNameEmpty => ErrorCode::EmptyValue,
            Error::BucketAlreadyExists { .. } => ErrorCode::Conflict,
            Error::RenameSystemBucket
            | Error::ReservedBucketName { .. }
            | Error::BucketNameInvalidChars
            | Error::InvalidBucketListRequest
            | Error::InvalidId(_)
            | Error::OutOfBoundsLimit { .. }
            | Error::InvalidTimeBound { .. }
            | Error::InvalidTimeRange
            | Error::InvalidConfig { .. } => ErrorCode::Invalid,
            Error::UnprocessableBucket(_) => ErrorCode::UnprocessableEntity,
            Error::CorruptBucket(_)
            | Error::IdGenerationFailed
            | Error::MultipleArchivedRuns { .. }
            | Error::Query { .. }
            | Error::Internal { .. } => ErrorCode::Internal,
            Error::Cancelled | Error::DeadlineExceeded => ErrorCode::Cancelled,
            Error::Storage { code, .. } => *code,
        }
    }

    /// Operation name attached to a storage or internal failure
    pub fn op(&self) -> Option<&'static str> {
        match self {
            Error::Storage { op, .. } | Error::Internal { op, .. } => *op,
            _ => None,
        }
    }

    /// Tag a storage or internal failure with the operation that surfaced it.
    ///
    /// The outermost operation wins. Named domain conditions pass through
    /// untouched.
    pub fn with_op(self, operation: &'static str) -> Self {
        match self {
            Error::Storage { code, source, .. } => Error::Storage {
                code,
                op: Some(operation),
                source,
            },
            Error::Internal { message, .. } => Error::Internal {
                op: Some(operation),
                message,
            },
            other => other,
        }
    }

    /// Check if this is any not-found condition
    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    /// Check if this is the transactional tier's missing-run condition
    pub fn is_run_not_found(&self) -> bool {
        matches!(self, Error::RunNotFound)
    }

    /// Check if the caller cancelled or timed out
    pub fn is_cancelled(&self) -> bool {
        self.code() == ErrorCode::Cancelled
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::Storage {
            code: e.code(),
            op: None,
            source: e,
        }
    }
}
