//! Tenant object store for Chronicle
//!
//! This crate manages buckets, the organization-scoped retention containers:
//! - **Store**: CRUD and paginated listing inside caller-supplied transactions
//! - **TenantService**: wraps each store call in its own transaction
//! - **BucketService**: the narrow trait other components depend on
//!
//! ## Name Uniqueness
//!
//! `(org_id, name)` is unique across all buckets. Uniqueness is enforced by a
//! secondary index partition keyed by `encode(org_id) ++ name`, written in
//! the same transaction as the primary record.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod id_gen;
pub mod service;
pub mod store;

pub use bucket::{
    valid_bucket_name, Bucket, BucketFilter, BucketType, BucketUpdate, FindOptions,
};
pub use id_gen::{
    Clock, FixedIdGenerator, IdGenerator, ManualClock, RandomIdGenerator, SequentialIdGenerator,
    SystemClock,
};
pub use service::{BucketService, TenantService};
pub use store::{
    bucket_index_key, Store, BUCKET_INDEX_PARTITION, BUCKET_PARTITION,
    DEFAULT_ID_GENERATION_ATTEMPTS, OP_CREATE_BUCKET, OP_DELETE_BUCKET, OP_FIND_BUCKET,
    OP_FIND_BUCKETS, OP_FIND_BUCKET_BY_ID, OP_UPDATE_BUCKET,
};
