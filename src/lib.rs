//! Chronicle - tenant metadata and task-run reconciliation for a
//! multi-tenant time-series database
//!
//! Chronicle keeps two kinds of state:
//! - **Buckets**: named containers of time-series data, owned by an
//!   organization, stored in a transactional key-value substrate with a
//!   per-organization name index
//! - **Runs**: executions of scheduled tasks, split between a transactional
//!   tier of recent runs and an archival tier of finished runs
//!
//! # Quick Start
//!
//! ```ignore
//! use chronicle::prelude::*;
//!
//! let db = Chronicle::ephemeral()?;
//! let ctx = Context::background();
//! let bucket = db
//!     .buckets()
//!     .create_bucket(&ctx, Bucket::new(org_id, "telemetry"))?;
//! ```
//!
//! # Architecture
//!
//! - `chronicle-core`: identities, errors, cancellation and the substrate traits
//! - `chronicle-storage`: the in-memory transactional substrate
//! - `chronicle-tenant`: the bucket store and its service
//! - `chronicle-tasks`: the run reconciliation layer and column decoder

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod database;
pub mod prelude;

pub use config::{ChronicleConfig, StorageConfig, TasksConfig, CONFIG_FILE_NAME};
pub use database::Chronicle;

pub use chronicle_core::{Context, Error, ErrorCode, PlatformId, Result};

pub use chronicle_storage as storage;
pub use chronicle_tasks as tasks;
pub use chronicle_tenant as tenant;
