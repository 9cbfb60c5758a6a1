//! Common imports
//!
//! ```ignore
//! use chronicle::prelude::*;
//! ```

pub use crate::config::ChronicleConfig;
pub use crate::database::Chronicle;

pub use chronicle_core::{Context, Error, ErrorCode, PlatformId, Result};
pub use chronicle_tasks::{
    AnalyticalStorage, LogFilter, QueryService, Run, RunFilter, RunStatus, Task,
    TaskControlService, TaskService,
};
pub use chronicle_tenant::{Bucket, BucketFilter, BucketService, BucketType, BucketUpdate, FindOptions};
