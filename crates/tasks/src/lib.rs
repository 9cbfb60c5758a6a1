//! Run reconciliation for Chronicle
//!
//! Runs of scheduled tasks live in two tiers:
//! - **Transactional tier**: active and recently finished runs, served by a
//!   [`TaskService`]
//! - **Archival tier**: finished runs recorded as points and read back
//!   through the [`QueryService`] gateway
//!
//! [`AnalyticalStorage`] answers run queries across both tiers without ever
//! returning the same run twice.
//!
//! ## Modules
//!
//! - `model`: tasks, runs, filters and archival field labels
//! - `service`: transactional-tier interfaces
//! - `query`: archival gateway interface and columnar results
//! - `script`: archival query rendering
//! - `reader`: columnar results into runs
//! - `recorder`: finished runs into points
//! - `analytical`: the reconciliation layer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analytical;
pub mod model;
pub mod query;
pub mod reader;
pub mod recorder;
pub mod script;
pub mod service;

pub use analytical::{
    combine_runs, AnalyticalOptions, AnalyticalStorage, DEFAULT_ARCHIVE_WINDOW_DAYS,
    TASKS_SYSTEM_BUCKET_NAME, TASK_DEFAULT_PAGE_SIZE, TASK_MAX_PAGE_SIZE,
};
pub use model::{LogFilter, Run, RunFilter, RunLogEvent, RunStatus, Task};
pub use query::{
    Action, Authorization, AuthorizationStatus, ColMeta, ColReader, ColReaderBuilder, ColType,
    Column, Permission, QueryRequest, QueryResult, QueryService, ReleaseGuard, Resource,
    ResourceType, ResultIterator, Table,
};
pub use reader::RunReader;
pub use recorder::{Point, PointsWriter, RunRecorder, StoragePointsWriterRecorder};
pub use script::{find_run_script, find_runs_script, TimeRange};
pub use service::{TaskControlService, TaskService};
