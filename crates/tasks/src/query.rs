//! Archival query gateway interface
//!
//! The gateway executes a script on behalf of an authorization and streams
//! back results. Each result holds tables; each table is a sequence of
//! column-oriented chunks.
//!
//! ## Resource Discipline
//!
//! A [`ResultIterator`] holds resources of the running query and must be
//! released on every exit path. Wrap it in a [`ReleaseGuard`] as soon as it
//! is returned.

use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use chronicle_core::{Context, Error, PlatformId, Result};

// ========== Authorization ==========

/// What a permission allows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read access
    Read,
    /// Write access
    Write,
}

/// Kind of resource a permission applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    /// Buckets
    Buckets,
}

/// A resource, optionally narrowed to one organization and one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Resource kind
    pub kind: ResourceType,
    /// Owning organization
    pub org_id: Option<PlatformId>,
    /// Specific instance
    pub id: Option<PlatformId>,
}

/// Action on a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    /// Allowed action
    pub action: Action,
    /// Target resource
    pub resource: Resource,
}

/// Whether an authorization may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// Usable
    Active,
    /// Disabled
    Inactive,
}

/// Credential presented with a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Authorization identity
    pub id: PlatformId,
    /// Organization the authorization belongs to
    pub org_id: PlatformId,
    /// Active or inactive
    pub status: AuthorizationStatus,
    /// Granted permissions
    pub permissions: Vec<Permission>,
}

impl Authorization {
    /// A system-internal credential that can only read one bucket.
    ///
    /// Never derived from the caller's credential.
    pub fn read_bucket(org_id: PlatformId, bucket_id: PlatformId) -> Self {
        Self {
            id: bucket_id,
            org_id,
            status: AuthorizationStatus::Active,
            permissions: vec![Permission {
                action: Action::Read,
                resource: Resource {
                    kind: ResourceType::Buckets,
                    org_id: Some(org_id),
                    id: Some(bucket_id),
                },
            }],
        }
    }

    /// Whether this authorization allows `action` on bucket `bucket_id`
    pub fn allows(&self, action: Action, bucket_id: PlatformId) -> bool {
        self.status == AuthorizationStatus::Active
            && self.permissions.iter().any(|p| {
                p.action == action
                    && p.resource.kind == ResourceType::Buckets
                    && p.resource.id.map_or(true, |id| id == bucket_id)
            })
    }
}

/// A compiled query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Credential the query runs under
    pub authorization: Authorization,
    /// Organization the query runs in
    pub organization_id: PlatformId,
    /// Script text
    pub query: String,
}

// ========== Results ==========

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColType {
    /// UTF-8 strings
    String,
    /// Booleans
    Bool,
    /// Signed integers
    Int,
    /// Floats
    Float,
    /// Timestamps
    Time,
}

/// Column label and type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColMeta {
    /// Column label
    pub label: String,
    /// Declared type
    pub col_type: ColType,
}

/// Column values
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// String values
    Strings(Vec<String>),
    /// Boolean values
    Bools(Vec<bool>),
    /// Integer values
    Ints(Vec<i64>),
    /// Float values
    Floats(Vec<f64>),
    /// Timestamp values
    Times(Vec<DateTime<Utc>>),
}

impl Column {
    fn col_type(&self) -> ColType {
        match self {
            Column::Strings(_) => ColType::String,
            Column::Bools(_) => ColType::Bool,
            Column::Ints(_) => ColType::Int,
            Column::Floats(_) => ColType::Float,
            Column::Times(_) => ColType::Time,
        }
    }

    fn len(&self) -> usize {
        match self {
            Column::Strings(v) => v.len(),
            Column::Bools(v) => v.len(),
            Column::Ints(v) => v.len(),
            Column::Floats(v) => v.len(),
            Column::Times(v) => v.len(),
        }
    }
}

/// One column-oriented chunk of a table
///
/// All columns have the same number of rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColReader {
    cols: Vec<ColMeta>,
    data: Vec<Column>,
    len: usize,
}

impl ColReader {
    /// Start an empty chunk
    pub fn builder() -> ColReaderBuilder {
        ColReaderBuilder::default()
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the chunk has no rows
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Column metadata, in column order
    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    /// String values of column `j`, if it is a string column
    pub fn strings(&self, j: usize) -> Option<&[String]> {
        match self.data.get(j) {
            Some(Column::Strings(v)) => Some(v),
            _ => None,
        }
    }

    /// Boolean values of column `j`, if it is a boolean column
    pub fn bools(&self, j: usize) -> Option<&[bool]> {
        match self.data.get(j) {
            Some(Column::Bools(v)) => Some(v),
            _ => None,
        }
    }
}

/// Builds a [`ColReader`] column by column
#[derive(Debug, Default)]
pub struct ColReaderBuilder {
    cols: Vec<ColMeta>,
    data: Vec<Column>,
}

impl ColReaderBuilder {
    /// Append a column
    pub fn column(mut self, label: impl Into<String>, column: Column) -> Self {
        self.cols.push(ColMeta {
            label: label.into(),
            col_type: column.col_type(),
        });
        self.data.push(column);
        self
    }

    /// Append a string column
    pub fn strings<I, V>(self, label: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.column(
            label,
            Column::Strings(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Append a boolean column
    pub fn bools(self, label: impl Into<String>, values: impl IntoIterator<Item = bool>) -> Self {
        self.column(label, Column::Bools(values.into_iter().collect()))
    }

    /// Finish the chunk; fails if the columns disagree on row count
    pub fn build(self) -> Result<ColReader> {
        let len = self.data.first().map_or(0, Column::len);
        if let Some(bad) = self.data.iter().position(|c| c.len() != len) {
            return Err(Error::Query {
                message: format!(
                    "column {:?} has {} rows, expected {}",
                    self.cols[bad].label,
                    self.data[bad].len(),
                    len
                ),
            });
        }
        Ok(ColReader {
            cols: self.cols,
            data: self.data,
            len,
        })
    }
}

/// A table: a sequence of chunks sharing a group key
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    chunks: Vec<ColReader>,
}

impl Table {
    /// A table made of `chunks`
    pub fn new(chunks: Vec<ColReader>) -> Self {
        Self { chunks }
    }

    /// Chunks in stream order
    pub fn chunks(&self) -> &[ColReader] {
        &self.chunks
    }
}

/// One named result of a query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    /// Result name
    pub name: String,
    /// Tables in stream order
    pub tables: Vec<Table>,
}

/// Streaming handle over a running query
pub trait ResultIterator: Send {
    /// Whether another result is available
    fn more(&mut self) -> bool;

    /// The next result; `None` once exhausted
    fn next(&mut self) -> Option<QueryResult>;

    /// Free the resources of the running query. Safe to call more than once.
    fn release(&mut self);

    /// Error that ended the stream, if any
    fn err(&mut self) -> Option<Error>;
}

/// Releases the wrapped iterator when dropped
pub struct ReleaseGuard {
    inner: Box<dyn ResultIterator>,
}

impl ReleaseGuard {
    /// Take ownership of `inner`
    pub fn new(inner: Box<dyn ResultIterator>) -> Self {
        Self { inner }
    }
}

impl Deref for ReleaseGuard {
    type Target = dyn ResultIterator;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for ReleaseGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// Archival query gateway
pub trait QueryService: Send + Sync {
    /// Start executing `request`
    fn query(&self, ctx: &Context, request: &QueryRequest) -> Result<Box<dyn ResultIterator>>;
}
