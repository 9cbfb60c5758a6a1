//! Bucket domain types
//!
//! A bucket is a named, organization-scoped retention container. Buckets are
//! stored as JSON in the primary partition keyed by their encoded ID.

use chrono::{DateTime, Utc};
use chronicle_core::{Error, PlatformId, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketType {
    /// Created by users
    #[default]
    Normal,
    /// Created and owned by the platform (e.g. `_tasks`)
    System,
}

/// Organization-scoped retention container
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Generated identity (invalid until created)
    pub id: PlatformId,
    /// Owning organization
    #[serde(rename = "orgID")]
    pub org_id: PlatformId,
    /// Normal or system
    #[serde(rename = "type", default)]
    pub bucket_type: BucketType,
    /// Unique within the organization
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// How long data is kept; zero means forever
    #[serde(default, with = "duration_nanos")]
    pub retention_period: Duration,
    /// Width of a shard group; zero means derived from retention
    #[serde(default, with = "duration_nanos")]
    pub shard_group_duration: Duration,
    /// Stamped on creation
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    /// Stamped on every update
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Bucket {
    /// A normal bucket with the given owner and name
    pub fn new(org_id: PlatformId, name: impl Into<String>) -> Self {
        Self {
            org_id,
            name: name.into(),
            ..Self::default()
        }
    }

    /// A system bucket with the given owner and name
    pub fn system(org_id: PlatformId, name: impl Into<String>) -> Self {
        Self {
            bucket_type: BucketType::System,
            ..Self::new(org_id, name)
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the retention period
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_period = retention;
        self
    }

    /// Whether this is a platform-owned bucket
    pub fn is_system(&self) -> bool {
        self.bucket_type == BucketType::System
    }
}

/// Partial update applied by `update_bucket`. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketUpdate {
    /// New name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New retention period
    pub retention_period: Option<Duration>,
    /// New shard-group duration
    pub shard_group_duration: Option<Duration>,
}

impl BucketUpdate {
    /// Rename only
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketFilter {
    /// Exact name match
    pub name: Option<String>,
    /// Owning organization
    pub org_id: Option<PlatformId>,
}

impl BucketFilter {
    /// Restrict to one organization
    pub fn org(org_id: PlatformId) -> Self {
        Self {
            org_id: Some(org_id),
            ..Self::default()
        }
    }

    /// Restrict to one name
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Pagination for listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Resume after this identity
    pub after: Option<PlatformId>,
    /// Entries to skip at the start of the traversal
    pub offset: usize,
    /// Maximum results; zero means unbounded
    pub limit: usize,
    /// Walk in reverse key order
    pub descending: bool,
}

impl FindOptions {
    /// Page of at most `limit` results
    pub fn limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Resume after `id`
    pub fn after(mut self, id: PlatformId) -> Self {
        self.after = Some(id);
        self
    }

    /// Skip `offset` entries first
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Reverse the order
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// Validate a bucket name for the given bucket type.
///
/// Names beginning with `_` are reserved for system buckets. Quotation marks
/// break the query language and are never allowed.
pub fn valid_bucket_name(name: &str, bucket_type: BucketType) -> Result<()> {
    if name.is_empty() {
        return Err(Error::BucketNameEmpty);
    }
    if name.starts_with('_') && bucket_type != BucketType::System {
        return Err(Error::ReservedBucketName {
            name: name.to_string(),
        });
    }
    if name.contains(|c| c == '"' || c == '\'') {
        return Err(Error::BucketNameInvalidChars);
    }
    Ok(())
}

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}
