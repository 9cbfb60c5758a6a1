//! Bucket object store
//!
//! ## Key Design
//!
//! - Primary partition `bucketsv1`: `encode(id)` → bucket JSON
//! - Index partition `bucketindexv1`: `encode(org_id) ++ name` → `encode(id)`
//!
//! The index enforces name uniqueness per organization and makes listing by
//! organization a byte-range scan over one prefix.
//!
//! ## Transactions
//!
//! Every operation takes the caller's transaction and never opens its own.
//! Index and primary writes for one bucket happen in the same transaction,
//! so a failed write rolls back both.
//!
//! ## Errors
//!
//! Storage and internal failures are tagged with the public operation name
//! (`FindBucketByID`, `FindBuckets`, ...). Named conditions such as
//! [`Error::BucketAlreadyExists`] pass through with their own code.

use std::sync::Arc;

use chronicle_core::{
    Context, CursorOptions, Error, ForwardCursor, KvStore, PlatformId, Result, Tx, ID_LENGTH,
};
use tracing::debug;

use crate::bucket::{valid_bucket_name, Bucket, BucketFilter, BucketUpdate, FindOptions};
use crate::id_gen::{Clock, IdGenerator, RandomIdGenerator, SystemClock};

/// Primary bucket partition
pub const BUCKET_PARTITION: &[u8] = b"bucketsv1";
/// Organization/name index partition
pub const BUCKET_INDEX_PARTITION: &[u8] = b"bucketindexv1";

/// Operation name for lookups by ID
pub const OP_FIND_BUCKET_BY_ID: &str = "FindBucketByID";
/// Operation name for lookups by name
pub const OP_FIND_BUCKET: &str = "FindBucket";
/// Operation name for listings
pub const OP_FIND_BUCKETS: &str = "FindBuckets";
/// Operation name for creation
pub const OP_CREATE_BUCKET: &str = "CreateBucket";
/// Operation name for updates
pub const OP_UPDATE_BUCKET: &str = "UpdateBucket";
/// Operation name for deletion
pub const OP_DELETE_BUCKET: &str = "DeleteBucket";

/// Default number of tries before giving up on a unique ID
pub const DEFAULT_ID_GENERATION_ATTEMPTS: usize = 100;

/// Index key for a bucket name within an organization
pub fn bucket_index_key(org_id: PlatformId, name: &str) -> Result<Vec<u8>> {
    let org = org_id.encode()?;
    let mut key = Vec::with_capacity(ID_LENGTH + name.len());
    key.extend_from_slice(&org);
    key.extend_from_slice(name.as_bytes());
    Ok(key)
}

fn unmarshal_bucket(v: &[u8]) -> Result<Bucket> {
    serde_json::from_slice(v).map_err(|e| Error::CorruptBucket(e.to_string()))
}

fn marshal_bucket(b: &Bucket) -> Result<Vec<u8>> {
    serde_json::to_vec(b).map_err(|e| Error::UnprocessableBucket(e.to_string()))
}

/// Closes `cursor` once `body` has run, surfacing the first error seen:
/// the body's, then the cursor's, then the close failure.
fn drain_cursor<'c, T>(
    mut cursor: Box<dyn ForwardCursor + 'c>,
    body: impl FnOnce(&mut (dyn ForwardCursor + 'c)) -> Result<T>,
) -> Result<T> {
    let out = body(cursor.as_mut());
    let iter_err = cursor.err();
    let closed = cursor.close();
    let out = out?;
    if let Some(e) = iter_err {
        return Err(e.into());
    }
    closed?;
    Ok(out)
}

/// Bucket CRUD and listing over a transactional substrate
pub struct Store<S> {
    kv: Arc<S>,
    id_gen: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    id_generation_attempts: usize,
}

impl<S: KvStore> Store<S> {
    /// Create a store with random IDs and the system clock
    pub fn new(kv: Arc<S>) -> Self {
        Self {
            kv,
            id_gen: Arc::new(RandomIdGenerator),
            clock: Arc::new(SystemClock),
            id_generation_attempts: DEFAULT_ID_GENERATION_ATTEMPTS,
        }
    }

    /// Replace the ID generator
    pub fn with_id_generator(mut self, id_gen: Arc<dyn IdGenerator>) -> Self {
        self.id_gen = id_gen;
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of candidate IDs tried before [`Error::IdGenerationFailed`]
    pub fn with_id_generation_attempts(mut self, attempts: usize) -> Self {
        self.id_generation_attempts = attempts.max(1);
        self
    }

    /// Underlying substrate
    pub fn kv(&self) -> &Arc<S> {
        &self.kv
    }

    /// Run `f` in a read-only transaction
    pub fn view<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Tx) -> Result<T>,
    {
        self.kv.view(ctx, f)
    }

    /// Run `f` in a read-write transaction
    pub fn update<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Tx) -> Result<T>,
    {
        self.kv.update(ctx, f)
    }

    /// Create the bucket and index partitions if missing
    pub fn create_partitions(&self, tx: &dyn Tx) -> Result<()> {
        tx.create_partition_if_not_exists(BUCKET_PARTITION)?;
        tx.create_partition_if_not_exists(BUCKET_INDEX_PARTITION)?;
        Ok(())
    }

    /// Create the partitions in their own transaction
    pub fn init(&self, ctx: &Context) -> Result<()> {
        self.update(ctx, |tx| self.create_partitions(tx))
    }

    // ========== Lookups ==========

    /// Load a bucket by ID
    pub fn get_bucket(&self, tx: &dyn Tx, id: PlatformId) -> Result<Bucket> {
        self.load_bucket(tx, id)
            .map_err(|e| e.with_op(OP_FIND_BUCKET_BY_ID))
    }

    fn load_bucket(&self, tx: &dyn Tx, id: PlatformId) -> Result<Bucket> {
        let encoded = id.encode()?;
        let buckets = tx.partition(BUCKET_PARTITION)?;
        match buckets.get(&encoded) {
            Ok(v) => unmarshal_bucket(&v),
            Err(e) if e.is_not_found() => Err(Error::BucketNotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a bucket through the organization/name index
    pub fn get_bucket_by_name(&self, tx: &dyn Tx, org_id: PlatformId, name: &str) -> Result<Bucket> {
        self.load_bucket_by_name(tx, org_id, name)
            .map_err(|e| e.with_op(OP_FIND_BUCKET))
    }

    fn load_bucket_by_name(&self, tx: &dyn Tx, org_id: PlatformId, name: &str) -> Result<Bucket> {
        let key = bucket_index_key(org_id, name)?;
        let index = tx.partition(BUCKET_INDEX_PARTITION)?;
        let buf = match index.get(&key) {
            Ok(buf) => buf,
            Err(e) if e.is_not_found() => {
                return Err(Error::BucketNotFoundByName {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let id = PlatformId::decode(&buf)?;
        self.get_bucket(tx, id)
    }

    // ========== Listing ==========

    /// List buckets in key order.
    ///
    /// With an organization filter the index is walked, so results come back
    /// ordered by name; otherwise the primary partition is walked and results
    /// are ordered by ID. Combining an organization and a name is a lookup,
    /// not a listing, and is rejected.
    pub fn list_buckets(
        &self,
        tx: &dyn Tx,
        filter: &BucketFilter,
        opts: FindOptions,
    ) -> Result<Vec<Bucket>> {
        self.list(tx, filter, opts)
            .map_err(|e| e.with_op(OP_FIND_BUCKETS))
    }

    fn list(&self, tx: &dyn Tx, filter: &BucketFilter, opts: FindOptions) -> Result<Vec<Bucket>> {
        let scoped_to_valid_org = filter.org_id.map_or(false, |id| id.is_valid());
        if scoped_to_valid_org && filter.name.is_some() {
            return Err(Error::InvalidBucketListRequest);
        }
        if let Some(org_id) = filter.org_id {
            return self.list_buckets_by_org(tx, org_id, opts);
        }

        let buckets = tx.partition(BUCKET_PARTITION)?;
        let mut cursor_opts = CursorOptions::default();
        if opts.descending {
            cursor_opts = cursor_opts.descending();
        }

        // the primary partition is keyed by ID, so `after` is a direct seek
        // to its neighbour in the walk direction
        let seek = match opts.after {
            None => None,
            Some(after) => {
                let neighbour = if opts.descending {
                    after.checked_prev()
                } else {
                    after.checked_next()
                };
                match neighbour {
                    Some(id) => Some(id.encode()?),
                    None => return Ok(Vec::new()),
                }
            }
        };

        let ctx = tx.context();
        let cursor = buckets.forward_cursor(seek.as_ref().map(|s| &s[..]), cursor_opts)?;
        drain_cursor(cursor, |cursor| {
            let mut skipped = 0;
            let mut out = Vec::new();
            while let Some((_, v)) = cursor.next() {
                ctx.check()?;
                if skipped < opts.offset {
                    skipped += 1;
                    continue;
                }
                let bucket = unmarshal_bucket(&v)?;
                if filter.name.as_deref().map_or(true, |n| n == bucket.name) {
                    out.push(bucket);
                }
                if opts.limit != 0 && out.len() >= opts.limit {
                    break;
                }
            }
            Ok(out)
        })
    }

    fn list_buckets_by_org(
        &self,
        tx: &dyn Tx,
        org_id: PlatformId,
        opts: FindOptions,
    ) -> Result<Vec<Bucket>> {
        let prefix = bucket_index_key(org_id, "")?;
        let index = tx.partition(BUCKET_INDEX_PARTITION)?;
        let ctx = tx.context();

        let mut start = prefix.clone();
        let mut cursor_opts = CursorOptions::default().with_prefix(prefix.clone());
        if opts.descending {
            // There is no cursor anchored at the end of a prefix, so walk the
            // whole organization once to find its last key. O(n) before the
            // first result is emitted.
            let cursor = index.forward_cursor(Some(&start), cursor_opts.clone())?;
            start = drain_cursor(cursor, |cursor| {
                let mut last = prefix.clone();
                while let Some((k, _)) = cursor.next() {
                    last = k;
                }
                Ok(last)
            })?;
            cursor_opts = cursor_opts.descending();
        }

        let cursor = index.forward_cursor(Some(&start), cursor_opts)?;
        drain_cursor(cursor, |cursor| {
            let mut skipped = 0;
            let mut searching_for = opts.after;
            let mut out = Vec::new();
            while let Some((_, v)) = cursor.next() {
                ctx.check()?;
                if skipped < opts.offset {
                    skipped += 1;
                    continue;
                }
                let id = PlatformId::decode(&v)?;
                if let Some(after) = searching_for {
                    if id == after {
                        searching_for = None;
                    }
                    continue;
                }
                out.push(self.get_bucket(tx, id)?);
                if opts.limit != 0 && out.len() >= opts.limit {
                    break;
                }
            }
            Ok(out)
        })
    }

    // ========== Mutations ==========

    /// Create a bucket under a freshly generated ID
    ///
    /// The name is checked for uniqueness within the organization and the
    /// created/updated timestamps are stamped from the store's clock.
    pub fn create_bucket(&self, tx: &dyn Tx, bucket: Bucket) -> Result<Bucket> {
        self.insert_bucket(tx, bucket)
            .map_err(|e| e.with_op(OP_CREATE_BUCKET))
    }

    fn insert_bucket(&self, tx: &dyn Tx, mut bucket: Bucket) -> Result<Bucket> {
        bucket.id = self.generate_safe_id(tx)?;
        let encoded = bucket.id.encode()?;

        self.unique_bucket_name(tx, bucket.org_id, &bucket.name)?;

        let now = self.clock.now();
        bucket.created_at = now;
        bucket.updated_at = now;

        let index = tx.partition(BUCKET_INDEX_PARTITION)?;
        let buckets = tx.partition(BUCKET_PARTITION)?;
        let value = marshal_bucket(&bucket)?;
        let index_key = bucket_index_key(bucket.org_id, &bucket.name)?;

        index.put(&index_key, &encoded)?;
        buckets.put(&encoded, &value)?;

        debug!(
            target: "chronicle::tenant",
            bucket_id = %bucket.id,
            org_id = %bucket.org_id,
            name = %bucket.name,
            "Bucket created"
        );
        Ok(bucket)
    }

    /// Apply a partial update
    ///
    /// A rename re-checks uniqueness and moves the index entry. System buckets
    /// cannot be renamed.
    pub fn update_bucket(&self, tx: &dyn Tx, id: PlatformId, upd: BucketUpdate) -> Result<Bucket> {
        self.patch_bucket(tx, id, upd)
            .map_err(|e| e.with_op(OP_UPDATE_BUCKET))
    }

    fn patch_bucket(&self, tx: &dyn Tx, id: PlatformId, upd: BucketUpdate) -> Result<Bucket> {
        let encoded = id.encode()?;
        let mut bucket = self.get_bucket(tx, id)?;
        bucket.updated_at = self.clock.now();

        let renamed_from = match upd.name {
            Some(name) if name != bucket.name => {
                if bucket.is_system() {
                    return Err(Error::RenameSystemBucket);
                }
                valid_bucket_name(&name, bucket.bucket_type)?;
                self.unique_bucket_name(tx, bucket.org_id, &name)?;
                Some(std::mem::replace(&mut bucket.name, name))
            }
            _ => None,
        };

        if let Some(description) = upd.description {
            bucket.description = description;
        }
        if let Some(retention) = upd.retention_period {
            bucket.retention_period = retention;
        }
        if let Some(shard_group) = upd.shard_group_duration {
            bucket.shard_group_duration = shard_group;
        }

        let value = marshal_bucket(&bucket)?;
        tx.partition(BUCKET_PARTITION)?.put(&encoded, &value)?;

        // the new index entry is written only once the record it points at is
        if let Some(old_name) = renamed_from {
            let index = tx.partition(BUCKET_INDEX_PARTITION)?;
            index.delete(&bucket_index_key(bucket.org_id, &old_name)?)?;
            index.put(&bucket_index_key(bucket.org_id, &bucket.name)?, &encoded)?;
            debug!(
                target: "chronicle::tenant",
                bucket_id = %bucket.id,
                from = %old_name,
                to = %bucket.name,
                "Bucket renamed"
            );
        }

        Ok(bucket)
    }

    /// Delete a bucket and its index entry
    pub fn delete_bucket(&self, tx: &dyn Tx, id: PlatformId) -> Result<()> {
        self.remove_bucket(tx, id)
            .map_err(|e| e.with_op(OP_DELETE_BUCKET))
    }

    fn remove_bucket(&self, tx: &dyn Tx, id: PlatformId) -> Result<()> {
        let bucket = self.get_bucket(tx, id)?;
        let encoded = id.encode()?;

        let index = tx.partition(BUCKET_INDEX_PARTITION)?;
        index.delete(&bucket_index_key(bucket.org_id, &bucket.name)?)?;
        tx.partition(BUCKET_PARTITION)?.delete(&encoded)?;

        debug!(target: "chronicle::tenant", bucket_id = %id, "Bucket deleted");
        Ok(())
    }

    // ========== Helpers ==========

    fn unique_bucket_name(&self, tx: &dyn Tx, org_id: PlatformId, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::BucketNameEmpty);
        }
        let key = bucket_index_key(org_id, name)?;
        let index = tx.partition(BUCKET_INDEX_PARTITION)?;
        match index.get(&key) {
            Err(e) if e.is_not_found() => Ok(()),
            Ok(_) => Err(Error::BucketAlreadyExists {
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn generate_safe_id(&self, tx: &dyn Tx) -> Result<PlatformId> {
        let buckets = tx.partition(BUCKET_PARTITION)?;
        for _ in 0..self.id_generation_attempts {
            let id = self.id_gen.id();
            if !id.is_valid() {
                continue;
            }
            match buckets.get(&id.encode()?) {
                Err(e) if e.is_not_found() => return Ok(id),
                Ok(_) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::IdGenerationFailed)
    }
}
