//! Transactional bucket service
//!
//! `TenantService` runs each store operation inside its own `view` or
//! `update` transaction and exposes the result through the narrow
//! [`BucketService`] trait that other components depend on.

use chronicle_core::{Context, Error, KvStore, PlatformId, Result};

use crate::bucket::{valid_bucket_name, Bucket, BucketFilter, BucketUpdate, FindOptions};
use crate::store::Store;

/// Bucket lookups and mutations
pub trait BucketService: Send + Sync {
    /// Load a bucket by ID
    fn find_bucket_by_id(&self, ctx: &Context, id: PlatformId) -> Result<Bucket>;

    /// Load a bucket by organization and name
    fn find_bucket_by_name(&self, ctx: &Context, org_id: PlatformId, name: &str) -> Result<Bucket>;

    /// List buckets, returning the page and its length
    fn find_buckets(
        &self,
        ctx: &Context,
        filter: BucketFilter,
        opts: FindOptions,
    ) -> Result<(Vec<Bucket>, usize)>;

    /// Create a bucket; the returned copy carries its generated ID
    fn create_bucket(&self, ctx: &Context, bucket: Bucket) -> Result<Bucket>;

    /// Apply a partial update
    fn update_bucket(&self, ctx: &Context, id: PlatformId, upd: BucketUpdate) -> Result<Bucket>;

    /// Delete a bucket
    fn delete_bucket(&self, ctx: &Context, id: PlatformId) -> Result<()>;
}

/// [`BucketService`] over a [`Store`]
pub struct TenantService<S> {
    store: Store<S>,
}

impl<S: KvStore> TenantService<S> {
    /// Wrap a store
    pub fn new(store: Store<S>) -> Self {
        Self { store }
    }

    /// The wrapped store
    pub fn store(&self) -> &Store<S> {
        &self.store
    }
}

impl<S: KvStore> BucketService for TenantService<S> {
    fn find_bucket_by_id(&self, ctx: &Context, id: PlatformId) -> Result<Bucket> {
        self.store.view(ctx, |tx| self.store.get_bucket(tx, id))
    }

    fn find_bucket_by_name(&self, ctx: &Context, org_id: PlatformId, name: &str) -> Result<Bucket> {
        self.store
            .view(ctx, |tx| self.store.get_bucket_by_name(tx, org_id, name))
    }

    fn find_buckets(
        &self,
        ctx: &Context,
        filter: BucketFilter,
        opts: FindOptions,
    ) -> Result<(Vec<Bucket>, usize)> {
        // organization + name identifies at most one bucket
        if let (Some(org_id), Some(name)) = (filter.org_id, filter.name.as_deref()) {
            if org_id.is_valid() {
                return match self.find_bucket_by_name(ctx, org_id, name) {
                    Ok(bucket) => Ok((vec![bucket], 1)),
                    Err(Error::BucketNotFoundByName { .. }) => Ok((Vec::new(), 0)),
                    Err(e) => Err(e),
                };
            }
        }

        let buckets = self
            .store
            .view(ctx, |tx| self.store.list_buckets(tx, &filter, opts))?;
        let n = buckets.len();
        Ok((buckets, n))
    }

    fn create_bucket(&self, ctx: &Context, bucket: Bucket) -> Result<Bucket> {
        valid_bucket_name(&bucket.name, bucket.bucket_type)?;
        self.store
            .update(ctx, |tx| self.store.create_bucket(tx, bucket))
    }

    fn update_bucket(&self, ctx: &Context, id: PlatformId, upd: BucketUpdate) -> Result<Bucket> {
        self.store
            .update(ctx, |tx| self.store.update_bucket(tx, id, upd))
    }

    fn delete_bucket(&self, ctx: &Context, id: PlatformId) -> Result<()> {
        self.store.update(ctx, |tx| self.store.delete_bucket(tx, id))
    }
}
