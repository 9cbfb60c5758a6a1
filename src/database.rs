//! The `Chronicle` handle
//!
//! Wires the in-memory substrate, the bucket store and the run
//! reconciliation layer together from one [`ChronicleConfig`].

use std::path::Path;
use std::sync::Arc;

use chronicle_core::{Context, Error, Result};
use chronicle_storage::MemStore;
use chronicle_tasks::{
    AnalyticalStorage, PointsWriter, QueryService, TaskControlService, TaskService,
};
use chronicle_tenant::{
    BucketService, Clock, IdGenerator, RandomIdGenerator, Store, SystemClock, TenantService,
};
use tracing::info;

use crate::config::{ChronicleConfig, CONFIG_FILE_NAME};

/// Tenant metadata and run reconciliation behind one handle
pub struct Chronicle {
    config: ChronicleConfig,
    kv: Arc<MemStore>,
    buckets: Arc<TenantService<MemStore>>,
    clock: Arc<dyn Clock>,
}

impl Chronicle {
    /// Open with random bucket IDs and the system clock.
    ///
    /// # Errors
    ///
    /// Fails if `config` does not validate or the partitions cannot be
    /// created.
    pub fn open(config: ChronicleConfig) -> Result<Self> {
        Self::open_with(config, Arc::new(RandomIdGenerator), Arc::new(SystemClock))
    }

    /// Open with an explicit ID generator and clock
    pub fn open_with(
        config: ChronicleConfig,
        id_gen: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let kv = Arc::new(MemStore::with_config(config.storage.mem_store_config()));
        let store = Store::new(Arc::clone(&kv))
            .with_id_generator(id_gen)
            .with_clock(Arc::clone(&clock))
            .with_id_generation_attempts(config.storage.id_generation_attempts);
        store.init(&Context::background())?;

        info!(
            target: "chronicle::db",
            max_key_size = config.storage.max_key_size,
            max_page_size = config.tasks.max_page_size,
            archive_window_days = config.tasks.archive_window_days,
            system_bucket = %config.tasks.system_bucket,
            "Chronicle opened"
        );

        Ok(Self {
            config,
            kv,
            buckets: Arc::new(TenantService::new(store)),
            clock,
        })
    }

    /// Open using `chronicle.toml` in `dir`, writing the default file first
    /// when none exists.
    pub fn open_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::internal(format!(
                "failed to create data directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        let path = dir.join(CONFIG_FILE_NAME);
        ChronicleConfig::write_default_if_missing(&path)?;
        let config = ChronicleConfig::from_file(&path)?;
        info!(target: "chronicle::db", path = ?path, "Loaded config");
        Self::open(config)
    }

    /// Open with default settings and nothing on disk
    pub fn ephemeral() -> Result<Self> {
        Self::open(ChronicleConfig::default())
    }

    /// Active configuration
    pub fn config(&self) -> &ChronicleConfig {
        &self.config
    }

    /// The transactional substrate
    pub fn kv(&self) -> &Arc<MemStore> {
        &self.kv
    }

    /// The bucket service over this handle's store
    pub fn buckets(&self) -> &Arc<TenantService<MemStore>> {
        &self.buckets
    }

    /// The bucket service as a trait object
    pub fn bucket_service(&self) -> Arc<dyn BucketService> {
        self.buckets.clone()
    }

    /// Build a reconciliation layer over this handle's buckets.
    ///
    /// The transactional tier, the control plane, the archive write path
    /// and the query gateway are supplied by the caller.
    pub fn analytical_storage(
        &self,
        tasks: Arc<dyn TaskService>,
        control: Arc<dyn TaskControlService>,
        points: Arc<dyn PointsWriter>,
        queries: Arc<dyn QueryService>,
    ) -> AnalyticalStorage {
        AnalyticalStorage::new(tasks, self.bucket_service(), control, points, queries)
            .with_clock(Arc::clone(&self.clock))
            .with_options(self.config.tasks.analytical_options())
    }
}

impl std::fmt::Debug for Chronicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chronicle")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
