//! MemStore: in-memory ordered transactional store
//!
//! This module implements the KvStore trait using:
//! - `BTreeMap<partition, BTreeMap<key, value>>` for byte-ordered keys
//! - `parking_lot::RwLock<Arc<..>>` so readers take an O(1) snapshot
//! - `parking_lot::Mutex` to admit a single writer at a time
//!
//! # Design Notes
//!
//! - **Copy-on-write updates**: an update transaction works on a private
//!   clone of the data and swaps it in on success. Dropping the clone is the
//!   rollback, so a failed closure leaves nothing behind.
//! - **O(n) update cost**: cloning the whole map per write transaction is
//!   acceptable for embedded and test use, the same trade the cloned snapshot
//!   view makes.
//! - **Lazy cursors**: a cursor remembers the last key it returned and
//!   re-seeks on every step, so writes made through the same transaction
//!   while a cursor is open are visible and never invalidate it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use chronicle_core::{
    Context, CursorDirection, CursorOptions, Error, ForwardCursor, KvStore, Partition, Result,
    StorageError, Tx,
};

/// Default maximum key length in bytes
pub const DEFAULT_MAX_KEY_SIZE: usize = 32768;

/// Default maximum value length in bytes
pub const DEFAULT_MAX_VALUE_SIZE: usize = (1 << 31) - 2;

type PartitionData = BTreeMap<Vec<u8>, Vec<u8>>;
type Data = BTreeMap<Vec<u8>, PartitionData>;

/// Limits enforced on writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemStoreConfig {
    /// Longest accepted key
    pub max_key_size: usize,
    /// Longest accepted value
    pub max_value_size: usize,
}

impl Default for MemStoreConfig {
    fn default() -> Self {
        Self {
            max_key_size: DEFAULT_MAX_KEY_SIZE,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }
}

/// In-memory transactional key-value store
///
/// Thread-safe through `parking_lot::RwLock` and `parking_lot::Mutex`.
///
/// # Example
///
/// ```ignore
/// let store = MemStore::new();
/// store.update(&ctx, |tx| {
///     tx.create_partition_if_not_exists(b"bucketsv1")?;
///     tx.partition(b"bucketsv1")?.put(b"k", b"v")?;
///     Ok(())
/// })?;
/// ```
#[derive(Debug)]
pub struct MemStore {
    /// Latest committed state
    data: RwLock<Arc<Data>>,
    /// Held for the whole duration of an update transaction
    writer: Mutex<()>,
    config: MemStoreConfig,
}

impl MemStore {
    /// Create an empty store with default limits
    pub fn new() -> Self {
        Self::with_config(MemStoreConfig::default())
    }

    /// Create an empty store with the given limits
    pub fn with_config(config: MemStoreConfig) -> Self {
        Self {
            data: RwLock::new(Arc::new(Data::new())),
            writer: Mutex::new(()),
            config,
        }
    }

    /// Configured limits
    pub fn config(&self) -> &MemStoreConfig {
        &self.config
    }

    /// Names of all committed partitions, in byte order
    pub fn partition_names(&self) -> Vec<Vec<u8>> {
        self.data.read().keys().cloned().collect()
    }

    /// Number of committed keys in a partition (0 when it does not exist)
    pub fn partition_len(&self, name: &[u8]) -> usize {
        self.data.read().get(name).map_or(0, BTreeMap::len)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemStore {
    fn view<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Tx) -> Result<T>,
    {
        ctx.check()?;
        let snapshot: Arc<Data> = self.data.read().clone();
        let tx = MemTx {
            state: TxState::Read(snapshot),
            ctx: ctx.clone(),
            config: self.config,
        };
        f(&tx)
    }

    fn update<T, F>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Tx) -> Result<T>,
    {
        ctx.check()?;
        let _writer = self.writer.lock();

        let working: Data = (**self.data.read()).clone();
        let tx = MemTx {
            state: TxState::Write(RefCell::new(working)),
            ctx: ctx.clone(),
            config: self.config,
        };

        let out = f(&tx)?;
        // a cancellation that lands while the closure ran still aborts the commit
        ctx.check()?;

        match tx.state {
            TxState::Write(cell) => {
                let committed = cell.into_inner();
                let partitions = committed.len();
                *self.data.write() = Arc::new(committed);
                debug!(target: "chronicle::storage", partitions, "committed update transaction");
                Ok(out)
            }
            TxState::Read(_) => Err(Error::internal("update transaction lost its write state")),
        }
    }
}

enum TxState {
    Read(Arc<Data>),
    Write(RefCell<Data>),
}

struct MemTx {
    state: TxState,
    ctx: Context,
    config: MemStoreConfig,
}

impl MemTx {
    fn read<R>(&self, f: impl FnOnce(&Data) -> R) -> R {
        match &self.state {
            TxState::Read(data) => f(data),
            TxState::Write(cell) => f(&cell.borrow()),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut Data) -> R) -> std::result::Result<R, StorageError> {
        match &self.state {
            TxState::Write(cell) => Ok(f(&mut cell.borrow_mut())),
            TxState::Read(_) => Err(StorageError::TxNotWritable),
        }
    }

    fn check_context(&self) -> std::result::Result<(), StorageError> {
        self.ctx.check().map_err(|e| match e {
            Error::DeadlineExceeded => StorageError::DeadlineExceeded,
            _ => StorageError::Cancelled,
        })
    }
}

impl Tx for MemTx {
    fn partition<'a>(
        &'a self,
        name: &[u8],
    ) -> std::result::Result<Box<dyn Partition + 'a>, StorageError> {
        if name.is_empty() {
            return Err(StorageError::PartitionNameRequired);
        }
        if !self.read(|d| d.contains_key(name)) {
            return Err(StorageError::PartitionNotFound(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
        Ok(Box::new(MemPartition {
            tx: self,
            name: name.to_vec(),
        }))
    }

    fn create_partition_if_not_exists(&self, name: &[u8]) -> std::result::Result<(), StorageError> {
        if name.is_empty() {
            return Err(StorageError::PartitionNameRequired);
        }
        self.write(|d| {
            d.entry(name.to_vec()).or_default();
        })
    }

    fn writable(&self) -> bool {
        matches!(self.state, TxState::Write(_))
    }

    fn context(&self) -> &Context {
        &self.ctx
    }
}

struct MemPartition<'a> {
    tx: &'a MemTx,
    name: Vec<u8>,
}

impl Partition for MemPartition<'_> {
    fn get(&self, key: &[u8]) -> std::result::Result<Vec<u8>, StorageError> {
        self.tx.check_context()?;
        self.tx
            .read(|d| d.get(&self.name).and_then(|p| p.get(key).cloned()))
            .ok_or(StorageError::NotFound)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> std::result::Result<(), StorageError> {
        self.tx.check_context()?;
        if key.is_empty() {
            return Err(StorageError::KeyRequired);
        }
        let config = self.tx.config;
        if key.len() > config.max_key_size {
            return Err(StorageError::KeyTooLarge {
                len: key.len(),
                max: config.max_key_size,
            });
        }
        if value.len() > config.max_value_size {
            return Err(StorageError::ValueTooLarge {
                len: value.len(),
                max: config.max_value_size,
            });
        }
        self.tx.write(|d| {
            d.entry(self.name.clone())
                .or_default()
                .insert(key.to_vec(), value.to_vec());
        })
    }

    fn delete(&self, key: &[u8]) -> std::result::Result<(), StorageError> {
        self.tx.check_context()?;
        self.tx.write(|d| {
            if let Some(p) = d.get_mut(&self.name) {
                p.remove(key);
            }
        })
    }

    fn forward_cursor<'c>(
        &'c self,
        seek: Option<&[u8]>,
        opts: CursorOptions,
    ) -> std::result::Result<Box<dyn ForwardCursor + 'c>, StorageError> {
        let mut start = seek.filter(|s| !s.is_empty()).map(<[u8]>::to_vec);
        if let Some(prefix) = &opts.prefix {
            match &start {
                Some(s) if !s.starts_with(prefix) => return Err(StorageError::SeekMissingPrefix),
                None if opts.direction == CursorDirection::Ascending => {
                    start = Some(prefix.clone());
                }
                _ => {}
            }
        }
        Ok(Box::new(MemCursor {
            tx: self.tx,
            name: self.name.clone(),
            position: Position::Start(start),
            opts,
            err: None,
            done: false,
        }))
    }
}

enum Position {
    /// Inclusive start key; `None` means the first (or last) key
    Start(Option<Vec<u8>>),
    /// Exclusive resume point: the key returned last
    After(Vec<u8>),
}

struct MemCursor<'a> {
    tx: &'a MemTx,
    name: Vec<u8>,
    position: Position,
    opts: CursorOptions,
    err: Option<StorageError>,
    done: bool,
}

impl MemCursor<'_> {
    fn seek_next(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        let direction = self.opts.direction;
        self.tx.read(|d| {
            let p = d.get(&self.name)?;
            let found = match (direction, &self.position) {
                (CursorDirection::Ascending, Position::Start(None)) => p.iter().next(),
                (CursorDirection::Ascending, Position::Start(Some(s))) => {
                    p.range(s.clone()..).next()
                }
                (CursorDirection::Ascending, Position::After(k)) => p
                    .range((Bound::Excluded(k.clone()), Bound::Unbounded))
                    .next(),
                (CursorDirection::Descending, Position::Start(None)) => p.iter().next_back(),
                (CursorDirection::Descending, Position::Start(Some(s))) => {
                    p.range(..=s.clone()).next_back()
                }
                (CursorDirection::Descending, Position::After(k)) => {
                    p.range(..k.clone()).next_back()
                }
            };
            found.map(|(k, v)| (k.clone(), v.clone()))
        })
    }
}

impl ForwardCursor for MemCursor<'_> {
    fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.done {
            return None;
        }
        if let Err(e) = self.tx.check_context() {
            self.err = Some(e);
            self.done = true;
            return None;
        }

        match self.seek_next() {
            Some((k, v)) => {
                if let Some(prefix) = &self.opts.prefix {
                    if !k.starts_with(prefix) {
                        self.done = true;
                        return None;
                    }
                }
                self.position = Position::After(k.clone());
                Some((k, v))
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    fn err(&self) -> Option<StorageError> {
        self.err.clone()
    }

    fn close(&mut self) -> std::result::Result<(), StorageError> {
        self.done = true;
        Ok(())
    }
}
