//! Cancellation context
//!
//! A `Context` travels with every call that may block on the substrate or the
//! archival gateway. Clones share the same cancellation flag, so cancelling
//! any clone aborts all in-flight work started with it.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Caller-supplied cancellation and deadline
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that additionally expires after `timeout`.
    ///
    /// The derived context shares the cancellation flag with `self`; the
    /// earlier of the two deadlines applies.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that additionally expires at `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether work should stop
    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Fail with `Cancelled` or `DeadlineExceeded` once the context is done
    pub fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
