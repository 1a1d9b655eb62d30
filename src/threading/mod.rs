//! Threading primitives for the audio core
//!
//! Provides the named thread handle used by the update and output threads,
//! the bounded-wait state guard that protects every audio object, and a
//! cooperative stop flag for background loops.
//!
//! # Design Notes
//!
//! Every audio control call locks its object exactly once and gives up after
//! [`DEFAULT_LOCK_TIMEOUT`]. A skipped call is reported to the caller as
//! [`ThreadError::LockTimeout`]; there is no retry loop.


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

/// Longest time a control call waits for an object's state lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// Error type for threading operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadError {
    /// Thread spawn failed
    #[error("Thread spawn failed: {0}")]
    SpawnFailed(String),
    /// Thread join failed
    #[error("Thread join failed: {0}")]
    JoinFailed(String),
    /// Lock acquisition timed out
    #[error("Lock acquisition timed out: {0}")]
    LockTimeout(String),
}

pub type Result<T> = std::result::Result<T, ThreadError>;

// ============================================================================
// Thread Handle
// ============================================================================

/// Handle to a spawned, named thread
pub struct Thread<T> {
    handle: Option<JoinHandle<T>>,
    name: String,
}

impl<T> Thread<T> {
    /// Spawn a new thread that executes the given function
    ///
    /// # Errors
    /// Returns `ThreadError::SpawnFailed` if thread creation fails
    pub fn spawn<F>(name: &str, f: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(|e| ThreadError::SpawnFailed(format!("{}: {}", name, e)))?;

        Ok(Self {
            handle: Some(handle),
            name: name.to_string(),
        })
    }

    /// Wait for the thread to finish and return its result
    ///
    /// # Errors
    /// Returns `ThreadError::JoinFailed` if the thread panicked
    pub fn join(mut self) -> Result<T> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ThreadError::JoinFailed(format!("{} panicked", self.name))),
            None => Err(ThreadError::JoinFailed(format!("{} already joined", self.name))),
        }
    }

    pub fn is_running(&self) -> bool {
        match &self.handle {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Guarded State
// ============================================================================

/// State protected by a named mutex with a bounded acquisition attempt
pub struct GuardedState<T> {
    inner: Mutex<T>,
    name: String,
    timeout: Duration,
}

impl<T> GuardedState<T> {
    pub fn new(value: T, name: impl Into<String>) -> Self {
        Self::with_timeout(value, name, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_timeout(value: T, name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(value),
            name: name.into(),
            timeout,
        }
    }

    /// Make one attempt to lock, waiting at most the configured timeout
    ///
    /// # Errors
    /// Returns `ThreadError::LockTimeout` if the lock stayed held
    pub fn lock(&self) -> Result<MutexGuard<'_, T>> {
        self.inner
            .try_lock_for(self.timeout)
            .ok_or_else(|| ThreadError::LockTimeout(self.name.clone()))
    }

    /// Lock without waiting
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for GuardedState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedState")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Stop Flag
// ============================================================================

/// Shared flag telling a background loop to exit
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Sleep for `interval` in short slices, returning early once `flag` is set
///
/// Returns `true` if the loop should keep running.
pub fn sleep_unless_stopped(flag: &StopFlag, interval: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(5);

    let mut remaining = interval;
    while !remaining.is_zero() {
        if flag.is_stopped() {
            return false;
        }
        let nap = remaining.min(SLICE);
        thread::sleep(nap);
        remaining -= nap;
    }
    !flag.is_stopped()
}
