//! Key Expiration
//!
//! Two mechanisms remove keys whose TTL has run out, on top of the lazy
//! check that every read performs:
//!
//! 1. **Scheduled deletion**: a SET with EX/PX spawns a one-shot task that
//!    sleeps for the TTL and then deletes the key. [`DeletionScheduler`]
//!    keeps at most one such task per key and aborts it when the key is
//!    rewritten or deleted. The task also carries the generation of the
//!    write that scheduled it, so a stale one never deletes a newer value.
//! 2. **Background sweeper**: a task that wakes on a fixed interval (one
//!    second by default) and removes every entry whose expiration instant has
//!    passed. This bounds how long an expired key can occupy memory.
//!
//! Both paths end in idempotent store operations, so they never conflict.

use crate::storage::StorageEngine;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval between sweeps (default: 1s)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use emberkv::storage::{StorageEngine, ExpirySweeper, ExpiryConfig};
    /// use std::sync::Arc;
    ///
    /// let engine = Arc::new(StorageEngine::new());
    /// let sweeper = ExpirySweeper::start(engine, ExpiryConfig::default());
    ///
    /// // Dropping the handle stops the sweeper
    /// drop(sweeper);
    /// ```
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(interval_ms = config.interval.as_millis(), "Expiry sweeper started");
        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the expiry sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = engine.cleanup_expired();

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        } else {
            trace!("Sweep found no expired keys");
        }
    }
}

/// Starts the expiry sweeper with default configuration.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}

/// Per-key deletion timers for keys written with a TTL.
///
/// At most one timer is pending per key: scheduling a new one, or
/// cancelling on a write without TTL, aborts the previous task. Each timer
/// carries the generation of the write that scheduled it and only deletes
/// that entry, so a timer that slips past an abort is still harmless.
#[derive(Debug, Default)]
pub struct DeletionScheduler {
    timers: Mutex<HashMap<Bytes, (u64, AbortHandle)>>,
}

impl DeletionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<Bytes, (u64, AbortHandle)>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules deletion of `key` after `ttl`, replacing any pending timer
    /// for the same key.
    ///
    /// Returns `false` when called outside a Tokio runtime, in which case
    /// lazy expiry and the sweeper still remove the key.
    pub fn schedule(
        self: &Arc<Self>,
        engine: Arc<StorageEngine>,
        key: Bytes,
        generation: u64,
        ttl: Duration,
    ) -> bool {
        let Ok(handle) = Handle::try_current() else {
            return false;
        };

        // Held across spawn so the task cannot finish before it is registered
        let mut timers = self.timers();

        let scheduler = Arc::clone(self);
        let task_key = key.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            if engine.delete_generation(&task_key, generation) {
                trace!(key = %String::from_utf8_lossy(&task_key), "Scheduled deletion removed key");
            }
            scheduler.finish(&task_key, generation);
        });

        if let Some((_, previous)) = timers.insert(key, (generation, task.abort_handle())) {
            previous.abort();
        }

        true
    }

    /// Aborts the pending timer for `key`, if any.
    pub fn cancel(&self, key: &Bytes) -> bool {
        match self.timers().remove(key) {
            Some((_, timer)) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    /// Number of timers currently pending.
    pub fn pending(&self) -> usize {
        self.timers().len()
    }

    /// Drops the bookkeeping of a timer that fired, unless it was replaced.
    fn finish(&self, key: &Bytes, generation: u64) {
        let mut timers = self.timers();
        if timers.get(key).is_some_and(|(current, _)| *current == generation) {
            timers.remove(key);
        }
    }
}
