//! Active Expiry
//!
//! Reads already hide and purge expired entries, but an entry nobody reads
//! again would stay in the map indefinitely. [`ExpirySweeper`] owns a
//! background task that wakes up every [`ExpiryConfig::interval`] and
//! drops every entry whose deadline is at or before the moment the cycle
//! started.
//!
//! A cycle that panics is reported through `tracing` and the next tick runs
//! as usual; only stopping or dropping the handle ends the task.

use crate::storage::StorageEngine;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

/// Sweeper settings.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Pause between two cycles
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Owns the sweeper task. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    stop_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    ///
    /// ```ignore
    /// let engine = Arc::new(StorageEngine::new());
    /// let sweeper = ExpirySweeper::start(Arc::clone(&engine), ExpiryConfig::default());
    /// // ...
    /// sweeper.stop();
    /// ```
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(interval_ms = config.interval.as_millis() as u64, "Expiry sweeper started");
        tokio::spawn(sweep_until_stopped(engine, config.interval, stop_rx));

        Self { stop_tx }
    }

    /// Signals the task to exit. Calling it more than once is harmless.
    pub fn stop(&self) {
        let already_stopped = self.stop_tx.send_replace(true);
        if !already_stopped {
            info!("Expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_until_stopped(
    engine: Arc<StorageEngine>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            // Err means the handle is gone
            _ = stop_rx.wait_for(|stop| *stop) => {
                debug!("Expiry sweeper exiting");
                return;
            }
        }

        let cycle_start = Instant::now();
        match run_cycle(|| engine.cleanup_expired_at(cycle_start)) {
            Ok(0) => trace!("Sweep cycle removed nothing"),
            Ok(removed) => debug!(
                expired = removed,
                remaining = engine.len(),
                "Sweep cycle removed expired keys"
            ),
            Err(reason) => error!(error = %reason, "Sweep cycle panicked"),
        }
    }
}

/// Runs one cycle, converting a panic into its message.
fn run_cycle(cycle: impl FnOnce() -> u64) -> Result<u64, String> {
    panic::catch_unwind(AssertUnwindSafe(cycle)).map_err(|payload| panic_message(&*payload))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    match (payload.downcast_ref::<&str>(), payload.downcast_ref::<String>()) {
        (Some(s), _) => (*s).to_string(),
        (None, Some(s)) => s.clone(),
        (None, None) => "unexpected panic".to_string(),
    }
}

/// Spawns a sweeper with the default one-second interval.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}
