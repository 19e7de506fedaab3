//! Process-wide server counters.
//!
//! Sessions and the command handler share one [`ServerStats`] through an
//! `Arc`. All counters are atomics, so no lock is involved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

/// Counters reported by `INFO`.
#[derive(Debug)]
pub struct ServerStats {
    /// Total number of connections accepted
    connections_received: AtomicU64,
    /// Currently connected clients
    connected_clients: AtomicU64,
    /// Non-empty command lines processed, including ones answered with an error
    commands_processed: AtomicU64,
    /// When the server started
    started_at: Instant,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            connections_received: AtomicU64::new(0),
            connected_clients: AtomicU64::new(0),
            commands_processed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Records a new client and returns a guard that records its departure
    /// when dropped.
    pub fn client_connected(self: &Arc<Self>) -> ClientGuard {
        self.connections_received.fetch_add(1, Ordering::Relaxed);
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
        ClientGuard {
            stats: Arc::clone(self),
        }
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connected_clients(&self) -> u64 {
        self.connected_clients.load(Ordering::Relaxed)
    }

    pub fn connections_received(&self) -> u64 {
        self.connections_received.load(Ordering::Relaxed)
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Decrements the connected-client count on every exit path of a session.
#[derive(Debug)]
pub struct ClientGuard {
    stats: Arc<ServerStats>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.stats.connected_clients.fetch_sub(1, Ordering::Relaxed);
    }
}
