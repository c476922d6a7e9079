#![forbid(unsafe_code)]

// Swarm module - simulated-client population management
// Handles spawn scheduling, per-client connection lifecycle, and aggregate counts

pub mod client;
pub mod scheduler;
pub mod types;

pub use client::ClientHandle;
pub use scheduler::SpawnScheduler;
pub use types::{ClientSnapshot, ClientState, SpawnPlan, SwarmError, SwarmResult};

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Aggregate outcome counters for one session's swarm, shared between the
/// client tasks and the session controller.
pub struct SwarmStats {
    scheduled: AtomicU64,
    connected: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    disconnected: AtomicU64,
    forced: AtomicU64,
}

impl SwarmStats {
    pub fn new() -> Self {
        Self {
            scheduled: AtomicU64::new(0),
            connected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            disconnected: AtomicU64::new(0),
            forced: AtomicU64::new(0),
        }
    }

    pub fn record_scheduled(&self, n: u64) {
        self.scheduled.fetch_add(n, Relaxed);
    }

    pub fn record_connected(&self) {
        self.connected.fetch_add(1, Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Relaxed);
    }

    pub fn record_disconnected(&self) {
        self.disconnected.fetch_add(1, Relaxed);
    }

    pub fn record_forced(&self, n: u64) {
        self.forced.fetch_add(n, Relaxed);
    }

    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Relaxed)
    }

    /// Clients that completed a connection at any point.
    pub fn connected(&self) -> u64 {
        self.connected.load(Relaxed)
    }

    /// Connection attempts that failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Relaxed)
    }

    /// Clients cancelled before completing a connection.
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Relaxed)
    }

    /// Formerly-connected clients whose connection has ended.
    pub fn disconnected(&self) -> u64 {
        self.disconnected.load(Relaxed)
    }

    /// Clients force-terminated during teardown.
    pub fn forced(&self) -> u64 {
        self.forced.load(Relaxed)
    }
}

impl Default for SwarmStats {
    fn default() -> Self {
        Self::new()
    }
}
