#![forbid(unsafe_code)]

// Spawn scheduler - turns a validated spawn plan into a population of
// independently-delayed client tasks.

use super::client::{spawn_client, ClientContext, ClientHandle};
use super::types::{SpawnPlan, SwarmError, SwarmResult};
use super::SwarmStats;
use crate::config::ControlConfig;
use crate::metrics::SwarmMetrics;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info};

/// Schedules a batch of simulated clients with per-client uniform join
/// delays. Each client connects independently after its own delay, so the
/// connection burst is spread over the delay window rather than synchronized.
pub struct SpawnScheduler {
    /// Injected random source; seedable for reproducible jitter
    rng: StdMutex<StdRng>,
    connect_timeout: Duration,
    /// Shared cap on simultaneous in-flight connection attempts
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    metrics: SwarmMetrics,
}

impl SpawnScheduler {
    pub fn new(config: &ControlConfig, metrics: SwarmMetrics) -> Self {
        let rng = match config.seed {
            Some(seed) => {
                info!("Using fixed swarm seed {}", seed);
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_entropy(),
        };
        Self {
            rng: StdMutex::new(rng),
            connect_timeout: config.connect_timeout,
            permits: Arc::new(Semaphore::new(config.spawn_concurrency)),
            closed: AtomicBool::new(false),
            metrics,
        }
    }

    /// Spawns one cancellable task per client. Individual connection errors
    /// stay per-client; the only scheduler-level failure is scheduling on a
    /// closed instance.
    pub fn schedule(
        &self,
        plan: &SpawnPlan,
        cancel: &watch::Sender<bool>,
        stats: Arc<SwarmStats>,
    ) -> SwarmResult<Vec<ClientHandle>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SwarmError::SchedulerClosed);
        }

        let delays = self.draw_delays(plan.count, plan.delay_min, plan.delay_max);
        let ctx = Arc::new(ClientContext {
            server: plan.server.clone(),
            plugin: plan.plugin.clone(),
            connect_timeout: self.connect_timeout,
            permits: self.permits.clone(),
            stats,
            metrics: self.metrics.clone(),
        });

        let mut handles = Vec::with_capacity(plan.count);
        for (i, delay) in delays.into_iter().enumerate() {
            let name = format!("{}{}", plan.prefix, i);
            debug!("Scheduling {} with {}ms join delay", name, delay.as_millis());
            handles.push(spawn_client(name, delay, cancel.subscribe(), ctx.clone()));
        }

        info!(
            "Scheduled {} clients against {} (delay window {}..{}ms)",
            handles.len(),
            plan.server,
            plan.delay_min.as_millis(),
            plan.delay_max.as_millis()
        );
        Ok(handles)
    }

    /// Draws per-client delays uniformly from `[min, max]` inclusive.
    fn draw_delays(&self, count: usize, min: Duration, max: Duration) -> Vec<Duration> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        (0..count)
            .map(|_| {
                if min >= max {
                    min
                } else {
                    let ms = rng.gen_range(min.as_millis() as u64..=max.as_millis() as u64);
                    Duration::from_millis(ms)
                }
            })
            .collect()
    }

    /// Marks the scheduler closed; later schedule calls fail with
    /// `SchedulerClosed`. Clients already spawned are unaffected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
