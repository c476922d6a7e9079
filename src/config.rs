#![forbid(unsafe_code)]

// Runtime configuration, loaded from environment variables.

use std::time::Duration;
use tracing::warn;

/// Control-plane and swarm configuration.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// HTTP control API port
    pub port: u16,
    /// Per-client TCP connect bound
    pub connect_timeout: Duration,
    /// Graceful wait during stop before force-terminating stragglers
    pub teardown_timeout: Duration,
    /// Upper bound on the requested population size
    pub max_clients: usize,
    /// Simultaneous in-flight connection attempts
    pub spawn_concurrency: usize,
    /// Optional RNG seed for reproducible join-delay jitter
    pub seed: Option<u64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            // The original backend listens on 31545
            port: 31545,
            connect_timeout: Duration::from_millis(10_000),
            teardown_timeout: Duration::from_millis(10_000),
            max_clients: 1000,
            spawn_concurrency: 64,
            seed: None,
        }
    }
}

impl ControlConfig {
    /// Load from environment variables, falling back to defaults for any
    /// value that is unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut spawn_concurrency = env_parse("SPAWN_CONCURRENCY", defaults.spawn_concurrency);
        if spawn_concurrency == 0 {
            warn!("SPAWN_CONCURRENCY=0 would stall every connection attempt, using default {}", defaults.spawn_concurrency);
            spawn_concurrency = defaults.spawn_concurrency;
        }

        let mut max_clients = env_parse("MAX_CLIENTS", defaults.max_clients);
        if max_clients == 0 {
            warn!("MAX_CLIENTS=0 would reject every start request, using default {}", defaults.max_clients);
            max_clients = defaults.max_clients;
        }

        Self {
            port: env_parse("PORT", defaults.port),
            connect_timeout: Duration::from_millis(env_parse(
                "CONNECT_TIMEOUT_MS",
                defaults.connect_timeout.as_millis() as u64,
            )),
            teardown_timeout: Duration::from_millis(env_parse(
                "TEARDOWN_TIMEOUT_MS",
                defaults.teardown_timeout.as_millis() as u64,
            )),
            max_clients,
            spawn_concurrency,
            seed: std::env::var("SWARM_SEED").ok().and_then(|v| v.parse().ok()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
