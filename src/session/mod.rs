#![forbid(unsafe_code)]

// Session module - single-session stress-test lifecycle
//
// Owns the one active session (if any), validates start/stop commands,
// delegates population creation to the spawn scheduler, and reports status.

use crate::api::protocol::{
    ClientCounts, SessionInfo, StartRequest, StartResponse, StatusResponse, StopResponse,
};
use crate::config::ControlConfig;
use crate::metrics::SwarmMetrics;
use crate::swarm::{
    ClientHandle, SpawnPlan, SpawnScheduler, SwarmError, SwarmResult, SwarmStats,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex as TokioMutex};
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle of the stress-test session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session has run yet
    Idle,
    /// A start request was accepted, scheduling in progress
    Starting,
    /// Clients scheduled; connecting proceeds asynchronously
    Running,
    /// Teardown in progress
    Stopping,
    /// Last session finished; a new start is allowed
    Stopped,
    /// Last start was refused by the scheduler; a new start is allowed
    Failed,
}

impl SessionStatus {
    /// Active states exclude any concurrent start (process-wide
    /// single-session policy).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStatus::Starting | SessionStatus::Running | SessionStatus::Stopping
        )
    }
}

/// The one running stress-test session
struct ActiveSession {
    id: Uuid,
    plan: SpawnPlan,
    started: Instant,
    started_at: SystemTime,
    /// Cooperative cancellation signal every client task subscribes to
    cancel: watch::Sender<bool>,
    clients: Vec<ClientHandle>,
    stats: Arc<SwarmStats>,
}

/// Owns the single active session and serializes its state transitions.
///
/// Uses the split-lock discipline: the async `slot` mutex serializes
/// start/stop transitions (and is held across teardown awaits), while the
/// std `status` mirror is only ever held for brief reads/writes so status
/// checks and snapshots never wait on an in-flight teardown.
pub struct SessionController {
    scheduler: Arc<SpawnScheduler>,
    config: ControlConfig,
    metrics: SwarmMetrics,
    slot: TokioMutex<Option<ActiveSession>>,
    status: StdRwLock<SessionStatus>,
}

impl SessionController {
    pub fn new(config: ControlConfig, metrics: SwarmMetrics) -> Self {
        let scheduler = Arc::new(SpawnScheduler::new(&config, metrics.clone()));
        Self {
            scheduler,
            config,
            metrics,
            slot: TokioMutex::new(None),
            status: StdRwLock::new(SessionStatus::Idle),
        }
    }

    /// Current lifecycle state (brief lock, never blocks on teardown).
    pub fn status(&self) -> SessionStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, next: SessionStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Starts a new stress-test session.
    ///
    /// Returns once scheduling has been accepted; clients connect
    /// asynchronously afterwards.
    ///
    /// # Errors
    /// `SessionAlreadyActive` if a session is starting/running/stopping,
    /// `InvalidRequest` on malformed parameters, `SchedulerClosed` during
    /// process shutdown.
    pub async fn start_session(&self, req: &StartRequest) -> SwarmResult<StartResponse> {
        // Fast-fail without waiting on an in-flight teardown
        if self.status().is_active() {
            return Err(SwarmError::SessionAlreadyActive);
        }
        let plan = self.validate(req)?;

        let mut slot = self.slot.lock().await;
        // Re-check under the lock: two starts can pass the mirror check
        if slot.is_some() {
            return Err(SwarmError::SessionAlreadyActive);
        }
        self.set_status(SessionStatus::Starting);

        let (cancel, _initial_rx) = watch::channel(false);
        let stats = Arc::new(SwarmStats::new());
        let clients = match self.scheduler.schedule(&plan, &cancel, stats.clone()) {
            Ok(clients) => clients,
            Err(e) => {
                warn!("Scheduling failed: {}", e);
                self.set_status(SessionStatus::Failed);
                return Err(e);
            }
        };

        let scheduled = clients.len() as u64;
        stats.record_scheduled(scheduled);
        self.metrics.add_clients_scheduled(scheduled);
        self.metrics.inc_sessions_started();

        let id = Uuid::new_v4();
        info!(
            "Session {} started: {} clients against {} (delay {}..{}ms, prefix {:?})",
            id,
            scheduled,
            plan.server,
            plan.delay_min.as_millis(),
            plan.delay_max.as_millis(),
            plan.prefix
        );

        let message = format!("scheduled {} fake players against {}", scheduled, plan.server);
        *slot = Some(ActiveSession {
            id,
            plan,
            started: Instant::now(),
            started_at: SystemTime::now(),
            cancel,
            clients,
            stats,
        });
        self.set_status(SessionStatus::Running);

        Ok(StartResponse {
            success: true,
            message,
            session_id: id.to_string(),
            scheduled,
        })
    }

    /// Stops the active session: cooperative cancellation, bounded graceful
    /// wait, then force-termination of stragglers. Returns final counts.
    ///
    /// # Errors
    /// `NoActiveSession` if nothing is running, or if a teardown is already
    /// in flight.
    pub async fn stop_session(&self) -> SwarmResult<StopResponse> {
        // A teardown already in flight has nothing further to stop
        if self.status() == SessionStatus::Stopping {
            return Err(SwarmError::NoActiveSession);
        }

        let mut slot = self.slot.lock().await;
        let Some(mut session) = slot.take() else {
            return Err(SwarmError::NoActiveSession);
        };
        self.set_status(SessionStatus::Stopping);
        info!(
            "Session {} stopping: {} clients to tear down",
            session.id,
            session.clients.len()
        );

        // Cooperative cancellation: pending delay timers end immediately,
        // held connections shut down
        let _ = session.cancel.send(true);

        let deadline = Instant::now() + self.config.teardown_timeout;
        let mut forced = 0u64;
        for client in &mut session.clients {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, client.join()).await.is_err() {
                client.force_terminate();
                forced += 1;
                warn!(
                    "{}: did not stop within the teardown timeout, force-terminated",
                    client.name()
                );
            }
        }
        session.stats.record_forced(forced);

        let stats = &session.stats;
        let response = StopResponse {
            success: true,
            message: format!(
                "stress test stopped: {} connected, {} disconnected, {} cancelled, {} failed",
                stats.connected(),
                stats.disconnected(),
                stats.cancelled(),
                stats.failed()
            ),
            connected: stats.connected(),
            disconnected: stats.disconnected(),
            cancelled: stats.cancelled(),
            failed: stats.failed(),
            force_terminated: stats.forced(),
        };

        self.metrics.inc_sessions_stopped();
        self.set_status(SessionStatus::Stopped);
        info!("Session {} stopped ({} force-terminated)", session.id, forced);
        Ok(response)
    }

    /// Non-mutating snapshot of the controller. Uses try_lock so a teardown
    /// in flight reports its status without blocking the caller.
    pub async fn snapshot(&self) -> StatusResponse {
        let status = self.status();
        let slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(_) => return StatusResponse { status, session: None },
        };

        let session = slot.as_ref().map(|s| {
            let mut counts = ClientCounts::default();
            for client in &s.clients {
                counts.record(client.state());
            }
            SessionInfo {
                id: s.id.to_string(),
                server: s.plan.server.clone(),
                count: s.plan.count as u64,
                delay_min_ms: s.plan.delay_min.as_millis() as u64,
                delay_max_ms: s.plan.delay_max.as_millis() as u64,
                prefix: s.plan.prefix.clone(),
                plugin: s.plan.plugin.clone(),
                started_unix: s
                    .started_at
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
                uptime_secs: s.started.elapsed().as_secs(),
                clients: counts,
            }
        });

        StatusResponse { status, session }
    }

    /// Process shutdown: refuse new sessions, stop any active one.
    pub async fn shutdown(&self) {
        self.scheduler.close();
        match self.stop_session().await {
            Ok(resp) => info!("Stopped active session on shutdown: {}", resp.message),
            Err(SwarmError::NoActiveSession) => {}
            Err(e) => warn!("Failed to stop session during shutdown: {}", e),
        }
    }

    fn validate(&self, req: &StartRequest) -> SwarmResult<SpawnPlan> {
        let count = req.count.as_i64().map_err(SwarmError::InvalidRequest)?;
        if count <= 0 {
            return Err(SwarmError::InvalidRequest(
                "count must be a positive integer".to_string(),
            ));
        }
        if count as usize > self.config.max_clients {
            return Err(SwarmError::InvalidRequest(format!(
                "count {} exceeds the population cap of {}",
                count, self.config.max_clients
            )));
        }

        let delay_min = req.delay_min.as_i64().map_err(SwarmError::InvalidRequest)?;
        let delay_max = req.delay_max.as_i64().map_err(SwarmError::InvalidRequest)?;
        if delay_min < 0 || delay_max < 0 {
            return Err(SwarmError::InvalidRequest(
                "delays must be non-negative".to_string(),
            ));
        }
        if delay_min > delay_max {
            return Err(SwarmError::InvalidRequest(format!(
                "delay_min {delay_min} must not exceed delay_max {delay_max}"
            )));
        }

        let server = parse_server_addr(&req.server)?;

        Ok(SpawnPlan {
            server,
            count: count as usize,
            delay_min: Duration::from_millis(delay_min as u64),
            delay_max: Duration::from_millis(delay_max as u64),
            prefix: req.prefix.clone(),
            plugin: req.plugin.clone(),
        })
    }
}

/// Accepts `host:port` with a non-empty host and a valid non-zero port.
/// DNS resolution is left to connect time.
fn parse_server_addr(raw: &str) -> SwarmResult<String> {
    let server = raw.trim();
    if server.is_empty() {
        return Err(SwarmError::InvalidRequest(
            "server must not be empty".to_string(),
        ));
    }
    let Some((host, port)) = server.rsplit_once(':') else {
        return Err(SwarmError::InvalidRequest(format!(
            "server {server:?} must be host:port"
        )));
    };
    if host.is_empty() {
        return Err(SwarmError::InvalidRequest(format!(
            "server {server:?} has an empty host"
        )));
    }
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(server.to_string()),
        _ => Err(SwarmError::InvalidRequest(format!(
            "server {server:?} has an invalid port"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// Accept loop that holds every socket open until the test ends.
    async fn spawn_target() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                }
            }
        });
        addr
    }

    fn controller() -> SessionController {
        controller_with(ControlConfig {
            seed: Some(1),
            ..ControlConfig::default()
        })
    }

    fn controller_with(config: ControlConfig) -> SessionController {
        SessionController::new(config, SwarmMetrics::new())
    }

    fn request(server: &str, count: i64, delay_min: i64, delay_max: i64) -> StartRequest {
        StartRequest {
            server: server.to_string(),
            count: count.into(),
            delay_min: delay_min.into(),
            delay_max: delay_max.into(),
            prefix: "ys_".to_string(),
            plugin: "1.21.1.jar".to_string(),
        }
    }

    async fn wait_for_connected(controller: &SessionController, expected: u64) {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let snapshot = controller.snapshot().await;
            let connected = snapshot.session.as_ref().map(|s| s.clients.connected);
            if connected == Some(expected) {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {expected} connected clients, got {connected:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_start_rejects_non_positive_count() {
        let controller = controller();
        for count in [0, -3] {
            let err = controller
                .start_session(&request("localhost:25565", count, 0, 0))
                .await
                .unwrap_err();
            assert!(matches!(err, SwarmError::InvalidRequest(_)), "count={count}");
        }
        assert_eq!(controller.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_start_rejects_inverted_delay_bounds() {
        let controller = controller();
        let err = controller
            .start_session(&request("localhost:25565", 5, 5000, 4000))
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_negative_delay() {
        let controller = controller();
        let err = controller
            .start_session(&request("localhost:25565", 5, -100, 5000))
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_bad_server_address() {
        let controller = controller();
        for server in ["", "   ", "noport", ":25565", "host:", "host:notaport", "host:0"] {
            let err = controller
                .start_session(&request(server, 5, 0, 0))
                .await
                .unwrap_err();
            assert!(matches!(err, SwarmError::InvalidRequest(_)), "server={server:?}");
        }
    }

    #[tokio::test]
    async fn test_start_rejects_count_above_cap() {
        let controller = controller_with(ControlConfig {
            max_clients: 2,
            seed: Some(1),
            ..ControlConfig::default()
        });
        let err = controller
            .start_session(&request("localhost:25565", 3, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_start_rejects_unparseable_count() {
        let controller = controller();
        let mut req = request("localhost:25565", 1, 0, 0);
        req.count = crate::api::protocol::NumberOrString::Str("lots".to_string());
        let err = controller.start_session(&req).await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_stop_without_session_fails() {
        let controller = controller();
        let err = controller.stop_session().await.unwrap_err();
        assert!(matches!(err, SwarmError::NoActiveSession));
    }

    #[tokio::test]
    async fn test_full_lifecycle_connect_then_stop() {
        let addr = spawn_target().await;
        let controller = controller();

        let resp = controller
            .start_session(&request(&addr.to_string(), 3, 0, 0))
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.scheduled, 3);
        assert_eq!(controller.status(), SessionStatus::Running);

        wait_for_connected(&controller, 3).await;

        let stopped = controller.stop_session().await.unwrap();
        assert!(stopped.success);
        assert_eq!(stopped.connected, 3);
        assert_eq!(stopped.disconnected, 3);
        assert_eq!(stopped.cancelled, 0);
        assert_eq!(stopped.failed, 0);
        assert_eq!(controller.status(), SessionStatus::Stopped);

        // Slot is reclaimed; nothing left pending or connecting
        let snapshot = controller.snapshot().await;
        assert!(snapshot.session.is_none());
    }

    #[tokio::test]
    async fn test_second_start_conflicts_and_leaves_session_untouched() {
        let addr = spawn_target().await;
        let controller = controller();

        controller
            .start_session(&request(&addr.to_string(), 2, 1000, 2000))
            .await
            .unwrap();

        let err = controller
            .start_session(&request(&addr.to_string(), 9, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::SessionAlreadyActive));

        // Prior session is untouched
        assert_eq!(controller.status(), SessionStatus::Running);
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.session.unwrap().count, 2);

        controller.stop_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_connect_cancels_every_client() {
        let addr = spawn_target().await;
        let controller = controller();

        controller
            .start_session(&request(&addr.to_string(), 5, 4000, 5000))
            .await
            .unwrap();

        // Stop well before any join delay elapses
        let stopped = controller.stop_session().await.unwrap();
        assert_eq!(stopped.connected, 0);
        assert_eq!(stopped.cancelled, 5);
        assert_eq!(stopped.force_terminated, 0);
    }

    #[tokio::test]
    async fn test_double_stop_second_fails_without_side_effects() {
        let addr = spawn_target().await;
        let controller = controller();

        controller
            .start_session(&request(&addr.to_string(), 2, 0, 0))
            .await
            .unwrap();
        controller.stop_session().await.unwrap();

        let err = controller.stop_session().await.unwrap_err();
        assert!(matches!(err, SwarmError::NoActiveSession));
        assert_eq!(controller.status(), SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_stop_is_allowed() {
        let addr = spawn_target().await;
        let controller = controller();

        controller
            .start_session(&request(&addr.to_string(), 1, 0, 0))
            .await
            .unwrap();
        controller.stop_session().await.unwrap();

        let resp = controller
            .start_session(&request(&addr.to_string(), 4, 0, 0))
            .await
            .unwrap();
        assert_eq!(resp.scheduled, 4);
        controller.stop_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_failures_stay_local_to_clients() {
        // A port with nothing listening: connects are refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let controller = controller();
        controller
            .start_session(&request(&addr.to_string(), 2, 0, 0))
            .await
            .unwrap();

        // Session survives per-client failures
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let snapshot = controller.snapshot().await;
            if snapshot.session.as_ref().map(|s| s.clients.errored) == Some(2) {
                break;
            }
            assert!(Instant::now() < deadline, "clients never reported errors");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(controller.status(), SessionStatus::Running);

        let stopped = controller.stop_session().await.unwrap();
        assert_eq!(stopped.failed, 2);
        assert_eq!(stopped.connected, 0);
    }

    #[tokio::test]
    async fn test_start_after_shutdown_reports_scheduler_closed() {
        let controller = controller();
        controller.shutdown().await;
        let err = controller
            .start_session(&request("localhost:25565", 1, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::SchedulerClosed));
        assert_eq!(controller.status(), SessionStatus::Failed);
    }

    #[test]
    fn test_parse_server_addr_accepts_bracketed_ipv6() {
        assert!(parse_server_addr("[::1]:25565").is_ok());
        assert!(parse_server_addr("mc.example.com:25565").is_ok());
    }
}
