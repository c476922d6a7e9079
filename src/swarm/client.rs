#![forbid(unsafe_code)]

// One simulated client: waits out its join delay, dials the target server,
// announces itself, and holds the connection until cancelled or dropped by
// the server.

use super::types::{ClientSnapshot, ClientState, SwarmError, SwarmResult};
use super::SwarmStats;
use crate::metrics::SwarmMetrics;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shared inputs for every client in a swarm
pub(crate) struct ClientContext {
    pub server: String,
    pub plugin: String,
    pub connect_timeout: Duration,
    /// Caps simultaneous in-flight connection attempts
    pub permits: Arc<Semaphore>,
    pub stats: Arc<SwarmStats>,
    pub metrics: SwarmMetrics,
}

/// Mutable per-client record shared between the client task and its handle
struct ClientRecord {
    state: ClientState,
    error: Option<String>,
}

/// Handle to one spawned simulated client
pub struct ClientHandle {
    name: String,
    delay: Duration,
    cell: Arc<StdRwLock<ClientRecord>>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn state(&self) -> ClientState {
        self.cell.read().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        let rec = self.cell.read().unwrap_or_else(|e| e.into_inner());
        ClientSnapshot {
            name: self.name.clone(),
            state: rec.state,
            error: rec.error.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the client task to finish. Join errors (abort, panic) are
    /// swallowed; the record already carries the terminal state.
    pub(crate) async fn join(&mut self) {
        let _ = (&mut self.task).await;
    }

    /// Aborts the client task outright and reclaims its record. Used for
    /// stragglers that outlive the teardown timeout.
    pub(crate) fn force_terminate(&self) {
        self.task.abort();
        let mut rec = self.cell.write().unwrap_or_else(|e| e.into_inner());
        if !rec.state.is_terminal() {
            rec.state = ClientState::Disconnected;
        }
    }
}

/// Spawns one client task and returns its handle.
pub(crate) fn spawn_client(
    name: String,
    delay: Duration,
    cancel: watch::Receiver<bool>,
    ctx: Arc<ClientContext>,
) -> ClientHandle {
    let cell = Arc::new(StdRwLock::new(ClientRecord {
        state: ClientState::Pending,
        error: None,
    }));
    let task = tokio::spawn(run_client(name.clone(), delay, cell.clone(), cancel, ctx));
    ClientHandle { name, delay, cell, task }
}

/// Resolves once a stop has been requested. A dropped sender counts as stop.
async fn stop_signal(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|&stop| stop).await;
}

async fn run_client(
    name: String,
    delay: Duration,
    cell: Arc<StdRwLock<ClientRecord>>,
    mut cancel: watch::Receiver<bool>,
    ctx: Arc<ClientContext>,
) {
    // Wait out the join delay. A stop during this window cancels the client
    // before it ever dials the server.
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = stop_signal(&mut cancel) => {
            mark_disconnected(&cell);
            ctx.stats.record_cancelled();
            ctx.metrics.inc_clients_cancelled();
            debug!("{}: cancelled before connecting", name);
            return;
        }
    }

    // Cap simultaneous dials so a large swarm does not exhaust local sockets
    let _permit = tokio::select! {
        permit = ctx.permits.clone().acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => {
                mark_disconnected(&cell);
                ctx.stats.record_cancelled();
                ctx.metrics.inc_clients_cancelled();
                return;
            }
        },
        _ = stop_signal(&mut cancel) => {
            mark_disconnected(&cell);
            ctx.stats.record_cancelled();
            ctx.metrics.inc_clients_cancelled();
            debug!("{}: cancelled while waiting for a connect slot", name);
            return;
        }
    };

    set_state(&cell, ClientState::Connecting);
    let started = Instant::now();

    let mut stream = tokio::select! {
        result = dial(&ctx.server, ctx.connect_timeout) => match result {
            Ok(stream) => stream,
            Err(e) => {
                set_error(&cell, e.to_string());
                ctx.stats.record_failed();
                ctx.metrics.inc_clients_failed();
                warn!("{}: {}", name, e);
                return;
            }
        },
        _ = stop_signal(&mut cancel) => {
            mark_disconnected(&cell);
            ctx.stats.record_cancelled();
            ctx.metrics.inc_clients_cancelled();
            debug!("{}: cancelled mid-dial", name);
            return;
        }
    };

    if let Err(e) = send_join(&mut stream, &name, &ctx.plugin).await {
        set_error(&cell, format!("join announcement failed: {e}"));
        ctx.stats.record_failed();
        ctx.metrics.inc_clients_failed();
        warn!("{}: join announcement failed: {}", name, e);
        return;
    }

    ctx.metrics.observe_connect_latency(started.elapsed());
    ctx.metrics.inc_clients_connected();
    ctx.stats.record_connected();
    let _gauge = ctx.metrics.connected_guard();
    set_state(&cell, ClientState::Connected);
    info!("{}: connected to {}", name, ctx.server);

    // Hold the connection. Server chatter is discarded; EOF means the server
    // dropped this fake player (the session keeps running with a reduced
    // live population).
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            _ = stop_signal(&mut cancel) => {
                let _ = stream.shutdown().await;
                mark_disconnected(&cell);
                ctx.stats.record_disconnected();
                debug!("{}: disconnected on stop", name);
                return;
            }
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    mark_disconnected(&cell);
                    ctx.stats.record_disconnected();
                    info!("{}: server closed the connection", name);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    set_error(&cell, format!("connection lost: {e}"));
                    ctx.stats.record_disconnected();
                    warn!("{}: connection lost: {}", name, e);
                    return;
                }
            }
        }
    }
}

async fn dial(server: &str, timeout: Duration) -> SwarmResult<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(server)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true).ok();
            Ok(stream)
        }
        Ok(Err(e)) => Err(SwarmError::ConnectionError(format!(
            "connect to {server} failed: {e}"
        ))),
        Err(_) => Err(SwarmError::ConnectionError(format!(
            "connect to {server} timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Transport-level join announcement carrying the display name and client
/// plugin identifier. The game-protocol handshake proper is the target
/// plugin's concern.
async fn send_join(stream: &mut TcpStream, name: &str, plugin: &str) -> std::io::Result<()> {
    let line = format!("JOIN {name} {plugin}\n");
    stream.write_all(line.as_bytes()).await
}

fn set_state(cell: &Arc<StdRwLock<ClientRecord>>, next: ClientState) {
    let mut rec = cell.write().unwrap_or_else(|e| e.into_inner());
    rec.state = next;
}

fn set_error(cell: &Arc<StdRwLock<ClientRecord>>, message: String) {
    let mut rec = cell.write().unwrap_or_else(|e| e.into_inner());
    rec.state = ClientState::Errored;
    rec.error = Some(message);
}

/// Idempotent: a client that already reached a terminal state stays there.
fn mark_disconnected(cell: &Arc<StdRwLock<ClientRecord>>) {
    let mut rec = cell.write().unwrap_or_else(|e| e.into_inner());
    if !rec.state.is_terminal() {
        rec.state = ClientState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    fn test_context(server: String, stats: Arc<SwarmStats>) -> Arc<ClientContext> {
        Arc::new(ClientContext {
            server,
            plugin: "1.21.1.jar".to_string(),
            connect_timeout: Duration::from_secs(2),
            permits: Arc::new(Semaphore::new(16)),
            stats,
            metrics: SwarmMetrics::new(),
        })
    }

    async fn wait_for_state(handle: &ClientHandle, state: ClientState) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.state() != state {
            assert!(Instant::now() < deadline, "timed out waiting for {state:?}, got {:?}", handle.state());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_connect_and_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 128];
            let n = socket.read(&mut buf).await.unwrap();
            let line = String::from_utf8_lossy(&buf[..n]).to_string();
            // Hold the socket open until the client hangs up
            let _ = socket.read(&mut buf).await;
            line
        });

        let stats = Arc::new(SwarmStats::new());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut handle = spawn_client(
            "ys_0".to_string(),
            Duration::ZERO,
            cancel_rx,
            test_context(addr.to_string(), stats.clone()),
        );

        wait_for_state(&handle, ClientState::Connected).await;
        assert_eq!(stats.connected(), 1);

        cancel_tx.send(true).unwrap();
        handle.join().await;
        assert_eq!(handle.state(), ClientState::Disconnected);
        assert_eq!(stats.disconnected(), 1);

        let join_line = accept_task.await.unwrap();
        assert!(join_line.starts_with("JOIN ys_0"));
    }

    #[tokio::test]
    async fn test_connect_refused_is_local_error() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let stats = Arc::new(SwarmStats::new());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut handle = spawn_client(
            "ys_0".to_string(),
            Duration::ZERO,
            cancel_rx,
            test_context(addr.to_string(), stats.clone()),
        );

        handle.join().await;
        assert_eq!(handle.state(), ClientState::Errored);
        let snapshot = handle.snapshot();
        assert!(snapshot.error.unwrap().contains("connect to"));
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.connected(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_delay_never_dials() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let accepted_clone = accepted.clone();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_ok() {
                    accepted_clone.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let stats = Arc::new(SwarmStats::new());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut handle = spawn_client(
            "ys_0".to_string(),
            Duration::from_secs(30),
            cancel_rx,
            test_context(addr.to_string(), stats.clone()),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();
        handle.join().await;

        assert_eq!(handle.state(), ClientState::Disconnected);
        assert_eq!(stats.cancelled(), 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 0);
    }
}
