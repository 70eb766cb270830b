use std::sync::Arc;
use std::time::Duration;

use murmur_llm::ChatTransport;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default spacing between health probes.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);
/// Error recorded for failed probes; transport detail stays in the logs.
pub const BACKEND_UNAVAILABLE: &str = "Backend not available";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub last_error: Option<String>,
}

impl ConnectionState {
    pub fn online() -> Self {
        Self {
            connected: true,
            last_error: None,
        }
    }

    pub fn offline(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            last_error: Some(error.into()),
        }
    }
}

/// Shared writer for `ConnectionState`.
///
/// The probe loop and the chat session both report through it; observers subscribe.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHandle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn mark_connected(&self) {
        self.update(ConnectionState::online());
    }

    pub fn mark_disconnected(&self, error: impl Into<String>) {
        self.update(ConnectionState::offline(error));
    }

    fn update(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if current.connected != next.connected {
                tracing::info!(
                    connected = next.connected,
                    error = next.last_error.as_deref().unwrap_or_default(),
                    "backend connectivity changed"
                );
            }
            *current = next;
            true
        });
    }
}

/// Periodic health prober. Dropping it stops the probe loop.
pub struct ConnectionMonitor {
    handle: ConnectionHandle,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionMonitor {
    /// Starts probing immediately, then every `period`. Must be called inside a Tokio runtime.
    pub fn spawn(transport: Arc<dyn ChatTransport>, period: Duration) -> Self {
        Self::spawn_with_handle(transport, period, ConnectionHandle::new())
    }

    pub fn spawn_with_handle(
        transport: Arc<dyn ChatTransport>,
        period: Duration,
        handle: ConnectionHandle,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_probe_loop(
            transport,
            period.max(Duration::from_millis(1)),
            handle.clone(),
            shutdown.clone(),
        ));

        Self {
            handle,
            shutdown,
            task: Some(task),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.handle.subscribe()
    }

    /// Stops the probe loop and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_probe_loop(
    transport: Arc<dyn ChatTransport>,
    period: Duration,
    handle: ConnectionHandle,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let probed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            probed = transport.probe() => probed,
        };

        match probed {
            Ok(()) => handle.mark_connected(),
            Err(error) => {
                tracing::debug!(error = %error, "health probe failed");
                handle.mark_disconnected(BACKEND_UNAVAILABLE);
            }
        }
    }

    tracing::debug!("connection monitor stopped");
}
