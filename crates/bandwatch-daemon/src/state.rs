//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use bandwatch_core::{MonitorEvent, StatusSnapshot};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    device_address: String,
    started: Instant,
    status: RwLock<StatusSnapshot>,
}

impl AppState {
    /// Create state for the monitored device.
    #[must_use]
    pub fn new(device_address: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                device_address: device_address.into(),
                started: Instant::now(),
                status: RwLock::new(StatusSnapshot::default()),
            }),
        }
    }

    /// Address of the monitored band.
    #[must_use]
    pub fn device_address(&self) -> &str {
        &self.inner.device_address
    }

    /// Time since the state was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Copy of the current status.
    pub async fn status(&self) -> StatusSnapshot {
        self.inner.status.read().await.clone()
    }

    /// Fold one event into the status.
    pub async fn apply(&self, event: &MonitorEvent) {
        self.inner.status.write().await.apply(event);
    }

    /// Follow the supervisor's event stream until it closes or `shutdown` fires.
    pub fn track(
        &self,
        mut events: broadcast::Receiver<MonitorEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => state.apply(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "status tracker lagged behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("status tracker stopped");
        })
    }
}
