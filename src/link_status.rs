use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
}

/// Point-in-time view of the serial link, as served by `GET /api/status`.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct LinkSnapshot {
    pub state: LinkState,
    #[schema(value_type = Option<String>)]
    pub port: Option<PathBuf>,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_frame_at: Option<DateTime<Utc>>,
    /// Frames that parsed and were handed to the store.
    pub frames_stored: u64,
    /// Frames dropped by decoding or parsing.
    pub frames_rejected: u64,
}

/// Status cell written by the ingestion thread and read by the API.
///
/// The ingestion thread is not a tokio task, so it writes through
/// `blocking_write`; handlers read asynchronously.
#[derive(Clone, Default)]
pub struct LinkStatus {
    inner: Arc<RwLock<LinkSnapshot>>,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_connected(&self, port: PathBuf) {
        let mut s = self.inner.blocking_write();
        s.state = LinkState::Connected;
        s.port = Some(port);
        s.connected_since = Some(Utc::now());
    }

    /// Keeps the last port so the status page can say what was lost.
    pub fn mark_disconnected(&self) {
        let mut s = self.inner.blocking_write();
        s.state = LinkState::Disconnected;
        s.connected_since = None;
    }

    pub fn record_stored(&self, at: DateTime<Utc>) {
        let mut s = self.inner.blocking_write();
        s.frames_stored += 1;
        s.last_frame_at = Some(at);
    }

    pub fn record_rejected(&self) {
        self.inner.blocking_write().frames_rejected += 1;
    }

    pub async fn snapshot(&self) -> LinkSnapshot {
        self.inner.read().await.clone()
    }

    /// Snapshot from outside the runtime.
    #[cfg(test)]
    pub fn blocking_snapshot(&self) -> LinkSnapshot {
        self.inner.blocking_read().clone()
    }
}
