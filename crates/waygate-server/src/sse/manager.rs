//! SSE connection admission, indices, heartbeat, and shutdown.
//!
//! Two indices under one mutex: global `id → connection` and per-user
//! `email → ordered ids`. Admission enforces a hard global cap
//! (`Capacity` error) and a per-user cap that evicts the user's oldest
//! connection. The heartbeat timer pings connections idle beyond the
//! staleness threshold and removes the ones whose sink is gone. All
//! operations inside the lock are short and non-blocking.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use waygate_core::{ConnectionId, CoreError};

use super::connection::{SseConnection, endpoint_frame, message_frame, ping_frame};
use crate::metrics::{SSE_CONNECTIONS_ACTIVE, SSE_CONNECTIONS_TOTAL, SSE_EVICTIONS_TOTAL};

/// Frames buffered per connection before writes start failing.
const CHANNEL_CAPACITY: usize = 64;

/// Idle threshold beyond which the heartbeat pings a connection.
const STALE_AFTER: Duration = Duration::from_secs(55);

/// Heartbeat cadence.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Admission limits.
#[derive(Clone, Copy, Debug)]
pub struct SseManagerConfig {
    /// Hard cap on total live connections.
    pub max_total: usize,
    /// Per-user cap; overflow evicts the user's oldest connection.
    pub max_per_user: usize,
}

impl Default for SseManagerConfig {
    fn default() -> Self {
        Self {
            max_total: 1000,
            max_per_user: 5,
        }
    }
}

/// Live connection counts, exposed by `/sse/stats`.
#[derive(Clone, Debug, Serialize)]
pub struct SseStats {
    /// Total live connections.
    pub total: usize,
    /// Live connections per user.
    pub per_user: HashMap<String, usize>,
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<ConnectionId, Arc<SseConnection>>,
    by_user: HashMap<String, VecDeque<ConnectionId>>,
}

impl Indices {
    fn remove(&mut self, id: &ConnectionId) -> Option<Arc<SseConnection>> {
        let conn = self.by_id.remove(id)?;
        if let Some(ids) = self.by_user.get_mut(&conn.user_email) {
            ids.retain(|c| c != id);
            if ids.is_empty() {
                let _ = self.by_user.remove(&conn.user_email);
            }
        }
        Some(conn)
    }
}

/// Manages SSE connection admission and fan-in (component C6's streaming
/// half).
pub struct SseManager {
    indices: Mutex<Indices>,
    config: SseManagerConfig,
    base_url: String,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl SseManager {
    /// Create a manager.
    #[must_use]
    pub fn new(config: SseManagerConfig, base_url: impl Into<String>) -> Self {
        Self {
            indices: Mutex::new(Indices::default()),
            config,
            base_url: base_url.into(),
            heartbeat: Mutex::new(None),
        }
    }

    /// Admit a connection for `user_email`.
    ///
    /// Returns the connection id and the frame stream to feed the HTTP
    /// response. The first frame is already queued: the `endpoint`
    /// handshake telling the client where to POST.
    pub fn connect(
        &self,
        user_email: &str,
    ) -> Result<(ConnectionId, mpsc::Receiver<String>), CoreError> {
        let mut indices = self.indices.lock();

        if indices.by_id.len() >= self.config.max_total {
            warn!(
                total = indices.by_id.len(),
                "SSE connection limit reached"
            );
            return Err(CoreError::Capacity("connection limit reached".into()));
        }

        // Per-user overflow: evict oldest until there is room.
        while indices
            .by_user
            .get(user_email)
            .is_some_and(|ids| ids.len() >= self.config.max_per_user)
        {
            let oldest = indices
                .by_user
                .get_mut(user_email)
                .and_then(VecDeque::pop_front);
            if let Some(oldest) = oldest {
                // pop_front already removed it from the user index.
                let _ = indices.by_id.remove(&oldest);
                metrics::counter!(SSE_EVICTIONS_TOTAL).increment(1);
                info!(connection_id = %oldest, user = %waygate_core::redact::mask_email(user_email), "evicted oldest SSE connection");
            }
        }

        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let conn = Arc::new(SseConnection::new(
            id.clone(),
            user_email.to_string(),
            tx,
        ));
        let _ = conn.send_frame(endpoint_frame(&self.base_url, &id));

        let _ = indices.by_id.insert(id.clone(), conn);
        indices
            .by_user
            .entry(user_email.to_string())
            .or_default()
            .push_back(id.clone());

        metrics::counter!(SSE_CONNECTIONS_TOTAL).increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(SSE_CONNECTIONS_ACTIVE).set(indices.by_id.len() as f64);
        debug!(connection_id = %id, "SSE connection admitted");
        Ok((id, rx))
    }

    /// Write a `message` event to one connection. A failed write removes
    /// the connection and returns `false`.
    pub fn send_message(&self, id: &ConnectionId, json: &str) -> bool {
        self.send_or_remove(id, message_frame(json))
    }

    /// Write a keepalive comment. Same failure behavior as
    /// [`Self::send_message`].
    pub fn send_ping(&self, id: &ConnectionId) -> bool {
        self.send_or_remove(id, ping_frame())
    }

    /// The authenticated owner of a connection.
    pub fn owner_of(&self, id: &ConnectionId) -> Option<String> {
        self.indices
            .lock()
            .by_id
            .get(id)
            .map(|c| c.user_email.clone())
    }

    /// Drop one connection (client disconnect or explicit teardown).
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let mut indices = self.indices.lock();
        let removed = indices.remove(id).is_some();
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(SSE_CONNECTIONS_ACTIVE).set(indices.by_id.len() as f64);
        removed
    }

    /// Total live connections.
    pub fn count(&self) -> usize {
        self.indices.lock().by_id.len()
    }

    /// Connection ids held by one user, oldest first.
    pub fn user_connections(&self, user_email: &str) -> Vec<ConnectionId> {
        self.indices
            .lock()
            .by_user
            .get(user_email)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Live counts for `/sse/stats`.
    pub fn stats(&self) -> SseStats {
        let indices = self.indices.lock();
        SseStats {
            total: indices.by_id.len(),
            per_user: indices
                .by_user
                .iter()
                .map(|(user, ids)| (user.clone(), ids.len()))
                .collect(),
        }
    }

    /// Ping every connection idle past the staleness threshold, removing
    /// the ones that fail. Returns how many were removed.
    pub fn heartbeat_sweep(&self) -> usize {
        let stale: Vec<ConnectionId> = {
            let indices = self.indices.lock();
            indices
                .by_id
                .values()
                .filter(|c| c.idle_for() >= STALE_AFTER)
                .map(|c| c.id.clone())
                .collect()
        };
        let mut removed = 0;
        for id in stale {
            if !self.send_ping(&id) {
                removed += 1;
            }
        }
        removed
    }

    /// Start the heartbeat timer. Idempotent.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let mut guard = self.heartbeat.lock();
        if guard.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                let _ = interval.tick().await;
                let removed = manager.heartbeat_sweep();
                if removed > 0 {
                    debug!(removed, "heartbeat removed dead SSE connections");
                }
            }
        });
        *guard = Some(handle);
    }

    /// Stop the heartbeat timer. Idempotent.
    pub fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }

    /// Stop the timer, close every response sink, and clear the indices.
    /// Invoked during graceful termination.
    pub fn shutdown(&self) {
        self.stop_heartbeat();
        let mut indices = self.indices.lock();
        // Dropping the senders ends each client's stream.
        indices.by_id.clear();
        indices.by_user.clear();
        metrics::gauge!(SSE_CONNECTIONS_ACTIVE).set(0.0);
        info!("SSE manager shut down");
    }

    fn send_or_remove(&self, id: &ConnectionId, frame: String) -> bool {
        let conn = self.indices.lock().by_id.get(id).cloned();
        match conn {
            Some(conn) if conn.send_frame(frame) => true,
            Some(_) => {
                let _ = self.remove(id);
                false
            }
            None => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
