//! A single live SSE connection and the frame grammar.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use waygate_core::ConnectionId;

/// Render a `message` event frame.
#[must_use]
pub fn message_frame(json: &str) -> String {
    format!("event: message\ndata: {json}\n\n")
}

/// Render the initial `endpoint` handshake frame: tells the client where
/// to POST its JSON-RPC requests for this connection.
#[must_use]
pub fn endpoint_frame(base_url: &str, connection_id: &ConnectionId) -> String {
    let data = serde_json::json!({
        "uri": format!("{}/mcp/{connection_id}", base_url.trim_end_matches('/')),
    });
    format!("event: endpoint\ndata: {data}\n\n")
}

/// Render a comment-line keepalive.
#[must_use]
pub fn ping_frame() -> String {
    ": ping\n\n".to_string()
}

/// A connected SSE client.
pub struct SseConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Authenticated owner.
    pub user_email: String,
    /// Send half feeding the client's response stream.
    tx: mpsc::Sender<String>,
    /// When this connection was admitted.
    pub connected_at: Instant,
    /// Last successful write (messages and pings both count).
    last_activity: Mutex<Instant>,
}

impl SseConnection {
    /// Create a connection around a frame channel.
    #[must_use]
    pub fn new(id: ConnectionId, user_email: String, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            user_email,
            tx,
            connected_at: now,
            last_activity: Mutex::new(now),
        }
    }

    /// Write one pre-rendered frame.
    ///
    /// Returns `false` when the channel is full or the client is gone;
    /// the manager removes the connection on that signal.
    pub fn send_frame(&self, frame: String) -> bool {
        if self.tx.try_send(frame).is_ok() {
            *self.last_activity.lock() = Instant::now();
            true
        } else {
            false
        }
    }

    /// Time since the last successful write.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Connection age, used for oldest-first eviction.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (SseConnection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(4);
        let conn = SseConnection::new(ConnectionId::new(), "u@example.com".into(), tx);
        (conn, rx)
    }

    #[test]
    fn message_frame_shape() {
        let frame = message_frame(r#"{"jsonrpc":"2.0"}"#);
        assert_eq!(frame, "event: message\ndata: {\"jsonrpc\":\"2.0\"}\n\n");
    }

    #[test]
    fn endpoint_frame_shape() {
        let id = ConnectionId::from_string("c-1".into());
        let frame = endpoint_frame("http://localhost:8080/", &id);
        assert!(frame.starts_with("event: endpoint\ndata: "));
        assert!(frame.contains(r#"{"uri":"http://localhost:8080/mcp/c-1"}"#));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn ping_frame_is_comment() {
        assert_eq!(ping_frame(), ": ping\n\n");
    }

    #[tokio::test]
    async fn send_delivers() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send_frame(ping_frame()));
        assert_eq!(rx.recv().await.unwrap(), ": ping\n\n");
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (conn, rx) = make_connection();
        drop(rx);
        assert!(!conn.send_frame(ping_frame()));
    }

    #[tokio::test]
    async fn send_fails_when_channel_full() {
        let (conn, _rx) = make_connection();
        for _ in 0..4 {
            assert!(conn.send_frame(ping_frame()));
        }
        assert!(!conn.send_frame(ping_frame()));
    }

    #[tokio::test]
    async fn send_updates_activity() {
        let (conn, _rx) = make_connection();
        std::thread::sleep(Duration::from_millis(5));
        assert!(conn.idle_for() >= Duration::from_millis(5));
        assert!(conn.send_frame(ping_frame()));
        assert!(conn.idle_for() < Duration::from_millis(5));
    }
}
