//! Server-Sent Events transport: connection registry, per-user eviction,
//! heartbeat, and frame rendering.

pub mod connection;
pub mod manager;

pub use connection::{SseConnection, endpoint_frame, message_frame, ping_frame};
pub use manager::{SseManager, SseManagerConfig, SseStats};
