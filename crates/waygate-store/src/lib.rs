//! # waygate-store
//!
//! Redis-backed persistence for the gateway's five entity kinds: sessions
//! (with encrypted OAuth tokens), pending authorization requests,
//! single-use authorization codes, dynamically registered clients, and
//! first-party bearer tokens — plus the distributed rate limiter.
//!
//! Everything sits on the [`kv::Kv`] abstraction. Production uses
//! [`redis_kv::RedisKv`] (multiplexed connection manager + Lua scripts for
//! the atomic operations); tests use [`kv::MemoryKv`] with an injectable
//! clock, the same way the teacher stack tests against an in-memory
//! database.

#![deny(unsafe_code)]

pub mod authcode;
pub mod clients;
pub mod clock;
pub mod errors;
pub mod health;
pub mod kv;
pub mod ratelimit;
pub mod redis_kv;
pub mod session;
pub mod tokens;

pub use authcode::AuthCodeStore;
pub use clients::{ClientRegistrationRequest, ClientRegistry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::StoreError;
pub use health::{HealthTracker, TrackedKv};
pub use kv::{Kv, MemoryKv};
pub use ratelimit::{LimiterKind, RateLimitDecision, RateLimiter};
pub use redis_kv::RedisKv;
pub use session::{CreateSessionOptions, SessionPatch, SessionStore, SessionStoreConfig};
pub use tokens::BearerTokenStore;
