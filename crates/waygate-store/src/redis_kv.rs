//! Redis implementation of the [`Kv`] contract.
//!
//! Runs over a multiplexed [`ConnectionManager`] (reconnects internally,
//! cheap to clone per operation). The three contractually atomic
//! operations are Lua scripts, so a crash between the component commands
//! cannot leave the keyspace in a half-written state — most importantly,
//! a rate-limit counter can never exist without its TTL.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::errors::StoreError;
use crate::kv::Kv;

/// `GET` + `DEL` in one server-side step (single-use code consumption).
const GET_DEL_SCRIPT: &str = r"
local v = redis.call('GET', KEYS[1])
if v then
  redis.call('DEL', KEYS[1])
end
return v
";

/// Compare-and-swap on the serialized record (optimistic session update).
const CAS_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
  return 1
end
return 0
";

/// `INCR` + `PEXPIRE` in one server-side step (windowed counters).
const INCR_WINDOW_SCRIPT: &str = r"
local hits = redis.call('INCR', KEYS[1])
if hits == 1 or ARGV[2] == '1' then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {hits, ttl}
";

/// Redis-backed [`Kv`] with an optional per-service keyspace prefix.
pub struct RedisKv {
    conn: ConnectionManager,
    prefix: String,
    get_del: Script,
    cas: Script,
    incr_window: Script,
}

impl RedisKv {
    /// Connect to Redis and build the store.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::with_connection(conn, prefix))
    }

    /// Build from an existing connection manager.
    #[must_use]
    pub fn with_connection(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            get_del: Script::new(GET_DEL_SCRIPT),
            cas: Script::new(CAS_SCRIPT),
            incr_window: Script::new(INCR_WINDOW_SCRIPT),
        }
    }

    fn key(&self, key: &str) -> String {
        apply_prefix(&self.prefix, key)
    }

    fn strip(&self, key: String) -> String {
        strip_prefix(&self.prefix, key)
    }
}

fn apply_prefix(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

fn strip_prefix(prefix: &str, key: String) -> String {
    match key.strip_prefix(prefix) {
        Some(bare) => bare.to_string(),
        None => key,
    }
}

#[async_trait]
impl Kv for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_ms: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_ms: i64) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn pttl(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("PTTL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        // -2 = no key, -1 = no expiry.
        Ok(if ttl >= 0 { Some(ttl) } else { None })
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(self
            .get_del
            .key(self.key(key))
            .invoke_async(&mut conn)
            .await?)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl_ms: i64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let swapped: i64 = self
            .cas
            .key(self.key(key))
            .arg(expected)
            .arg(value)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn incr_window(
        &self,
        key: &str,
        window_ms: i64,
        reset_on_change: bool,
    ) -> Result<(i64, i64), StoreError> {
        let mut conn = self.conn.clone();
        let (hits, ttl): (i64, i64) = self
            .incr_window
            .key(self.key(key))
            .arg(window_ms)
            .arg(i64::from(reset_on_change))
            .invoke_async(&mut conn)
            .await?;
        Ok((hits, ttl))
    }

    async fn scan(&self, pattern: &str, batch: usize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let full_pattern = self.key(pattern);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, chunk): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&full_pattern)
                .arg("COUNT")
                .arg(batch)
                .query_async(&mut conn)
                .await?;
            keys.extend(chunk.into_iter().map(|k| self.strip(k)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_round_trip() {
        assert_eq!(apply_prefix("gmail-", "sess:a"), "gmail-sess:a");
        assert_eq!(strip_prefix("gmail-", "gmail-sess:a".into()), "sess:a");
        assert_eq!(apply_prefix("", "sess:a"), "sess:a");
        // Foreign keys pass through unchanged.
        assert_eq!(strip_prefix("gmail-", "other:x".into()), "other:x");
    }

    #[test]
    fn scripts_are_valid_lua_shape() {
        // Lua scripts must reference KEYS[1]; catches accidental edits.
        for script in [GET_DEL_SCRIPT, CAS_SCRIPT, INCR_WINDOW_SCRIPT] {
            assert!(script.contains("KEYS[1]"));
        }
        assert!(INCR_WINDOW_SCRIPT.contains("PEXPIRE"));
        assert!(CAS_SCRIPT.contains("'PX'"));
    }
}
