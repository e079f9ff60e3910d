use super::{RateStore, StoreError, WindowCount};
use crate::middleware::BoxFuture;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound on a single increment round-trip.
const OP_TIMEOUT: Duration = Duration::from_millis(250);

/// Increments the key, arms the expiry on the first hit of a window, and
/// returns `{count, remaining_ms}`. A key that lost its TTL is re-armed so it
/// can never count forever.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Redis-backed fixed-window store shared by every gateway instance.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisStore {
    /// Connects to `url` (`redis://` or `rediss://`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(CONNECT_TIMEOUT))??;

        tracing::info!("connected to redis rate store");
        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
        })
    }

    async fn run_script(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let mut conn = self.conn.clone();

        let (count, ttl_ms): (u64, i64) = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        let reset_after = u64::try_from(ttl_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map_or(window, Duration::from_millis);

        Ok(WindowCount { count, reset_after })
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RateStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn increment<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
    ) -> BoxFuture<'a, Result<WindowCount, StoreError>> {
        Box::pin(async move {
            tokio::time::timeout(OP_TIMEOUT, self.run_script(key, window))
                .await
                .map_err(|_| StoreError::Timeout(OP_TIMEOUT))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = RedisStore::connect("not-a-redis-url").await.unwrap_err();
        assert!(matches!(err, StoreError::Redis(_)));
    }
}
