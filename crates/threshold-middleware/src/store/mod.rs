//! Rate-limit counter stores.
//!
//! A [`RateStore`] owns fixed-window counters keyed by string. Increments
//! are atomic per key; the count only grows within a window and starts over
//! exactly when the window expires.
//!
//! - [`MemoryStore`]: process-local, for tests and single-instance deployments
//! - [`RedisStore`]: shared across gateway instances via a Lua `INCR` + `PEXPIRE` script

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use crate::middleware::BoxFuture;
use std::time::Duration;
use thiserror::Error;

/// The state of one counter after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests counted in the current window, including this one.
    pub count: u64,
    /// Time until the window resets.
    pub reset_after: Duration,
}

/// Errors from a rate store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service returned an error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The backing service did not answer in time.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Atomic fixed-window counter storage.
pub trait RateStore: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Increments the counter for `key`, opening a new `window` if none is live.
    fn increment<'a>(
        &'a self,
        key: &'a str,
        window: Duration,
    ) -> BoxFuture<'a, Result<WindowCount, StoreError>>;
}
