//! Tunables for the buffer pool and its lock waits.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DbError, DbResult};

/// Bytes per page, including the header.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of cached pages.
pub const DEFAULT_PAGES: usize = 50;

/// Largest page size the slot arithmetic accepts.
pub const MAX_PAGE_SIZE: usize = 1 << 20;

/// Configuration for the buffer pool manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Maximum number of pages held in the cache.
    pub capacity: usize,
    /// Size of every page on disk and in memory.
    pub page_size: usize,
    /// Minimum time a lock request waits before the transaction is aborted.
    pub lock_timeout: Duration,
    /// Upper bound of the random extra wait added to `lock_timeout`.
    pub lock_timeout_jitter: Duration,
    /// Pause between lock attempts; zero yields instead of sleeping.
    pub lock_poll_interval: Duration,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_PAGES,
            page_size: DEFAULT_PAGE_SIZE,
            lock_timeout: Duration::from_millis(1000),
            lock_timeout_jitter: Duration::from_millis(2000),
            lock_poll_interval: Duration::from_millis(1),
        }
    }
}

impl BufferPoolConfig {
    /// Defaults overlaid with any `KEEL_*` environment variables.
    pub fn from_env() -> DbResult<Self> {
        let mut config = Self::default();
        if let Some(v) = env_value::<usize>("KEEL_POOL_PAGES")? {
            config.capacity = v;
        }
        if let Some(v) = env_value::<usize>("KEEL_PAGE_SIZE")? {
            config.page_size = v;
        }
        if let Some(v) = env_value::<u64>("KEEL_LOCK_TIMEOUT_MS")? {
            config.lock_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_value::<u64>("KEEL_LOCK_JITTER_MS")? {
            config.lock_timeout_jitter = Duration::from_millis(v);
        }
        if let Some(v) = env_value::<u64>("KEEL_LOCK_POLL_MS")? {
            config.lock_poll_interval = Duration::from_millis(v);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration, jitter: Duration) -> Self {
        self.lock_timeout = timeout;
        self.lock_timeout_jitter = jitter;
        self
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.capacity == 0 {
            return Err(DbError::Config("buffer pool capacity must be at least 1".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(DbError::Config(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE} bytes, got {}",
                self.page_size
            )));
        }
        Ok(())
    }
}

fn env_value<T: FromStr>(key: &str) -> DbResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DbError::Config(format!("{key}={raw:?} is not a valid value"))),
        Err(_) => Ok(None),
    }
}
