//! Configuration for the sync protocol.

use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration options shared by the server and client reconcilers.
///
/// The server reads `block_size` and `max_updates`; the write queue reads
/// `retry_backoff` and `max_append_batch`. Both sides can be built from the
/// same value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncConfig {
    /// Maximum number of items returned per page.
    ///
    /// Both `load_new` and `load_previous` answer with at most this many
    /// items, and a reset answers with the last `block_size` items.
    ///
    /// Default: 50
    pub block_size: usize,

    /// Maximum edit backlog a client may catch up on.
    ///
    /// When a client's edit log position lags the server by more than this,
    /// the server forces a full reset instead of shipping every edit.
    /// `0` disables the limit.
    ///
    /// Default: 100
    pub max_updates: usize,

    /// Delay before a failed append batch is retried.
    ///
    /// Default: 3s
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde_impl"))]
    pub retry_backoff: Duration,

    /// Maximum number of items per append request.
    ///
    /// Queued items beyond this are sent in follow-up batches. `0` sends
    /// everything queued in one request.
    ///
    /// Default: 0
    pub max_append_batch: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            block_size: 50,
            max_updates: 100,
            retry_backoff: Duration::from_secs(3),
            max_append_batch: 0,
        }
    }
}

impl SyncConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page size (builder pattern).
    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the edit backlog limit (builder pattern).
    pub const fn with_max_updates(mut self, max_updates: usize) -> Self {
        self.max_updates = max_updates;
        self
    }

    /// Set the append retry backoff (builder pattern).
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the maximum append batch (builder pattern).
    pub const fn with_max_append_batch(mut self, max: usize) -> Self {
        self.max_append_batch = max;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
mod humantime_serde_impl {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_u64(duration.as_millis() as u64)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let ms: u64 = s
                .trim_end_matches("ms")
                .parse()
                .map_err(serde::de::Error::custom)?;
            Ok(Duration::from_millis(ms))
        } else {
            let ms = u64::deserialize(deserializer)?;
            Ok(Duration::from_millis(ms))
        }
    }
}
