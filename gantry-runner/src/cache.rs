//! Shared dependency cache registry
//!
//! Maps a cache key to the volume backing it. Components that mount the same
//! key share one volume for the whole run.
//!
//! - The first successful initializer for a key wins; entries are never
//!   overwritten.
//! - Concurrent callers for the same key wait on the same initialization
//!   instead of racing.
//! - A failed initialization leaves the key empty, so a later caller retries.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

/// An initialized cache volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub volume: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DependencyCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<CacheEntry>>>>,
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, running `init` to create the volume if
    /// nobody has yet
    ///
    /// `init` produces the volume name. It runs at most once per key unless
    /// it fails.
    pub async fn get_or_init<F, Fut, E>(&self, key: &str, init: F) -> Result<CacheEntry, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(key.to_string()).or_default().clone()
        };

        let entry = cell
            .get_or_try_init(|| async {
                let volume = init().await?;
                debug!("Cache {} initialized with volume {}", key, volume);
                Ok::<_, E>(CacheEntry {
                    key: key.to_string(),
                    volume,
                    created_at: Utc::now(),
                })
            })
            .await?;

        Ok(entry.clone())
    }

    /// Returns the entry for `key` if it has been initialized
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.entries.lock().await;
        entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of initialized entries
    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
