//! Two-tier persistent key-value store with an LRU memory front.
//!
//! Keys are `{prefix}_{key}` (e.g. `holders_element280`, `state_stax`), so
//! distinct contracts and cache kinds never contend. The filesystem tier is
//! the last-resort source of truth: it has no TTL, its files are
//! pretty-printed for operability, and a failed write there propagates while
//! a failed remote write is merely logged.

use lru::LruCache;
use parking_lot::Mutex;
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};

use crate::{
    cache::{CacheError, RemoteKv},
    config::CacheConfig,
};

/// Multi-tier cache store. See the [module docs](crate::cache) for the tier
/// layout and read/write ordering.
pub struct CacheStore {
    directory: PathBuf,
    remote: Option<RemoteKv>,
    disabled_prefixes: Vec<String>,
    default_ttl_seconds: u64,
    memory: Mutex<LruCache<String, Arc<serde_json::Value>>>,
}

impl CacheStore {
    /// Builds a store from cache config. The cache directory is *not*
    /// created here — creation is lazy and happens before the first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote tier is enabled but its client cannot
    /// be constructed.
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let remote = if config.remote.enabled {
            Some(RemoteKv::new(&config.remote)?)
        } else {
            None
        };

        let capacity = NonZeroUsize::new(config.memory_entries.max(1))
            .expect("max(1) guarantees non-zero capacity");

        Ok(Self {
            directory: PathBuf::from(&config.directory),
            remote,
            disabled_prefixes: config.remote.disabled_prefixes.clone(),
            default_ttl_seconds: config.ttl_seconds,
            memory: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn storage_key(prefix: &str, key: &str) -> String {
        format!("{prefix}_{key}")
    }

    fn file_path(&self, storage_key: &str) -> PathBuf {
        self.directory.join(format!("{storage_key}.json"))
    }

    fn remote_enabled_for(&self, prefix: &str) -> bool {
        self.remote.is_some() && !self.disabled_prefixes.iter().any(|p| p == prefix)
    }

    /// Reads a value, trying memory, then remote, then filesystem.
    ///
    /// Returns `None` when no tier holds the key. Tier failures degrade to
    /// the next tier and are logged, never surfaced.
    pub async fn get(&self, prefix: &str, key: &str) -> Option<Arc<serde_json::Value>> {
        let storage_key = Self::storage_key(prefix, key);

        if let Some(value) = self.memory.lock().get(&storage_key) {
            debug!(key = %storage_key, tier = "memory", "cache hit");
            return Some(Arc::clone(value));
        }

        if self.remote_enabled_for(prefix) {
            if let Some(remote) = &self.remote {
                match remote.get(&storage_key).await {
                    Ok(Some(value)) => {
                        debug!(key = %storage_key, tier = "remote", "cache hit");
                        let value = Arc::new(value);
                        self.memory.lock().put(storage_key, Arc::clone(&value));
                        return Some(value);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(key = %storage_key, error = %e, "remote cache read failed");
                    }
                }
            }
        }

        match self.read_file(&storage_key) {
            Ok(Some(value)) => {
                debug!(key = %storage_key, tier = "filesystem", "cache hit");
                let value = Arc::new(value);
                self.memory.lock().put(storage_key, Arc::clone(&value));
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "filesystem cache read failed");
                None
            }
        }
    }

    /// Writes a value through every tier.
    ///
    /// The remote write uses `ttl_seconds` (default 24h when `None`) and is
    /// best-effort. The filesystem mirror is unconditional and its failure
    /// propagates.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when the filesystem write fails.
    pub async fn set(
        &self,
        prefix: &str,
        key: &str,
        value: &serde_json::Value,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CacheError> {
        let storage_key = Self::storage_key(prefix, key);
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);

        if self.remote_enabled_for(prefix) {
            if let Some(remote) = &self.remote {
                if let Err(e) = remote.set(&storage_key, value, ttl).await {
                    warn!(key = %storage_key, error = %e, "remote cache write failed");
                }
            }
        }

        self.write_file(&storage_key, value)?;

        self.memory.lock().put(storage_key, Arc::new(value.clone()));
        Ok(())
    }

    fn read_file(&self, storage_key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let path = self.file_path(storage_key);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)?;
        let value = serde_json::from_str(&contents)?;
        Ok(Some(value))
    }

    fn write_file(&self, storage_key: &str, value: &serde_json::Value) -> Result<(), CacheError> {
        // Idempotent and lazy: nothing touches the directory until the first
        // write needs it.
        std::fs::create_dir_all(&self.directory)?;

        let contents = serde_json::to_string_pretty(value)?;
        let path = self.file_path(storage_key);
        std::fs::write(&path, contents)?;

        debug!(path = %path.display(), "cache file written");
        Ok(())
    }

    /// Directory of the filesystem tier.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[cfg(test)]
    pub(crate) fn evict_memory(&self) {
        self.memory.lock().clear();
    }
}
