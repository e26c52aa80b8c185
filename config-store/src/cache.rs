// Read-through, write-through cache in front of the remote store. One cache per
// entity kind; entries expire after a fixed TTL and are never cached negatively.
use crate::errors::{ReadError, RemoteStoreError, WriteError};
use crate::metrics_defs::{
    CONFIG_CACHE_CORRUPT_EVICTED, CONFIG_CACHE_HIT, CONFIG_CACHE_MISS, CONFIG_WRITE_CONFLICT,
};
use crate::remote::RemoteStore;
use crate::types::{ConfigEntity, decode};
use moka::sync::Cache;
use serde::Deserialize;
use shared::counter;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub namespace: String,
    pub key: String,
}

impl EntryKey {
    pub fn new<N, K>(namespace: N, key: K) -> Self
    where
        N: Into<String>,
        K: Into<String>,
    {
        EntryKey {
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

/// A decoded value together with the remote revision it was read or written at.
///
/// Callers get their own copy; handing one back to `write` as `previous` makes
/// the write conditional on nobody having written since.
#[derive(Clone, Debug)]
pub struct CachedEntry<T> {
    pub value: T,
    pub revision: u64,
    pub fetched_at: Instant,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

fn default_ttl_secs() -> u64 {
    60
}

fn default_max_capacity() -> u64 {
    10_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            ttl_secs: default_ttl_secs(),
            max_capacity: default_max_capacity(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

pub struct ConfigCache<T: ConfigEntity> {
    remote: Arc<dyn RemoteStore>,
    entries: Cache<EntryKey, CachedEntry<T>>,
}

impl<T: ConfigEntity> ConfigCache<T> {
    pub fn new(remote: Arc<dyn RemoteStore>, settings: &CacheSettings) -> Self {
        Self::with_ttl(remote, settings.ttl(), settings.max_capacity)
    }

    pub fn with_ttl(remote: Arc<dyn RemoteStore>, ttl: Duration, max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        ConfigCache { remote, entries }
    }

    /// Returns the fresh local entry if there is one, otherwise reads through.
    pub async fn read(&self, key: &EntryKey) -> Result<CachedEntry<T>, ReadError> {
        if let Some(entry) = self.entries.get(key) {
            counter!(CONFIG_CACHE_HIT, "kind" => T::KIND).increment(1);
            return Ok(entry);
        }
        counter!(CONFIG_CACHE_MISS, "kind" => T::KIND).increment(1);
        self.fetch(key).await
    }

    /// Reads through to the remote store regardless of what is cached.
    pub async fn refresh(&self, key: &EntryKey) -> Result<CachedEntry<T>, ReadError> {
        self.fetch(key).await
    }

    async fn fetch(&self, key: &EntryKey) -> Result<CachedEntry<T>, ReadError> {
        let Some(remote_entry) = self.remote.get(&key.namespace, &key.key).await? else {
            self.entries.invalidate(key);
            return Err(ReadError::NotFound);
        };

        let Some(value) = decode::<T>(&remote_entry.value) else {
            tracing::warn!(
                kind = T::KIND,
                namespace = %key.namespace,
                key = %key.key,
                revision = remote_entry.revision,
                "Discarding corrupt config entry"
            );
            counter!(CONFIG_CACHE_CORRUPT_EVICTED, "kind" => T::KIND).increment(1);
            self.entries.invalidate(key);
            if let Err(err) = self.remote.delete(&key.namespace, &key.key).await {
                tracing::warn!(
                    error = %err,
                    namespace = %key.namespace,
                    key = %key.key,
                    "Failed to delete corrupt config entry"
                );
            }
            return Err(ReadError::NotFound);
        };

        let entry = CachedEntry {
            value,
            revision: remote_entry.revision,
            fetched_at: Instant::now(),
        };
        self.entries.insert(key.clone(), entry.clone());
        Ok(entry)
    }

    /// Writes `next`, conditional on `previous` still being the latest revision.
    ///
    /// With no `previous` the write is unconditional. On success the local entry
    /// is replaced with `next` at the revision the remote store assigned. A
    /// conflict leaves the cache untouched.
    pub async fn write(
        &self,
        key: &EntryKey,
        previous: Option<&CachedEntry<T>>,
        next: T,
    ) -> Result<CachedEntry<T>, WriteError> {
        let raw = serde_json::to_string(&next)?;
        let expected_revision = previous.map(|entry| entry.revision + 1);

        let revision = self
            .remote
            .put(&key.namespace, &key.key, raw, expected_revision)
            .await
            .inspect_err(|err| {
                if matches!(err, RemoteStoreError::RevisionConflict) {
                    counter!(CONFIG_WRITE_CONFLICT, "kind" => T::KIND).increment(1);
                }
            })?;

        let entry = CachedEntry {
            value: next,
            revision,
            fetched_at: Instant::now(),
        };
        self.entries.insert(key.clone(), entry.clone());
        Ok(entry)
    }

    /// Unconditional delete, remote first.
    pub async fn delete(&self, key: &EntryKey) -> Result<(), RemoteStoreError> {
        self.remote.delete(&key.namespace, &key.key).await?;
        self.entries.invalidate(key);
        Ok(())
    }
}
