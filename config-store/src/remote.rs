use crate::errors::RemoteStoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    pub value: String,
    pub revision: u64,
}

/// The chat platform's namespaced key-value store.
///
/// There are no multi-key transactions. `put` is the only conditional operation:
/// `expected_revision` is the revision the entry will carry after the write, i.e.
/// the revision previously read plus one. A mismatch fails with
/// `RemoteStoreError::RevisionConflict`. Passing `None` writes unconditionally.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Deleted entries read as `None`.
    async fn get(&self, namespace: &str, key: &str)
    -> Result<Option<RemoteEntry>, RemoteStoreError>;

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: String,
        expected_revision: Option<u64>,
    ) -> Result<u64, RemoteStoreError>;

    /// Unconditional. Deleting an absent key succeeds.
    async fn delete(&self, namespace: &str, key: &str) -> Result<(), RemoteStoreError>;

    /// Keys of all live entries in `namespace`.
    async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, RemoteStoreError>;
}

struct StoredEntry {
    // None is a tombstone; the revision sequence continues across deletes.
    value: Option<String>,
    revision: u64,
}

/// Process-local store with the same revision semantics as the platform.
/// Used for local development and tests; counts calls per operation.
#[derive(Default)]
pub struct InMemoryRemoteStore {
    entries: Mutex<HashMap<(String, String), StoredEntry>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<RemoteEntry>, RemoteStoreError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let entries = self.entries.lock();
        let entry = entries
            .get(&(namespace.to_owned(), key.to_owned()))
            .and_then(|stored| {
                stored.value.as_ref().map(|value| RemoteEntry {
                    value: value.clone(),
                    revision: stored.revision,
                })
            });
        Ok(entry)
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: String,
        expected_revision: Option<u64>,
    ) -> Result<u64, RemoteStoreError> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock();
        let map_key = (namespace.to_owned(), key.to_owned());
        let next_revision = entries.get(&map_key).map_or(0, |e| e.revision) + 1;

        if let Some(expected) = expected_revision
            && expected != next_revision
        {
            return Err(RemoteStoreError::RevisionConflict);
        }

        entries.insert(
            map_key,
            StoredEntry {
                value: Some(value),
                revision: next_revision,
            },
        );
        Ok(next_revision)
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), RemoteStoreError> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock();
        if let Some(stored) = entries.get_mut(&(namespace.to_owned(), key.to_owned()))
            && stored.value.is_some()
        {
            stored.value = None;
            stored.revision += 1;
        }
        Ok(())
    }

    async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, RemoteStoreError> {
        let entries = self.entries.lock();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|((ns, _), stored)| ns == namespace && stored.value.is_some())
            .map(|((_, key), _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
