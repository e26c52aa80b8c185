use crate::cache::CacheSettings;
use crate::errors::RemoteStoreError;
use crate::http_remote::HttpRemoteStore;
use crate::remote::{InMemoryRemoteStore, RemoteStore};
use crate::store::{ConfigStore, DEFAULT_MAX_UPDATE_ATTEMPTS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum RemoteStoreType {
    Http {
        url: Url,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Nothing survives a restart.
    Memory,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_update_attempts() -> u32 {
    DEFAULT_MAX_UPDATE_ATTEMPTS
}

fn default_stats_interval_secs() -> u64 {
    60
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StoreConfigError {
    #[error("max_update_attempts must be at least 1")]
    NoUpdateAttempts,
    #[error("cache ttl_secs must be at least 1")]
    ZeroTtl,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub r#type: RemoteStoreType,
    #[serde(default)]
    pub cache: CacheSettings,
    /// Attempts per read-modify-write before giving up on conflicts.
    #[serde(default = "default_max_update_attempts")]
    pub max_update_attempts: u32,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), StoreConfigError> {
        if self.max_update_attempts == 0 {
            return Err(StoreConfigError::NoUpdateAttempts);
        }
        if self.cache.ttl_secs == 0 {
            return Err(StoreConfigError::ZeroTtl);
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn build_remote(&self) -> Result<Arc<dyn RemoteStore>, RemoteStoreError> {
        Ok(match &self.r#type {
            RemoteStoreType::Http { url, timeout_secs } => Arc::new(HttpRemoteStore::new(
                url.clone(),
                Duration::from_secs(*timeout_secs),
            )?),
            RemoteStoreType::Memory => Arc::new(InMemoryRemoteStore::new()),
        })
    }

    pub fn build(&self) -> Result<ConfigStore, RemoteStoreError> {
        Ok(ConfigStore::new(
            self.build_remote()?,
            &self.cache,
            self.max_update_attempts,
        ))
    }
}
