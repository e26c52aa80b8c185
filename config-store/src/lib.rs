//! Durable per-team configuration on top of the chat platform's key-value store.
//!
//! The remote store only offers single-key get and put-with-expected-revision, so
//! every mutation here is an optimistic read-modify-write against one key.

pub mod cache;
pub mod config;
pub mod errors;
pub mod http_remote;
pub mod metrics_defs;
pub mod remote;
pub mod stats;
pub mod store;
pub mod subscriptions;
pub mod types;

pub use cache::{CacheSettings, CachedEntry, ConfigCache, EntryKey};
pub use config::{RemoteStoreType, StoreConfig, StoreConfigError};
pub use errors::{ReadError, ReadResultExt, RemoteStoreError, UpdateError, WriteError};
pub use http_remote::HttpRemoteStore;
pub use remote::{InMemoryRemoteStore, RemoteEntry, RemoteStore};
pub use stats::{SubscriptionStats, run_stats_reporter};
pub use store::{ConfigStore, SUBSCRIPTION_INDEX_NAMESPACE, team_namespace};
pub use subscriptions::{SubscriptionError, generate_url_token};
pub use types::{
    ConfigEntity, ConfigFieldError, Subscription, SubscriptionIndexEntry, TeamChannelConfig,
    TeamSubscriptions, TeamTrackerConfig, TeamUserConfig, TrackerAuth,
};
