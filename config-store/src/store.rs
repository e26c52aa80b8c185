use crate::cache::{CacheSettings, CachedEntry, ConfigCache, EntryKey};
use crate::errors::{ReadError, ReadResultExt, RemoteStoreError, UpdateError, WriteError};
use crate::metrics_defs::CONFIG_UPDATE_EXHAUSTED;
use crate::remote::RemoteStore;
use crate::types::{
    ConfigEntity, ConfigFieldError, SubscriptionIndexEntry, TeamChannelConfig, TeamSubscriptions,
    TeamTrackerConfig, TeamUserConfig,
};
use shared::counter;
use std::convert::Infallible;
use std::sync::Arc;

pub const SUBSCRIPTION_INDEX_NAMESPACE: &str = "trackerbot-v1-subscription-index";

const TRACKER_CONFIG_KEY: &str = "trackerConfig";
const SUBSCRIPTIONS_KEY: &str = "subscriptions";

pub const DEFAULT_MAX_UPDATE_ATTEMPTS: u32 = 2;

pub fn team_namespace(team: &str) -> String {
    format!("trackerbot-v1-team-{team}")
}

fn tracker_config_key(team: &str) -> EntryKey {
    EntryKey::new(team_namespace(team), TRACKER_CONFIG_KEY)
}

fn user_config_key(team: &str, user: &str) -> EntryKey {
    EntryKey::new(team_namespace(team), format!("user-{user}"))
}

fn channel_config_key(team: &str, channel: &str) -> EntryKey {
    EntryKey::new(team_namespace(team), format!("channel-{channel}"))
}

fn subscriptions_key(team: &str) -> EntryKey {
    EntryKey::new(team_namespace(team), SUBSCRIPTIONS_KEY)
}

fn subscription_index_key(url_token: &str) -> EntryKey {
    EntryKey::new(SUBSCRIPTION_INDEX_NAMESPACE, url_token)
}

struct ConfigStoreInner {
    remote: Arc<dyn RemoteStore>,
    tracker_configs: ConfigCache<TeamTrackerConfig>,
    user_configs: ConfigCache<TeamUserConfig>,
    channel_configs: ConfigCache<TeamChannelConfig>,
    subscriptions: ConfigCache<TeamSubscriptions>,
    subscription_index: ConfigCache<SubscriptionIndexEntry>,
    max_update_attempts: u32,
}

/// Typed access to every persisted entity.
///
/// Cheap to clone; all clones share the same caches.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<ConfigStoreInner>,
}

impl ConfigStore {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        cache_settings: &CacheSettings,
        max_update_attempts: u32,
    ) -> Self {
        ConfigStore {
            inner: Arc::new(ConfigStoreInner {
                tracker_configs: ConfigCache::new(remote.clone(), cache_settings),
                user_configs: ConfigCache::new(remote.clone(), cache_settings),
                channel_configs: ConfigCache::new(remote.clone(), cache_settings),
                subscriptions: ConfigCache::new(remote.clone(), cache_settings),
                subscription_index: ConfigCache::new(remote.clone(), cache_settings),
                remote,
                max_update_attempts: max_update_attempts.max(1),
            }),
        }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.remote
    }

    pub fn max_update_attempts(&self) -> u32 {
        self.inner.max_update_attempts
    }

    pub async fn get_tracker_config(
        &self,
        team: &str,
    ) -> Result<CachedEntry<TeamTrackerConfig>, ReadError> {
        self.inner.tracker_configs.read(&tracker_config_key(team)).await
    }

    pub async fn update_tracker_config(
        &self,
        team: &str,
        previous: Option<&CachedEntry<TeamTrackerConfig>>,
        next: TeamTrackerConfig,
    ) -> Result<CachedEntry<TeamTrackerConfig>, WriteError> {
        self.inner
            .tracker_configs
            .write(&tracker_config_key(team), previous, next)
            .await
    }

    pub async fn modify_tracker_config<E, F>(
        &self,
        team: &str,
        update: F,
    ) -> Result<TeamTrackerConfig, UpdateError<E>>
    where
        F: FnMut(Option<&TeamTrackerConfig>) -> Result<TeamTrackerConfig, E> + Send,
        E: Send,
    {
        self.modify(&self.inner.tracker_configs, &tracker_config_key(team), update)
            .await
    }

    /// `config team <name> <value>`.
    pub async fn set_tracker_config_field(
        &self,
        team: &str,
        name: &str,
        value: &str,
    ) -> Result<TeamTrackerConfig, UpdateError<ConfigFieldError>> {
        self.modify_tracker_config(team, |old| TeamTrackerConfig::with_field(old, name, value))
            .await
    }

    pub async fn get_user_config(
        &self,
        team: &str,
        user: &str,
    ) -> Result<CachedEntry<TeamUserConfig>, ReadError> {
        self.inner.user_configs.read(&user_config_key(team, user)).await
    }

    pub async fn update_user_config(
        &self,
        team: &str,
        user: &str,
        previous: Option<&CachedEntry<TeamUserConfig>>,
        next: TeamUserConfig,
    ) -> Result<CachedEntry<TeamUserConfig>, WriteError> {
        self.inner
            .user_configs
            .write(&user_config_key(team, user), previous, next)
            .await
    }

    pub async fn modify_user_config<E, F>(
        &self,
        team: &str,
        user: &str,
        update: F,
    ) -> Result<TeamUserConfig, UpdateError<E>>
    where
        F: FnMut(Option<&TeamUserConfig>) -> Result<TeamUserConfig, E> + Send,
        E: Send,
    {
        self.modify(&self.inner.user_configs, &user_config_key(team, user), update)
            .await
    }

    /// Stores fresh credentials after a completed authorization, replacing
    /// whatever was there.
    pub async fn store_user_credentials(
        &self,
        team: &str,
        user: &str,
        config: TeamUserConfig,
    ) -> Result<TeamUserConfig, UpdateError> {
        self.modify_user_config(team, user, |_| Ok::<_, Infallible>(config.clone()))
            .await
    }

    pub async fn get_channel_config(
        &self,
        team: &str,
        channel: &str,
    ) -> Result<CachedEntry<TeamChannelConfig>, ReadError> {
        self.inner
            .channel_configs
            .read(&channel_config_key(team, channel))
            .await
    }

    pub async fn update_channel_config(
        &self,
        team: &str,
        channel: &str,
        previous: Option<&CachedEntry<TeamChannelConfig>>,
        next: TeamChannelConfig,
    ) -> Result<CachedEntry<TeamChannelConfig>, WriteError> {
        self.inner
            .channel_configs
            .write(&channel_config_key(team, channel), previous, next)
            .await
    }

    pub async fn modify_channel_config<E, F>(
        &self,
        team: &str,
        channel: &str,
        update: F,
    ) -> Result<TeamChannelConfig, UpdateError<E>>
    where
        F: FnMut(Option<&TeamChannelConfig>) -> Result<TeamChannelConfig, E> + Send,
        E: Send,
    {
        self.modify(
            &self.inner.channel_configs,
            &channel_config_key(team, channel),
            update,
        )
        .await
    }

    /// `config channel <name> <value>`.
    pub async fn set_channel_config_field(
        &self,
        team: &str,
        channel: &str,
        name: &str,
        value: &str,
    ) -> Result<TeamChannelConfig, UpdateError<ConfigFieldError>> {
        self.modify_channel_config(team, channel, |old| {
            TeamChannelConfig::with_field(old, name, value)
        })
        .await
    }

    pub async fn get_subscriptions(
        &self,
        team: &str,
    ) -> Result<CachedEntry<TeamSubscriptions>, ReadError> {
        self.inner.subscriptions.read(&subscriptions_key(team)).await
    }

    pub async fn refresh_subscriptions(
        &self,
        team: &str,
    ) -> Result<CachedEntry<TeamSubscriptions>, ReadError> {
        self.inner.subscriptions.refresh(&subscriptions_key(team)).await
    }

    pub async fn update_subscriptions(
        &self,
        team: &str,
        previous: Option<&CachedEntry<TeamSubscriptions>>,
        next: TeamSubscriptions,
    ) -> Result<CachedEntry<TeamSubscriptions>, WriteError> {
        self.inner
            .subscriptions
            .write(&subscriptions_key(team), previous, next)
            .await
    }

    pub async fn modify_subscriptions<E, F>(
        &self,
        team: &str,
        update: F,
    ) -> Result<TeamSubscriptions, UpdateError<E>>
    where
        F: FnMut(Option<&TeamSubscriptions>) -> Result<TeamSubscriptions, E> + Send,
        E: Send,
    {
        self.modify(&self.inner.subscriptions, &subscriptions_key(team), update)
            .await
    }

    pub async fn get_subscription_index(
        &self,
        url_token: &str,
    ) -> Result<CachedEntry<SubscriptionIndexEntry>, ReadError> {
        self.inner
            .subscription_index
            .read(&subscription_index_key(url_token))
            .await
    }

    /// Unconditional: only the subscription write path that issued a token
    /// ever creates or deletes its index entry.
    pub async fn put_subscription_index(
        &self,
        url_token: &str,
        entry: SubscriptionIndexEntry,
    ) -> Result<(), WriteError> {
        self.inner
            .subscription_index
            .write(&subscription_index_key(url_token), None, entry)
            .await?;
        Ok(())
    }

    pub async fn delete_subscription_index(&self, url_token: &str) -> Result<(), RemoteStoreError> {
        self.inner
            .subscription_index
            .delete(&subscription_index_key(url_token))
            .await
    }

    /// Bounded optimistic read-modify-write of a single key.
    ///
    /// `update` sees the current value (`None` when the key is absent or was
    /// discarded as corrupt) and is called again from scratch after every
    /// conflict, so anything derived from the old value is recomputed. The
    /// first attempt may use the cached value; later attempts always read the
    /// remote store.
    async fn modify<T, E, F>(
        &self,
        cache: &ConfigCache<T>,
        key: &EntryKey,
        mut update: F,
    ) -> Result<T, UpdateError<E>>
    where
        T: ConfigEntity,
        F: FnMut(Option<&T>) -> Result<T, E> + Send,
        E: Send,
    {
        let attempts = self.inner.max_update_attempts;
        for attempt in 1..=attempts {
            let current = if attempt == 1 {
                cache.read(key).await
            } else {
                cache.refresh(key).await
            }
            .found()?;

            let next = update(current.as_ref().map(|entry| &entry.value))
                .map_err(UpdateError::Rejected)?;

            match cache.write(key, current.as_ref(), next).await {
                Ok(entry) => return Ok(entry.value),
                Err(WriteError::RevisionConflict) => {
                    tracing::debug!(
                        kind = T::KIND,
                        namespace = %key.namespace,
                        key = %key.key,
                        attempt,
                        "Revision conflict, retrying"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(
            kind = T::KIND,
            namespace = %key.namespace,
            key = %key.key,
            attempts,
            "Giving up after repeated revision conflicts"
        );
        counter!(CONFIG_UPDATE_EXHAUSTED, "kind" => T::KIND).increment(1);
        Err(UpdateError::RetriesExhausted { attempts })
    }
}
