use config_store::{ConfigStore, ReadResultExt, RemoteStoreError, Subscription};

/// The subscription an inbound webhook delivery belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutedSubscription {
    pub team_name: String,
    pub subscription_id: u64,
    pub subscription: Subscription,
}

#[derive(thiserror::Error, Debug)]
pub enum RouteError {
    /// Unknown token, or a token whose subscription no longer exists. The two
    /// cases are deliberately indistinguishable.
    #[error("unrecognized url token")]
    NotFound,
    #[error(transparent)]
    Unknown(#[from] RemoteStoreError),
}

/// Resolves webhook URL tokens through the subscription index.
#[derive(Clone)]
pub struct SubscriptionRouter {
    store: ConfigStore,
}

impl SubscriptionRouter {
    pub fn new(store: ConfigStore) -> Self {
        SubscriptionRouter { store }
    }

    pub async fn route(&self, url_token: &str) -> Result<RoutedSubscription, RouteError> {
        let index = self
            .store
            .get_subscription_index(url_token)
            .await
            .found()?
            .ok_or(RouteError::NotFound)?
            .value;

        let subscription = match self
            .lookup(&index.team_name, index.subscription_id, url_token, false)
            .await?
        {
            Some(subscription) => subscription,
            // The cached record may predate the subscription; check the
            // remote store once before giving up.
            None => self
                .lookup(&index.team_name, index.subscription_id, url_token, true)
                .await?
                .ok_or_else(|| {
                    tracing::debug!(
                        team = %index.team_name,
                        subscription_id = index.subscription_id,
                        "Index entry without a matching subscription"
                    );
                    RouteError::NotFound
                })?,
        };

        Ok(RoutedSubscription {
            team_name: index.team_name,
            subscription_id: index.subscription_id,
            subscription,
        })
    }

    /// The subscription stored under `id`, provided it was issued `url_token`.
    /// Ids are reused after removal, so a stale index entry can point at a
    /// subscription that belongs to a different token.
    async fn lookup(
        &self,
        team: &str,
        id: u64,
        url_token: &str,
        refresh: bool,
    ) -> Result<Option<Subscription>, RemoteStoreError> {
        let subscriptions = if refresh {
            self.store.refresh_subscriptions(team).await
        } else {
            self.store.get_subscriptions(team).await
        }
        .found()?;

        Ok(subscriptions.and_then(|entry| {
            entry
                .value
                .get(id)
                .filter(|subscription| subscription.url_token == url_token)
                .cloned()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_store::{CacheSettings, InMemoryRemoteStore, RemoteStore, SubscriptionIndexEntry};
    use std::sync::Arc;

    fn subscription(token: &str) -> Subscription {
        Subscription {
            destination_channel: "feed".into(),
            external_webhook_handle: "10001".into(),
            url_token: token.into(),
            filter_query: "project = CORE".into(),
            wants_updates: true,
        }
    }

    fn store_on(remote: Arc<InMemoryRemoteStore>) -> ConfigStore {
        ConfigStore::new(remote, &CacheSettings::default(), 2)
    }

    #[tokio::test]
    async fn test_route() {
        let store = store_on(Arc::new(InMemoryRemoteStore::new()));
        let id = store
            .add_subscription("acme", subscription("token-1"))
            .await
            .unwrap();

        let routed = SubscriptionRouter::new(store).route("token-1").await.unwrap();
        assert_eq!(routed.team_name, "acme");
        assert_eq!(routed.subscription_id, id);
        assert_eq!(routed.subscription.url_token, "token-1");
    }

    #[tokio::test]
    async fn test_unknown_and_removed_look_the_same() {
        let store = store_on(Arc::new(InMemoryRemoteStore::new()));
        let id = store
            .add_subscription("acme", subscription("token-1"))
            .await
            .unwrap();
        store
            .add_subscription("acme", subscription("token-2"))
            .await
            .unwrap();
        store.remove_subscription("acme", id).await.unwrap();

        let router = SubscriptionRouter::new(store.clone());
        assert!(matches!(router.route("never-issued").await, Err(RouteError::NotFound)));
        assert!(matches!(router.route("token-1").await, Err(RouteError::NotFound)));

        // An index entry left behind without its subscription routes nowhere
        let mut subscriptions = store.list_subscriptions("acme").await.unwrap();
        subscriptions.remove(id + 1);
        store
            .update_subscriptions("acme", None, subscriptions)
            .await
            .unwrap();
        assert!(matches!(router.route("token-2").await, Err(RouteError::NotFound)));
    }

    #[tokio::test]
    async fn test_stale_index_entry_does_not_follow_reused_id() {
        let store = store_on(Arc::new(InMemoryRemoteStore::new()));
        store
            .put_subscription_index(
                "stale-token",
                SubscriptionIndexEntry {
                    team_name: "acme".into(),
                    subscription_id: 1,
                },
            )
            .await
            .unwrap();

        let mut live = subscription("live-token");
        live.destination_channel = "private-feed".into();
        let id = store.add_subscription("acme", live).await.unwrap();
        assert_eq!(id, 1);

        let router = SubscriptionRouter::new(store);
        assert!(matches!(router.route("stale-token").await, Err(RouteError::NotFound)));
        let routed = router.route("live-token").await.unwrap();
        assert_eq!(routed.subscription.destination_channel, "private-feed");
    }

    #[tokio::test]
    async fn test_route_sees_subscription_added_elsewhere() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let gateway_store = store_on(remote.clone());
        let command_store = store_on(remote.clone());

        command_store
            .add_subscription("acme", subscription("token-1"))
            .await
            .unwrap();
        // The gateway replica caches the record as it is now
        assert_eq!(gateway_store.list_subscriptions("acme").await.unwrap().len(), 1);

        command_store
            .add_subscription("acme", subscription("token-2"))
            .await
            .unwrap();

        let routed = SubscriptionRouter::new(gateway_store)
            .route("token-2")
            .await
            .unwrap();
        assert_eq!(routed.subscription_id, 2);
        assert_eq!(remote.list_keys("trackerbot-v1-subscription-index").await.unwrap().len(), 2);
    }
}
