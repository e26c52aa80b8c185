use crate::errors::{ReadResultExt, RemoteStoreError};
use crate::metrics_defs::{SUBSCRIPTIONS_ACTIVE, SUBSCRIPTIONS_TEAMS};
use crate::store::{ConfigStore, SUBSCRIPTION_INDEX_NAMESPACE};
use crate::types::{SubscriptionIndexEntry, TeamSubscriptions};
use serde::Serialize;
use shared::gauge;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    pub subscriptions: usize,
    pub teams: usize,
}

impl ConfigStore {
    /// Every readable index entry with its URL token. Entries discarded as
    /// corrupt while listing are skipped.
    pub async fn list_subscription_indices(
        &self,
    ) -> Result<Vec<(String, SubscriptionIndexEntry)>, RemoteStoreError> {
        let tokens = self.remote().list_keys(SUBSCRIPTION_INDEX_NAMESPACE).await?;
        let mut indices = Vec::with_capacity(tokens.len());
        for token in tokens {
            if let Some(entry) = self.get_subscription_index(&token).await.found()? {
                indices.push((token, entry.value));
            }
        }
        Ok(indices)
    }

    /// Counts subscriptions reachable through the index. Index entries left
    /// behind without a matching subscription are not counted.
    pub async fn subscription_stats(&self) -> Result<SubscriptionStats, RemoteStoreError> {
        let mut records: HashMap<String, TeamSubscriptions> = HashMap::new();
        let mut teams = HashSet::new();
        let mut subscriptions = 0;

        for (token, entry) in self.list_subscription_indices().await? {
            if !records.contains_key(&entry.team_name) {
                let record = self.list_subscriptions(&entry.team_name).await?;
                records.insert(entry.team_name.clone(), record);
            }
            let is_live = records
                .get(&entry.team_name)
                .and_then(|record| record.get(entry.subscription_id))
                .is_some_and(|subscription| subscription.url_token == token);
            if is_live {
                subscriptions += 1;
                teams.insert(entry.team_name);
            }
        }

        Ok(SubscriptionStats {
            subscriptions,
            teams: teams.len(),
        })
    }
}

/// Publishes subscription gauges every `interval` until the task is dropped.
pub async fn run_stats_reporter(store: ConfigStore, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match store.subscription_stats().await {
            Ok(stats) => {
                gauge!(SUBSCRIPTIONS_ACTIVE).set(stats.subscriptions as f64);
                gauge!(SUBSCRIPTIONS_TEAMS).set(stats.teams as f64);
                tracing::debug!(
                    subscriptions = stats.subscriptions,
                    teams = stats.teams,
                    "Published subscription stats"
                );
            }
            Err(err) => tracing::warn!(error = %err, "Failed to collect subscription stats"),
        }
    }
}
