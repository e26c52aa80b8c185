use crate::errors::{ReadResultExt, RemoteStoreError, UpdateError, WriteError};
use crate::metrics_defs::CONFIG_UPDATE_EXHAUSTED;
use crate::store::ConfigStore;
use crate::types::{Subscription, SubscriptionIndexEntry, TeamSubscriptions};
use shared::counter;
use std::convert::Infallible;

pub const URL_TOKEN_PREFIX: &str = "trackerbot-subscription";

/// A fresh unguessable token for a webhook URL: 128 random bits, hex encoded.
pub fn generate_url_token() -> String {
    let bytes: [u8; 16] = rand::random();
    format!("{URL_TOKEN_PREFIX}-{}", hex::encode(bytes))
}

#[derive(thiserror::Error, Debug)]
pub enum SubscriptionError {
    #[error("no subscription with id {0}")]
    UnknownSubscription(u64),
    #[error("gave up after {attempts} conflicting writes")]
    RetriesExhausted { attempts: u32 },
    #[error("could not encode subscriptions: {0}")]
    Encode(serde_json::Error),
    #[error(transparent)]
    Remote(RemoteStoreError),
    #[error("could not write index entry for subscription {id}: {source}")]
    IndexWrite { id: u64, source: WriteError },
    #[error("subscription {id} was removed but its index entry was not: {source}")]
    IndexDelete { id: u64, source: RemoteStoreError },
}

impl SubscriptionError {
    pub fn is_unknown(&self) -> bool {
        !matches!(self, SubscriptionError::UnknownSubscription(_))
    }
}

impl From<Infallible> for SubscriptionError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

impl From<RemoteStoreError> for SubscriptionError {
    fn from(err: RemoteStoreError) -> Self {
        SubscriptionError::Remote(err)
    }
}

impl From<WriteError> for SubscriptionError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::RevisionConflict => SubscriptionError::RetriesExhausted { attempts: 1 },
            WriteError::Encode(e) => SubscriptionError::Encode(e),
            WriteError::Remote(e) => SubscriptionError::Remote(e),
        }
    }
}

impl<E: Into<SubscriptionError>> From<UpdateError<E>> for SubscriptionError {
    fn from(err: UpdateError<E>) -> Self {
        match err {
            UpdateError::Rejected(e) => e.into(),
            UpdateError::RetriesExhausted { attempts } => {
                SubscriptionError::RetriesExhausted { attempts }
            }
            UpdateError::Encode(e) => SubscriptionError::Encode(e),
            UpdateError::Remote(e) => SubscriptionError::Remote(e),
        }
    }
}

impl ConfigStore {
    /// All subscriptions of `team`; a team that never subscribed has none.
    pub async fn list_subscriptions(&self, team: &str) -> Result<TeamSubscriptions, RemoteStoreError> {
        Ok(self
            .get_subscriptions(team)
            .await
            .found()?
            .map(|entry| entry.value)
            .unwrap_or_default())
    }

    /// Stores `subscription` under the next free id and returns the id.
    ///
    /// The index entry for `subscription.url_token` is written before the
    /// subscription record on every attempt, so a failure in between leaves at
    /// worst an index entry that routes nowhere. If the record is never
    /// written the index entry is removed again.
    pub async fn add_subscription(
        &self,
        team: &str,
        subscription: Subscription,
    ) -> Result<u64, SubscriptionError> {
        let url_token = subscription.url_token.clone();
        match self.try_add_subscription(team, subscription).await {
            Ok(id) => {
                tracing::info!(team, id, "Added subscription");
                Ok(id)
            }
            Err(err) => {
                if let Err(cleanup) = self.delete_subscription_index(&url_token).await {
                    tracing::warn!(team, error = %cleanup, "Failed to discard unused subscription index entry");
                }
                Err(err)
            }
        }
    }

    async fn try_add_subscription(
        &self,
        team: &str,
        subscription: Subscription,
    ) -> Result<u64, SubscriptionError> {
        let attempts = self.max_update_attempts();
        for attempt in 1..=attempts {
            let current = if attempt == 1 {
                self.get_subscriptions(team).await
            } else {
                self.refresh_subscriptions(team).await
            }
            .found()?;

            let mut next = current
                .as_ref()
                .map(|entry| entry.value.clone())
                .unwrap_or_default();
            let id = next.next_id();
            next.insert(id, subscription.clone());

            let index_entry = SubscriptionIndexEntry {
                team_name: team.to_owned(),
                subscription_id: id,
            };
            self.put_subscription_index(&subscription.url_token, index_entry)
                .await
                .map_err(|source| SubscriptionError::IndexWrite { id, source })?;

            match self.update_subscriptions(team, current.as_ref(), next).await {
                Ok(_) => return Ok(id),
                Err(WriteError::RevisionConflict) => {
                    tracing::debug!(team, id, attempt, "Subscription id taken concurrently, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(team, attempts, "Giving up adding subscription after repeated conflicts");
        counter!(CONFIG_UPDATE_EXHAUSTED, "kind" => "subscriptions").increment(1);
        Err(SubscriptionError::RetriesExhausted { attempts })
    }

    /// Removes subscription `id` from `team` and then deletes its index entry.
    pub async fn remove_subscription(
        &self,
        team: &str,
        id: u64,
    ) -> Result<Subscription, SubscriptionError> {
        let mut removed = None;
        self.modify_subscriptions(team, |old| {
            let mut next = old.cloned().unwrap_or_default();
            removed = next.remove(id);
            match removed {
                Some(_) => Ok(next),
                None => Err(SubscriptionError::UnknownSubscription(id)),
            }
        })
        .await?;

        let removed = removed.ok_or(SubscriptionError::UnknownSubscription(id))?;
        self.delete_subscription_index(&removed.url_token)
            .await
            .map_err(|source| SubscriptionError::IndexDelete { id, source })?;

        tracing::info!(team, id, "Removed subscription");
        Ok(removed)
    }
}
