use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value stored as JSON under one remote key.
///
/// A stored value is only usable if it deserializes and then passes
/// `validate`. Anything else is treated as corrupt and behaves as absent.
pub trait ConfigEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Used in logs and metric tags.
    const KIND: &'static str;

    fn validate(&self) -> bool {
        true
    }
}

pub(crate) fn decode<T: ConfigEntity>(raw: &str) -> Option<T> {
    serde_json::from_str::<T>(raw)
        .ok()
        .filter(T::validate)
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigFieldError {
    #[error("unknown config parameter: {0}")]
    UnknownParam(String),
    #[error("project {0} is not enabled in this channel")]
    DisabledProject(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerAuth {
    pub consumer_key: String,
    pub public_key: String,
    pub private_key: String,
}

/// One per team. Holds the tracker host and link-authentication key material.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamTrackerConfig {
    pub tracker_host: String,
    pub tracker_auth: TrackerAuth,
}

impl TeamTrackerConfig {
    /// Applies a single `config team <name> <value>` change on top of `old`.
    pub fn with_field(old: Option<&Self>, name: &str, value: &str) -> Result<Self, ConfigFieldError> {
        let mut next = old.cloned().unwrap_or_default();
        let field = match name {
            "trackerHost" => &mut next.tracker_host,
            "consumerKey" => &mut next.tracker_auth.consumer_key,
            "publicKey" => &mut next.tracker_auth.public_key,
            "privateKey" => &mut next.tracker_auth.private_key,
            _ => return Err(ConfigFieldError::UnknownParam(name.to_owned())),
        };
        *field = value.to_owned();
        Ok(next)
    }
}

impl ConfigEntity for TeamTrackerConfig {
    const KIND: &'static str = "tracker_config";
}

/// One per (team, user). Overwritten on re-authorization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamUserConfig {
    pub tracker_account_id: String,
    pub access_token: String,
    pub token_secret: String,
}

impl ConfigEntity for TeamUserConfig {
    const KIND: &'static str = "user_config";

    fn validate(&self) -> bool {
        !self.tracker_account_id.is_empty() && !self.access_token.is_empty()
    }
}

/// One per (team, channel).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamChannelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_new_issue_project: Option<String>,
    #[serde(default)]
    pub enabled_projects: Vec<String>,
}

impl TeamChannelConfig {
    /// Applies a single `config channel <name> <value>` change on top of `old`.
    ///
    /// Project names are stored lower-cased. Once a channel has enabled
    /// projects, the default project must be one of them.
    pub fn with_field(old: Option<&Self>, name: &str, value: &str) -> Result<Self, ConfigFieldError> {
        let mut next = old.cloned().unwrap_or_default();
        match name {
            "enabledProjects" => {
                next.enabled_projects = value
                    .split(',')
                    .map(str::trim)
                    .filter(|project| !project.is_empty())
                    .map(str::to_lowercase)
                    .collect();
            }
            "defaultNewIssueProject" => {
                let project = value.to_lowercase();
                if !next.enabled_projects.is_empty() && !next.enabled_projects.contains(&project) {
                    return Err(ConfigFieldError::DisabledProject(value.to_owned()));
                }
                next.default_new_issue_project = Some(project);
            }
            _ => return Err(ConfigFieldError::UnknownParam(name.to_owned())),
        }
        Ok(next)
    }

    pub fn is_project_enabled(&self, project: &str) -> bool {
        self.enabled_projects
            .iter()
            .any(|enabled| enabled.eq_ignore_ascii_case(project))
    }
}

impl ConfigEntity for TeamChannelConfig {
    const KIND: &'static str = "channel_config";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub destination_channel: String,
    /// Identifier of the webhook registered with the tracker.
    pub external_webhook_handle: String,
    pub url_token: String,
    pub filter_query: String,
    pub wants_updates: bool,
}

/// All feed subscriptions of one team, keyed by subscription id.
///
/// The record is never deleted, only emptied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamSubscriptions(BTreeMap<u64, Subscription>);

impl TeamSubscriptions {
    /// One past the largest id in use, so ids are never reused while the
    /// highest subscription exists.
    pub fn next_id(&self) -> u64 {
        self.0.keys().next_back().map_or(1, |id| id + 1)
    }

    pub fn get(&self, id: u64) -> Option<&Subscription> {
        self.0.get(&id)
    }

    pub fn insert(&mut self, id: u64, subscription: Subscription) -> Option<Subscription> {
        self.0.insert(id, subscription)
    }

    pub fn remove(&mut self, id: u64) -> Option<Subscription> {
        self.0.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Subscription)> {
        self.0.iter().map(|(id, subscription)| (*id, subscription))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ConfigEntity for TeamSubscriptions {
    const KIND: &'static str = "subscriptions";

    fn validate(&self) -> bool {
        self.0.values().all(|s| !s.url_token.is_empty())
    }
}

/// Maps an external URL token to the subscription it routes to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionIndexEntry {
    pub team_name: String,
    pub subscription_id: u64,
}

impl ConfigEntity for SubscriptionIndexEntry {
    const KIND: &'static str = "subscription_index";

    fn validate(&self) -> bool {
        !self.team_name.is_empty()
    }
}
