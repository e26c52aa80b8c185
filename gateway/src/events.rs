use crate::router::RoutedSubscription;
use async_trait::async_trait;
use serde_json::Value;
use shared::http::BoxError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookEventKind {
    IssueCreated,
    IssueUpdated,
    Other,
}

impl WebhookEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventKind::IssueCreated => "issue_created",
            WebhookEventKind::IssueUpdated => "issue_updated",
            WebhookEventKind::Other => "other",
        }
    }
}

/// A tracker webhook payload. Only the event name is interpreted here; the
/// rest is left to the sink.
#[derive(Clone, Debug, PartialEq)]
pub struct WebhookEvent {
    pub payload: Value,
}

impl WebhookEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(WebhookEvent {
            payload: serde_json::from_slice(body)?,
        })
    }

    /// Trackers namespace event names (`jira:issue_created`); only the part
    /// after the last colon matters.
    pub fn kind(&self) -> WebhookEventKind {
        let name = self
            .payload
            .get("webhookEvent")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match name.rsplit(':').next() {
            Some("issue_created") => WebhookEventKind::IssueCreated,
            Some("issue_updated") => WebhookEventKind::IssueUpdated,
            _ => WebhookEventKind::Other,
        }
    }

    /// Whether `route`'s subscription wants to hear about this event.
    pub fn is_wanted_by(&self, route: &RoutedSubscription) -> bool {
        self.kind() != WebhookEventKind::IssueUpdated || route.subscription.wants_updates
    }
}

/// Receives accepted webhook events, typically to render them into the
/// subscription's destination channel.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, route: RoutedSubscription, event: WebhookEvent) -> Result<(), BoxError>;
}

/// Logs every event and drops it.
pub struct LoggingEventSink;

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn deliver(&self, route: RoutedSubscription, event: WebhookEvent) -> Result<(), BoxError> {
        tracing::info!(
            team = %route.team_name,
            subscription_id = route.subscription_id,
            channel = %route.subscription.destination_channel,
            kind = event.kind().as_str(),
            "Webhook event received"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_store::Subscription;

    fn event(name: &str) -> WebhookEvent {
        WebhookEvent::from_slice(format!(r#"{{"webhookEvent": "{name}", "issue": {{}}}}"#).as_bytes())
            .unwrap()
    }

    #[test]
    fn test_kind() {
        assert_eq!(event("jira:issue_created").kind(), WebhookEventKind::IssueCreated);
        assert_eq!(event("issue_updated").kind(), WebhookEventKind::IssueUpdated);
        assert_eq!(event("comment_created").kind(), WebhookEventKind::Other);

        let no_name = WebhookEvent::from_slice(b"[1, 2]").unwrap();
        assert_eq!(no_name.kind(), WebhookEventKind::Other);
        assert!(WebhookEvent::from_slice(b"{").is_err());
    }

    #[test]
    fn test_update_filter() {
        let mut route = RoutedSubscription {
            team_name: "acme".into(),
            subscription_id: 1,
            subscription: Subscription {
                destination_channel: "feed".into(),
                external_webhook_handle: "1".into(),
                url_token: "t".into(),
                filter_query: "".into(),
                wants_updates: false,
            },
        };
        assert!(event("jira:issue_created").is_wanted_by(&route));
        assert!(!event("jira:issue_updated").is_wanted_by(&route));

        route.subscription.wants_updates = true;
        assert!(event("jira:issue_updated").is_wanted_by(&route));
    }
}
