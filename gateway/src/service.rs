use crate::config::GatewayConfig;
use crate::events::{EventSink, WebhookEvent};
use crate::metrics_defs::{
    OAUTH_CALLBACK_REQUESTS, WEBHOOK_BODY_BYTES, WEBHOOK_REQUESTS, WEBHOOK_SINK_FAILED,
};
use crate::router::{RouteError, SubscriptionRouter};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use oauth::OAuthCorrelator;
use shared::http::{BoxError, make_text_response};
use shared::{counter, histogram};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

const BAD_CALLBACK: &str = "unexpected callback data";
const RETURN_TO_CHAT: &str = "Please go back to chat to continue. You may close this page now.";

type GatewayResponse = Response<BoxBody<Bytes, Infallible>>;

struct GatewayInner {
    router: SubscriptionRouter,
    correlator: OAuthCorrelator,
    sink: Arc<dyn EventSink>,
    oauth_callback_path: String,
    webhook_path: String,
    max_body_bytes: usize,
}

/// Serves the OAuth redirect endpoint and the webhook delivery endpoint.
///
/// Responses to these third parties never carry diagnostics.
#[derive(Clone)]
pub struct GatewayService {
    inner: Arc<GatewayInner>,
}

impl GatewayService {
    pub fn new(
        config: &GatewayConfig,
        router: SubscriptionRouter,
        correlator: OAuthCorrelator,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        GatewayService {
            inner: Arc::new(GatewayInner {
                router,
                correlator,
                sink,
                oauth_callback_path: config.oauth_callback_path.clone(),
                webhook_path: config.webhook_path.clone(),
                max_body_bytes: config.max_body_bytes,
            }),
        }
    }
}

impl<B> Service<Request<B>> for GatewayService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = GatewayResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.handle(req).await) })
    }
}

impl GatewayInner {
    async fn handle<B>(&self, req: Request<B>) -> GatewayResponse
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let path = req.uri().path();
        if path == self.oauth_callback_path {
            self.oauth_callback(req.uri().query())
        } else if path == self.webhook_path {
            self.webhook(req).await
        } else {
            make_text_response(StatusCode::NOT_FOUND, "not found")
        }
    }

    fn oauth_callback(&self, query: Option<&str>) -> GatewayResponse {
        let (Some(token), Some(verifier)) = (
            query_param(query, "oauth_token"),
            query_param(query, "oauth_verifier"),
        ) else {
            counter!(OAUTH_CALLBACK_REQUESTS, "outcome" => "malformed").increment(1);
            return make_text_response(StatusCode::BAD_REQUEST, BAD_CALLBACK);
        };

        // Same answer whether or not anything was waiting for this token
        let outcome = match self.correlator.complete(&token, &verifier) {
            true => "matched",
            false => "unmatched",
        };
        counter!(OAUTH_CALLBACK_REQUESTS, "outcome" => outcome).increment(1);
        make_text_response(StatusCode::OK, RETURN_TO_CHAT)
    }

    async fn webhook<B>(&self, req: Request<B>) -> GatewayResponse
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let Some(url_token) = query_param(req.uri().query(), "urlToken") else {
            return reject_webhook("malformed");
        };

        let route = match self.router.route(&url_token).await {
            Ok(route) => route,
            Err(RouteError::NotFound) => return reject_webhook("unknown_token"),
            Err(RouteError::Unknown(err)) => {
                tracing::error!(error = %err, "Failed to route webhook delivery");
                counter!(WEBHOOK_REQUESTS, "outcome" => "error").increment(1);
                return make_text_response(StatusCode::INTERNAL_SERVER_ERROR, "");
            }
        };

        let body = match Limited::new(req.into_body(), self.max_body_bytes)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                tracing::debug!(error = %err, "Failed to read webhook body");
                return reject_webhook("malformed");
            }
        };

        let event = match WebhookEvent::from_slice(&body) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(error = %err, "Webhook body is not JSON");
                return reject_webhook("malformed");
            }
        };
        histogram!(WEBHOOK_BODY_BYTES).record(body.len() as f64);

        if !event.is_wanted_by(&route) {
            counter!(WEBHOOK_REQUESTS, "outcome" => "filtered").increment(1);
            return make_text_response(StatusCode::OK, "");
        }

        // The deliverer gets its 200 whether or not the sink copes with the
        // event, so it never retries a payload we cannot process.
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let team = route.team_name.clone();
            let subscription_id = route.subscription_id;
            if let Err(err) = sink.deliver(route, event).await {
                counter!(WEBHOOK_SINK_FAILED).increment(1);
                tracing::warn!(team, subscription_id, error = %err, "Failed to handle webhook event");
            }
        });

        counter!(WEBHOOK_REQUESTS, "outcome" => "accepted").increment(1);
        make_text_response(StatusCode::OK, "")
    }
}

fn reject_webhook(outcome: &'static str) -> GatewayResponse {
    counter!(WEBHOOK_REQUESTS, "outcome" => outcome).increment(1);
    make_text_response(StatusCode::BAD_REQUEST, BAD_CALLBACK)
}

/// First value of `name` in a URL query string.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RoutedSubscription;
    use async_trait::async_trait;
    use config_store::{
        CacheSettings, ConfigStore, InMemoryRemoteStore, RemoteEntry, RemoteStore,
        RemoteStoreError, Subscription,
    };
    use http_body_util::Full;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<(RoutedSubscription, WebhookEvent)>);

    #[async_trait]
    impl EventSink for ChannelSink {
        async fn deliver(
            &self,
            route: RoutedSubscription,
            event: WebhookEvent,
        ) -> Result<(), BoxError> {
            self.0.send((route, event))?;
            Ok(())
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl RemoteStore for UnavailableStore {
        async fn get(
            &self,
            _namespace: &str,
            _key: &str,
        ) -> Result<Option<RemoteEntry>, RemoteStoreError> {
            Err(RemoteStoreError::UnexpectedStatus(
                StatusCode::SERVICE_UNAVAILABLE,
            ))
        }

        async fn put(
            &self,
            _namespace: &str,
            _key: &str,
            _value: String,
            _expected_revision: Option<u64>,
        ) -> Result<u64, RemoteStoreError> {
            Err(RemoteStoreError::InvalidUrl("unavailable".into()))
        }

        async fn delete(&self, _namespace: &str, _key: &str) -> Result<(), RemoteStoreError> {
            Ok(())
        }

        async fn list_keys(&self, _namespace: &str) -> Result<Vec<String>, RemoteStoreError> {
            Ok(vec![])
        }
    }

    fn config() -> GatewayConfig {
        serde_yaml::from_str(
            r#"
            listener: {host: 127.0.0.1, port: 8080}
            admin_listener: {host: 127.0.0.1, port: 8081}
            public_url: https://bot.example.com
            max_body_bytes: 256
            "#,
        )
        .unwrap()
    }

    struct Harness {
        service: GatewayService,
        store: ConfigStore,
        correlator: OAuthCorrelator,
        events: mpsc::UnboundedReceiver<(RoutedSubscription, WebhookEvent)>,
    }

    fn harness_on(remote: Arc<dyn RemoteStore>) -> Harness {
        let store = ConfigStore::new(remote, &CacheSettings::default(), 2);
        let correlator = OAuthCorrelator::new(Duration::from_secs(30));
        let (tx, events) = mpsc::unbounded_channel();
        let service = GatewayService::new(
            &config(),
            SubscriptionRouter::new(store.clone()),
            correlator.clone(),
            Arc::new(ChannelSink(tx)),
        );
        Harness {
            service,
            store,
            correlator,
            events,
        }
    }

    fn harness() -> Harness {
        harness_on(Arc::new(InMemoryRemoteStore::new()))
    }

    fn request(uri: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Full::new(Bytes::from(body.to_owned())))
            .unwrap()
    }

    async fn send(service: &GatewayService, uri: &str, body: &str) -> (StatusCode, String) {
        let response = service.call(request(uri, body)).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn subscribe(store: &ConfigStore, token: &str, wants_updates: bool) -> u64 {
        store
            .add_subscription(
                "acme",
                Subscription {
                    destination_channel: "feed".into(),
                    external_webhook_handle: "10001".into(),
                    url_token: token.into(),
                    filter_query: "project = CORE".into(),
                    wants_updates,
                },
            )
            .await
            .unwrap()
    }

    const CREATED: &str = r#"{"webhookEvent": "jira:issue_created", "issue": {"key": "CORE-1"}}"#;
    const UPDATED: &str = r#"{"webhookEvent": "jira:issue_updated", "issue": {"key": "CORE-1"}}"#;

    #[tokio::test]
    async fn test_oauth_callback() {
        let harness = harness();
        let wait = harness.correlator.begin_wait("req-1");

        let (status, body) = send(
            &harness.service,
            "/trackerbot/oauth/callback?oauth_token=req-1&oauth_verifier=v%2B1",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, RETURN_TO_CHAT);
        assert_eq!(wait.wait().await.unwrap().oauth_verifier, "v+1");

        // A replay gets exactly the same answer
        let (status, body) = send(
            &harness.service,
            "/trackerbot/oauth/callback?oauth_token=req-1&oauth_verifier=v%2B1",
            "",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, RETURN_TO_CHAT);
    }

    #[tokio::test]
    async fn test_oauth_callback_missing_params() {
        let harness = harness();
        for uri in [
            "/trackerbot/oauth/callback",
            "/trackerbot/oauth/callback?oauth_token=req-1",
            "/trackerbot/oauth/callback?oauth_verifier=v",
        ] {
            let (status, body) = send(&harness.service, uri, "").await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, BAD_CALLBACK);
        }
    }

    #[tokio::test]
    async fn test_webhook_delivered() {
        let mut harness = harness();
        let id = subscribe(&harness.store, "token-1", true).await;

        let (status, _) = send(&harness.service, "/trackerbot/webhook?urlToken=token-1", CREATED).await;
        assert_eq!(status, StatusCode::OK);

        let (route, event) = harness.events.recv().await.unwrap();
        assert_eq!(route.team_name, "acme");
        assert_eq!(route.subscription_id, id);
        assert_eq!(event.payload["issue"]["key"], "CORE-1");
    }

    #[tokio::test]
    async fn test_webhook_update_filtered() {
        let mut harness = harness();
        subscribe(&harness.store, "token-1", false).await;

        let (status, _) = send(&harness.service, "/trackerbot/webhook?urlToken=token-1", UPDATED).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&harness.service, "/trackerbot/webhook?urlToken=token-1", CREATED).await;
        assert_eq!(status, StatusCode::OK);

        // Only the creation made it through
        let (_, event) = harness.events.recv().await.unwrap();
        assert_eq!(event.payload["webhookEvent"], "jira:issue_created");
        tokio::task::yield_now().await;
        assert!(harness.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_webhook_rejections_are_opaque() {
        let mut harness = harness();
        let id = subscribe(&harness.store, "token-1", true).await;
        subscribe(&harness.store, "token-2", true).await;
        harness.store.remove_subscription("acme", id).await.unwrap();

        let missing = send(&harness.service, "/trackerbot/webhook", CREATED).await;
        let unknown = send(&harness.service, "/trackerbot/webhook?urlToken=nope", CREATED).await;
        let removed = send(&harness.service, "/trackerbot/webhook?urlToken=token-1", CREATED).await;
        for response in [&missing, &unknown, &removed] {
            assert_eq!(response.0, StatusCode::BAD_REQUEST);
            assert_eq!(response.1, BAD_CALLBACK);
        }

        let malformed = send(&harness.service, "/trackerbot/webhook?urlToken=token-2", "{oops").await;
        assert_eq!(malformed, (StatusCode::BAD_REQUEST, BAD_CALLBACK.to_owned()));

        let oversized = format!(r#"{{"webhookEvent": "{}"}}"#, "x".repeat(512));
        let too_large = send(&harness.service, "/trackerbot/webhook?urlToken=token-2", &oversized).await;
        assert_eq!(too_large.0, StatusCode::BAD_REQUEST);

        tokio::task::yield_now().await;
        assert!(harness.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_webhook_store_failure() {
        let harness = harness_on(Arc::new(UnavailableStore));
        let (status, body) = send(&harness.service, "/trackerbot/webhook?urlToken=token-1", CREATED).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let harness = harness();
        let (status, _) = send(&harness.service, "/health", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
