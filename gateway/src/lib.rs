//! Inbound HTTP surface: OAuth redirects from the tracker's authorization
//! server and webhook deliveries for feed subscriptions.

pub mod config;
pub mod errors;
pub mod events;
pub mod metrics_defs;
pub mod router;
pub mod service;

use config::GatewayConfig;
use config_store::ConfigStore;
use errors::GatewayError;
use events::EventSink;
use oauth::OAuthCorrelator;
use router::SubscriptionRouter;
use service::GatewayService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::convert::Infallible;
use std::sync::Arc;

/// Serves the gateway and its admin listener until either fails.
pub async fn run(
    config: &GatewayConfig,
    store: ConfigStore,
    correlator: OAuthCorrelator,
    sink: Arc<dyn EventSink>,
) -> Result<(), GatewayError> {
    let gateway = GatewayService::new(config, SubscriptionRouter::new(store), correlator, sink);
    let admin: AdminService<_, Infallible> = AdminService::new(|| true);

    tokio::try_join!(
        run_http_service(&config.listener.host, config.listener.port, gateway),
        run_http_service(
            &config.admin_listener.host,
            config.admin_listener.port,
            admin
        ),
    )?;
    Ok(())
}
