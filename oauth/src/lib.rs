//! Correlates inbound OAuth redirects with the authorization attempt waiting
//! for them.

pub mod config;
pub mod correlator;
pub mod flow;
pub mod metrics_defs;

pub use config::OAuthConfig;
pub use correlator::{AuthorizationWait, CallbackData, OAuthCorrelator, WaitError};
pub use flow::{AccessGrant, AuthorizationError, AuthorizationProvider, RequestToken, authorize};
