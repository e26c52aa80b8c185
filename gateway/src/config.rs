use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Path must start with '/': {0}")]
    InvalidPath(String),

    #[error("OAuth callback and webhook paths must differ")]
    DuplicatePath,

    #[error("public_url cannot carry a query or fragment: {0}")]
    InvalidPublicUrl(Url),

    #[error("max_body_bytes cannot be 0")]
    InvalidBodyLimit,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_oauth_callback_path() -> String {
    "/trackerbot/oauth/callback".into()
}

fn default_webhook_path() -> String {
    "/trackerbot/webhook".into()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Receives OAuth redirects and tracker webhooks
    pub listener: Listener,
    /// Health and readiness probes
    pub admin_listener: Listener,
    /// Externally reachable prefix of `listener`, e.g. behind TLS termination.
    /// Callback and webhook URLs handed to third parties are built from it.
    pub public_url: Url,
    #[serde(default = "default_oauth_callback_path")]
    pub oauth_callback_path: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        for path in [&self.oauth_callback_path, &self.webhook_path] {
            if !path.starts_with('/') {
                return Err(ValidationError::InvalidPath(path.clone()));
            }
        }
        if self.oauth_callback_path == self.webhook_path {
            return Err(ValidationError::DuplicatePath);
        }
        if self.public_url.query().is_some() || self.public_url.fragment().is_some() {
            return Err(ValidationError::InvalidPublicUrl(self.public_url.clone()));
        }
        if self.max_body_bytes == 0 {
            return Err(ValidationError::InvalidBodyLimit);
        }
        Ok(())
    }

    /// Where the tracker should deliver events for the subscription owning `url_token`.
    pub fn webhook_url(&self, url_token: &str) -> Url {
        let mut url = self.public_url_with_path(&self.webhook_path);
        url.query_pairs_mut().append_pair("urlToken", url_token);
        url
    }

    /// The redirect target registered with the OAuth provider.
    pub fn oauth_callback_url(&self) -> Url {
        self.public_url_with_path(&self.oauth_callback_path)
    }

    fn public_url_with_path(&self, path: &str) -> Url {
        let mut url = self.public_url.clone();
        let prefix = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{prefix}{path}"));
        url
    }
}
