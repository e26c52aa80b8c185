use serde::Deserialize;
use std::time::Duration;

fn default_callback_timeout_secs() -> u64 {
    5 * 60
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct OAuthConfig {
    /// How long an authorization attempt waits for the provider's redirect.
    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        OAuthConfig {
            callback_timeout_secs: default_callback_timeout_secs(),
        }
    }
}

impl OAuthConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}
