use config_store::{StoreConfig, StoreConfigError};
use gateway::config::{GatewayConfig, ValidationError};
use oauth::OAuthConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
    /// Filter directives, overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            sentry_dsn: None,
            level: default_log_level(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// Only needed by `serve`.
    pub gateway: Option<GatewayConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        if let Some(gateway) = &self.gateway {
            gateway.validate()?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid store config: {0}")]
    Store(#[from] StoreConfigError),
    #[error("invalid gateway config: {0}")]
    Gateway(#[from] ValidationError),
    #[error("missing config section: {0}")]
    MissingSection(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_store::RemoteStoreType;
    use std::io::Write;
    use std::time::Duration;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            store:
                type: http
                url: http://kvstore.internal:8080/v1
                max_update_attempts: 3
            oauth:
                callback_timeout_secs: 120
            gateway:
                listener:
                    host: 0.0.0.0
                    port: 8080
                admin_listener:
                    host: 127.0.0.1
                    port: 8081
                public_url: https://bot.example.com
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.metrics.expect("metrics").statsd_port, 8125);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.sentry_dsn.is_some());
        assert!(matches!(config.store.r#type, RemoteStoreType::Http { .. }));
        assert_eq!(config.store.max_update_attempts, 3);
        assert_eq!(config.oauth.callback_timeout(), Duration::from_secs(120));
        let gateway = config.gateway.expect("gateway config");
        assert_eq!(
            gateway.webhook_url("abc").as_str(),
            "https://bot.example.com/trackerbot/webhook?urlToken=abc"
        );
    }

    #[test]
    fn minimal_config() {
        let tmp = write_tmp_file("store:\n    type: memory\n");
        let config = Config::from_file(tmp.path()).expect("load config");

        assert!(config.metrics.is_none());
        assert_eq!(config.logging, LoggingConfig::default());
        assert_eq!(config.oauth, OAuthConfig::default());
        assert!(config.gateway.is_none());
    }

    #[test]
    fn invalid_config() {
        let tmp = write_tmp_file("store:\n    type: memory\n    max_update_attempts: 0\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Store(StoreConfigError::NoUpdateAttempts))
        ));

        let tmp = write_tmp_file(
            r#"
            store:
                type: memory
            gateway:
                listener:
                    host: 0.0.0.0
                    port: 0
                admin_listener:
                    host: 127.0.0.1
                    port: 8081
                public_url: https://bot.example.com
            "#,
        );
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Gateway(ValidationError::InvalidPort))
        ));

        let tmp = write_tmp_file("gateway: {}\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/trackerbot.yaml")),
            Err(ConfigError::LoadError(_))
        ));
    }
}
