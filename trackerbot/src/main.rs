mod config;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use config_store::{RemoteStoreError, run_stats_reporter};
use gateway::errors::GatewayError;
use gateway::events::LoggingEventSink;
use metrics_exporter_statsd::StatsdBuilder;
use oauth::OAuthCorrelator;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "trackerbot", about = "Issue tracker chat bot coordination service")]
struct Cli {
    #[arg(long, default_value = "trackerbot.yaml")]
    config_file_path: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the webhook and OAuth callback gateway
    Serve,
    /// Print subscription counts from the config store
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not start metrics exporter: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error("config store error: {0}")]
    Store(#[from] RemoteStoreError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("could not encode stats: {0}")]
    Encode(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_file_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Dropping the guard flushes pending sentry events
    let _sentry = init_logging(&config.logging);

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "trackerbot exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn run(command: CliCommand, config: Config) -> Result<(), CliError> {
    if let Some(metrics_config) = &config.metrics {
        init_metrics(metrics_config)?;
    }

    let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
    match command {
        CliCommand::Serve => runtime.block_on(serve(config)),
        CliCommand::Stats { json } => runtime.block_on(print_stats(config, json)),
    }
}

fn init_logging(config: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some("trackerbot"))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    shared::describe_metrics!(config_store::metrics_defs::ALL_METRICS);
    shared::describe_metrics!(oauth::metrics_defs::ALL_METRICS);
    shared::describe_metrics!(gateway::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "Exporting metrics to statsd"
    );
    Ok(())
}

async fn serve(config: Config) -> Result<(), CliError> {
    let gateway_config = config
        .gateway
        .as_ref()
        .ok_or(ConfigError::MissingSection("gateway"))?;

    let store = config.store.build()?;
    let correlator = OAuthCorrelator::new(config.oauth.callback_timeout());

    let reporter = tokio::spawn(run_stats_reporter(
        store.clone(),
        config.store.stats_interval(),
    ));

    tracing::info!(
        host = %gateway_config.listener.host,
        port = gateway_config.listener.port,
        public_url = %gateway_config.public_url,
        "Starting trackerbot gateway"
    );
    let result = gateway::run(gateway_config, store, correlator, Arc::new(LoggingEventSink)).await;
    reporter.abort();

    Ok(result?)
}

async fn print_stats(config: Config, json: bool) -> Result<(), CliError> {
    let store = config.store.build()?;
    let stats = store.subscription_stats().await?;

    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!("subscriptions: {}", stats.subscriptions);
        println!("teams: {}", stats.teams);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["trackerbot", "serve"]).unwrap();
        assert_eq!(cli.config_file_path, PathBuf::from("trackerbot.yaml"));
        assert!(matches!(cli.command, CliCommand::Serve));

        let cli = Cli::try_parse_from([
            "trackerbot",
            "--config-file-path",
            "/etc/trackerbot.yaml",
            "stats",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.config_file_path, PathBuf::from("/etc/trackerbot.yaml"));
        assert!(matches!(cli.command, CliCommand::Stats { json: true }));

        assert!(Cli::try_parse_from(["trackerbot"]).is_err());
    }

    #[tokio::test]
    async fn serve_requires_gateway_section() {
        let config: Config = serde_yaml::from_str("store:\n    type: memory\n").unwrap();
        assert!(matches!(
            serve(config).await,
            Err(CliError::Config(ConfigError::MissingSection("gateway")))
        ));
    }

    #[tokio::test]
    async fn stats_on_empty_store() {
        let config: Config = serde_yaml::from_str("store:\n    type: memory\n").unwrap();
        assert!(print_stats(config, true).await.is_ok());
    }
}
