mod config;
mod telemetry;

use clap::{Args, Parser};
use config::{Config, ConfigError};
use feature_fetcher::{FetchError, Fetcher};
use feature_proxy::config::ValidationError;
use feature_proxy::errors::ProxyError;
use feature_proxy::response::DatasetResponse;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use telemetry::TelemetryError;

#[derive(Parser)]
#[command(version, about = "Aggregating proxy for paged ArcGIS feature services")]
enum CliCommand {
    /// Run the HTTP proxy and its admin listener
    Serve(ConfigArgs),
    /// Fetch one dataset and print it as JSON
    Fetch(FetchArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[derive(Args)]
struct FetchArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// Dataset key. The configured default dataset when omitted.
    #[arg(long)]
    source: Option<String>,
    /// Print counts and the strategy used instead of the features
    #[arg(long)]
    summary: bool,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not serialize output: {0}")]
    Output(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: CliCommand) -> Result<(), CliError> {
    let config_path = match &cli {
        CliCommand::Serve(args) => &args.config,
        CliCommand::Fetch(args) => &args.config.config,
    };
    let config = Config::from_file(config_path)?;
    config.proxy.validate()?;

    let _sentry = telemetry::init_logging(config.common.logging.as_ref());
    if let Some(metrics) = &config.common.metrics {
        telemetry::init_metrics(metrics)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli {
        CliCommand::Serve(_) => {
            tracing::info!(datasets = config.proxy.datasets.len(), "Starting proxy");
            runtime.block_on(feature_proxy::run(config.proxy))?;
        }
        CliCommand::Fetch(args) => {
            let output = runtime.block_on(fetch(&config, args.source.as_deref(), args.summary))?;
            println!("{output}");
        }
    }

    Ok(())
}

async fn fetch(config: &Config, source: Option<&str>, summary: bool) -> Result<String, CliError> {
    let datasets = config.proxy.datasets()?;
    let (key, dataset) = datasets.resolve(source);
    let fetcher = Fetcher::http(config.proxy.upstream.fetch_settings());

    let result = fetcher.fetch_dataset(key, dataset).await?;

    let output = match summary {
        true => serde_json::to_string_pretty(&json!({
            "source": key,
            "totalCount": result.total_count,
            "method": result.method,
            "sourceUsed": result.source_used,
            "serverCount": result.server_count,
        }))?,
        false => serde_json::to_string(&DatasetResponse::new(key, result))?,
    };
    Ok(output)
}
