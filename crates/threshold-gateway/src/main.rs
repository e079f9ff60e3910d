//! Threshold Gateway - Entry point

use std::path::PathBuf;

use anyhow::Context as _;

use threshold_config::{ConfigLoader, GatewayConfig, LogFormat};
use threshold_gateway::{connect_store, Gateway, Server};
use threshold_telemetry::{init_telemetry, install_panic_hook, LogConfig, MetricsConfig};

const DEFAULT_CONFIG_PATH: &str = "threshold.toml";

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("threshold-gateway {}", threshold_gateway::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Threshold Gateway - edge API gateway

USAGE:
    threshold-gateway [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
                           [default: threshold.toml, if present]
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    THRESHOLD__SERVER__ADDR                      Listen address (default: 0.0.0.0:8080)
    THRESHOLD__SERVER__ENVIRONMENT               development | production
    THRESHOLD__AUTH__JWT_SECRET                  Token signing secret (required in production)
    THRESHOLD__RATE_LIMIT__STORE__REDIS_URL      Shared counter store
    THRESHOLD__RATE_LIMIT__STORE__FAILURE_POLICY local_fallback | fail_open | fail_closed
    THRESHOLD__TELEMETRY__LOGGING__LEVEL         Log filter (default: info)

A .env file in the working directory is loaded first.
"
    );
}

fn log_config(config: &GatewayConfig) -> LogConfig {
    let logging = &config.telemetry.logging;
    let base = if config.server.environment.is_production() {
        LogConfig::production()
    } else {
        LogConfig::development()
    };
    LogConfig {
        level: logging.level.clone(),
        json_format: logging.format == LogFormat::Json,
        ..base
    }
}

fn metrics_config(config: &GatewayConfig) -> MetricsConfig {
    MetricsConfig {
        enabled: config.telemetry.metrics.enabled,
        addr: config.telemetry.metrics.addr.clone(),
    }
}

fn load_config(args: &Args) -> anyhow::Result<GatewayConfig> {
    let loader = ConfigLoader::new().with_dotenv();
    let loader = match &args.config {
        Some(path) => loader
            .with_file(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => loader.with_optional_file(DEFAULT_CONFIG_PATH)?,
    };
    Ok(loader.with_env_prefix("THRESHOLD").load()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args).context("invalid configuration")?;

    init_telemetry(&log_config(&config), &metrics_config(&config))
        .context("failed to initialize telemetry")?;
    install_panic_hook();

    tracing::info!(
        version = threshold_gateway::VERSION,
        environment = ?config.server.environment,
        addr = %config.server.addr,
        "starting threshold gateway"
    );

    let store = connect_store(&config.rate_limit).await?;
    let gateway = Gateway::from_config(&config, store)?;

    Server::new(gateway, &config.server).run().await?;
    Ok(())
}
