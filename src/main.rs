//! MQTT broker sentinel - main entry point

use broker_sentinel::config::SentinelConfig;
use broker_sentinel::observability::LogSettings;
use broker_sentinel::probe::probe_for;
use broker_sentinel::sentinel::Sentinel;
use broker_sentinel::transport::mqtt::MqttClientFactory;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info, Level};

/// Configuration files tried, in order, when `--config` is not given
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "mqtt-broker-sentinel.toml",
    "config/mqtt-broker-sentinel.toml",
    "mqtt-broker-sentinel.json",
];

/// MQTT broker sentinel: topic watchdog, broker process monitor and self-healing subscriber
#[derive(Parser)]
#[command(name = "broker-sentinel")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML, or JSON with a .json extension)
    #[arg(short, long, value_name = "FILE", env = "BROKER_SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Use the built-in default configuration (takes precedence over --config)
    #[arg(short, long)]
    default: bool,

    /// Verbose logging (-v debug, -vv trace); overrides LOG_LEVEL
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sentinel until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_observability(cli.verbose);

    info!("Starting MQTT broker sentinel v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref(), cli.default) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_sentinel(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn init_observability(verbose: u8) {
    let mut settings = LogSettings::from_env();
    match verbose {
        0 => {}
        1 => settings.level = Level::DEBUG,
        _ => settings.level = Level::TRACE,
    }
    settings.init();
}

fn load_configuration(
    config_path: Option<&Path>,
    use_default: bool,
) -> Result<SentinelConfig, Box<dyn std::error::Error>> {
    if use_default {
        info!("Using built-in default configuration");
        let config = SentinelConfig::default();
        config.validate()?;
        return Ok(config);
    }

    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(SentinelConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(SentinelConfig::load_from_file(path)?);
        }
    }

    Err(format!(
        "No configuration file found. Provide one with -c/--config, use --default, or create {}",
        DEFAULT_CONFIG_PATHS[0]
    )
    .into())
}

async fn run_sentinel(config: SentinelConfig) -> Result<(), Box<dyn std::error::Error>> {
    let process_section = &config.mqtt_broker.process;
    let probe = probe_for(process_section.probe);
    info!(
        process = %process_section.name,
        probe = %probe.probe_name(),
        broker = %format!(
            "{}:{}",
            config.mqtt_broker.connection.host_addr, config.mqtt_broker.connection.host_port
        ),
        "Building sentinel"
    );

    let factory = MqttClientFactory::new(config.mqtt_broker.connection.clone());
    let mut sentinel = Sentinel::new(&config, factory, probe)?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    sentinel.start().await?;
    info!("Sentinel is running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    sentinel.stop().await;
    Ok(())
}

fn handle_config_command(
    config: &SentinelConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
