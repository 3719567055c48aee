//! meshtastic-client-proxy - Main Entry Point
//!
//! Connects the broker first, then the radio, and forwards proxy messages
//! both ways until interrupted.

use clap::{Parser, Subcommand};
use meshtastic_client_proxy::bridge::Bridge;
use meshtastic_client_proxy::config::{ConfigError, ConfigOverrides, ProxyConfig};
use meshtastic_client_proxy::error::{redact_url, ProxyError};
use meshtastic_client_proxy::observability::init_default_logging;
use meshtastic_client_proxy::transport::serial::SerialSettings;
use meshtastic_client_proxy::transport::{BrokerLink, DeviceLink, MqttTransport, SerialTransport};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

/// A proxy for a Meshtastic node on a serial port, forwarding packets to and from an MQTT broker
#[derive(Parser)]
#[command(name = "meshtastic-client-proxy")]
#[command(about = "A meshtastic client proxy implementation that works via serial")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// MQTT broker URL
    #[arg(short = 'b', long, env = "MQTT_BROKER_URL")]
    broker_url: Option<String>,

    /// MQTT username
    #[arg(short = 'u', long = "user", env = "MQTT_USERNAME")]
    username: Option<String>,

    /// MQTT user password
    #[arg(short = 'p', long = "pass", env = "MQTT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// MQTT root topic
    #[arg(short = 'r', long = "root", env = "MQTT_ROOT_TOPIC")]
    root_topic: Option<String>,

    /// Channels to proxy (repeatable or comma separated)
    #[arg(long, value_delimiter = ',')]
    channels: Vec<String>,

    /// Serial port of the radio; auto-detected when omitted
    #[arg(long, env = "MESHTASTIC_PORT")]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud_rate: Option<u32>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy (default)
    Run,
    /// Print the current version
    Version {
        /// Print commit hash and build date as well
        #[arg(short, long)]
        verbose: bool,
        /// Print package and build metadata
        #[arg(short, long)]
        debug: bool,
    },
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            broker_url: self.broker_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            root_topic: self.root_topic.clone(),
            channels: self.channels.clone(),
            port: self.port.clone(),
            baud_rate: self.baud_rate,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    let result = match &cli.command {
        None | Some(Commands::Run) => {
            match load_configuration(cli.config.as_deref(), cli.overrides()) {
                Ok(config) => run_proxy(config).await,
                Err(e) => Err(e.into()),
            }
        }
        Some(Commands::Version { verbose, debug }) => {
            print_version(*verbose, *debug);
            Ok(())
        }
        Some(Commands::Config { show }) => {
            match load_configuration(cli.config.as_deref(), cli.overrides()) {
                Ok(config) => handle_config_command(&config, *show),
                Err(e) => Err(e.into()),
            }
        }
    };

    if let Err(e) = result {
        error!("Fatal: {}", e);
        eprintln!("meshtastic-client-proxy: {e}");
        process::exit(1);
    }
}

/// Explicit file, else the first default location that exists, else defaults
fn load_configuration(
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<ProxyConfig, ConfigError> {
    let found = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => ProxyConfig::default_paths()
            .into_iter()
            .find(|path| path.exists()),
    };

    let mut config = match found {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ProxyConfig::load_from_file(&path)?
        }
        None => {
            info!("No configuration file found, using defaults");
            ProxyConfig::default()
        }
    };

    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

async fn run_proxy(config: ProxyConfig) -> Result<(), ProxyError> {
    info!(
        "Starting meshtastic-client-proxy v{}",
        env!("CARGO_PKG_VERSION")
    );

    let device = Arc::new(SerialTransport::new(SerialSettings::from(&config.device)));
    let broker = Arc::new(MqttTransport::new());
    let bridge = Bridge::new(device, broker);

    let result = start_bridge(&bridge, &config).await;

    bridge.shutdown().await;
    result
}

async fn start_bridge<D, B>(bridge: &Bridge<D, B>, config: &ProxyConfig) -> Result<(), ProxyError>
where
    D: DeviceLink + 'static,
    B: BrokerLink + 'static,
{
    let bindings = config.broker.channel_bindings();
    bridge.connect_broker(&config.broker, &bindings).await?;

    bridge
        .connect_device(&config.device.port, config.device.fail_if_no_handler)
        .await?;

    info!(
        broker = %redact_url(&config.broker.url),
        channels = bridge.proxied_channels().len(),
        "Proxy started"
    );

    tokio::select! {
        signal = wait_for_shutdown_signal() => signal?,
        lost = bridge.device_lost() => return Err(lost.into()),
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down gracefully...");
    Ok(())
}

fn print_version(verbose: bool, debug: bool) {
    let version = env!("CARGO_PKG_VERSION");

    if verbose {
        println!(
            "{} {} {}",
            version,
            option_env!("GIT_COMMIT").unwrap_or("unknown"),
            option_env!("BUILD_DATE").unwrap_or("unknown")
        );
        return;
    }

    if debug {
        println!("package\t{}", env!("CARGO_PKG_NAME"));
        println!("version\t{}", version);
        println!(
            "rust-version\t{}",
            option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("")
        );
        println!("repository\t{}", option_env!("CARGO_PKG_REPOSITORY").unwrap_or(""));
        println!("target-os\t{}", std::env::consts::OS);
        println!("target-arch\t{}", std::env::consts::ARCH);
        println!(
            "debug-assertions\t{}",
            if cfg!(debug_assertions) { "on" } else { "off" }
        );
        return;
    }

    println!("{version}");
}

fn handle_config_command(config: &ProxyConfig, show: bool) -> Result<(), ProxyError> {
    if show {
        let mut shown = config.clone();
        if shown.broker.password.is_some() {
            shown.broker.password = Some("***".to_string());
        }
        match toml::to_string_pretty(&shown) {
            Ok(rendered) => {
                println!("Current configuration:");
                println!("{rendered}");
            }
            Err(e) => error!("Failed to render configuration: {}", e),
        }
    }

    info!("Configuration validation complete");
    Ok(())
}
