//! gattchat - chat with a nearby device over a BLE GATT link

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::time::Instant;
use tracing::info;

use gattchat_ble::BleTransport;
use gattchat_cli::{app::device_listing, AppConfig, ChatApp, Cli, Commands};
use gattchat_core::{AppEvent, ChatNode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_configuration(&cli)?;
    config.cli.verbose |= cli.verbose;
    setup_logging(config.cli.verbose);

    match cli.command {
        Commands::Chat { name, device } => {
            if let Some(name) = name {
                config = config.with_display_name(name);
            }
            config.validate().context("invalid configuration")?;
            let app = ChatApp::start(config)
                .await
                .context("failed to start chat node")?;
            app.with_auto_connect(device).run().await?;
        }
        Commands::Scan { seconds } => scan(config, Duration::from_secs(seconds)).await?,
        Commands::Config => print!("{}", AppConfig::example_config()?),
    }

    info!("gattchat exited");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> anyhow::Result<AppConfig> {
    match &cli.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path)),
        None => Ok(AppConfig::default()),
    }
}

/// Scan for `duration` and print every device found
async fn scan(config: AppConfig, duration: Duration) -> anyhow::Result<()> {
    let transport = BleTransport::new(config.ble.clone())
        .await
        .context("failed to open Bluetooth adapter")?;
    let mut node = ChatNode::spawn(config.core, transport)?;
    let mut events = node
        .take_event_receiver()
        .context("event receiver unavailable")?;

    node.request_scan().await?;
    let deadline = Instant::now() + duration;
    let mut devices = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        if let AppEvent::DeviceDiscovered(device) = event {
            devices.push(device);
        }
    }
    node.shutdown().await?;

    if devices.is_empty() {
        println!("No devices found");
    }
    for line in device_listing(&devices) {
        println!("{}", line);
    }
    Ok(())
}
