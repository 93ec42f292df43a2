use std::path::PathBuf;
use std::sync::Arc;

use airwater::config::AppConfig;
use airwater::device::{AirWaterDevice, DeviceSnapshot};
use airwater::persistence::{SettingsStore, TomlSettingsStore};
use airwater::provisioning::{self, ble, Credentials};
use airwater::registration::{
    correlate, fetch_registered_devices, normalize_mac, parse_registered_devices,
};
use airwater::registry::DeviceRegistry;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Local control for AirWater humidifiers
#[derive(Parser)]
#[command(name = "airwater")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file, defaults to $AIRWATER_CONFIG or ~/.config/airwater/config.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session for every configured device (default)
    Run,
    /// Scan for devices over BLE and match them with registration records
    Scan {
        /// Read registration records from a file instead of the registration service
        #[arg(long)]
        registrations: Option<PathBuf>,

        /// Only scan, skip the registration records
        #[arg(long, conflicts_with = "registrations")]
        offline: bool,
    },
    /// Send Wi-Fi credentials to a device over BLE
    Provision {
        /// BLE MAC of the device
        address: String,
        ssid: String,
        password: String,
    },
    /// Delete the persisted settings of a device
    Forget {
        id: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);

    let config = setup(&config_path).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Scan {
            registrations,
            offline,
        } => scan(config, registrations, offline).await,
        Commands::Provision {
            address,
            ssid,
            password,
        } => provision(config, &address, Credentials::new(ssid, password)).await,
        Commands::Forget { id } => forget(config, id).await,
    }
}

async fn setup(config_path: &std::path::Path) -> Result<AppConfig> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let config = AppConfig::load(config_path).await?;
    let level = match std::env::var("RUST_LOG") {
        Ok(level) => level.parse().unwrap_or(Level::INFO),
        Err(_) => config.logging.level(),
    };
    setup_logging(level);

    Ok(config)
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

async fn run(config: AppConfig) -> Result<()> {
    if config.devices.is_empty() {
        return Err(eyre!("No devices configured"));
    }

    let registry = DeviceRegistry::new();
    let options = config.session_options();
    let cancel = CancellationToken::new();

    for device in &config.devices {
        let store = Arc::new(TomlSettingsStore::new(&config.storage.dir, device.id));
        let session =
            AirWaterDevice::connect_mqtt(device.identity(), &config.mqtt, store, options).await;
        let session = registry.insert(session).await;

        tokio::spawn(log_snapshots(
            session.name(),
            session.subscribe(),
            cancel.clone(),
        ));
    }

    info!("Running {} devices, Ctrl+C to stop", registry.len().await);
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for Ctrl+C: {}", e))?;

    info!("Shutting down");
    cancel.cancel();
    registry.stop_all().await;
    Ok(())
}

async fn log_snapshots(
    name: String,
    mut snapshots: watch::Receiver<DeviceSnapshot>,
    cancel: CancellationToken,
) {
    let mut last: Option<DeviceSnapshot> = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let snapshot = snapshots.borrow_and_update().clone();
        if last.as_ref() == Some(&snapshot) {
            continue;
        }

        let status = &snapshot.status;
        info!(
            "{}: available={} power={} mode={:?} humidity={:?} target={} fan={}",
            name,
            snapshot.available,
            status.power,
            status.mode,
            status.internal_sensor_humidity,
            status.target_humidity,
            status.fan_speed
        );
        debug!("{} settings: {:?}", name, snapshot.settings);
        last = Some(snapshot);
    }
}

async fn scan(config: AppConfig, registrations: Option<PathBuf>, offline: bool) -> Result<()> {
    let devices = ble::scan(config.provisioning.scan_duration())
        .await
        .map_err(|e| eyre!("BLE scan failed: {}", e))?;

    for device in &devices {
        info!(
            "{} {} rssi={:?}",
            device.address,
            device.model.human_readable(),
            device.rssi
        );
    }

    if offline {
        return Ok(());
    }

    let records = match registrations {
        Some(path) => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
            parse_registered_devices(&content)?
        }
        None => {
            fetch_registered_devices(&config.registration.url, config.registration.timeout())
                .await?
        }
    };

    let correlated = correlate(
        &records,
        devices
            .iter()
            .map(|device| (device.address.as_str(), device.model)),
    );

    for device in &correlated {
        match device.to_device_config() {
            Some(entry) => {
                info!("Registered device {} is {}", entry.id, device.name());
                let snippet = toml::to_string(&entry)
                    .map_err(|e| eyre!("Failed to render device entry: {}", e))?;
                println!("[[devices]]\n{}", snippet);
            }
            None => warn!(
                "Registered device {} ({}) was not seen nearby",
                device.record.id,
                device.name()
            ),
        }
    }
    Ok(())
}

async fn provision(config: AppConfig, address: &str, credentials: Credentials) -> Result<()> {
    let wanted = normalize_mac(address);
    let device = ble::scan(config.provisioning.scan_duration())
        .await
        .map_err(|e| eyre!("BLE scan failed: {}", e))?
        .into_iter()
        .find(|device| device.address == wanted)
        .ok_or_else(|| eyre!("No AirWater device with address {} nearby", wanted))?;

    info!("Provisioning {} ({})", device.address, device.model);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = provisioning::provision(
        Box::new(device.into_transport()),
        &credentials,
        config.provisioning.handshake,
        cancel,
    )
    .await;

    match result {
        Ok(()) => {
            info!("Credentials accepted, the device is joining the network");
            Ok(())
        }
        Err(err) => {
            error!("Provisioning failed: {}", err);
            Err(eyre!("Provisioning failed: {}", err))
        }
    }
}

async fn forget(config: AppConfig, id: u32) -> Result<()> {
    let store = TomlSettingsStore::new(&config.storage.dir, id);
    store
        .remove()
        .await
        .map_err(|e| eyre!("Failed to delete settings of device {}: {}", id, e))?;

    info!("Deleted settings of device {} ({})", id, store.path().display());
    Ok(())
}
