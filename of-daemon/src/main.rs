//! OpenFAN Daemon (openfand)
//!
//! Host adapter around `of_core`: loads the config file, feeds hwmon
//! temperatures into the core, runs the poll and periodic-apply timers and
//! exposes the device operations as sub-commands.
//!
//! # Logging
//! - `OPENFAN_LOG` sets the filter (default `info`)
//! - systemd journal when available, stdout otherwise

mod cli;
mod config;
mod control_loop;
mod instance;
mod temp_feed;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use of_core::{
    DeviceClient, HttpTransport, LogStallNotifier, OpenFanDevice, OptionsStore, TempHub,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands, Switch};
use crate::config::{
    load_config, resolve_config_path, ConfigWatcher, DaemonConfig, FilePersister,
};
use crate::instance::{pid_file_for, running_instance, InstanceLock};
use crate::temp_feed::TempFeed;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Logging
// ============================================================================

/// Returns true when logging to the systemd journal
fn init_logging() -> bool {
    let log_level = std::env::var("OPENFAN_LOG").unwrap_or_else(|_| "info".to_string());

    if Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
    false
}

// ============================================================================
// Device Setup
// ============================================================================

fn build_device(config: &DaemonConfig, path: &Path) -> anyhow::Result<Arc<OpenFanDevice>> {
    let transport = HttpTransport::new(&config.host)
        .with_context(|| format!("invalid host {:?}", config.host))?;
    let mut client = DeviceClient::new(Arc::new(transport));
    if let Some(fan_count) = config.fan_count {
        client = client.with_fan_count(fan_count);
    }

    let persister = Arc::new(FilePersister::new(path, config.clone()));
    let options = Arc::new(OptionsStore::new(config.options.clone(), persister)?);

    let device = OpenFanDevice::new(
        Arc::new(client),
        options,
        Arc::new(TempHub::new()),
        Arc::new(LogStallNotifier),
    )
    .with_name(config.name.clone().unwrap_or_default())
    .with_mac(config.mac.clone());
    Ok(Arc::new(device))
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_run(
    device: Arc<OpenFanDevice>,
    config: &DaemonConfig,
    path: &Path,
) -> anyhow::Result<()> {
    info!("STARTUP: openfand {} starting for {}", VERSION, device.host());
    let _instance = InstanceLock::acquire(&pid_file_for(path))?;
    let watcher = ConfigWatcher::new(path);

    device
        .first_refresh()
        .await
        .context("device did not answer the first poll")?;

    // Seed temperatures before controllers bootstrap from them
    let mut feed = TempFeed::new(Arc::clone(device.temps()), config.temp_sources.clone());
    feed.poll();
    device.start_temp_control().await?;

    // Sender stays alive here; a dropped sender reads as shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        let _ = signal_tx.send(true);
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    let handles = [
        tokio::spawn(control_loop::run_poll_loop(
            Arc::clone(&device),
            shutdown_rx.clone(),
        )),
        tokio::spawn(control_loop::run_periodic_apply(
            Arc::clone(&device),
            shutdown_rx.clone(),
        )),
        tokio::spawn(temp_feed::run_temp_feed(
            feed,
            Duration::from_secs(config.temp_feed_interval),
            shutdown_rx.clone(),
        )),
        tokio::spawn(control_loop::run_config_watch(
            Arc::clone(&device),
            watcher,
            config.clone(),
            control_loop::CONFIG_WATCH_INTERVAL,
            shutdown_rx,
        )),
    ];
    info!(
        "STARTUP: poll every {:?}, periodic apply every {:?}",
        device.poll_interval(),
        device.periodic_apply_interval()
    );

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Background task ended abnormally: {}", e);
        }
    }
    drop(shutdown_tx);
    info!("SHUTDOWN: openfand terminated gracefully");
    Ok(())
}

async fn cmd_status(device: &OpenFanDevice) -> anyhow::Result<()> {
    if let Err(e) = device.refresh_now().await {
        warn!("Poll failed: {}", e);
    }
    let status = device.status();

    println!("{} ({})", status.device.name, status.device.model);
    println!("{}", "=".repeat(status.device.name.len() + status.device.model.len() + 3));
    println!("Host:         {}", status.device.host);
    println!("Availability: {:?}", status.availability);

    let Some(snapshot) = status.snapshot else {
        println!("No data");
        return Ok(());
    };
    println!("LED:          {}", if snapshot.led_on { "on" } else { "off" });
    println!("Supply:       {}", if snapshot.is_12v { "12V" } else { "5V" });
    println!();
    for (index, fan) in &snapshot.fans {
        let state = device.controller_state(*index)?;
        println!(
            "  Fan {}: {:>5} RPM  PWM {:>3}%{}{}",
            index,
            fan.rpm,
            fan.pwm,
            if fan.stalled { "  STALLED" } else { "" },
            if state.active { "  [temp control]" } else { "" }
        );
    }
    Ok(())
}

/// Persisted option changes reach a running daemon through its config watch
fn note_running_daemon(config_path: &Path) {
    if let Some(pid) = running_instance(&pid_file_for(config_path)) {
        println!(
            "Running openfand (pid {}) picks this up within {}s",
            pid,
            control_loop::CONFIG_WATCH_INTERVAL.as_secs()
        );
    }
}

async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let path = resolve_config_path(cli.config.as_deref())?;
    let config =
        load_config(&path).with_context(|| format!("failed to load config {}", path.display()))?;
    let device = build_device(&config, &path)?;

    match cli.command {
        Commands::Run => cmd_run(device, &config, &path).await,
        Commands::Status => cmd_status(&device).await,
        Commands::SetPwm { fan, percent } => {
            let written = device.set_pwm(fan, percent).await?;
            println!("Fan {} set to {}%", fan, written);
            let controlled = device
                .options()
                .read(|opts| !opts.resolve(fan).temp_entity.is_empty());
            if let (Some(pid), true) = (running_instance(&pid_file_for(&path)), controlled) {
                println!(
                    "Note: openfand (pid {}) controls fan {} by temperature and may override this",
                    pid, fan
                );
            }
            Ok(())
        }
        Commands::Led { state } => {
            device.set_led(state == Switch::On).await?;
            println!("LED {}", if state == Switch::On { "on" } else { "off" });
            Ok(())
        }
        Commands::Voltage { volts, confirm } => {
            if volts != 5 && volts != 12 {
                bail!("voltage must be 5 or 12, got {}", volts);
            }
            if !confirm {
                bail!("switching the fan supply voltage requires --confirm");
            }
            device.set_voltage(volts).await?;
            println!("Fan supply set to {}V", volts);
            Ok(())
        }
        Commands::Calibrate(args) => {
            if let Some(pid) = running_instance(&pid_file_for(&path)) {
                bail!(
                    "openfand (pid {}) is running for this config; stop it before calibrating \
                     so its temperature control does not write during the sweep",
                    pid
                );
            }
            device.refresh_now().await.context("device is not answering")?;
            match device.calibrate_min(args.fan, args.request()).await? {
                Some(min_pwm) => println!("Fan {} calibrated: min_pwm={}%", args.fan, min_pwm),
                None => println!(
                    "Fan {} never reached {} RPM; min_pwm left unchanged",
                    args.fan, args.rpm_threshold
                ),
            }
            Ok(())
        }
        Commands::Profiles => {
            let profiles = device.list_profiles();
            println!("Built-in: {}", profiles.builtin.join(", "));
            if profiles.custom.is_empty() {
                println!("Custom:   (none)");
            } else {
                println!("Custom:   {}", profiles.custom.join(", "));
            }
            Ok(())
        }
        Commands::ApplyProfile { fan, profile } => {
            device.apply_profile(fan, &profile).await?;
            println!("Applied profile '{}' to fan {}", profile.trim(), fan);
            note_running_daemon(&path);
            Ok(())
        }
        Commands::SaveProfile { fan, profile } => {
            device.save_profile(fan, &profile)?;
            println!("Saved fan {} settings as '{}'", fan, profile.trim());
            note_running_daemon(&path);
            Ok(())
        }
        Commands::Diagnostics => {
            if let Err(e) = device.refresh_now().await {
                warn!("Poll failed: {}", e);
            }
            println!("{}", device.diagnostics().to_json()?);
            Ok(())
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let use_journald = init_logging();
    tracing::debug!("Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    if let Err(e) = run_command(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
