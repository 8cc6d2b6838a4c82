//! Aiolos Station
//!
//! Field daemon for the Aiolos weather station.
//!
//! - Keeps the SIM7000 modem powered, registered and attached
//! - Sends diagnostics, wind and temperature on their own cadences
//! - Pulls remote configuration and acknowledges OTA requests
//! - Parks the modem during the nightly sleep window
//! - In `--simulate` mode, runs the same loop against a simulated modem and
//!   backend on virtual time

mod config;
#[cfg(target_os = "linux")]
mod linux;
mod sensors;
mod simulate;
mod station;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aiolos_link::clock::Clock;
use aiolos_link::hal::{Board, SerialPort};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::sensors::SensorSource;
use crate::station::{Station, Tick};

/// Aiolos weather station daemon.
#[derive(Parser, Debug)]
#[command(name = "aiolos-station", about = "Aiolos weather station daemon")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against the simulated modem and backend on virtual time.
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Stop after this many ticks (0 runs until interrupted).
    #[arg(long, default_value_t = 0)]
    ticks: u64,

    /// Tick period override in milliseconds.
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Modem serial device override.
    #[arg(long)]
    serial: Option<PathBuf>,

    /// Station identifier override.
    #[arg(long)]
    station_id: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(ms) = cli.tick_ms {
        anyhow::ensure!(ms > 0, "--tick-ms must be positive");
        config.station.tick = Duration::from_millis(ms);
    }
    if let Some(serial) = cli.serial {
        config.board.serial = serial;
    }
    if let Some(id) = cli.station_id {
        config.station.station_id = id;
    }

    let server = format!("{}:{}", config.uplink.server.host, config.uplink.server.port);
    tracing::info!(
        station = %config.station.station_id,
        server = %server,
        simulate = cli.simulate,
        "aiolos-station starting"
    );

    // ── Graceful shutdown ──────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutdown requested");
            running.store(false, Ordering::Relaxed);
        })?;
    }

    if cli.simulate {
        let (clock, _sim, mut station) = simulate::build(&config);
        run(&mut station, &clock, &running, cli.ticks);
        return Ok(());
    }
    run_hardware(&config, &running, cli.ticks)
}

#[cfg(target_os = "linux")]
fn run_hardware(config: &AppConfig, running: &AtomicBool, ticks: u64) -> anyhow::Result<()> {
    use anyhow::Context;

    use crate::linux::{SoftWatchdog, SysfsBoard, TtySerial};
    use crate::sensors::SimulatedSensors;

    let clock = Clock::new();
    let watchdog = SoftWatchdog::start(config.board.watchdog)?;
    let serial = TtySerial::open(&config.board.serial, config.uplink.modem.baud)
        .with_context(|| format!("opening {}", config.board.serial.display()))?;
    let board = SysfsBoard::open(config.board.power_key_gpio, config.board.dtr_gpio, watchdog.clone())?;

    let uplink = aiolos_link::Uplink::new(config.uplink.clone(), serial, board, clock.clone());
    tracing::warn!("no host sensor drivers; reporting synthetic readings");
    let sensors = SimulatedSensors::new(clock.clone());
    let mut station = Station::new(uplink, sensors, clock.clone(), config.station.clone());
    run(&mut station, &clock, running, ticks);
    watchdog.stop();
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn run_hardware(_config: &AppConfig, _running: &AtomicBool, _ticks: u64) -> anyhow::Result<()> {
    anyhow::bail!("hardware mode needs Linux; use --simulate")
}

/// Boot, then tick until interrupted, out of ticks, or due for restart.
fn run<S, B, X>(station: &mut Station<S, B, X>, clock: &Clock, running: &AtomicBool, ticks: u64)
where
    S: SerialPort,
    B: Board,
    X: SensorSource,
{
    station.boot();
    let mut count = 0u64;
    while running.load(Ordering::Relaxed) {
        let outcome = station.tick();
        count += 1;
        tracing::trace!(tick = count, ?outcome, "tick");
        if outcome == Tick::Restart || (ticks > 0 && count >= ticks) {
            break;
        }
        clock.sleep(station.idle_for());
    }
    station.shutdown();
    tracing::info!(
        ticks = count,
        connected = station.uplink().is_connected(),
        uptime_s = station.uptime().as_secs(),
        "aiolos-station stopped"
    );
}
