//! # Station Control Loop
//!
//! One cooperative tick at a time, single-threaded:
//!
//! ```text
//!   feed watchdog ─▶ restart due? ─▶ asleep? ─▶ time sync ─▶ sleep window?
//!                                                              │no
//!                                                              ▼
//!                               maintain_connection(true) ─▶ can send?
//!                                                              │yes
//!                                                              ▼
//!                      diagnostics ─▶ remote config ─▶ wind ─▶ temperature
//! ```
//!
//! Each telemetry stream keeps its own cadence. A failed send is dropped,
//! never queued; the next slot sends fresh readings.

use std::time::Duration;

use aiolos_link::api::{
    DiagnosticsReport, StationApi, StationSettings, TemperatureReport,
};
use aiolos_link::clock::Clock;
use aiolos_link::hal::{Board, SerialPort};
use aiolos_link::Uplink;
use chrono::{DateTime, FixedOffset, Timelike};
use quanta::Instant;
use tracing::{debug, info, warn};

use crate::config::StationConfig;
use crate::sensors::{SensorSource, DISCONNECTED_TEMPERATURE};

/// Longest single idle step while the sleep window is open.
const MAX_SLEEP_STEP: Duration = Duration::from_secs(60);

/// What the last tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Connected; due telemetry was attempted.
    Online,
    /// Link down or requests throttled; nothing sent.
    Offline,
    /// Inside the sleep window with the modem parked.
    Asleep,
    /// Uptime reached the restart interval.
    Restart,
}

/// Last-run stamp for one periodic job.
#[derive(Debug, Default, Clone, Copy)]
struct Cadence {
    last: Option<Instant>,
}

impl Cadence {
    /// Never-run jobs are due immediately.
    fn take(&mut self, now: Instant, interval: Duration) -> bool {
        let due = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due {
            self.last = Some(now);
        }
        due
    }
}

/// Network time at the last sync, advanced with the monotonic clock.
#[derive(Debug, Clone, Copy)]
struct WallClock {
    at_sync: DateTime<FixedOffset>,
    synced: Instant,
}

impl WallClock {
    fn now(&self, clock: &Clock) -> DateTime<FixedOffset> {
        let elapsed = chrono::Duration::from_std(clock.since(self.synced)).unwrap_or_default();
        self.at_sync + elapsed
    }
}

/// Inside `[start, end)` on a 24 h dial; wraps past midnight when
/// `start > end`. Equal hours mean no window.
pub fn in_sleep_window(hour: u32, start: u8, end: u8) -> bool {
    let (start, end) = (u32::from(start), u32::from(end));
    match start.cmp(&end) {
        std::cmp::Ordering::Less => hour >= start && hour < end,
        std::cmp::Ordering::Greater => hour >= start || hour < end,
        std::cmp::Ordering::Equal => false,
    }
}

pub struct Station<S: SerialPort, B: Board, X: SensorSource> {
    uplink: Uplink<S, B>,
    api: StationApi,
    sensors: X,
    clock: Clock,
    config: StationConfig,
    settings: StationSettings,
    started: Instant,
    wall: Option<WallClock>,
    asleep: bool,
    time_sync: Cadence,
    diagnostics: Cadence,
    remote_config: Cadence,
    wind: Cadence,
    temperature: Cadence,
}

impl<S: SerialPort, B: Board, X: SensorSource> Station<S, B, X> {
    pub fn new(uplink: Uplink<S, B>, sensors: X, clock: Clock, config: StationConfig) -> Self {
        Station {
            api: StationApi::new(config.station_id.clone()),
            settings: config.settings.clone(),
            started: clock.now(),
            uplink,
            sensors,
            clock,
            config,
            wall: None,
            asleep: false,
            time_sync: Cadence::default(),
            diagnostics: Cadence::default(),
            remote_config: Cadence::default(),
            wind: Cadence::default(),
            temperature: Cadence::default(),
        }
    }

    pub fn uplink(&self) -> &Uplink<S, B> {
        &self.uplink
    }

    pub fn settings(&self) -> &StationSettings {
        &self.settings
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    pub fn uptime(&self) -> Duration {
        self.clock.since(self.started)
    }

    /// Network time as currently estimated; `None` before the first sync.
    pub fn local_time(&self) -> Option<DateTime<FixedOffset>> {
        self.wall.map(|w| w.now(&self.clock))
    }

    /// Bring the modem up. Never fails; see the boot report in the log.
    pub fn boot(&mut self) {
        info!(station = %self.config.station_id, "station booting");
        self.uplink.init();
    }

    /// How long the caller should wait before the next tick.
    pub fn idle_for(&self) -> Duration {
        if !self.asleep {
            return self.config.tick;
        }
        let until_wake = self
            .local_time()
            .map(|t| {
                let end = u32::from(self.settings.sleep_end_hour);
                let now_s = t.hour() * 3600 + t.minute() * 60 + t.second();
                let end_s = end * 3600;
                let secs = (end_s + 86_400 - now_s) % 86_400;
                Duration::from_secs(u64::from(secs))
            })
            .unwrap_or(MAX_SLEEP_STEP);
        until_wake.clamp(self.config.tick, MAX_SLEEP_STEP)
    }

    pub fn tick(&mut self) -> Tick {
        self.uplink.modem.board_mut().feed_watchdog();
        let now = self.clock.now();

        if self.uptime() >= self.settings.restart_interval {
            info!(uptime_s = self.uptime().as_secs(), "restart interval reached");
            return Tick::Restart;
        }

        if self.asleep {
            if self.sleep_window_open() {
                return Tick::Asleep;
            }
            self.leave_sleep_window();
        }

        if self.time_sync.take(now, self.settings.time_interval) {
            self.sync_time();
        }
        if self.sleep_window_open() {
            self.enter_sleep_window();
            return Tick::Asleep;
        }

        self.uplink.maintain(true);
        if !self.uplink.can_send() {
            return Tick::Offline;
        }

        if self.diagnostics.take(now, self.settings.diag_interval) {
            self.send_diagnostics();
        }
        if self.remote_config.take(now, self.config.config_interval) {
            self.refresh_config();
        }
        if self.wind.take(now, self.settings.wind_send_interval) {
            let report = self.sensors.wind();
            debug!(speed = report.wind_speed, direction = report.wind_direction, "wind");
            if !self.api.send_wind(&mut self.uplink, &report) {
                warn!("wind report dropped");
            }
        }
        if self.temperature.take(now, self.settings.temp_interval) {
            let temperature = self.sensors.external_temperature().unwrap_or_else(|| {
                warn!("external temperature probe not answering");
                DISCONNECTED_TEMPERATURE
            });
            if !self
                .api
                .send_temperature(&mut self.uplink, &TemperatureReport { temperature })
            {
                warn!("temperature report dropped");
            }
        }
        Tick::Online
    }

    /// Park the link before the process exits.
    pub fn shutdown(&mut self) {
        info!("station shutting down");
        self.uplink.maintain(false);
        if !self.uplink.modem.power_off() {
            warn!("modem did not confirm power down");
        }
    }

    // ─── Steps ──────────────────────────────────────────────────────────

    fn sync_time(&mut self) {
        match self.uplink.modem.get_network_time() {
            Some(at_sync) => {
                debug!(time = %at_sync, "network time");
                self.wall = Some(WallClock {
                    at_sync,
                    synced: self.clock.now(),
                });
            }
            None => warn!("network time unavailable"),
        }
    }

    fn sleep_window_open(&self) -> bool {
        self.local_time().is_some_and(|t| {
            in_sleep_window(t.hour(), self.settings.sleep_start_hour, self.settings.sleep_end_hour)
        })
    }

    fn enter_sleep_window(&mut self) {
        info!(
            until_hour = self.settings.sleep_end_hour,
            "entering sleep window"
        );
        self.uplink.maintain(false);
        if !self.uplink.modem.enter_sleep(true) {
            warn!("modem refused sleep; powering off instead");
            self.uplink.modem.power_off();
        }
        self.asleep = true;
    }

    fn leave_sleep_window(&mut self) {
        info!("leaving sleep window");
        if !self.uplink.modem.wake_up(true) {
            warn!("modem did not wake; cold booting");
            if !self.uplink.modem.power_on() {
                warn!("modem still off; supervisor will retry");
            }
        }
        self.asleep = false;
    }

    fn send_diagnostics(&mut self) {
        let report = DiagnosticsReport {
            battery_voltage: self.sensors.battery_voltage(),
            solar_voltage: self.sensors.solar_voltage(),
            internal_temperature: self.sensors.internal_temperature(),
            // 0 dBm never occurs on a real link; the backend reads it as unknown
            signal_quality: self.uplink.signal_dbm().unwrap_or(0),
            uptime: self.uptime().as_secs(),
        };
        if !self.api.send_diagnostics(&mut self.uplink, &report) {
            warn!("diagnostics dropped");
        }
    }

    fn refresh_config(&mut self) {
        let Some(remote) = self.api.fetch_config(&mut self.uplink) else {
            return;
        };
        let changed = remote.apply_to(&mut self.settings);
        if changed > 0 {
            info!(changed, settings = ?self.settings, "remote configuration applied");
        }
        if remote.ota_requested() {
            info!(
                window_min = self.settings.ota_duration.as_secs() / 60,
                "remote OTA requested"
            );
            if !self.api.confirm_ota_started(&mut self.uplink) {
                warn!("OTA start not confirmed; server will ask again");
            }
        }
    }
}
