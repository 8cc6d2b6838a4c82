//! Station configuration file.
//!
//! One TOML file carries everything. `[modem]`, `[supervisor]` and
//! `[server]` go to the uplink core; `[station]` and `[board]` are read here.
//!
//! ```toml
//! [station]
//! station_id = "vasiliki"
//! diag_interval_ms = 300000
//! sleep_start_hour = 22
//! sleep_end_hour = 9
//!
//! [board]
//! serial = "/dev/ttyS1"
//! power_key_gpio = 4
//! dtr_gpio = 25
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use aiolos_link::api::StationSettings;
use aiolos_link::config::UplinkConfig;
use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StationFileInput {
    station: StationConfigInput,
    board: BoardConfigInput,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StationConfigInput {
    station_id: Option<String>,
    tick_ms: Option<u64>,
    config_interval_ms: Option<u64>,
    temp_interval_ms: Option<u64>,
    wind_send_interval_ms: Option<u64>,
    wind_sample_interval_ms: Option<u64>,
    diag_interval_ms: Option<u64>,
    time_interval_ms: Option<u64>,
    restart_interval_s: Option<u64>,
    sleep_start_hour: Option<u8>,
    sleep_end_hour: Option<u8>,
    ota_hour: Option<u8>,
    ota_minute: Option<u8>,
    ota_duration_min: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BoardConfigInput {
    serial: Option<PathBuf>,
    power_key_gpio: Option<u32>,
    dtr_gpio: Option<u32>,
    watchdog_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub station_id: String,
    pub tick: Duration,
    /// How often remote configuration is fetched.
    pub config_interval: Duration,
    pub settings: StationSettings,
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            station_id: "aiolos-dev".into(),
            tick: Duration::from_millis(100),
            config_interval: Duration::from_secs(300),
            settings: StationSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub serial: PathBuf,
    pub power_key_gpio: u32,
    pub dtr_gpio: u32,
    /// `None` disables the watchdog.
    pub watchdog: Option<Duration>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        BoardConfig {
            serial: PathBuf::from("/dev/ttyS1"),
            power_key_gpio: 4,
            dtr_gpio: 25,
            watchdog: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub uplink: UplinkConfig,
    pub station: StationConfig,
    pub board: BoardConfig,
}

fn ms(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

fn hour(name: &str, value: Option<u8>, default: u8, limit: u8) -> anyhow::Result<u8> {
    match value {
        Some(v) if v >= limit => bail!("{name} must be below {limit}, got {v}"),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

impl StationConfigInput {
    fn resolve(self) -> anyhow::Result<StationConfig> {
        let d = StationConfig::default();
        let s = d.settings.clone();
        let tick = ms(self.tick_ms, d.tick);
        if tick.is_zero() {
            bail!("tick_ms must be positive");
        }
        let settings = StationSettings {
            temp_interval: ms(self.temp_interval_ms, s.temp_interval),
            wind_send_interval: ms(self.wind_send_interval_ms, s.wind_send_interval),
            wind_sample_interval: ms(self.wind_sample_interval_ms, s.wind_sample_interval),
            diag_interval: ms(self.diag_interval_ms, s.diag_interval),
            time_interval: ms(self.time_interval_ms, s.time_interval),
            restart_interval: self
                .restart_interval_s
                .map(Duration::from_secs)
                .unwrap_or(s.restart_interval),
            sleep_start_hour: hour("sleep_start_hour", self.sleep_start_hour, s.sleep_start_hour, 24)?,
            sleep_end_hour: hour("sleep_end_hour", self.sleep_end_hour, s.sleep_end_hour, 24)?,
            ota_hour: hour("ota_hour", self.ota_hour, s.ota_hour, 24)?,
            ota_minute: hour("ota_minute", self.ota_minute, s.ota_minute, 60)?,
            ota_duration: self
                .ota_duration_min
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(s.ota_duration),
        };
        Ok(StationConfig {
            station_id: self
                .station_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or(d.station_id),
            tick,
            config_interval: ms(self.config_interval_ms, d.config_interval),
            settings,
        })
    }
}

impl BoardConfigInput {
    fn resolve(self) -> BoardConfig {
        let d = BoardConfig::default();
        BoardConfig {
            serial: self.serial.unwrap_or(d.serial),
            power_key_gpio: self.power_key_gpio.unwrap_or(d.power_key_gpio),
            dtr_gpio: self.dtr_gpio.unwrap_or(d.dtr_gpio),
            watchdog: match self.watchdog_ms {
                Some(0) => None,
                Some(v) => Some(Duration::from_millis(v)),
                None => d.watchdog,
            },
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let uplink = UplinkConfig::from_toml_str(input).context("uplink configuration")?;
        let file: StationFileInput = toml::from_str(input).context("station configuration")?;
        Ok(AppConfig {
            uplink,
            station: file.station.resolve()?,
            board: file.board.resolve(),
        })
    }

    /// Defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Self::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))
            }
            None => Ok(AppConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = AppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.station.station_id, "aiolos-dev");
        assert_eq!(cfg.station.settings, StationSettings::default());
        assert_eq!(cfg.board.watchdog, Some(Duration::from_secs(30)));
        assert_eq!(cfg.uplink.server.port, 80);
    }

    #[test]
    fn all_sections_in_one_file() {
        let cfg = AppConfig::from_toml_str(
            r#"
            [modem]
            apn = "iot.example"

            [server]
            host = "weather.example.org"
            port = 8080

            [station]
            station_id = "vasiliki"
            wind_send_interval_ms = 5000
            sleep_start_hour = 23
            ota_duration_min = 10

            [board]
            serial = "/dev/ttyUSB0"
            watchdog_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.uplink.modem.apn, "iot.example");
        assert_eq!(cfg.uplink.server.host, "weather.example.org");
        assert_eq!(cfg.station.station_id, "vasiliki");
        assert_eq!(cfg.station.settings.wind_send_interval, Duration::from_secs(5));
        assert_eq!(cfg.station.settings.sleep_start_hour, 23);
        assert_eq!(cfg.station.settings.sleep_end_hour, 9);
        assert_eq!(cfg.station.settings.ota_duration, Duration::from_secs(600));
        assert_eq!(cfg.board.serial, PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(cfg.board.watchdog, None);
    }

    #[test]
    fn rejects_bad_hours() {
        let err = AppConfig::from_toml_str("[station]\nsleep_end_hour = 24\n").unwrap_err();
        assert!(err.to_string().contains("sleep_end_hour"));
        assert!(AppConfig::from_toml_str("[station]\nota_minute = 60\n").is_err());
    }

    #[test]
    fn uplink_validation_surfaces() {
        assert!(AppConfig::from_toml_str("[server]\nport = 0\n").is_err());
    }
}
