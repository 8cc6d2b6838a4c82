//! # Uplink Configuration
//!
//! TOML in, validated durations out. Every field is optional on input;
//! [`UplinkConfigInput::resolve`] fills defaults and rejects values the
//! hardware cannot honour.
//!
//! ```toml
//! [modem]
//! revision = "standard"
//! apn = "simbase"
//!
//! [supervisor]
//! backoff_base_ms = 5000
//! backoff_max_ms = 300000
//!
//! [server]
//! host = "aiolos.example.net"
//! port = 80
//! ```

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::backoff::BackoffPolicy;
use crate::hal::{BoardRevision, PinPolarity};

/// Shortest power-key pulse the SIM7000 datasheet accepts for power-off.
pub const MIN_OFF_PULSE: Duration = Duration::from_millis(1200);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("off pulse of {0:?} is shorter than the 1.2s modem minimum")]
    OffPulseTooShort(Duration),

    #[error("server port must be non-zero")]
    ZeroPort,

    #[error("server host must not be empty")]
    EmptyHost,

    #[error("{section}: backoff max {max:?} is below base {base:?}")]
    BackoffInverted {
        section: &'static str,
        base: Duration,
        max: Duration,
    },
}

// ─── Input (raw TOML) ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UplinkConfigInput {
    pub modem: ModemConfigInput,
    pub supervisor: SupervisorConfigInput,
    pub server: ServerConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModemConfigInput {
    pub revision: Option<BoardRevision>,
    pub baud: Option<u32>,
    pub apn: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub on_pulse_ms: Option<u64>,
    pub off_pulse_ms: Option<u64>,
    pub boot_wait_ms: Option<u64>,
    pub graceful_power_down_repeats: Option<u32>,
    /// Watchdog deadline during long modem operations; 0 disables it.
    pub relaxed_watchdog_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SupervisorConfigInput {
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub failure_threshold: Option<u32>,
    pub min_reset_interval_ms: Option<u64>,
    pub unresponsive_timeout_ms: Option<u64>,
    pub registration_timeout_ms: Option<u64>,
    pub attach_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfigInput {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub stall_timeout_ms: Option<u64>,
    pub max_body_bytes: Option<usize>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
}

// ─── Resolved ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ModemConfig {
    pub revision: BoardRevision,
    pub polarity: PinPolarity,
    pub baud: u32,
    pub apn: String,
    pub user: String,
    pub password: String,
    pub on_pulse: Duration,
    pub off_pulse: Duration,
    pub boot_wait: Duration,
    /// Extra `AT+CPOWD=1` sends after the first confirmed one.
    pub graceful_power_down_repeats: u32,
    /// `None` disables the watchdog while relaxed.
    pub relaxed_watchdog: Option<Duration>,
}

impl Default for ModemConfig {
    fn default() -> Self {
        let revision = BoardRevision::default();
        Self {
            revision,
            polarity: revision.polarity(),
            baud: 115_200,
            apn: "simbase".into(),
            user: String::new(),
            password: String::new(),
            on_pulse: Duration::from_millis(1500),
            off_pulse: Duration::from_millis(1500),
            boot_wait: Duration::from_secs(8),
            graceful_power_down_repeats: 0,
            relaxed_watchdog: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub backoff: BackoffPolicy,
    pub failure_threshold: u32,
    pub min_reset_interval: Duration,
    pub unresponsive_timeout: Duration,
    pub registration_timeout: Duration,
    pub attach_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            failure_threshold: 5,
            min_reset_interval: Duration::from_secs(300),
            unresponsive_timeout: Duration::from_secs(180),
            registration_timeout: Duration::from_secs(60),
            attach_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Per-byte read timeout; restarts on every received byte.
    pub stall_timeout: Duration,
    pub max_body_bytes: usize,
    pub backoff: BackoffPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "aiolos.local".into(),
            port: 80,
            connect_timeout: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(5),
            max_body_bytes: 4096,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UplinkConfig {
    pub modem: ModemConfig,
    pub supervisor: SupervisorConfig,
    pub server: ServerConfig,
}

fn ms_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

fn backoff(
    section: &'static str,
    base_ms: Option<u64>,
    max_ms: Option<u64>,
    default: BackoffPolicy,
) -> Result<BackoffPolicy, ConfigError> {
    let base = ms_or(base_ms, default.base);
    let max = ms_or(max_ms, default.max);
    if max < base {
        return Err(ConfigError::BackoffInverted { section, base, max });
    }
    Ok(BackoffPolicy::new(base, max))
}

fn non_empty(value: Option<String>, default: String) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

impl UplinkConfigInput {
    pub fn resolve(self) -> Result<UplinkConfig, ConfigError> {
        let md = ModemConfig::default();
        let revision = self.modem.revision.unwrap_or(md.revision);
        let off_pulse = ms_or(self.modem.off_pulse_ms, md.off_pulse);
        if off_pulse < MIN_OFF_PULSE {
            return Err(ConfigError::OffPulseTooShort(off_pulse));
        }
        let relaxed_watchdog = match self.modem.relaxed_watchdog_ms {
            Some(0) | None => md.relaxed_watchdog,
            Some(ms) => Some(Duration::from_millis(ms)),
        };
        let modem = ModemConfig {
            revision,
            polarity: revision.polarity(),
            baud: self.modem.baud.unwrap_or(md.baud),
            apn: non_empty(self.modem.apn, md.apn),
            user: self.modem.user.unwrap_or(md.user),
            password: self.modem.password.unwrap_or(md.password),
            on_pulse: ms_or(self.modem.on_pulse_ms, md.on_pulse),
            off_pulse,
            boot_wait: ms_or(self.modem.boot_wait_ms, md.boot_wait),
            graceful_power_down_repeats: self
                .modem
                .graceful_power_down_repeats
                .unwrap_or(md.graceful_power_down_repeats),
            relaxed_watchdog,
        };

        let sd = SupervisorConfig::default();
        let s = self.supervisor;
        let supervisor = SupervisorConfig {
            backoff: backoff("supervisor", s.backoff_base_ms, s.backoff_max_ms, sd.backoff)?,
            failure_threshold: s.failure_threshold.unwrap_or(sd.failure_threshold).max(1),
            min_reset_interval: ms_or(s.min_reset_interval_ms, sd.min_reset_interval),
            unresponsive_timeout: ms_or(s.unresponsive_timeout_ms, sd.unresponsive_timeout),
            registration_timeout: ms_or(s.registration_timeout_ms, sd.registration_timeout),
            attach_timeout: ms_or(s.attach_timeout_ms, sd.attach_timeout),
        };

        let vd = ServerConfig::default();
        let v = self.server;
        let port = v.port.unwrap_or(vd.port);
        if port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if v.host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err(ConfigError::EmptyHost);
        }
        let server = ServerConfig {
            host: non_empty(v.host, vd.host),
            port,
            connect_timeout: ms_or(v.connect_timeout_ms, vd.connect_timeout),
            stall_timeout: ms_or(v.stall_timeout_ms, vd.stall_timeout),
            max_body_bytes: v.max_body_bytes.unwrap_or(vd.max_body_bytes).max(64),
            backoff: backoff("server", v.backoff_base_ms, v.backoff_max_ms, vd.backoff)?,
        };

        Ok(UplinkConfig {
            modem,
            supervisor,
            server,
        })
    }
}

impl UplinkConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(UplinkConfig::default());
        }
        let parsed: UplinkConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}
