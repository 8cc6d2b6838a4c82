//! # Station API
//!
//! The five backend endpoints and their JSON shapes. Transport and retry
//! live behind [`RequestSink`]; this module only builds paths and bodies
//! and interprets replies.
//!
//! | Endpoint                                | Method | Path        |
//! |-----------------------------------------|--------|-------------|
//! | `/api/stations/{id}/diagnostics`        | POST   | full        |
//! | `/api/stations/{id}/wind`               | POST   | lightweight |
//! | `/api/stations/{id}/temperature`        | POST   | lightweight |
//! | `/api/stations/{id}/config`             | GET    | full        |
//! | `/api/stations/{id}/ota-confirm`        | POST   | full, empty |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::http::{HttpOutcome, Method};

/// Where station requests go. Implemented by [`crate::Uplink`] and by
/// fakes in tests.
pub trait RequestSink {
    fn request(&mut self, method: Method, path: &str, body: Option<&[u8]>) -> HttpOutcome;

    /// Like `request`, but a 2xx body refused by `check` is settled as a
    /// failed request instead of a success.
    fn request_checked(
        &mut self,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
        check: &mut dyn FnMut(&[u8]) -> Result<(), LinkError>,
    ) -> HttpOutcome;

    fn lightweight_post(&mut self, path: &str, body: &[u8]) -> u16;
}

// ─── Payloads ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    pub battery_voltage: f32,
    pub solar_voltage: f32,
    pub internal_temperature: f32,
    /// dBm
    pub signal_quality: i32,
    /// Seconds since boot.
    pub uptime: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindReport {
    /// m/s
    pub wind_speed: f32,
    /// Degrees, 0..360.
    pub wind_direction: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureReport {
    pub temperature: f32,
}

/// Server-side overrides. Every field is optional; intervals are in
/// milliseconds except `restart_interval`, which is in seconds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub temp_interval: Option<u64>,
    pub wind_send_interval: Option<u64>,
    pub wind_sample_interval: Option<u64>,
    pub diag_interval: Option<u64>,
    pub time_interval: Option<u64>,
    pub restart_interval: Option<u64>,
    pub sleep_start_hour: Option<i32>,
    pub sleep_end_hour: Option<i32>,
    pub ota_hour: Option<i32>,
    pub ota_minute: Option<i32>,
    pub ota_duration: Option<i32>,
    pub remote_ota: Option<bool>,
}

/// Cadence and windows the control loop runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSettings {
    pub temp_interval: Duration,
    pub wind_send_interval: Duration,
    pub wind_sample_interval: Duration,
    pub diag_interval: Duration,
    pub time_interval: Duration,
    pub restart_interval: Duration,
    pub sleep_start_hour: u8,
    pub sleep_end_hour: u8,
    pub ota_hour: u8,
    pub ota_minute: u8,
    pub ota_duration: Duration,
}

impl Default for StationSettings {
    fn default() -> Self {
        StationSettings {
            temp_interval: Duration::from_secs(300),
            wind_send_interval: Duration::from_secs(60),
            wind_sample_interval: Duration::from_secs(2),
            diag_interval: Duration::from_secs(300),
            time_interval: Duration::from_secs(300),
            restart_interval: Duration::from_secs(6 * 3600),
            sleep_start_hour: 22,
            sleep_end_hour: 9,
            ota_hour: 10,
            ota_minute: 0,
            ota_duration: Duration::from_secs(15 * 60),
        }
    }
}

fn positive_ms(value: Option<u64>) -> Option<Duration> {
    value.filter(|v| *v > 0).map(Duration::from_millis)
}

fn in_range(value: Option<i32>, upper: i32) -> Option<u8> {
    value
        .filter(|v| (0..upper).contains(v))
        .and_then(|v| u8::try_from(v).ok())
}

impl RemoteConfig {
    /// Overwrite the fields present and valid; returns how many changed.
    /// Zero intervals and out-of-range hours are ignored.
    pub fn apply_to(&self, settings: &mut StationSettings) -> usize {
        let mut changed = 0;
        let mut set = |slot: &mut Duration, value: Option<Duration>| {
            if let Some(v) = value {
                if *slot != v {
                    *slot = v;
                    changed += 1;
                }
            }
        };
        set(&mut settings.temp_interval, positive_ms(self.temp_interval));
        set(&mut settings.wind_send_interval, positive_ms(self.wind_send_interval));
        set(&mut settings.wind_sample_interval, positive_ms(self.wind_sample_interval));
        set(&mut settings.diag_interval, positive_ms(self.diag_interval));
        set(&mut settings.time_interval, positive_ms(self.time_interval));
        set(
            &mut settings.restart_interval,
            self.restart_interval.filter(|v| *v > 0).map(Duration::from_secs),
        );
        set(
            &mut settings.ota_duration,
            self.ota_duration
                .filter(|v| *v > 0)
                .map(|m| Duration::from_secs(m as u64 * 60)),
        );

        let mut set_hour = |slot: &mut u8, value: Option<u8>| {
            if let Some(v) = value {
                if *slot != v {
                    *slot = v;
                    changed += 1;
                }
            }
        };
        set_hour(&mut settings.sleep_start_hour, in_range(self.sleep_start_hour, 24));
        set_hour(&mut settings.sleep_end_hour, in_range(self.sleep_end_hour, 24));
        set_hour(&mut settings.ota_hour, in_range(self.ota_hour, 24));
        set_hour(&mut settings.ota_minute, in_range(self.ota_minute, 60));
        changed
    }

    pub fn ota_requested(&self) -> bool {
        self.remote_ota == Some(true)
    }
}

// ─── Endpoints ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StationApi {
    station_id: String,
}

impl StationApi {
    pub fn new(station_id: impl Into<String>) -> Self {
        StationApi {
            station_id: station_id.into(),
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    fn path(&self, endpoint: &str) -> String {
        format!("/api/stations/{}/{endpoint}", self.station_id)
    }

    pub fn send_diagnostics(&self, sink: &mut impl RequestSink, report: &DiagnosticsReport) -> bool {
        let body = match encode(report) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "diagnostics not encoded");
                return false;
            }
        };
        let out = sink.request(Method::Post, &self.path("diagnostics"), Some(&body));
        if out.is_success() {
            info!(status = out.status, "diagnostics sent");
        }
        out.is_success()
    }

    pub fn send_wind(&self, sink: &mut impl RequestSink, report: &WindReport) -> bool {
        self.post_light(sink, "wind", report)
    }

    pub fn send_temperature(&self, sink: &mut impl RequestSink, report: &TemperatureReport) -> bool {
        self.post_light(sink, "temperature", report)
    }

    fn post_light<T: Serialize>(&self, sink: &mut impl RequestSink, endpoint: &str, report: &T) -> bool {
        let body = match encode(report) {
            Ok(body) => body,
            Err(e) => {
                warn!(endpoint, error = %e, "report not encoded");
                return false;
            }
        };
        let status = sink.lightweight_post(&self.path(endpoint), &body);
        debug!(endpoint, status, "report posted");
        (200..300).contains(&status)
    }

    /// `None` when the request failed or the body did not decode. A decode
    /// failure is charged to the HTTP backoff like a failed request.
    pub fn fetch_config(&self, sink: &mut impl RequestSink) -> Option<RemoteConfig> {
        let mut config = None;
        let out = sink.request_checked(Method::Get, &self.path("config"), None, &mut |body| {
            config = Some(decode_config(body)?);
            Ok(())
        });
        if out.rejected {
            warn!(status = out.status, "remote config rejected");
        }
        if !out.is_success() {
            return None;
        }
        debug!(?config, "remote config");
        config
    }

    pub fn confirm_ota_started(&self, sink: &mut impl RequestSink) -> bool {
        let out = sink.request(Method::Post, &self.path("ota-confirm"), None);
        if out.is_success() {
            info!("ota start confirmed");
        }
        out.is_success()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, LinkError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode_config(body: &[u8]) -> Result<RemoteConfig, LinkError> {
    Ok(serde_json::from_slice(body)?)
}
