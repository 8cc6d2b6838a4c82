//! # Integration tests: Uplink ↔ simulated SIM7000 ↔ canned backend
//!
//! The whole stack runs against the simulator under virtual time:
//! StationApi → ResilientHttpClient → TCP bearer (AT+CIP*) → SimModem,
//! with ConnectivitySupervisor and ModemPowerController driving the modem.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use aiolos_link::api::{DiagnosticsReport, RequestSink, StationApi, StationSettings, WindReport};
use aiolos_link::clock::Clock;
use aiolos_link::config::UplinkConfig;
use aiolos_link::http::Method;
use aiolos_link::modem::{ModemPowerState, SimStatus};
use aiolos_link::sim::{SimBoard, SimModem, SimSerial};
use aiolos_link::Uplink;

const STATION: &str = "test-station";

// ─── Helpers ────────────────────────────────────────────────────────────────

fn http_response(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Backend that accepts everything and serves a small config.
fn backend(req: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(req);
    let request_line = text.lines().next().unwrap_or_default();
    if request_line.starts_with(&format!("GET /api/stations/{STATION}/config ")) {
        http_response("200 OK", r#"{"windSendInterval":30000,"sleepStartHour":23,"remoteOta":false}"#)
    } else {
        http_response("200 OK", "")
    }
}

/// Log output goes through the test harness; `RUST_LOG` selects the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn rig(config: UplinkConfig) -> (Clock, SimModem, Uplink<SimSerial, SimBoard>) {
    init_tracing();
    let (clock, _mock) = Clock::mock();
    let sim = SimModem::new(clock.clone(), config.modem.polarity);
    sim.set_server(backend);
    let uplink = Uplink::new(config, sim.serial(), sim.board(), clock.clone());
    (clock, sim, uplink)
}

fn connected() -> (Clock, SimModem, Uplink<SimSerial, SimBoard>) {
    let (clock, sim, mut uplink) = rig(UplinkConfig::default());
    let report = uplink.init();
    assert!(report.powered);
    uplink.maintain(true);
    assert!(uplink.is_connected());
    (clock, sim, uplink)
}

fn diagnostics() -> DiagnosticsReport {
    DiagnosticsReport {
        battery_voltage: 3.9,
        solar_voltage: 6.1,
        internal_temperature: 24.5,
        signal_quality: -79,
        uptime: 120,
    }
}

fn request_lines(sim: &SimModem) -> Vec<String> {
    sim.requests()
        .iter()
        .map(|r| {
            String::from_utf8_lossy(r)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

// ─── Boot and telemetry ─────────────────────────────────────────────────────

#[test]
fn cold_boot_then_full_telemetry_cycle() {
    let (_clock, sim, mut uplink) = rig(UplinkConfig::default());
    assert!(!sim.is_powered());

    let report = uplink.init();
    assert!(report.powered);
    assert_eq!(report.sim, Some(SimStatus::Ready));
    assert!(report.modes_configured);
    assert!(!report.is_degraded());
    assert_eq!(uplink.modem.state(), ModemPowerState::Responsive);

    uplink.maintain(true);
    assert!(uplink.is_connected());
    assert!(uplink.can_send());
    assert_eq!(uplink.signal_dbm(), Some(-77));

    let api = StationApi::new(STATION);
    assert!(api.send_diagnostics(&mut uplink, &diagnostics()));
    assert!(api.send_wind(
        &mut uplink,
        &WindReport {
            wind_speed: 6.2,
            wind_direction: 135.0
        }
    ));
    let remote = api.fetch_config(&mut uplink).expect("config");

    let mut settings = StationSettings::default();
    assert_eq!(remote.apply_to(&mut settings), 2);
    assert_eq!(settings.wind_send_interval, Duration::from_secs(30));
    assert_eq!(settings.sleep_start_hour, 23);
    assert!(!remote.ota_requested());

    assert_eq!(
        request_lines(&sim),
        vec![
            format!("POST /api/stations/{STATION}/diagnostics HTTP/1.1"),
            format!("POST /api/stations/{STATION}/wind HTTP/1.1"),
            format!("GET /api/stations/{STATION}/config HTTP/1.1"),
        ]
    );
    let first = String::from_utf8_lossy(&sim.requests()[0]).into_owned();
    assert!(first.contains("\"signal_quality\":-79"));
    assert_eq!(uplink.http.consecutive_failures(), 0);
}

#[test]
fn degraded_boot_without_sim_still_completes() {
    let (_clock, sim, mut uplink) = rig(UplinkConfig::default());
    sim.set_sim_card(aiolos_link::sim::SimCard::Absent);
    let report = uplink.init();
    assert!(report.powered);
    assert_eq!(report.sim, Some(SimStatus::Error));
    assert!(!report.modes_configured);
    assert!(report.is_degraded());
    assert!(uplink.modem.is_initialized());

    uplink.maintain(true);
    assert!(!uplink.is_connected());
    assert_eq!(uplink.supervisor.health().consecutive_failures(), 1);
}

// ─── Two independent backoff layers ─────────────────────────────────────────

#[test]
fn lost_coverage_blocks_requests_without_charging_http() {
    let (_clock, sim, mut uplink) = connected();
    sim.set_coverage(false);
    uplink.maintain(true);
    assert!(!uplink.is_connected());

    let api = StationApi::new(STATION);
    for _ in 0..4 {
        assert!(!api.send_diagnostics(&mut uplink, &diagnostics()));
    }
    assert!(sim.requests().is_empty());
    assert_eq!(uplink.http.consecutive_failures(), 0);
    assert!(!uplink.http.is_connection_throttled());
    assert_eq!(uplink.supervisor.health().consecutive_failures(), 1);
}

#[test]
fn server_errors_throttle_only_the_http_layer() {
    let (clock, sim, mut uplink) = connected();
    let hits = Rc::new(Cell::new(0u32));
    let counter = hits.clone();
    sim.set_server(move |_req: &[u8]| {
        counter.set(counter.get() + 1);
        http_response("500 Internal Server Error", "")
    });

    for n in 1..=3 {
        let out = uplink.request(Method::Post, "/api/stations/x/diagnostics", Some(b"{}"));
        assert_eq!(out.status, 500);
        assert_eq!(uplink.http.consecutive_failures(), n);
        if n < 3 {
            clock.sleep(uplink.http.throttle_remaining());
        }
    }
    assert_eq!(uplink.http.backoff_delay(), Duration::from_secs(20));
    assert!(!uplink.can_send());

    let out = uplink.request(Method::Post, "/api/stations/x/diagnostics", Some(b"{}"));
    assert_eq!(out.status, 0);
    assert_eq!(hits.get(), 3);

    // connectivity is untouched by request-level failures
    uplink.maintain(true);
    assert!(uplink.is_connected());
    assert_eq!(uplink.supervisor.health().consecutive_failures(), 0);

    clock.sleep(uplink.http.throttle_remaining());
    assert!(uplink.can_send());
    uplink.request(Method::Post, "/api/stations/x/diagnostics", Some(b"{}"));
    assert_eq!(hits.get(), 4);
}

#[test]
fn stalled_response_is_abandoned_after_stall_timeout() {
    let (clock, sim, mut uplink) = connected();
    sim.set_keep_open(true);
    sim.set_server(|_req: &[u8]| b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n{\"par".to_vec());

    let start = clock.now();
    let out = uplink.request(Method::Get, "/api/stations/x/config", None);
    assert!(out.transport_error);
    assert!(clock.since(start) >= Duration::from_secs(5));
    assert_eq!(uplink.http.consecutive_failures(), 1);
}

#[test]
fn undecodable_config_charges_http_backoff() {
    let (clock, sim, mut uplink) = connected();
    let hits = Rc::new(Cell::new(0u32));
    let counter = hits.clone();
    sim.set_server(move |_req: &[u8]| {
        counter.set(counter.get() + 1);
        if counter.get() <= 3 {
            http_response("500 Internal Server Error", "")
        } else {
            http_response("200 OK", "{nope")
        }
    });

    for _ in 0..3 {
        uplink.request(Method::Get, "/api/stations/x/config", None);
        clock.sleep(uplink.http.throttle_remaining());
    }
    assert_eq!(uplink.http.consecutive_failures(), 3);
    assert_eq!(uplink.http.backoff_delay(), Duration::from_secs(20));

    let api = StationApi::new(STATION);
    assert!(api.fetch_config(&mut uplink).is_none());
    assert_eq!(hits.get(), 4);
    assert_eq!(uplink.http.consecutive_failures(), 4);
    assert_eq!(uplink.http.backoff_delay(), Duration::from_secs(40));
    assert!(uplink.http.is_connection_throttled());
}

#[test]
fn requests_run_with_the_watchdog_relaxed() {
    let (_clock, sim, mut uplink) = connected();
    let deadline = Some(Duration::from_secs(30));
    sim.set_watchdog(deadline);
    sim.clear_logs();

    let out = uplink.request(Method::Post, "/api/stations/x/diagnostics", Some(b"{}"));
    assert!(out.is_success());
    assert_eq!(sim.watchdog_history(), vec![None, deadline]);

    sim.clear_logs();
    let api = StationApi::new(STATION);
    assert!(api.fetch_config(&mut uplink).is_some());
    assert_eq!(sim.watchdog_history(), vec![None, deadline]);
    assert_eq!(sim.watchdog_timeout(), deadline);
}

// ─── Sleep window ───────────────────────────────────────────────────────────

#[test]
fn sleep_window_round_trip() {
    let (clock, sim, mut uplink) = connected();

    uplink.maintain(false);
    assert!(!sim.is_attached());
    assert!(uplink.modem.enter_sleep(true));
    assert!(sim.is_sleeping());
    assert_eq!(uplink.modem.state(), ModemPowerState::Sleeping);

    clock.sleep(Duration::from_secs(11 * 3600));
    assert!(uplink.modem.wake_up(true));
    assert!(!sim.is_sleeping());
    assert!(sim.held_pins().is_empty());

    uplink.maintain(true);
    assert!(uplink.is_connected());
    let api = StationApi::new(STATION);
    assert!(api.send_diagnostics(&mut uplink, &diagnostics()));
}
