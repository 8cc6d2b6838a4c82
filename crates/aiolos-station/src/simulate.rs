//! Simulation mode: the real control loop against the SIM7000 simulator,
//! a canned backend and synthetic sensors, all on virtual time.

use aiolos_link::clock::Clock;
use aiolos_link::hal::Board;
use aiolos_link::sim::{SimBoard, SimModem, SimSerial};
use aiolos_link::Uplink;
use tracing::trace;

use crate::config::AppConfig;
use crate::sensors::SimulatedSensors;
use crate::station::Station;

pub type SimStation = Station<SimSerial, SimBoard, SimulatedSensors>;

/// Accepts every report and serves the remote config.
pub fn canned_backend(config_json: String) -> impl FnMut(&[u8]) -> Vec<u8> + 'static {
    move |request: &[u8]| {
        let text = String::from_utf8_lossy(request);
        let request_line = text.lines().next().unwrap_or_default();
        trace!(request = %request_line, "simulated backend");
        let (status, body) = match request_line.split_whitespace().collect::<Vec<_>>()[..] {
            ["GET", path, _] if path.ends_with("/config") => ("200 OK", config_json.as_str()),
            ["POST", path, _] if path.starts_with("/api/stations/") => ("200 OK", ""),
            _ => ("404 Not Found", ""),
        };
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }
}

/// A powered-off simulated modem wired into a fresh station.
pub fn build(config: &AppConfig) -> (Clock, SimModem, SimStation) {
    let (clock, _mock) = Clock::mock();
    let sim = SimModem::new(clock.clone(), config.uplink.modem.polarity);
    sim.set_server(canned_backend(r#"{"remoteOta":false}"#.to_string()));

    let mut board = sim.board();
    board.set_watchdog_timeout(config.board.watchdog);
    let uplink = Uplink::new(config.uplink.clone(), sim.serial(), board, clock.clone());
    let station = Station::new(
        uplink,
        SimulatedSensors::new(clock.clone()),
        clock.clone(),
        config.station.clone(),
    );
    (clock, sim, station)
}
