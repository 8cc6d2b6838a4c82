//! Boot-time context owning the modem, the supervisor and the HTTP client.
//!
//! The three parts never hold references to each other; `Uplink` lends
//! them out per call. Requests run with the watchdog relaxed, since a
//! connect or a slow response can block for longer than its deadline.

use tracing::{info, warn};

use crate::api::RequestSink;
use crate::clock::Clock;
use crate::config::UplinkConfig;
use crate::error::LinkError;
use crate::hal::{Board, SerialPort};
use crate::http::{HttpOutcome, Method, ResilientHttpClient};
use crate::modem::parse::csq_to_dbm;
use crate::modem::{BootReport, ModemPowerController};
use crate::supervisor::ConnectivitySupervisor;

pub struct Uplink<S: SerialPort, B: Board> {
    pub modem: ModemPowerController<S, B>,
    pub supervisor: ConnectivitySupervisor,
    pub http: ResilientHttpClient,
}

impl<S: SerialPort, B: Board> Uplink<S, B> {
    pub fn new(config: UplinkConfig, port: S, board: B, clock: Clock) -> Self {
        Uplink {
            modem: ModemPowerController::new(port, board, clock.clone(), config.modem),
            supervisor: ConnectivitySupervisor::new(config.supervisor, clock.clone()),
            http: ResilientHttpClient::new(config.server, clock),
        }
    }

    /// Power the modem up. Never fails; a degraded boot is logged and the
    /// supervisor takes over from the next tick.
    pub fn init(&mut self) -> BootReport {
        let report = self.modem.init();
        if report.is_degraded() {
            warn!(
                powered = report.powered,
                sim = ?report.sim,
                suppressed = report.suppressed.len(),
                "uplink boot degraded"
            );
        } else {
            info!(imei = ?report.imei, "uplink ready");
        }
        report
    }

    /// One scheduler tick of connection upkeep.
    pub fn maintain(&mut self, active: bool) {
        self.supervisor.maintain_connection(&mut self.modem, active);
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    /// Whether a request would be refused right now.
    pub fn can_send(&self) -> bool {
        self.is_connected() && !self.http.is_connection_throttled()
    }

    /// Signal strength in dBm, `None` when the modem does not know.
    pub fn signal_dbm(&mut self) -> Option<i32> {
        csq_to_dbm(self.modem.get_signal_quality())
    }
}

impl<S: SerialPort, B: Board> RequestSink for Uplink<S, B> {
    fn request(&mut self, method: Method, path: &str, body: Option<&[u8]>) -> HttpOutcome {
        let mut modem = self.modem.relax_watchdog();
        self.http
            .perform_request(&mut *modem, &self.supervisor, method, path, body)
    }

    fn request_checked(
        &mut self,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
        check: &mut dyn FnMut(&[u8]) -> Result<(), LinkError>,
    ) -> HttpOutcome {
        let mut modem = self.modem.relax_watchdog();
        self.http
            .perform_checked(&mut *modem, &self.supervisor, method, path, body, |b| check(b))
    }

    fn lightweight_post(&mut self, path: &str, body: &[u8]) -> u16 {
        let mut modem = self.modem.relax_watchdog();
        self.http
            .perform_lightweight_post(&mut *modem, &self.supervisor, path, body)
    }
}
