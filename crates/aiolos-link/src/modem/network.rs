//! Registration, GPRS bearer setup and modem information queries.

use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use tracing::{debug, info, warn};

use super::parse;
use super::power::ModemPowerController;
use crate::error::LinkError;
use crate::hal::{Board, SerialPort};

const QUERY_TIMEOUT: Duration = Duration::from_secs(1);
const REGISTRATION_POLL: Duration = Duration::from_millis(500);
const SHUT_TIMEOUT: Duration = Duration::from_secs(65);

impl<S: SerialPort, B: Board> ModemPowerController<S, B> {
    /// Raw CSQ (0-31, 99 when unknown or unanswered).
    pub fn get_signal_quality(&mut self) -> i32 {
        let resp = self.at().exchange("+CSQ", QUERY_TIMEOUT);
        resp.field("+CSQ:")
            .and_then(parse::csq)
            .map(|(rssi, _)| rssi)
            .unwrap_or(99)
    }

    /// Network-provided local time.
    pub fn get_network_time(&mut self) -> Option<DateTime<FixedOffset>> {
        let resp = self.at().exchange("+CCLK?", QUERY_TIMEOUT);
        let time = resp.field("+CCLK:").and_then(parse::cclk);
        if time.is_none() {
            debug!(status = ?resp.status, "network time unavailable");
        }
        time
    }

    pub fn operator_name(&mut self) -> Option<String> {
        let resp = self.at().exchange("+COPS?", QUERY_TIMEOUT);
        resp.field("+COPS:").and_then(parse::cops)
    }

    pub fn imei(&mut self) -> Option<String> {
        let resp = self.at().exchange("+GSN", QUERY_TIMEOUT);
        if !resp.is_ok() {
            return None;
        }
        resp.lines
            .iter()
            .map(|l| l.trim())
            .find(|l| l.len() >= 14 && l.bytes().all(|b| b.is_ascii_digit()))
            .map(str::to_string)
    }

    pub fn local_ip(&mut self) -> Option<String> {
        let resp = self.at().exchange("+CIFSREX", QUERY_TIMEOUT);
        if !resp.is_ok() {
            return None;
        }
        resp.field("+CIFSREX:")
            .filter(|ip| ip.parse::<std::net::Ipv4Addr>().is_ok())
            .map(str::to_string)
    }

    /// Registered (home or roaming) on any of the LTE, GPRS or GSM domains.
    pub fn is_network_registered(&mut self) -> bool {
        [("+CEREG?", "+CEREG:"), ("+CGREG?", "+CGREG:"), ("+CREG?", "+CREG:")]
            .iter()
            .any(|(cmd, prefix)| {
                self.at()
                    .exchange(cmd, QUERY_TIMEOUT)
                    .field(prefix)
                    .and_then(parse::registration)
                    .is_some_and(|s| s.is_registered())
            })
    }

    /// Poll registration until `timeout` elapses.
    pub fn register_network(&mut self, timeout: Duration) -> Result<(), LinkError> {
        let mut ctl = self.relax_watchdog();
        let deadline = ctl.clock().deadline(timeout);
        loop {
            if ctl.is_network_registered() {
                let operator = ctl.operator_name();
                let csq = ctl.get_signal_quality();
                info!(operator = operator.as_deref().unwrap_or("?"), csq, "registered on network");
                return Ok(());
            }
            if deadline.expired(ctl.clock()) {
                return Err(LinkError::NetworkRegistrationTimeout(timeout));
            }
            ctl.clock().sleep(REGISTRATION_POLL);
        }
    }

    /// Packet service attached and the bearer has an IP address.
    pub fn is_gprs_attached(&mut self) -> bool {
        let attached = self
            .at()
            .exchange("+CGATT?", QUERY_TIMEOUT)
            .field("+CGATT:")
            .and_then(parse::cgatt)
            .unwrap_or(false);
        attached && self.local_ip().is_some()
    }

    /// Bring up the packet bearer on the configured APN.
    pub fn attach_gprs(&mut self, timeout: Duration) -> Result<(), LinkError> {
        let mut ctl = self.relax_watchdog();
        let cfg = ctl.config().clone();

        ctl.at()
            .exchange_until("+CIPSHUT", SHUT_TIMEOUT, &["SHUT OK"], &[]);

        let steps = [
            (format!("+CGDCONT=1,\"IP\",\"{}\"", cfg.apn), QUERY_TIMEOUT, "define PDP context"),
            ("+CGATT=1".to_string(), timeout, "attach packet service"),
            (
                format!("+CSTT=\"{}\",\"{}\",\"{}\"", cfg.apn, cfg.user, cfg.password),
                QUERY_TIMEOUT,
                "set APN",
            ),
            ("+CIICR".to_string(), timeout, "bring up wireless connection"),
        ];
        for (cmd, step_timeout, step) in steps {
            if !ctl.at().exchange(&cmd, step_timeout).is_ok() {
                warn!(step, "GPRS activation step failed");
                return Err(LinkError::GprsActivationTimeout(step));
            }
        }

        match ctl.local_ip() {
            Some(ip) => {
                info!(ip = %ip, apn = %cfg.apn, "GPRS attached");
                Ok(())
            }
            None => Err(LinkError::GprsActivationTimeout("obtain local IP")),
        }
    }

    /// Tear down the packet bearer. Registration is left alone.
    pub fn detach_gprs(&mut self) -> bool {
        let mut ctl = self.relax_watchdog();
        ctl.socket_open = false;
        let shut = ctl
            .at()
            .exchange_until("+CIPSHUT", SHUT_TIMEOUT, &["SHUT OK"], &[])
            .is_ok();
        let detached = ctl.at().exchange("+CGATT=0", Duration::from_secs(10)).is_ok();
        debug!(shut, detached, "GPRS detached");
        shut && detached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::config::ModemConfig;
    use crate::sim::{SimBoard, SimModem, SimSerial};

    fn rig() -> (SimModem, ModemPowerController<SimSerial, SimBoard>) {
        let (clock, _mock) = Clock::mock();
        let config = ModemConfig::default();
        let sim = SimModem::new(clock.clone(), config.polarity);
        sim.set_powered(true);
        let ctl = ModemPowerController::new(sim.serial(), sim.board(), clock, config);
        (sim, ctl)
    }

    #[test]
    fn registration_and_attach() {
        let (_sim, mut ctl) = rig();
        assert!(ctl.is_network_registered());
        assert!(ctl.register_network(Duration::from_secs(5)).is_ok());
        assert!(!ctl.is_gprs_attached());
        ctl.attach_gprs(Duration::from_secs(60)).unwrap();
        assert!(ctl.is_gprs_attached());
        assert_eq!(ctl.local_ip().as_deref(), Some("10.64.12.7"));

        assert!(ctl.detach_gprs());
        assert!(!ctl.is_gprs_attached());
        assert!(ctl.is_network_registered());
    }

    #[test]
    fn registration_times_out_without_coverage() {
        let (sim, mut ctl) = rig();
        sim.set_coverage(false);
        let start = ctl.clock().now();
        let err = ctl.register_network(Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, LinkError::NetworkRegistrationTimeout(_)));
        assert!(ctl.clock().since(start) >= Duration::from_secs(10));
    }

    #[test]
    fn attach_fails_when_unregistered() {
        let (sim, mut ctl) = rig();
        sim.set_coverage(false);
        let err = ctl.attach_gprs(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, LinkError::GprsActivationTimeout("attach packet service")));
    }

    #[test]
    fn detach_runs_with_watchdog_relaxed() {
        let (sim, mut ctl) = rig();
        ctl.attach_gprs(Duration::from_secs(60)).unwrap();
        let deadline = Some(Duration::from_secs(8));
        sim.set_watchdog(deadline);
        sim.clear_logs();

        assert!(ctl.detach_gprs());
        assert_eq!(sim.watchdog_history(), vec![None, deadline]);
        assert_eq!(sim.watchdog_timeout(), deadline);
    }

    #[test]
    fn info_queries() {
        let (_sim, mut ctl) = rig();
        assert_eq!(ctl.get_signal_quality(), 18);
        assert!(ctl.imei().is_some());
        assert!(ctl.operator_name().is_some());
        assert!(ctl.get_network_time().is_some());
    }

    #[test]
    fn signal_unknown_when_silent() {
        let (sim, mut ctl) = rig();
        sim.set_unresponsive(true);
        assert_eq!(ctl.get_signal_quality(), 99);
    }
}
