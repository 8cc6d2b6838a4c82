//! # Connectivity Supervisor
//!
//! Keeps the station registered and GPRS-attached while telemetry is due,
//! and escalates persistent failure to a hard modem reset.
//!
//! One call per scheduler tick; each call makes at most one bounded
//! registration attempt and one bounded attach attempt, so a dead network
//! never stalls the loop for longer than those timeouts.
//!
//! ```text
//!   tick ─▶ probe ─▶ needs_reset? ─yes─▶ reset_modem ─fail─▶ record_failure
//!                        │no                  │ok
//!                        ▼                    ▼
//!               should_attempt? ─no─▶ (wait out backoff)
//!                        │yes
//!                        ▼
//!             SIM ─▶ register ─▶ attach ─▶ record_success
//! ```

use std::time::Duration;

use quanta::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::config::SupervisorConfig;
use crate::error::LinkError;
use crate::hal::{Board, SerialPort};
use crate::modem::{ModemPowerController, SimStatus};

const RESET_VERIFY_ATTEMPTS: u32 = 3;
const REGISTRATION_PAUSE_BASE: Duration = Duration::from_secs(5);
const REGISTRATION_PAUSE_STEP: Duration = Duration::from_secs(1);

/// Whether the cellular link is up, as last observed.
pub trait LinkStatus {
    fn is_connected(&self) -> bool;
}

/// Connection-level failure bookkeeping. Lives from boot to reboot.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    backoff: Backoff,
    last_responsive: Instant,
    last_reset: Instant,
}

impl ConnectionHealth {
    pub fn consecutive_failures(&self) -> u32 {
        self.backoff.failures()
    }

    pub fn backoff_delay(&self) -> Duration {
        self.backoff.delay()
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.backoff.last_attempt()
    }

    pub fn last_responsive(&self) -> Instant {
        self.last_responsive
    }

    pub fn last_reset(&self) -> Instant {
        self.last_reset
    }
}

enum Progress {
    Connected,
    /// Registration is pausing between attempts; nothing was tried.
    Waiting,
}

pub struct ConnectivitySupervisor {
    config: SupervisorConfig,
    clock: Clock,
    health: ConnectionHealth,
    registered: bool,
    gprs_attached: bool,
    registration_attempts: u32,
    next_registration: Option<Instant>,
}

impl ConnectivitySupervisor {
    /// Both the responsiveness and reset clocks start at boot.
    pub fn new(config: SupervisorConfig, clock: Clock) -> Self {
        let now = clock.now();
        ConnectivitySupervisor {
            health: ConnectionHealth {
                backoff: Backoff::new(config.backoff),
                last_responsive: now,
                last_reset: now,
            },
            config,
            clock,
            registered: false,
            gprs_attached: false,
            registration_attempts: 0,
            next_registration: None,
        }
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    /// The single per-tick entry point.
    pub fn maintain_connection<S: SerialPort, B: Board>(
        &mut self,
        modem: &mut ModemPowerController<S, B>,
        active: bool,
    ) {
        if !active {
            if self.gprs_attached {
                debug!("telemetry idle; tearing down GPRS");
                modem.detach_gprs();
            }
            self.gprs_attached = false;
            return;
        }

        let responsive = modem.is_responsive();
        if responsive {
            self.health.last_responsive = self.clock.now();
        }

        if self.needs_reset() && !self.reset_modem(modem) {
            self.record_failure();
            return;
        }

        if !self.should_attempt_connection() {
            trace!(
                remaining_ms = self.health.backoff.remaining(self.clock.now()).as_millis() as u64,
                "connection attempt backed off"
            );
            return;
        }
        self.health.backoff.mark_attempt(self.clock.now());

        let responsive = responsive || modem.is_responsive();
        match self.connect(modem, responsive) {
            Ok(Progress::Connected) => self.record_success(),
            Ok(Progress::Waiting) => {}
            Err(e) => {
                if e.is_sim_fault() {
                    error!(error = %e, "SIM unusable");
                } else {
                    warn!(error = %e, "connection attempt failed");
                }
                self.record_failure();
            }
        }
    }

    fn connect<S: SerialPort, B: Board>(
        &mut self,
        modem: &mut ModemPowerController<S, B>,
        responsive: bool,
    ) -> Result<Progress, LinkError> {
        self.registered = false;
        self.gprs_attached = false;
        if !responsive {
            return Err(LinkError::HardwareUnresponsive);
        }
        match modem.get_sim_status() {
            SimStatus::Ready => {}
            SimStatus::Locked => return Err(LinkError::SimLocked),
            SimStatus::Error => return Err(LinkError::SimError),
        }

        if !modem.is_network_registered() {
            if let Some(at) = self.next_registration {
                if self.clock.now() < at {
                    debug!("registration pausing between attempts");
                    return Ok(Progress::Waiting);
                }
            }
            let attempt = self.registration_attempts;
            if let Err(e) = modem.register_network(self.config.registration_timeout) {
                let pause = REGISTRATION_PAUSE_BASE + REGISTRATION_PAUSE_STEP * attempt;
                self.registration_attempts = attempt.saturating_add(1);
                self.next_registration = Some(self.clock.now() + pause);
                return Err(e);
            }
        }
        self.registered = true;
        self.registration_attempts = 0;
        self.next_registration = None;

        if !modem.is_gprs_attached() {
            modem.attach_gprs(self.config.attach_timeout)?;
        }
        self.gprs_attached = true;
        Ok(Progress::Connected)
    }

    /// Too many failures or too long silent, and the reset cooldown has
    /// passed.
    pub fn needs_reset(&self) -> bool {
        let now = self.clock.now();
        let cooled = now.saturating_duration_since(self.health.last_reset) >= self.config.min_reset_interval;
        let failing = self.health.backoff.failures() >= self.config.failure_threshold;
        let silent = now.saturating_duration_since(self.health.last_responsive) > self.config.unresponsive_timeout;
        (failing || silent) && cooled
    }

    pub fn record_failure(&mut self) -> Duration {
        let delay = self.health.backoff.record_failure(self.clock.now());
        debug!(
            failures = self.health.backoff.failures(),
            delay_ms = delay.as_millis() as u64,
            "connection failure recorded"
        );
        delay
    }

    pub fn record_success(&mut self) {
        if self.health.backoff.failures() > 0 {
            info!(after = self.health.backoff.failures(), "connection recovered");
        }
        self.health.backoff.record_success();
    }

    /// The first attempt after boot always proceeds.
    pub fn should_attempt_connection(&self) -> bool {
        self.health.backoff.should_attempt(self.clock.now())
    }

    /// Hard power cycle, then verify. Failures are cleared only when the
    /// modem answers afterwards.
    pub fn reset_modem<S: SerialPort, B: Board>(&mut self, modem: &mut ModemPowerController<S, B>) -> bool {
        warn!(
            failures = self.health.backoff.failures(),
            silent_s = self.clock.since(self.health.last_responsive).as_secs(),
            "resetting modem"
        );
        self.health.last_reset = self.clock.now();
        self.registered = false;
        self.gprs_attached = false;
        self.registration_attempts = 0;
        self.next_registration = None;

        if !modem.hard_reset() {
            error!("modem reset failed");
            return false;
        }
        for attempt in 1..=RESET_VERIFY_ATTEMPTS {
            if modem.is_responsive() {
                info!(attempt, "modem responsive after reset");
                self.health.backoff.record_success();
                self.health.last_responsive = self.clock.now();
                return true;
            }
            self.clock.sleep(Duration::from_secs(1));
        }
        error!("modem silent after reset");
        false
    }

    /// Registered and attached as of the last tick.
    pub fn is_connected(&self) -> bool {
        self.registered && self.gprs_attached
    }
}

impl LinkStatus for ConnectivitySupervisor {
    fn is_connected(&self) -> bool {
        ConnectivitySupervisor::is_connected(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModemConfig;
    use crate::hal::ModemPin;
    use crate::sim::{SimBoard, SimCard, SimModem, SimSerial};

    type Modem = ModemPowerController<SimSerial, SimBoard>;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn rig() -> (Clock, SimModem, Modem, ConnectivitySupervisor) {
        let (clock, _mock) = Clock::mock();
        let config = ModemConfig::default();
        let sim = SimModem::new(clock.clone(), config.polarity);
        sim.set_powered(true);
        let modem = ModemPowerController::new(sim.serial(), sim.board(), clock.clone(), config);
        let sup_config = SupervisorConfig {
            registration_timeout: secs(2),
            attach_timeout: secs(2),
            ..SupervisorConfig::default()
        };
        let sup = ConnectivitySupervisor::new(sup_config, clock.clone());
        (clock, sim, modem, sup)
    }

    fn power_key_presses(sim: &SimModem, modem: &Modem) -> Vec<Instant> {
        let active = modem.config().polarity.power_key_active;
        sim.pin_events()
            .iter()
            .filter(|e| e.pin == ModemPin::PowerKey && e.level == active)
            .map(|e| e.at)
            .collect()
    }

    // ─── needs_reset ────────────────────────────────────────────────────

    #[test]
    fn needs_reset_truth_table() {
        let (clock, _sim, _modem, sup) = rig();
        clock.sleep(secs(1000));
        let now = clock.now();

        // (failures, since_responsive_s, since_reset_s, expected)
        let cases = [
            (0, 0, 400, false),
            (4, 0, 400, false),
            (5, 0, 400, true),
            (5, 0, 299, false),
            (5, 0, 300, true),
            (0, 180, 400, false),
            (0, 181, 400, true),
            (0, 181, 299, false),
            (9, 500, 100, false),
        ];
        for (failures, silent, since_reset, expected) in cases {
            let mut s = ConnectivitySupervisor::new(sup.config.clone(), clock.clone());
            s.health.last_responsive = now - secs(silent);
            s.health.last_reset = now - secs(since_reset);
            for _ in 0..failures {
                s.health.backoff.record_failure(now);
            }
            assert_eq!(
                s.needs_reset(),
                expected,
                "failures={failures} silent={silent}s since_reset={since_reset}s"
            );
        }
    }

    #[test]
    fn no_reset_within_cooldown_after_boot() {
        let (clock, _sim, _modem, mut sup) = rig();
        for _ in 0..5 {
            sup.record_failure();
        }
        assert!(!sup.needs_reset());
        clock.sleep(secs(300));
        assert!(sup.needs_reset());
    }

    // ─── Backoff ────────────────────────────────────────────────────────

    #[test]
    fn first_attempt_proceeds_then_backoff_gates() {
        let (clock, _sim, _modem, mut sup) = rig();
        assert!(sup.should_attempt_connection());
        sup.record_failure();
        sup.record_failure();
        assert_eq!(sup.health().backoff_delay(), secs(10));
        assert!(!sup.should_attempt_connection());
        clock.sleep(secs(10));
        assert!(sup.should_attempt_connection());
        sup.record_success();
        assert_eq!(sup.health().consecutive_failures(), 0);
        assert_eq!(sup.health().backoff_delay(), Duration::ZERO);
    }

    // ─── maintain_connection ────────────────────────────────────────────

    #[test]
    fn healthy_modem_connects_in_one_tick() {
        let (_clock, sim, mut modem, mut sup) = rig();
        sup.maintain_connection(&mut modem, true);
        assert!(sup.is_connected());
        assert!(sim.is_attached());
        assert_eq!(sup.health().consecutive_failures(), 0);
    }

    #[test]
    fn inactive_tick_detaches_gprs_only() {
        let (_clock, sim, mut modem, mut sup) = rig();
        sup.maintain_connection(&mut modem, true);
        assert!(sim.is_attached());

        sup.maintain_connection(&mut modem, false);
        assert!(!sim.is_attached());
        assert!(sim.is_registered());
        assert!(sim.is_powered());
        assert!(!sup.is_connected());
    }

    #[test]
    fn sim_fault_counts_as_failure() {
        let (_clock, sim, mut modem, mut sup) = rig();
        sim.set_sim_card(SimCard::Absent);
        sup.maintain_connection(&mut modem, true);
        assert!(!sup.is_connected());
        assert_eq!(sup.health().consecutive_failures(), 1);
    }

    #[test]
    fn backed_off_tick_sends_only_the_probe() {
        let (clock, sim, mut modem, mut sup) = rig();
        sim.set_coverage(false);
        sup.maintain_connection(&mut modem, true);
        assert_eq!(sup.health().consecutive_failures(), 1);

        sim.clear_logs();
        clock.sleep(secs(1));
        sup.maintain_connection(&mut modem, true);
        assert_eq!(sim.commands(), vec!["AT".to_string()]);
        assert_eq!(sup.health().consecutive_failures(), 1);
    }

    #[test]
    fn registration_pauses_grow_per_attempt() {
        let (clock, sim, mut modem, mut sup) = rig();
        sim.set_coverage(false);
        sup.maintain_connection(&mut modem, true);
        assert_eq!(sup.registration_attempts, 1);
        let first_pause = sup
            .next_registration
            .unwrap()
            .saturating_duration_since(clock.now());
        assert_eq!(first_pause, secs(5));

        clock.sleep(secs(10));
        sup.maintain_connection(&mut modem, true);
        assert_eq!(sup.registration_attempts, 2);
        let second_pause = sup
            .next_registration
            .unwrap()
            .saturating_duration_since(clock.now());
        assert_eq!(second_pause, secs(6));
    }

    #[test]
    fn silent_modem_is_reset_only_after_cooldown() {
        let (clock, sim, mut modem, mut sup) = rig();
        let boot = clock.now();
        sim.set_unresponsive(true);

        while clock.since(boot) < secs(420) {
            sup.maintain_connection(&mut modem, true);
            clock.sleep(secs(30));
        }
        let presses = power_key_presses(&sim, &modem);
        assert!(!presses.is_empty(), "reset never attempted");
        assert!(presses[0].saturating_duration_since(boot) >= secs(300));
        assert!(sup.health().last_reset().saturating_duration_since(boot) >= secs(300));
    }

    #[test]
    fn repeated_failures_trigger_a_recovering_reset() {
        let (clock, sim, mut modem, mut sup) = rig();
        let boot = clock.now();
        sim.set_coverage(false);

        let mut ticks = 0;
        while sup.health().last_reset() == boot {
            sup.maintain_connection(&mut modem, true);
            clock.sleep(secs(10));
            ticks += 1;
            assert!(ticks < 200, "reset never happened");
        }
        assert!(sim.commands().iter().any(|c| c == "AT+CPOWD=1"));
        assert!(sim.is_powered());
        // reset cleared the counter; the same tick's attempt may have failed again
        assert!(sup.health().consecutive_failures() <= 1);

        sim.set_coverage(true);
        clock.sleep(secs(10));
        sup.maintain_connection(&mut modem, true);
        assert!(sup.is_connected());
    }

    #[test]
    fn reset_clears_failures_only_when_modem_answers() {
        let (_clock, sim, mut modem, mut sup) = rig();
        for _ in 0..5 {
            sup.record_failure();
        }
        assert!(sup.reset_modem(&mut modem));
        assert_eq!(sup.health().consecutive_failures(), 0);

        for _ in 0..5 {
            sup.record_failure();
        }
        sim.set_unresponsive(true);
        assert!(!sup.reset_modem(&mut modem));
        assert_eq!(sup.health().consecutive_failures(), 5);
    }
}
