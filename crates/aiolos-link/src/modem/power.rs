//! # Modem Power Controller
//!
//! Owns the physical modem: control lines, UART framing, boot and shutdown
//! sequencing, sleep/wake across the controller's deep sleep, and SIM
//! detection. Every sequence is bounded; every failure degrades to `false`
//! and a log line, never a panic.
//!
//! GPIO writes and UART re-initialisation run with interrupts masked, since
//! the wind ISR shares the same peripherals. Long sequences hold a
//! [`WatchdogRelaxed`] guard so the hardware watchdog does not fire mid-boot.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::parse::{self, PinState};
use super::{BootReport, ModemPowerState, SimStatus};
use crate::at::AtChannel;
use crate::clock::Clock;
use crate::config::ModemConfig;
use crate::hal::{Board, Level, ModemPin, SerialPort};

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const BOOT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const WAKE_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const NUDGE_PULSE: Duration = Duration::from_millis(100);
const SOFT_RESET_TIMEOUT: Duration = Duration::from_secs(10);
const POWER_DOWN_TIMEOUT: Duration = Duration::from_secs(10);
const POWER_DOWN_SETTLE: Duration = Duration::from_secs(5);
const RESET_SETTLE: Duration = Duration::from_secs(2);
const SIM_ATTEMPTS: u32 = 5;
const SIM_RETRY_GAP: Duration = Duration::from_secs(2);

/// Single owner of the modem hardware.
pub struct ModemPowerController<S: SerialPort, B: Board> {
    at: AtChannel<S>,
    board: B,
    clock: Clock,
    config: ModemConfig,
    state: ModemPowerState,
    initialized: bool,
    pub(super) socket_open: bool,
}

impl<S: SerialPort, B: Board> ModemPowerController<S, B> {
    pub fn new(port: S, board: B, clock: Clock, config: ModemConfig) -> Self {
        ModemPowerController {
            at: AtChannel::new(port, clock.clone()),
            board,
            clock,
            config,
            state: ModemPowerState::Off,
            initialized: false,
            socket_open: false,
        }
    }

    pub fn state(&self) -> ModemPowerState {
        self.state
    }

    /// Set once `init()` has run, whatever its outcome.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub(crate) fn at(&mut self) -> &mut AtChannel<S> {
        &mut self.at
    }

    // ─── Boot ───────────────────────────────────────────────────────────

    /// Full boot sequence. Never fails: faults are logged at `error`,
    /// recorded in the report, and the station carries on degraded.
    pub fn init(&mut self) -> BootReport {
        info!("initializing modem");
        let mut report = BootReport::default();

        self.init_hardware();
        report.powered = self.power_on();
        self.initialized = true;

        if !report.powered {
            suppress(&mut report, "modem did not power on");
            return report;
        }

        report.identity = self.identity();
        report.imei = self.imei();
        info!(
            identity = report.identity.as_deref().unwrap_or("?"),
            imei = report.imei.as_deref().unwrap_or("?"),
            "modem identified"
        );

        let mut sim = SimStatus::Error;
        for attempt in 1..=SIM_ATTEMPTS {
            if attempt > 1 {
                self.clock.sleep(SIM_RETRY_GAP);
            }
            sim = self.get_sim_status();
            match sim {
                SimStatus::Ready => {
                    info!(attempt, "SIM ready");
                    break;
                }
                SimStatus::Locked => warn!(attempt, "SIM is PIN locked"),
                SimStatus::Error => {
                    warn!(attempt, "SIM not detected");
                    if attempt >= 3 {
                        self.cycle_radio();
                    }
                }
            }
        }
        report.sim = Some(sim);

        if sim != SimStatus::Ready {
            suppress(&mut report, "SIM not ready; cellular disabled until it recovers");
            return report;
        }

        report.modes_configured = ["+CBAND=ALL_MODE", "+CNMP=2", "+CMNB=3"]
            .iter()
            .all(|cmd| self.at.exchange(cmd, PROBE_TIMEOUT).is_ok());
        if !report.modes_configured {
            warn!("preferred network modes not accepted");
        }
        info!("modem initialized");
        report
    }

    /// Put control lines at their resting levels and reset UART framing.
    pub fn init_hardware(&mut self) {
        debug!(revision = ?self.config.revision, "configuring modem lines");
        let polarity = self.config.polarity;
        self.drive(ModemPin::Dtr, polarity.dtr_awake());
        self.drive(ModemPin::PowerKey, polarity.power_key_idle());
        self.clock.sleep(Duration::from_millis(100));
        self.reopen_uart();
        self.clock.sleep(Duration::from_millis(300));
        self.at.discard_input();
    }

    /// Bring the modem to `Responsive`. After a deep-sleep wake-up the
    /// modem is still powered and only needs waking.
    pub fn power_on(&mut self) -> bool {
        if self.board.woke_from_deep_sleep() {
            info!("deep-sleep wake-up; taking the wake path");
            if self.wake_up(true) {
                return true;
            }
            warn!("wake path failed; falling back to cold boot");
        }
        let mut ctl = self.relax_watchdog();
        ctl.cold_boot()
    }

    fn cold_boot(&mut self) -> bool {
        for attempt in 1..=3 {
            if self.ping(PROBE_TIMEOUT) {
                info!(attempt, "modem already responsive");
                self.state = ModemPowerState::Responsive;
                return true;
            }
            self.clock.sleep(Duration::from_millis(500));
        }

        self.reopen_uart();
        self.at.discard_input();
        let polarity = self.config.polarity;
        self.drive(ModemPin::PowerKey, polarity.power_key_idle());
        self.clock.sleep(Duration::from_secs(2));

        info!(pulse_ms = self.config.on_pulse.as_millis() as u64, "power key on-pulse");
        self.state = ModemPowerState::Booting;
        self.pulse_power_key(self.config.on_pulse);
        self.clock.sleep(self.config.boot_wait);
        self.at.discard_input();

        for attempt in 0..5 {
            if self.ping(BOOT_PROBE_TIMEOUT) {
                info!(attempt = attempt + 1, "modem booted");
                self.state = ModemPowerState::Responsive;
                return true;
            }
            if attempt == 2 {
                debug!("nudging power key");
                self.pulse_power_key(NUDGE_PULSE);
                self.clock.sleep(Duration::from_secs(2));
            }
            self.clock.sleep(Duration::from_secs(1));
        }

        warn!("modem silent after boot; trying software reset");
        self.at.exchange("+CFUN=1,1", SOFT_RESET_TIMEOUT);
        self.clock.sleep(Duration::from_secs(5));
        if self.ping(BOOT_PROBE_TIMEOUT) {
            info!("modem responsive after software reset");
            self.state = ModemPowerState::Responsive;
            return true;
        }

        error!("modem failed to power on");
        self.state = ModemPowerState::Off;
        false
    }

    // ─── Shutdown ───────────────────────────────────────────────────────

    /// Switch the modem off. Graceful `AT+CPOWD=1` when it answers, a
    /// hardware off-pulse otherwise. The power key is left idle as the
    /// final action and nothing is sent afterwards.
    ///
    /// Returns `false` only when a graceful shutdown was attempted and the
    /// modem never confirmed it.
    pub fn power_off(&mut self) -> bool {
        info!("powering modem off");
        let mut ctl = self.relax_watchdog();
        ctl.shutdown()
    }

    fn shutdown(&mut self) -> bool {
        self.socket_open = false;
        let polarity = self.config.polarity;

        let confirmed = if self.is_responsive() {
            let mut confirmed = self.power_down_command();
            for _ in 0..self.config.graceful_power_down_repeats {
                confirmed |= self.power_down_command();
            }
            if !confirmed {
                warn!("modem did not confirm power down");
            }
            self.clock.sleep(POWER_DOWN_SETTLE);
            confirmed
        } else {
            warn!(
                pulse_ms = self.config.off_pulse.as_millis() as u64,
                "modem silent; using hardware off-pulse"
            );
            self.drive(ModemPin::PowerKey, polarity.power_key_idle());
            self.clock.sleep(Duration::from_secs(1));
            self.pulse_power_key(self.config.off_pulse);
            self.clock.sleep(POWER_DOWN_SETTLE);
            true
        };

        self.drive(ModemPin::PowerKey, polarity.power_key_idle());
        self.state = ModemPowerState::Off;
        confirmed
    }

    fn power_down_command(&mut self) -> bool {
        self.at
            .exchange_until("+CPOWD=1", POWER_DOWN_TIMEOUT, &["NORMAL POWER DOWN"], &[])
            .is_ok()
    }

    /// Forced off/on cycle. Always a cold boot, never the wake path.
    pub fn hard_reset(&mut self) -> bool {
        warn!("hard-resetting modem");
        let mut ctl = self.relax_watchdog();
        ctl.state = ModemPowerState::Resetting;
        ctl.power_off();
        ctl.clock.sleep(RESET_SETTLE);
        ctl.init_hardware();
        ctl.cold_boot()
    }

    // ─── Sleep ──────────────────────────────────────────────────────────

    /// Request modem sleep via DTR + `AT+CSCLK=1`. With `hold`, the DTR
    /// level is latched so it survives the controller's deep sleep.
    ///
    /// On failure DTR is released and driven back to its awake level, so
    /// the lines match the `Responsive` state the modem stays in.
    pub fn enter_sleep(&mut self, hold: bool) -> bool {
        info!(hold, "putting modem to sleep");
        let mut ctl = self.relax_watchdog();
        if ctl.sleep_sequence(hold) {
            return true;
        }
        ctl.abort_sleep();
        false
    }

    fn sleep_sequence(&mut self, hold: bool) -> bool {
        let level = self.config.polarity.dtr_sleep;
        self.board.interrupt_free(|b| {
            b.set_pin(ModemPin::Dtr, level);
            if hold {
                b.set_pin_hold(ModemPin::Dtr, true);
            }
        });

        if !self.at.exchange("+CSCLK=1", PROBE_TIMEOUT).is_ok() {
            error!("modem rejected sleep command");
            return false;
        }
        self.clock.sleep(Duration::from_secs(2));

        if self.is_responsive() {
            warn!("modem still responsive after sleep command");
            self.at.exchange("+CSCLK=0", PROBE_TIMEOUT);
            return false;
        }
        self.socket_open = false;
        self.state = ModemPowerState::Sleeping;
        info!("modem asleep");
        true
    }

    fn abort_sleep(&mut self) {
        let awake = self.config.polarity.dtr_awake();
        self.board.interrupt_free(|b| {
            b.set_pin_hold(ModemPin::Dtr, false);
            b.set_pin(ModemPin::Dtr, awake);
        });
        debug!("sleep aborted; DTR back at awake level");
    }

    /// Wake the modem, escalating from DTR alone to `AT+CSCLK=0` to a
    /// short power-key nudge. UART framing is re-established first.
    pub fn wake_up(&mut self, from_deep_sleep: bool) -> bool {
        info!(from_deep_sleep, "waking modem");
        let mut ctl = self.relax_watchdog();
        ctl.wake_sequence(from_deep_sleep)
    }

    fn wake_sequence(&mut self, from_deep_sleep: bool) -> bool {
        if from_deep_sleep {
            self.board.interrupt_free(|b| {
                b.set_pin_hold(ModemPin::Dtr, false);
                b.set_pin_hold(ModemPin::PowerKey, false);
            });
        }
        self.reopen_uart();
        self.clock.sleep(Duration::from_millis(300));

        self.drive(ModemPin::Dtr, self.config.polarity.dtr_awake());
        self.clock.sleep(Duration::from_secs(1));
        self.at.discard_input();

        if self.ping(BOOT_PROBE_TIMEOUT) {
            info!("modem answered right after DTR");
            return self.mark_awake();
        }

        self.at.exchange("+CSCLK=0", PROBE_TIMEOUT);
        self.clock.sleep(Duration::from_secs(2));
        if self.ping_repeatedly(5) {
            info!("modem woke after sleep disable");
            return self.mark_awake();
        }

        debug!("nudging power key to wake modem");
        self.pulse_power_key(NUDGE_PULSE);
        self.clock.sleep(Duration::from_secs(3));
        if self.ping_repeatedly(5) {
            info!("modem woke after power key nudge");
            return self.mark_awake();
        }

        error!("modem failed to wake");
        self.state = ModemPowerState::Off;
        false
    }

    fn mark_awake(&mut self) -> bool {
        self.state = ModemPowerState::Responsive;
        true
    }

    fn ping_repeatedly(&mut self, attempts: u32) -> bool {
        for attempt in 0..attempts {
            if self.ping(WAKE_PROBE_TIMEOUT) {
                return true;
            }
            if attempt + 1 < attempts {
                self.clock.sleep(Duration::from_secs(1));
            }
        }
        false
    }

    // ─── Probes ─────────────────────────────────────────────────────────

    /// One bounded `AT` probe. `ERROR` still proves the modem is alive.
    /// Does not touch the power state.
    pub fn is_responsive(&mut self) -> bool {
        self.at.exchange("", PROBE_TIMEOUT).answered()
    }

    /// `AT` answered with `OK`.
    pub(super) fn ping(&mut self, timeout: Duration) -> bool {
        self.at.exchange("", timeout).is_ok()
    }

    /// PIN status, then card ID presence, then the vendor SIM-inserted
    /// query. First conclusive answer wins.
    pub fn get_sim_status(&mut self) -> SimStatus {
        if !self.is_responsive() {
            debug!("SIM check skipped; modem silent");
            return SimStatus::Error;
        }

        let resp = self.at.exchange("+CPIN?", Duration::from_secs(5));
        match resp.field("+CPIN:").map(parse::cpin) {
            Some(PinState::Ready) => return SimStatus::Ready,
            Some(PinState::SimPin | PinState::SimPuk) => return SimStatus::Locked,
            Some(PinState::Other(code)) => debug!(code = %code, "inconclusive PIN status"),
            None => debug!(status = ?resp.status, "no PIN status"),
        }

        let resp = self.at.exchange("+CCID", Duration::from_secs(3));
        if resp.is_ok() && resp.text().trim().len() > 10 {
            debug!("SIM present by card ID");
            return SimStatus::Ready;
        }

        let resp = self.at.exchange("+CSMINS?", Duration::from_secs(3));
        if resp.is_ok() && resp.field("+CSMINS:").and_then(parse::csmins) == Some(1) {
            debug!("SIM present by vendor status");
            return SimStatus::Ready;
        }

        SimStatus::Error
    }

    fn cycle_radio(&mut self) {
        debug!("cycling radio to re-detect SIM");
        self.at.exchange("+CFUN=0", PROBE_TIMEOUT);
        self.clock.sleep(Duration::from_millis(500));
        self.at.exchange("+CFUN=1", PROBE_TIMEOUT);
        self.clock.sleep(Duration::from_secs(1));
    }

    fn identity(&mut self) -> Option<String> {
        let resp = self.at.exchange("I", PROBE_TIMEOUT);
        (resp.is_ok() && !resp.lines.is_empty()).then(|| resp.text())
    }

    // ─── Lines ──────────────────────────────────────────────────────────

    fn drive(&mut self, pin: ModemPin, level: Level) {
        self.board.interrupt_free(|b| b.set_pin(pin, level));
    }

    fn pulse_power_key(&mut self, width: Duration) {
        let polarity = self.config.polarity;
        self.drive(ModemPin::PowerKey, polarity.power_key_active);
        self.clock.sleep(width);
        self.drive(ModemPin::PowerKey, polarity.power_key_idle());
    }

    fn reopen_uart(&mut self) {
        let baud = self.config.baud;
        let at = &mut self.at;
        let result = self.board.interrupt_free(|_| at.reopen(baud));
        if let Err(e) = result {
            warn!(error = %e, "UART reopen failed");
        }
    }

    // ─── Watchdog ───────────────────────────────────────────────────────

    /// Widen (or disable) the watchdog until the guard drops.
    pub fn relax_watchdog(&mut self) -> WatchdogRelaxed<'_, S, B> {
        let saved = self.board.watchdog_timeout();
        self.board.feed_watchdog();
        self.board.set_watchdog_timeout(self.config.relaxed_watchdog);
        WatchdogRelaxed { ctl: self, saved }
    }
}

fn suppress(report: &mut BootReport, fault: &str) {
    error!(fault, "boot fault suppressed; continuing degraded");
    report.suppressed.push(fault.to_string());
}

/// Watchdog deadline relaxed for the guard's lifetime. Dropping it
/// restores the previous deadline and feeds the watchdog, on every path.
pub struct WatchdogRelaxed<'a, S: SerialPort, B: Board> {
    ctl: &'a mut ModemPowerController<S, B>,
    saved: Option<Duration>,
}

impl<S: SerialPort, B: Board> Deref for WatchdogRelaxed<'_, S, B> {
    type Target = ModemPowerController<S, B>;

    fn deref(&self) -> &Self::Target {
        self.ctl
    }
}

impl<S: SerialPort, B: Board> DerefMut for WatchdogRelaxed<'_, S, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctl
    }
}

impl<S: SerialPort, B: Board> Drop for WatchdogRelaxed<'_, S, B> {
    fn drop(&mut self) {
        self.ctl.board.set_watchdog_timeout(self.saved);
        self.ctl.board.feed_watchdog();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBoard, SimCard, SimModem, SimSerial};

    type Ctl = ModemPowerController<SimSerial, SimBoard>;

    const WATCHDOG: Option<Duration> = Some(Duration::from_secs(30));

    fn rig() -> (SimModem, Ctl) {
        let (clock, _mock) = Clock::mock();
        let config = ModemConfig::default();
        let sim = SimModem::new(clock.clone(), config.polarity);
        sim.set_watchdog(WATCHDOG);
        let ctl = ModemPowerController::new(sim.serial(), sim.board(), clock, config);
        (sim, ctl)
    }

    fn powered_rig() -> (SimModem, Ctl) {
        let (sim, ctl) = rig();
        sim.set_powered(true);
        (sim, ctl)
    }

    // ─── Power on ───────────────────────────────────────────────────────

    #[test]
    fn cold_boot_pulses_and_waits_for_boot() {
        let (sim, mut ctl) = rig();
        ctl.init_hardware();
        assert!(ctl.power_on());
        assert!(sim.is_powered());
        assert_eq!(ctl.state(), ModemPowerState::Responsive);
        assert_eq!(sim.watchdog_timeout(), WATCHDOG);
    }

    #[test]
    fn already_running_modem_is_not_pulsed() {
        let (sim, mut ctl) = powered_rig();
        assert!(ctl.power_on());
        let key = ctl.config().polarity.power_key_active;
        assert!(!sim
            .pin_events()
            .iter()
            .any(|e| e.pin == ModemPin::PowerKey && e.level == key));
    }

    #[test]
    fn dead_modem_fails_without_panicking() {
        let (sim, mut ctl) = rig();
        sim.set_unresponsive(true);
        assert!(!ctl.power_on());
        assert_eq!(ctl.state(), ModemPowerState::Off);
        assert!(sim.commands().iter().any(|c| c == "AT+CFUN=1,1"));
        assert_eq!(sim.watchdog_timeout(), WATCHDOG);
    }

    #[test]
    fn init_reports_suppressed_sim_fault() {
        let (sim, mut ctl) = rig();
        sim.set_sim_card(SimCard::Absent);
        let report = ctl.init();
        assert!(ctl.is_initialized());
        assert!(report.powered);
        assert_eq!(report.sim, Some(SimStatus::Error));
        assert!(report.is_degraded());
        // radio cycled from the third attempt on
        assert_eq!(sim.commands().iter().filter(|c| *c == "AT+CFUN=0").count(), 3);
        assert!(!report.modes_configured);
    }

    #[test]
    fn init_configures_modes_when_sim_ready() {
        let (sim, mut ctl) = rig();
        let report = ctl.init();
        assert_eq!(report.sim, Some(SimStatus::Ready));
        assert!(report.modes_configured);
        assert!(!report.is_degraded());
        assert!(report.imei.is_some());
        assert!(sim.commands().iter().any(|c| c == "AT+CMNB=3"));
    }

    // ─── Power off ──────────────────────────────────────────────────────

    #[test]
    fn graceful_power_off_when_answering() {
        let (sim, mut ctl) = powered_rig();
        assert!(ctl.power_off());
        assert!(!sim.is_powered());
        assert!(sim.commands().iter().any(|c| c == "AT+CPOWD=1"));
        let last = sim.pin_events().last().copied().unwrap();
        assert_eq!(last.pin, ModemPin::PowerKey);
        assert_eq!(last.level, ctl.config().polarity.power_key_idle());
    }

    #[test]
    fn unresponsive_power_off_uses_vendor_pulse_and_stays_silent() {
        let (sim, mut ctl) = powered_rig();
        sim.set_unresponsive(true);
        ctl.power_off();

        let polarity = ctl.config().polarity;
        let events = sim.pin_events();
        let press = events
            .iter()
            .position(|e| e.pin == ModemPin::PowerKey && e.level == polarity.power_key_active)
            .expect("off pulse");
        let release = events[press + 1..]
            .iter()
            .find(|e| e.pin == ModemPin::PowerKey)
            .copied()
            .unwrap();
        let width = release.at.saturating_duration_since(events[press].at);
        assert!(width >= Duration::from_millis(1200), "pulse {width:?}");

        let last = events.last().copied().unwrap();
        assert_eq!(last.pin, ModemPin::PowerKey);
        assert_eq!(last.level, polarity.power_key_idle());

        assert!(sim.command_log().iter().all(|(t, _)| *t <= events[press].at));
        assert!(!sim.is_powered());
        assert_eq!(ctl.state(), ModemPowerState::Off);
    }

    #[test]
    fn hard_reset_cold_boots_even_after_deep_sleep() {
        let (sim, mut ctl) = powered_rig();
        sim.set_woke_from_deep_sleep(true);
        assert!(ctl.hard_reset());
        assert!(sim.is_powered());
        assert!(sim.commands().iter().any(|c| c == "AT+CPOWD=1"));
        assert_eq!(sim.watchdog_timeout(), WATCHDOG);
    }

    // ─── SIM status ─────────────────────────────────────────────────────

    #[test]
    fn sim_ready_by_pin_status() {
        let (_sim, mut ctl) = powered_rig();
        assert_eq!(ctl.get_sim_status(), SimStatus::Ready);
    }

    #[test]
    fn sim_ready_by_card_id_length() {
        let (sim, mut ctl) = powered_rig();
        sim.set_sim_card(SimCard::CcidOnly);
        assert_eq!(ctl.get_sim_status(), SimStatus::Ready);
        assert!(!sim.commands().iter().any(|c| c == "AT+CSMINS?"));
    }

    #[test]
    fn sim_ready_by_vendor_status() {
        let (sim, mut ctl) = powered_rig();
        sim.set_sim_card(SimCard::VendorOnly);
        assert_eq!(ctl.get_sim_status(), SimStatus::Ready);
        assert!(sim.commands().iter().any(|c| c == "AT+CSMINS?"));
    }

    #[test]
    fn sim_locked_and_absent() {
        let (sim, mut ctl) = powered_rig();
        sim.set_sim_card(SimCard::Locked);
        assert_eq!(ctl.get_sim_status(), SimStatus::Locked);
        sim.set_sim_card(SimCard::Absent);
        assert_eq!(ctl.get_sim_status(), SimStatus::Error);
    }

    // ─── Sleep / wake ───────────────────────────────────────────────────

    #[test]
    fn sleep_with_hold_then_deep_sleep_wake() {
        let (sim, mut ctl) = powered_rig();
        assert!(ctl.power_on());
        assert!(ctl.enter_sleep(true));
        assert!(sim.is_sleeping());
        assert!(sim.held_pins().contains(&ModemPin::Dtr));
        assert_eq!(ctl.state(), ModemPowerState::Sleeping);

        let reopens = sim.reopen_count();
        assert!(ctl.wake_up(true));
        assert!(!sim.is_sleeping());
        assert!(sim.held_pins().is_empty());
        assert!(sim.reopen_count() > reopens);
        assert_eq!(ctl.state(), ModemPowerState::Responsive);
    }

    #[test]
    fn failed_sleep_restores_awake_lines() {
        let (sim, mut ctl) = powered_rig();
        assert!(ctl.power_on());
        sim.clear_logs();
        sim.set_unresponsive(true);
        assert!(!ctl.enter_sleep(true));

        let polarity = ctl.config().polarity;
        assert_eq!(ctl.state(), ModemPowerState::Responsive);
        assert!(sim.held_pins().is_empty());
        assert_eq!(sim.pin_level(ModemPin::Dtr), polarity.dtr_awake());
        assert_eq!(sim.watchdog_history(), vec![None, WATCHDOG]);
    }

    #[test]
    fn power_off_runs_with_watchdog_relaxed() {
        let (sim, mut ctl) = powered_rig();
        assert!(ctl.power_off());
        let history = sim.watchdog_history();
        assert_eq!(history.first().copied(), Some(None));
        assert_eq!(history.last().copied().flatten(), WATCHDOG);
        assert_eq!(sim.watchdog_timeout(), WATCHDOG);
    }

    #[test]
    fn wake_path_taken_after_deep_sleep() {
        let (sim, mut ctl) = powered_rig();
        assert!(ctl.enter_sleep(true));
        sim.set_woke_from_deep_sleep(true);
        assert!(ctl.power_on());
        let key = ctl.config().polarity.power_key_active;
        assert!(!sim
            .pin_events()
            .iter()
            .any(|e| e.pin == ModemPin::PowerKey && e.level == key));
    }

    #[test]
    fn failed_wake_restores_watchdog() {
        let (sim, mut ctl) = rig();
        assert!(!ctl.wake_up(false));
        assert_eq!(sim.watchdog_timeout(), WATCHDOG);
        // relaxed (disabled) while waking, then restored
        let history = sim.watchdog_history();
        assert!(history.contains(&None));
        assert_eq!(history.last().copied().flatten(), WATCHDOG);
    }

    #[test]
    fn pin_writes_are_interrupt_free() {
        let (sim, mut ctl) = rig();
        ctl.init_hardware();
        assert!(sim.pin_events().iter().all(|e| e.irq_masked));
        assert_eq!(sim.irq_depth(), 0);
    }

    #[test]
    fn is_responsive_leaves_state_alone() {
        let (_sim, mut ctl) = powered_rig();
        assert!(ctl.is_responsive());
        assert_eq!(ctl.state(), ModemPowerState::Off);
    }
}
