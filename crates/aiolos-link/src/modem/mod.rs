//! # Modem
//!
//! Everything that talks to the SIM7000 directly.
//!
//! - [`power`] — [`ModemPowerController`]: boot, power-off, sleep/wake,
//!   SIM probing, hard reset, watchdog relaxation.
//! - `network` — registration, GPRS attach/detach, identity and signal
//!   queries (more methods on the same controller).
//! - [`bearer`] — the [`Bearer`] TCP socket over `AT+CIP*`.
//! - [`parse`] — typed parsers for the modem's informational responses.
//!
//! ```text
//!          power_on            AT ok
//!   Off ─────────────▶ Booting ─────▶ Responsive ◀──┐
//!    ▲                    ▲              │ enter_sleep │ wake_up
//!    │ power_off          │ hard_reset   ▼             │
//!    └──────────── any ───┘          Sleeping ────────┘
//! ```

pub mod bearer;
mod network;
pub mod parse;
pub mod power;

pub use bearer::Bearer;
pub use power::{ModemPowerController, WatchdogRelaxed};

/// Where the controller believes the physical modem is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemPowerState {
    Off,
    Booting,
    Responsive,
    Sleeping,
    Resetting,
}

/// SIM card usability, derived fresh on every probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStatus {
    Error,
    Ready,
    Locked,
}

/// What `init()` achieved. Boot never fails; faults land here and in the log.
#[derive(Debug, Clone, Default)]
pub struct BootReport {
    pub powered: bool,
    pub sim: Option<SimStatus>,
    pub modes_configured: bool,
    pub identity: Option<String>,
    pub imei: Option<String>,
    /// Faults that were logged and suppressed to keep the station running.
    pub suppressed: Vec<String>,
}

impl BootReport {
    pub fn is_degraded(&self) -> bool {
        !self.suppressed.is_empty()
    }
}
