//! # Hardware Abstraction
//!
//! The modem is reached through two seams: a byte-oriented [`SerialPort`]
//! and a [`Board`] that owns the modem control lines, the watchdog and the
//! interrupt mask. Real backends live in the station binary; the simulator
//! in [`crate::sim`] implements both for tests.
//!
//! Pin polarity is not a constant of the code. The power-key line has been
//! wired both ways on boards sold under the same name, so the active level
//! is selected per [`BoardRevision`] and must be confirmed on hardware.

use std::io;
use std::ops::Not;
use std::time::Duration;

use serde::Deserialize;

/// Logic level of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// Modem control lines driven by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModemPin {
    /// PWRKEY: a held pulse toggles modem power.
    PowerKey,
    /// DTR: requests sleep (with `AT+CSCLK=1`) or wake.
    Dtr,
}

/// Active levels of the modem control lines for one board revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinPolarity {
    /// Level that presses the power key. Idle ("modem off" resting level)
    /// is the opposite.
    pub power_key_active: Level,
    /// Level that allows the modem to sleep. Awake is the opposite.
    pub dtr_sleep: Level,
}

impl PinPolarity {
    pub fn power_key_idle(&self) -> Level {
        !self.power_key_active
    }

    pub fn dtr_awake(&self) -> Level {
        !self.dtr_sleep
    }
}

/// Known board wirings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardRevision {
    /// Power key pulses High from an idle Low; DTR High sleeps.
    #[default]
    Standard,
    /// Power key pulses Low from an idle High; DTR High sleeps.
    Inverted,
}

impl BoardRevision {
    pub const STANDARD_POLARITY: PinPolarity = PinPolarity {
        power_key_active: Level::High,
        dtr_sleep: Level::High,
    };

    pub const INVERTED_POLARITY: PinPolarity = PinPolarity {
        power_key_active: Level::Low,
        dtr_sleep: Level::High,
    };

    pub const fn polarity(self) -> PinPolarity {
        match self {
            BoardRevision::Standard => Self::STANDARD_POLARITY,
            BoardRevision::Inverted => Self::INVERTED_POLARITY,
        }
    }
}

/// UART to the modem. Reads never block.
pub trait SerialPort {
    /// Close and reopen the port with fresh framing.
    fn reopen(&mut self, baud: u32) -> io::Result<()>;

    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Next received byte, or `None` if nothing is pending.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Drop everything pending in the receive buffer.
    fn discard_input(&mut self) {
        while let Ok(Some(_)) = self.read_byte() {}
    }
}

/// Board services the modem controller needs besides the UART.
pub trait Board {
    fn set_pin(&mut self, pin: ModemPin, level: Level);

    /// Latch (or release) a pin so its level survives the controller's own
    /// deep sleep.
    fn set_pin_hold(&mut self, pin: ModemPin, hold: bool);

    /// Whether this boot is a timer wake-up from deep sleep.
    fn woke_from_deep_sleep(&self) -> bool;

    /// Current watchdog deadline; `None` when disabled.
    fn watchdog_timeout(&self) -> Option<Duration>;

    fn set_watchdog_timeout(&mut self, timeout: Option<Duration>);

    fn feed_watchdog(&mut self);

    fn disable_interrupts(&mut self);

    fn enable_interrupts(&mut self);

    /// Run `f` with interrupts masked. Keep `f` short.
    fn interrupt_free<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R
    where
        Self: Sized,
    {
        self.disable_interrupts();
        let result = f(self);
        self.enable_interrupts();
        result
    }
}
