//! Sensor readings consumed by the control loop.
//!
//! Real probes (anemometer, wind vane, OneWire temperature, ADC dividers)
//! live on the microcontroller build. The host build ships a synthetic
//! source driven by the station clock.

use std::f32::consts::TAU;

use aiolos_link::api::WindReport;
use aiolos_link::clock::Clock;
use quanta::Instant;

/// Sent in place of an external temperature when the probe is missing.
pub const DISCONNECTED_TEMPERATURE: f32 = -127.0;

pub trait SensorSource {
    /// Volts.
    fn battery_voltage(&mut self) -> f32;

    /// Volts.
    fn solar_voltage(&mut self) -> f32;

    /// Enclosure temperature, °C.
    fn internal_temperature(&mut self) -> f32;

    /// Outside temperature, °C. `None` when the probe does not answer.
    fn external_temperature(&mut self) -> Option<f32>;

    /// Wind averaged since the previous call.
    fn wind(&mut self) -> WindReport;
}

/// Smooth daily and gust cycles, no randomness.
pub struct SimulatedSensors {
    clock: Clock,
    start: Instant,
}

impl SimulatedSensors {
    pub fn new(clock: Clock) -> Self {
        let start = clock.now();
        SimulatedSensors { clock, start }
    }

    /// Position in a cycle of `period_s` seconds, in radians.
    fn phase(&self, period_s: f32) -> f32 {
        let t = self.clock.since(self.start).as_secs_f32();
        (t / period_s).fract() * TAU
    }
}

const DAY_S: f32 = 86_400.0;

impl SensorSource for SimulatedSensors {
    fn battery_voltage(&mut self) -> f32 {
        3.8 + 0.25 * self.phase(DAY_S).sin()
    }

    fn solar_voltage(&mut self) -> f32 {
        (6.0 * self.phase(DAY_S).sin()).max(0.0)
    }

    fn internal_temperature(&mut self) -> f32 {
        22.0 + 6.0 * self.phase(DAY_S).sin()
    }

    fn external_temperature(&mut self) -> Option<f32> {
        Some(16.0 + 8.0 * self.phase(DAY_S).sin())
    }

    fn wind(&mut self) -> WindReport {
        let gust = self.phase(90.0).sin();
        let veer = self.phase(3_600.0).sin();
        WindReport {
            wind_speed: (5.0 + 3.0 * gust).max(0.0),
            wind_direction: (270.0 + 40.0 * veer).rem_euclid(360.0),
        }
    }
}
