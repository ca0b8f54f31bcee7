//! Pulse-counting anemometer (Davis 6410) integration window.

use crate::clock::{Millis, VirtualClock};
use crate::error::SleepError;
use crate::hal::{LowPowerHal, PulseCounter, WindVane};
use crate::sleep::DeepSleepExecutor;
use crate::storage::WindHistoryStore;

/// 1 pulse/s = 2.25 mph, converted to km/h and scaled to milliseconds.
pub const DAVIS_6410_KMH_MS: f32 = 1.609 * 2250.0;

/// Full scale of the 10-bit vane ADC.
const VANE_FULL_SCALE: f32 = 1023.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseReading {
    pub pulses: u32,
    /// Measured window length
    pub elapsed_ms: Millis,
    /// km/h
    pub wind_speed: f32,
    /// Degrees
    pub direction: i32,
}

pub struct PulseIntegrationWindow {
    calibration: f32,
}

impl Default for PulseIntegrationWindow {
    fn default() -> Self {
        Self::new(DAVIS_6410_KMH_MS)
    }
}

impl PulseIntegrationWindow {
    /// `calibration` is km/h × ms per pulse.
    pub fn new(calibration: f32) -> Self {
        Self { calibration }
    }

    pub fn speed(&self, pulses: u32, elapsed_ms: Millis) -> f32 {
        pulses as f32 * self.calibration / (elapsed_ms + 1) as f32
    }

    /// Sleep for one integration window while the hardware counts pulses,
    /// then record speed and vane direction.
    ///
    /// The counter keeps running across windows; it is read first and only
    /// then reset, so no pulse between the two is double counted. Early
    /// wakes are swallowed by [`DeepSleepExecutor::sleep_until_timer`] and
    /// never shorten the window.
    #[allow(clippy::too_many_arguments)]
    pub fn run<H, C, V, const N: usize>(
        &self,
        executor: &mut DeepSleepExecutor<'_>,
        hal: &mut H,
        counter: &mut C,
        vane: &mut V,
        clock: &mut VirtualClock,
        history: &mut WindHistoryStore<N>,
        window_ms: Millis,
    ) -> Result<PulseReading, SleepError>
    where
        H: LowPowerHal,
        C: PulseCounter,
        V: WindVane,
    {
        counter.start();
        let elapsed_ms = executor.sleep_until_timer(hal, clock, window_ms)?;

        let pulses = counter.read();
        counter.reset();

        let wind_speed = self.speed(pulses, elapsed_ms);
        let direction = vane_direction(vane.read_raw());
        log::info!(
            "{} pulses in {} ms: {:.1} km/h at {}°",
            pulses,
            elapsed_ms,
            wind_speed,
            direction
        );

        history.record(clock.now(), Some(wind_speed), Some(wind_speed), Some(direction));

        Ok(PulseReading {
            pulses,
            elapsed_ms,
            wind_speed,
            direction,
        })
    }
}

/// Potentiometer vane: 0 Ω north, 10 kΩ south, 20 kΩ full circle.
pub fn vane_direction(raw: u16) -> i32 {
    (360.0 / VANE_FULL_SCALE * f32::from(raw)) as i32
}
