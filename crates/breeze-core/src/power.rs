//! Battery classification and sensor supply switching.
//!
//! Degradation is driven purely by battery voltage: below the reduce-interval
//! voltage every broadcast interval is stretched, below the undervoltage
//! threshold the station stops transmitting and sleeps for long periods until
//! the battery recovers well above that threshold.

use core::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::clock::Millis;

/// Readings below this are treated as a broken measurement.
pub const READ_FAULT_VOLTS: f32 = 0.8;

/// Minimum spacing between two battery measurements.
pub const MIN_READ_INTERVAL_MS: Millis = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryState {
    #[default]
    Nominal,
    Reduced,
    Undervoltage,
}

impl BatteryState {
    /// Multiplier applied to every broadcast interval.
    pub const fn interval_scale(self) -> u32 {
        match self {
            Self::Nominal => 1,
            Self::Reduced => 3,
            Self::Undervoltage => 5,
        }
    }
}

impl Display for BatteryState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            Self::Nominal => "nominal",
            Self::Reduced => "reduced",
            Self::Undervoltage => "undervoltage",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerThresholds {
    pub undervoltage: f32,
    /// Undervoltage is left only above this voltage
    pub recover: f32,
    pub reduce_interval: f32,
    pub sensor_off: f32,
    pub sensor_on: f32,
}

impl Default for PowerThresholds {
    fn default() -> Self {
        Self {
            undervoltage: 3.35,
            recover: 3.5,
            reduce_interval: 3.5,
            sensor_off: 3.4,
            sensor_on: 3.5,
        }
    }
}

/// State of charge estimated from the resting voltage of a Li-ion cell.
///
/// Rows are `(above volts, percent)`, checked from the top.
const SOC_TABLE: [(f32, u8); 10] = [
    (4.15, 99),
    (4.05, 90),
    (3.95, 80),
    (3.90, 70),
    (3.85, 60),
    (3.80, 50),
    (3.75, 40),
    (3.70, 30),
    (3.65, 20),
    (3.55, 10),
];

pub fn state_of_charge(volts: f32, charge_done: bool) -> u8 {
    match SOC_TABLE.iter().find(|(above, _)| volts > *above) {
        Some((_, 99)) if charge_done => 100,
        Some((_, percent)) => *percent,
        None => 0,
    }
}

/// Outcome of one battery measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub volts: f32,
    pub state: BatteryState,
    pub state_of_charge: u8,
    /// Desired state of the wind sensor supply
    pub sensor_powered: bool,
}

pub struct PowerMonitor {
    thresholds: PowerThresholds,
    state: BatteryState,
    volts: Option<f32>,
    state_of_charge: u8,
    sensor_powered: bool,
    last_read_at: Option<Millis>,
}

impl PowerMonitor {
    pub fn new(thresholds: PowerThresholds) -> Self {
        Self {
            thresholds,
            state: BatteryState::Nominal,
            volts: None,
            state_of_charge: 50,
            sensor_powered: true,
            last_read_at: None,
        }
    }

    pub fn state(&self) -> BatteryState {
        self.state
    }

    pub fn volts(&self) -> Option<f32> {
        self.volts
    }

    pub fn state_of_charge(&self) -> u8 {
        self.state_of_charge
    }

    pub fn sensor_powered(&self) -> bool {
        self.sensor_powered
    }

    /// Whether a new measurement is worth taking at `now`.
    pub fn should_read(&self, now: Millis) -> bool {
        self.last_read_at
            .is_none_or(|last| now.saturating_sub(last) > MIN_READ_INTERVAL_MS)
    }

    /// Classify a fresh battery measurement.
    ///
    /// A reading below [`READ_FAULT_VOLTS`] keeps the previous state.
    pub fn update(&mut self, now: Millis, volts: f32, charge_done: bool) -> BatteryReading {
        self.last_read_at = Some(now);

        if volts < READ_FAULT_VOLTS {
            log::error!("Battery read error: {:.2} V", volts);
            return self.reading();
        }

        let t = &self.thresholds;

        if volts < t.sensor_off {
            self.sensor_powered = false;
        } else if volts > t.sensor_on {
            self.sensor_powered = true;
        }

        let next = if volts < t.undervoltage {
            BatteryState::Undervoltage
        } else if self.state == BatteryState::Undervoltage && volts <= t.recover {
            BatteryState::Undervoltage
        } else if volts < t.reduce_interval {
            BatteryState::Reduced
        } else {
            BatteryState::Nominal
        };

        if next != self.state {
            log::info!("Battery {:.2} V: {} -> {}", volts, self.state, next);
        }
        self.state = next;
        self.volts = Some(volts);
        self.state_of_charge = state_of_charge(volts, charge_done);
        self.reading()
    }

    fn reading(&self) -> BatteryReading {
        BatteryReading {
            volts: self.volts.unwrap_or(0.0),
            state: self.state,
            state_of_charge: self.state_of_charge,
            sensor_powered: self.sensor_powered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> PowerMonitor {
        PowerMonitor::new(PowerThresholds::default())
    }

    #[test]
    fn classifies_by_voltage() {
        let mut power = monitor();
        assert_eq!(power.update(0, 3.9, false).state, BatteryState::Nominal);
        assert_eq!(power.update(200, 3.45, false).state, BatteryState::Reduced);
        assert_eq!(power.update(400, 3.3, false).state, BatteryState::Undervoltage);
    }

    #[test]
    fn undervoltage_is_latched_until_recovery() {
        let mut power = monitor();
        power.update(0, 3.3, false);
        assert_eq!(power.update(200, 3.45, false).state, BatteryState::Undervoltage);
        assert_eq!(power.update(400, 3.5, false).state, BatteryState::Undervoltage);
        assert_eq!(power.update(600, 3.6, false).state, BatteryState::Nominal);
    }

    #[test]
    fn read_fault_keeps_previous_state() {
        let mut power = monitor();
        power.update(0, 3.45, false);
        let reading = power.update(200, 0.1, false);
        assert_eq!(reading.state, BatteryState::Reduced);
        assert!((reading.volts - 3.45).abs() < 0.001);
    }

    #[test]
    fn sensor_power_has_hysteresis() {
        let mut power = monitor();
        assert!(!power.update(0, 3.38, false).sensor_powered);
        assert!(!power.update(200, 3.45, false).sensor_powered);
        assert!(power.update(400, 3.55, false).sensor_powered);
        assert!(power.update(600, 3.45, false).sensor_powered);
    }

    #[test]
    fn state_of_charge_table() {
        assert_eq!(state_of_charge(3.3, false), 0);
        assert_eq!(state_of_charge(3.6, false), 10);
        assert_eq!(state_of_charge(3.82, false), 50);
        assert_eq!(state_of_charge(4.2, false), 99);
        assert_eq!(state_of_charge(4.2, true), 100);
    }

    #[test]
    fn reads_are_rate_limited() {
        let mut power = monitor();
        assert!(power.should_read(0));
        power.update(1_000, 3.9, false);
        assert!(!power.should_read(1_050));
        assert!(power.should_read(1_101));
    }
}
