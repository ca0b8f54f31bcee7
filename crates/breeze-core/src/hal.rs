//! Hardware seams of the station.
//!
//! The core never touches registers. A board support crate implements these
//! traits for the real MCU; the simulator and the unit tests implement them
//! against virtual time.

use embedded_hal::digital::OutputPin;
use embedded_io::{Read, ReadReady};

use crate::broadcast::Broadcast;
use crate::clock::Millis;
use crate::error::RadioError;
use crate::sleep::WatchdogPeriod;

/// Clocks, wake sources and sleep entry of the low-power MCU.
pub trait LowPowerHal {
    /// Active tick counter in milliseconds. Stops during deep sleep.
    fn millis(&self) -> Millis;

    /// Active tick counter in microseconds, used for serial idle timeouts.
    fn micros(&self) -> u64;

    /// Arm the one-shot wake timer with `counts` ticks of 8 ms.
    fn arm_wake_timer(&mut self, counts: u16);

    fn disarm_wake_timer(&mut self);

    /// Restart the free-running counter that keeps counting during sleep.
    fn reset_time_counter(&mut self);

    /// Milliseconds counted since the last [`LowPowerHal::reset_time_counter`].
    fn time_counter_ms(&self) -> Millis;

    /// Reset mode: the chip resets unless fed within `period`.
    fn enable_watchdog(&mut self, period: WatchdogPeriod);

    /// Early-warning (window) mode for sleep: instead of a reset, an
    /// interrupt fires after `window` and must call
    /// [`crate::sleep::WakeSignals::signal_watchdog`]. The handler disables
    /// the watchdog, so it has to be armed again for the next warning.
    fn enable_watchdog_warning(&mut self, window: WatchdogPeriod);

    fn feed_watchdog(&mut self);

    /// Let a falling edge on the sensor RX line wake the core.
    fn set_external_wake(&mut self, enabled: bool);

    /// Switch off clocks and pins that are not needed while asleep.
    fn gate_peripherals(&mut self);
    fn restore_peripherals(&mut self);

    /// Block in the deepest sleep mode until any enabled wake source fires.
    fn enter_deep_sleep(&mut self);
}

/// Serial link to the WS80/WS85 wind sensor.
pub trait SensorLink: Read + ReadReady {}

impl<T: Read + ReadReady> SensorLink for T {}

/// Hardware pulse counter on the anemometer reed contact.
pub trait PulseCounter {
    fn start(&mut self);
    fn read(&mut self) -> u32;
    fn reset(&mut self);
    fn stop(&mut self);
}

/// Potentiometer wind vane behind a 10-bit ADC.
pub trait WindVane {
    fn read_raw(&mut self) -> u16;
}

/// Radio collaborator. Framing and modulation live behind this trait.
pub trait Transmitter {
    fn send(&mut self, message: &Broadcast) -> Result<(), RadioError>;
    fn is_send_complete(&mut self) -> bool;
    /// Put the radio into its lowest power mode.
    fn sleep(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChargerStatus {
    pub charging: bool,
    pub done: bool,
}

pub trait BatteryMonitor {
    /// Battery voltage in volts.
    fn read_voltage(&mut self) -> f32;

    fn charger_status(&mut self) -> ChargerStatus {
        ChargerStatus::default()
    }
}

/// Associated hardware types of one station board.
pub trait Board {
    type Hal: LowPowerHal;
    type Link: SensorLink;
    type Radio: Transmitter;
    type Battery: BatteryMonitor;
    type Counter: PulseCounter;
    type Vane: WindVane;
    /// Active-low supply switch of the external wind sensor.
    type SensorPower: OutputPin;
}

/// Owned set of board peripherals handed to the scheduler.
pub struct Peripherals<B: Board> {
    pub hal: B::Hal,
    pub link: B::Link,
    pub radio: B::Radio,
    pub battery: B::Battery,
    pub counter: B::Counter,
    pub vane: B::Vane,
    pub sensor_power: B::SensorPower,
}
