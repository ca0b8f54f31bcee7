//! Scripted mock board shared by the unit tests.

use core::cell::Cell;
use core::convert::Infallible;
use core::marker::PhantomData;

use heapless::{Deque, Vec};

use crate::broadcast::Broadcast;
use crate::clock::Millis;
use crate::error::RadioError;
use crate::hal::{
    BatteryMonitor, Board, ChargerStatus, LowPowerHal, Peripherals, PulseCounter, Transmitter,
    WindVane,
};
use crate::sleep::{TIMER_TICK_MS, WakeSignals, WatchdogPeriod};

pub const WS80_FRAME: &[u8] = b"=====================================\r\n\
WH80 Ver:1.2.5\r\n\
FreqSel:868M\r\n\
WindDir      =224\r\n\
WindSpeed    =1.0\r\n\
WindGust     =2.0\r\n\
Temperature  =12.3\r\n\
Humi         =71\r\n\
Light        =1234\r\n\
UV_Value     =0.1\r\n\
BatVoltage   =3.1\r\n\
=====================================\r\n";

pub const WS85_FRAME: &[u8] = b"=====================================\r\n\
WS85 Ver:1.0.7\r\n\
FreqSel:868M\r\n\
WindDir      =120\r\n\
WindSpeed    =0.5\r\n\
WindGust     =1.1\r\n\
GXTS04Temp   =15.2\r\n\
Humi         =60\r\n\
UV_Value     =0.0\r\n\
Light        =100\r\n\
CapVoltage   =5.1\r\n\
BatVoltage   =3.2\r\n\
=====================================\r\n";

/// What ends the next call to [`LowPowerHal::enter_deep_sleep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimWake {
    /// The armed wake timer expires
    Timer,
    /// RX edge after the given ms, if external wake is enabled and the timer
    /// has not expired first
    External(Millis),
    /// Wake with no flag set after the given ms
    Spurious(Millis),
    /// Timer and RX edge in the same wake
    Both,
    /// Watchdog early warning after the given ms, if armed and the timer has
    /// not expired first
    Watchdog(Millis),
}

/// Watchdog configuration as last set through the HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockWatchdog {
    Off,
    Reset(WatchdogPeriod),
    Warning(WatchdogPeriod),
}

pub struct MockHal<'a> {
    signals: &'a WakeSignals,
    active_ms: Millis,
    micros: Cell<u64>,
    counter_ms: Millis,
    alarm_at: Option<Millis>,
    script: Deque<SimWake, 64>,
    sleep_entries: usize,
    watchdog: MockWatchdog,
    warning_arms: usize,
    external_wake: bool,
}

impl<'a> MockHal<'a> {
    pub fn new(signals: &'a WakeSignals) -> Self {
        Self {
            signals,
            active_ms: 0,
            micros: Cell::new(0),
            counter_ms: 0,
            alarm_at: None,
            script: Deque::new(),
            sleep_entries: 0,
            watchdog: MockWatchdog::Off,
            warning_arms: 0,
            external_wake: false,
        }
    }

    pub fn script(&mut self, wakes: &[SimWake]) {
        for wake in wakes {
            self.script.push_back(*wake).unwrap();
        }
    }

    /// Let active (awake) time pass.
    pub fn advance(&mut self, ms: Millis) {
        self.active_ms += ms;
        self.micros.set(self.micros.get() + ms * 1000);
    }

    pub fn sleep_entries(&self) -> usize {
        self.sleep_entries
    }

    pub fn watchdog(&self) -> MockWatchdog {
        self.watchdog
    }

    /// Times the early-warning mode was armed.
    pub fn warning_arms(&self) -> usize {
        self.warning_arms
    }

    pub fn external_wake(&self) -> bool {
        self.external_wake
    }

    fn fire_timer(&mut self) {
        let alarm = self.alarm_at.take().expect("deep sleep without an armed timer");
        self.counter_ms = self.counter_ms.max(alarm);
        self.signals.signal_timer();
    }
}

impl LowPowerHal for MockHal<'_> {
    fn millis(&self) -> Millis {
        self.active_ms
    }

    fn micros(&self) -> u64 {
        let now = self.micros.get() + 25;
        self.micros.set(now);
        now
    }

    fn arm_wake_timer(&mut self, counts: u16) {
        self.alarm_at = Some(self.counter_ms + (Millis::from(counts) + 1) * TIMER_TICK_MS);
    }

    fn disarm_wake_timer(&mut self) {
        self.alarm_at = None;
    }

    fn reset_time_counter(&mut self) {
        self.counter_ms = 0;
    }

    fn time_counter_ms(&self) -> Millis {
        self.counter_ms
    }

    fn enable_watchdog(&mut self, period: WatchdogPeriod) {
        self.watchdog = MockWatchdog::Reset(period);
    }

    fn enable_watchdog_warning(&mut self, window: WatchdogPeriod) {
        self.watchdog = MockWatchdog::Warning(window);
        self.warning_arms += 1;
    }

    fn feed_watchdog(&mut self) {}

    fn set_external_wake(&mut self, enabled: bool) {
        self.external_wake = enabled;
    }

    fn gate_peripherals(&mut self) {}

    fn restore_peripherals(&mut self) {}

    fn enter_deep_sleep(&mut self) {
        self.sleep_entries += 1;

        loop {
            match self.script.pop_front().unwrap_or(SimWake::Timer) {
                SimWake::Timer => self.fire_timer(),
                SimWake::Both => {
                    self.fire_timer();
                    self.signals.signal_external();
                }
                SimWake::External(after) => {
                    if self.sleep_through(after) {
                        // RX edges do not wake the core while the pin interrupt is off
                        if !self.external_wake {
                            continue;
                        }
                        self.signals.signal_external();
                    }
                }
                SimWake::Spurious(after) => {
                    self.sleep_through(after);
                }
                SimWake::Watchdog(after) => {
                    if !matches!(self.watchdog, MockWatchdog::Warning(_)) {
                        continue;
                    }
                    if self.sleep_through(after) {
                        // The warning handler stops the watchdog
                        self.watchdog = MockWatchdog::Off;
                        self.signals.signal_watchdog();
                    }
                }
            }
            return;
        }
    }
}

impl MockHal<'_> {
    /// Let `ms` pass asleep. Returns `false` if the timer expired first.
    fn sleep_through(&mut self, ms: Millis) -> bool {
        let target = self.counter_ms + ms;
        if self.alarm_at.is_some_and(|alarm| target >= alarm) {
            self.fire_timer();
            return false;
        }
        self.counter_ms = target;
        true
    }
}

/// Byte source that is always ready until its data runs out, except for an
/// optional gap in the middle of the data.
pub struct MockLink {
    data: Vec<u8, 4096>,
    pos: usize,
    /// Offset and number of `read_ready` polls the line stays quiet for
    pause: Option<(usize, usize)>,
}

impl MockLink {
    pub fn with(bytes: &[u8]) -> Self {
        let mut link = Self {
            data: Vec::new(),
            pos: 0,
            pause: None,
        };
        link.load(bytes);
        link
    }

    /// Queue another burst behind the unread data.
    pub fn load(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes).unwrap();
    }

    /// Go quiet for `polls` readiness checks once `offset` bytes were read.
    pub fn pause_at(&mut self, offset: usize, polls: usize) {
        self.pause = Some((offset, polls));
    }

    /// Bytes not read yet.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn pending_pause(&self) -> Option<usize> {
        self.pause
            .and_then(|(offset, polls)| (polls > 0 && self.pos <= offset).then_some(offset))
    }
}

impl embedded_io::ErrorType for MockLink {
    type Error = Infallible;
}

impl embedded_io::Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let end = self.pending_pause().unwrap_or(self.data.len());
        let rest = &self.data[self.pos..end];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl embedded_io::ReadReady for MockLink {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        if self.pending_pause() == Some(self.pos) {
            if let Some((_, polls)) = self.pause.as_mut() {
                *polls -= 1;
            }
            return Ok(false);
        }
        Ok(self.pos < self.data.len())
    }
}

#[derive(Default)]
pub struct MockRadio {
    pub sent: Vec<Broadcast, 32>,
    /// Report completion on the next poll
    pub completes: bool,
    pub sleeps: usize,
}

impl Transmitter for MockRadio {
    fn send(&mut self, message: &Broadcast) -> Result<(), RadioError> {
        self.sent
            .push(message.clone())
            .map_err(|_| RadioError::Transmit)
    }

    fn is_send_complete(&mut self) -> bool {
        self.completes
    }

    fn sleep(&mut self) {
        self.sleeps += 1;
    }
}

pub struct MockBattery {
    pub volts: f32,
    pub reads: usize,
}

impl Default for MockBattery {
    fn default() -> Self {
        Self {
            volts: 3.9,
            reads: 0,
        }
    }
}

impl BatteryMonitor for MockBattery {
    fn read_voltage(&mut self) -> f32 {
        self.reads += 1;
        self.volts
    }

    fn charger_status(&mut self) -> ChargerStatus {
        ChargerStatus::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    Start,
    Read,
    Reset,
    Stop,
}

#[derive(Default)]
pub struct MockCounter {
    /// Pulses reported by every read
    pub pulses: u32,
    pub ops: Vec<CounterOp, 32>,
}

impl PulseCounter for MockCounter {
    fn start(&mut self) {
        self.ops.push(CounterOp::Start).ok();
    }

    fn read(&mut self) -> u32 {
        self.ops.push(CounterOp::Read).ok();
        self.pulses
    }

    fn reset(&mut self) {
        self.ops.push(CounterOp::Reset).ok();
    }

    fn stop(&mut self) {
        self.ops.push(CounterOp::Stop).ok();
    }
}

#[derive(Default)]
pub struct MockVane {
    pub raw: u16,
}

impl WindVane for MockVane {
    fn read_raw(&mut self) -> u16 {
        self.raw
    }
}

/// Sensor supply switch; starts high (sensor off).
#[derive(Default)]
pub struct MockPin {
    pub low: bool,
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.low = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.low = false;
        Ok(())
    }
}

pub struct MockBoard<'a>(PhantomData<&'a ()>);

impl<'a> Board for MockBoard<'a> {
    type Hal = MockHal<'a>;
    type Link = MockLink;
    type Radio = MockRadio;
    type Battery = MockBattery;
    type Counter = MockCounter;
    type Vane = MockVane;
    type SensorPower = MockPin;
}

pub fn peripherals(signals: &WakeSignals) -> Peripherals<MockBoard<'_>> {
    Peripherals {
        hal: MockHal::new(signals),
        link: MockLink::with(b""),
        radio: MockRadio::default(),
        battery: MockBattery::default(),
        counter: MockCounter::default(),
        vane: MockVane::default(),
        sensor_power: MockPin::default(),
    }
}
