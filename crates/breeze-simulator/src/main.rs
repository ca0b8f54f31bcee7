//! Desktop simulator for the breeze wind station core.
//!
//! Runs the breeze-core [`Scheduler`] against a simulated board in virtual
//! time, so hours of duty cycling finish in seconds. The simulated world
//! keeps its own true clock; the station's [`breeze_core::VirtualClock`] is
//! checked against it at the end of the run.
//!
//! # Usage
//!
//! ```text
//! breeze-simulator [SETTINGS_FILE] [HOURS]
//! ```
//!
//! | Argument        | Default                                 |
//! |-----------------|-----------------------------------------|
//! | `SETTINGS_FILE` | built-in WS80 station settings          |
//! | `HOURS`         | 6                                       |
//!
//! Set `RUST_LOG=info` (or `debug`/`trace`) to follow the main loop.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::f64::consts::TAU;
use std::rc::Rc;

use log::{error, info};

use breeze_core::broadcast::Broadcast;
use breeze_core::error::RadioError;
use breeze_core::hal::{
    BatteryMonitor, Board, ChargerStatus, LowPowerHal, Peripherals, PulseCounter, Transmitter,
    WindVane,
};
use breeze_core::pulse::DAVIS_6410_KMH_MS;
use breeze_core::sleep::{TIMER_TICK_MS, WakeSignals, WatchdogPeriod};
use breeze_core::{Millis, PollOutcome, Scheduler, StationConfig};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Used when no settings file is given.
const DEFAULT_SETTINGS: &str = "\
NAME=Sim Ridge
SENSOR_WSXX=1
BROADCAST_INTERVAL_WEATHER=40
BROADCAST_INTERVAL_NAME=300
BROADCAST_INTERVAL_INFO=0
WDT=1
";

const DEFAULT_HOURS: u64 = 6;

/// Awake time consumed by one main loop iteration.
const LOOP_COST_US: u64 = 2_000;

/// Time on the wire per byte at 115200 baud. Each `micros()` read while
/// capturing advances the world by this much.
const BYTE_TIME_US: u64 = 87;

/// WS80 frame period.
const FRAME_PERIOD_US: u64 = 4_750_000;

/// Radio airtime of one message.
const AIRTIME_US: u64 = 250_000;

const DAY_US: f64 = 24.0 * 3600.0 * 1e6;

/// Set from the timer and pin "interrupts" of the simulated board.
static SIGNALS: WakeSignals = WakeSignals::new();

// ---------------------------------------------------------------------------
// Simulated world
// ---------------------------------------------------------------------------

/// Shared physical state behind all simulated peripherals.
struct World {
    /// True time since boot
    now_us: u64,
    /// Time the MCU spent awake
    active_us: u64,
    /// True time of the last time counter reset
    counter_base_us: u64,
    /// Wake timer compare point, in time counter ms
    alarm_at_ms: Option<Millis>,
    external_wake: bool,
    /// Early-warning window while the watchdog is in sleep mode
    watchdog_warning_ms: Option<Millis>,
    watchdog_warnings: u32,
    sensor_powered: bool,
    next_frame_us: u64,
    rx: VecDeque<u8>,
    frames_sent: u32,
    frames_missed: u32,
    counter_since_us: Option<u64>,
    radio_busy_until_us: Option<u64>,
    broadcasts: u32,
    slept_us: u64,
    sleep_entries: u32,
}

type Shared = Rc<RefCell<World>>;

impl World {
    fn new() -> Self {
        Self {
            now_us: 0,
            active_us: 0,
            counter_base_us: 0,
            alarm_at_ms: None,
            external_wake: false,
            watchdog_warning_ms: None,
            watchdog_warnings: 0,
            sensor_powered: false,
            next_frame_us: FRAME_PERIOD_US,
            rx: VecDeque::new(),
            frames_sent: 0,
            frames_missed: 0,
            counter_since_us: None,
            radio_busy_until_us: None,
            broadcasts: 0,
            slept_us: 0,
            sleep_entries: 0,
        }
    }

    fn secs(&self) -> f64 {
        self.now_us as f64 / 1e6
    }

    /// Wind speed in m/s.
    fn wind_speed(&self) -> f64 {
        let t = self.secs();
        (4.0 + 3.0 * (t / 600.0).sin() + 0.8 * (t / 47.0).cos()).max(0.0)
    }

    fn wind_direction(&self) -> f64 {
        let t = self.secs();
        (200.0 + 40.0 * (t / 900.0).sin()).rem_euclid(360.0)
    }

    /// Solar day: the cell charges around noon and sags overnight.
    fn battery_volts(&self) -> f64 {
        3.75 + 0.45 * (TAU * self.now_us as f64 / DAY_US).sin()
    }

    fn time_counter_ms(&self) -> Millis {
        (self.now_us - self.counter_base_us) / 1000
    }

    fn advance_awake(&mut self, us: u64) {
        self.now_us += us;
        self.active_us += us;
        self.skip_frames();
    }

    /// Frames sent while nobody listens are lost.
    fn skip_frames(&mut self) {
        while self.next_frame_us <= self.now_us {
            if self.sensor_powered {
                self.frames_missed += 1;
            }
            self.next_frame_us += FRAME_PERIOD_US;
        }
    }

    fn emit_frame(&mut self) {
        let frame = format!(
            "=====================================\r\n\
             WH80 Ver:1.2.5\r\n\
             FreqSel:868M\r\n\
             WindDir      ={:.0}\r\n\
             WindSpeed    ={:.1}\r\n\
             WindGust     ={:.1}\r\n\
             Temperature  ={:.1}\r\n\
             Humi         ={}\r\n\
             Light        ={}\r\n\
             UV_Value     =0.3\r\n\
             BatVoltage   =3.0\r\n\
             =====================================\r\n",
            self.wind_direction(),
            self.wind_speed(),
            self.wind_speed() * 1.4,
            14.0 + 4.0 * (TAU * self.now_us as f64 / DAY_US).sin(),
            65,
            12_000,
        );
        self.rx.extend(frame.bytes());
        self.frames_sent += 1;
        self.next_frame_us += FRAME_PERIOD_US;
    }

    /// Sleep until the wake timer, the watchdog early warning or, if
    /// enabled, the next sensor frame.
    fn deep_sleep(&mut self) {
        self.sleep_entries += 1;
        let start = self.now_us;

        let alarm_us = self
            .alarm_at_ms
            .map_or(u64::MAX, |ms| self.counter_base_us + ms * 1000);
        let warning_us = self
            .watchdog_warning_ms
            .map_or(u64::MAX, |ms| start + ms * 1000);

        if alarm_us == u64::MAX && warning_us == u64::MAX {
            error!("Deep sleep without any wake source, waking after 1 s");
            self.now_us += 1_000_000;
            self.skip_frames();
        } else if warning_us < alarm_us
            && !(self.external_wake && self.sensor_powered && self.next_frame_us < warning_us)
        {
            self.now_us = warning_us;
            self.watchdog_warning_ms = None;
            self.watchdog_warnings += 1;
            self.skip_frames();
            SIGNALS.signal_watchdog();
        } else if self.external_wake && self.sensor_powered && self.next_frame_us < alarm_us {
            self.now_us = self.next_frame_us;
            self.emit_frame();
            SIGNALS.signal_external();
        } else {
            self.now_us = self.now_us.max(alarm_us);
            self.alarm_at_ms = None;
            self.skip_frames();
            SIGNALS.signal_timer();
        }

        self.slept_us += self.now_us - start;
    }
}

// ---------------------------------------------------------------------------
// Simulated peripherals
// ---------------------------------------------------------------------------

struct SimHal(Shared);

impl LowPowerHal for SimHal {
    fn millis(&self) -> Millis {
        self.0.borrow().active_us / 1000
    }

    fn micros(&self) -> u64 {
        let mut world = self.0.borrow_mut();
        world.advance_awake(BYTE_TIME_US);
        world.active_us
    }

    fn arm_wake_timer(&mut self, counts: u16) {
        let mut world = self.0.borrow_mut();
        let at = world.time_counter_ms() + (Millis::from(counts) + 1) * TIMER_TICK_MS;
        world.alarm_at_ms = Some(at);
    }

    fn disarm_wake_timer(&mut self) {
        self.0.borrow_mut().alarm_at_ms = None;
    }

    fn reset_time_counter(&mut self) {
        let mut world = self.0.borrow_mut();
        world.counter_base_us = world.now_us;
    }

    fn time_counter_ms(&self) -> Millis {
        self.0.borrow().time_counter_ms()
    }

    fn enable_watchdog(&mut self, period: WatchdogPeriod) {
        log::trace!("[board] watchdog reset mode, {} ms", period.as_ms());
        self.0.borrow_mut().watchdog_warning_ms = None;
    }

    fn enable_watchdog_warning(&mut self, window: WatchdogPeriod) {
        log::trace!("[board] watchdog warning mode, {} ms", window.as_ms());
        self.0.borrow_mut().watchdog_warning_ms = Some(Millis::from(window.as_ms()));
    }

    fn feed_watchdog(&mut self) {}

    fn set_external_wake(&mut self, enabled: bool) {
        self.0.borrow_mut().external_wake = enabled;
    }

    fn gate_peripherals(&mut self) {}

    fn restore_peripherals(&mut self) {}

    fn enter_deep_sleep(&mut self) {
        self.0.borrow_mut().deep_sleep();
    }
}

struct SimLink(Shared);

impl embedded_io::ErrorType for SimLink {
    type Error = Infallible;
}

impl embedded_io::Read for SimLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut world = self.0.borrow_mut();
        let mut n = 0;
        while n < buf.len() {
            let Some(byte) = world.rx.pop_front() else {
                break;
            };
            buf[n] = byte;
            n += 1;
        }
        Ok(n)
    }
}

impl embedded_io::ReadReady for SimLink {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.borrow().rx.is_empty())
    }
}

struct SimRadio(Shared);

impl Transmitter for SimRadio {
    fn send(&mut self, message: &Broadcast) -> Result<(), RadioError> {
        let mut world = self.0.borrow_mut();
        if world
            .radio_busy_until_us
            .is_some_and(|until| world.now_us < until)
        {
            return Err(RadioError::Busy);
        }

        match message {
            Broadcast::Weather(report) => info!("[radio] weather {}", report),
            Broadcast::Identification(name) => info!("[radio] ident '{}'", name),
            Broadcast::Info {
                battery_volts,
                charging,
            } => info!("[radio] info {:.2} V charging={}", battery_volts, charging),
        }
        world.radio_busy_until_us = Some(world.now_us + AIRTIME_US);
        world.broadcasts += 1;
        Ok(())
    }

    fn is_send_complete(&mut self) -> bool {
        let world = self.0.borrow();
        world
            .radio_busy_until_us
            .is_none_or(|until| world.now_us >= until)
    }

    fn sleep(&mut self) {
        self.0.borrow_mut().radio_busy_until_us = None;
    }
}

struct SimBattery(Shared);

impl BatteryMonitor for SimBattery {
    fn read_voltage(&mut self) -> f32 {
        self.0.borrow().battery_volts() as f32
    }

    fn charger_status(&mut self) -> ChargerStatus {
        let world = self.0.borrow();
        let phase = TAU * world.now_us as f64 / DAY_US;
        ChargerStatus {
            charging: phase.cos() > 0.0,
            done: world.battery_volts() > 4.15,
        }
    }
}

/// Davis anemometer counter fed from the simulated wind.
struct SimCounter(Shared);

impl PulseCounter for SimCounter {
    fn start(&mut self) {
        let mut world = self.0.borrow_mut();
        if world.counter_since_us.is_none() {
            world.counter_since_us = Some(world.now_us);
        }
    }

    fn read(&mut self) -> u32 {
        let world = self.0.borrow();
        let Some(since) = world.counter_since_us else {
            return 0;
        };
        let elapsed_ms = (world.now_us - since) as f64 / 1000.0;
        let kmh = world.wind_speed() * 3.6;
        (kmh * elapsed_ms / f64::from(DAVIS_6410_KMH_MS)) as u32
    }

    fn reset(&mut self) {
        let mut world = self.0.borrow_mut();
        if world.counter_since_us.is_some() {
            world.counter_since_us = Some(world.now_us);
        }
    }

    fn stop(&mut self) {
        self.0.borrow_mut().counter_since_us = None;
    }
}

struct SimVane(Shared);

impl WindVane for SimVane {
    fn read_raw(&mut self) -> u16 {
        (self.0.borrow().wind_direction() / 360.0 * 1023.0) as u16
    }
}

/// Active-low wind sensor supply switch.
struct SimSupply(Shared);

impl embedded_hal::digital::ErrorType for SimSupply {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for SimSupply {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().sensor_powered = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut world = self.0.borrow_mut();
        if world.sensor_powered {
            info!("[board] wind sensor supply off");
        }
        world.sensor_powered = false;
        Ok(())
    }
}

struct SimBoard;

impl Board for SimBoard {
    type Hal = SimHal;
    type Link = SimLink;
    type Radio = SimRadio;
    type Battery = SimBattery;
    type Counter = SimCounter;
    type Vane = SimVane;
    type SensorPower = SimSupply;
}

fn build_board(world: &Shared) -> Peripherals<SimBoard> {
    Peripherals {
        hal: SimHal(world.clone()),
        link: SimLink(world.clone()),
        radio: SimRadio(world.clone()),
        battery: SimBattery(world.clone()),
        counter: SimCounter(world.clone()),
        vane: SimVane(world.clone()),
        sensor_power: SimSupply(world.clone()),
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

fn load_config(path: Option<&String>) -> StationConfig {
    let Some(path) = path else {
        return StationConfig::parse_settings(DEFAULT_SETTINGS);
    };

    match std::fs::read_to_string(path) {
        Ok(text) => StationConfig::parse_settings(&text),
        Err(e) => {
            error!("Cannot read {}: {}, using built-in settings", path, e);
            StationConfig::parse_settings(DEFAULT_SETTINGS)
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let config = load_config(args.get(1));
    let hours = args
        .get(2)
        .and_then(|h| h.parse::<u64>().ok())
        .unwrap_or(DEFAULT_HOURS);
    let end_us = hours * 3600 * 1_000_000;

    info!("Starting breeze simulator for {} h", hours);

    let world: Shared = Rc::new(RefCell::new(World::new()));
    let mut station = Scheduler::new(build_board(&world), &SIGNALS, config);

    let mut cycles = 0_u32;
    let mut errors = 0_u32;

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    while world.borrow().now_us < end_us {
        match station.poll() {
            Ok(PollOutcome::Active) => {}
            Ok(PollOutcome::Slept { .. }) => cycles += 1,
            Err(e) => {
                errors += 1;
                error!("Main loop: {}", e);
            }
        }
        world.borrow_mut().advance_awake(LOOP_COST_US);
    }

    // -----------------------------------------------------------------------
    // Summary
    // -----------------------------------------------------------------------
    let world = world.borrow();
    let true_ms = world.now_us / 1000;
    let station_ms = station.clock().now();
    let awake = world.active_us as f64 / world.now_us.max(1) as f64 * 100.0;

    println!("simulated      {:.2} h", world.now_us as f64 / 3.6e9);
    println!(
        "awake          {:.2} % ({:.1} s asleep)",
        awake,
        world.slept_us as f64 / 1e6
    );
    println!("sleep cycles   {} ({} deep sleep entries)", cycles, world.sleep_entries);
    println!(
        "frames         {} heard, {} missed",
        world.frames_sent, world.frames_missed
    );
    println!("broadcasts     {}", world.broadcasts);
    println!("wdt warnings   {}", world.watchdog_warnings);
    println!("errors         {}", errors);
    println!(
        "clock          station {} ms, true {} ms, drift {} ms",
        station_ms,
        true_ms,
        true_ms as i64 - station_ms as i64
    );
    println!("battery        {}", station.power().state());
    if let Some(entry) = station.station_history().latest() {
        println!("last history   {:?}", entry);
    }
}
