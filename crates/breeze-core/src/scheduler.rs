//! Station main loop
//!
//! [`Scheduler::poll`] is one iteration of the firmware's main loop. While
//! awake it sends whatever broadcasts are due and tracks the transmission in
//! flight; once the radio is idle it asks the planner for a budget and runs
//! one sleep cycle for the configured wind sensor:
//!
//! | Sensor | Sleep cycle |
//! |--------|-------------|
//! | none, or battery undervoltage | plain timed sleep |
//! | WS80 / WS85 (serial) | sleep on RX, capture a frame per wake, nap between frames |
//! | Davis 6410 (pulses) | integration window, early wakes ignored |

use embedded_hal::digital::OutputPin;

use crate::acquisition::{Acquisition, FrameAcquisitionSession, FrameReadings};
use crate::broadcast::{Broadcast, BroadcastSchedule, MessageKind, WeatherReport};
use crate::clock::{Millis, VirtualClock};
use crate::config::{StationConfig, WindSensorKind};
use crate::error::{Error, SleepError};
use crate::hal::{BatteryMonitor, Board, LowPowerHal, Peripherals, PulseCounter, Transmitter};
use crate::planner::{PlannerInput, SensorCadence, SleepBudgetPlanner};
use crate::power::{BatteryState, PowerMonitor};
use crate::pulse::PulseIntegrationWindow;
use crate::sleep::{DeepSleepExecutor, WakeReason, WakeSignals};
use crate::storage::{DEFAULT_GUST_RANK, StationHistory, StationSnapshot, WindHistoryStore};

/// No sleep before this much uptime.
pub const BOOT_GRACE_MS: Millis = 2_500;
/// A transmission not reported complete by then is abandoned.
pub const SEND_TIMEOUT_MS: Millis = 3_500;
/// A serial frame older than this cannot be broadcast.
pub const STALE_FRAME_MS: Millis = 9_000;
/// Awake time after a wake before the next sleep is allowed.
pub const WAKE_SETTLE_MS: Millis = 100;

/// Reported gust is lifted to the wind speed when it lags by more than this.
const GUST_LIFT_KMH: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Stayed awake this iteration
    Active,
    /// Ran one sleep cycle
    Slept { budget: Millis, slept: Millis },
}

pub struct Scheduler<'a, B: Board> {
    periph: Peripherals<B>,
    config: StationConfig,
    clock: VirtualClock,
    executor: DeepSleepExecutor<'a>,
    planner: SleepBudgetPlanner,
    schedule: BroadcastSchedule,
    session: FrameAcquisitionSession,
    pulse: PulseIntegrationWindow,
    wind: WindHistoryStore,
    station: StationHistory,
    power: PowerMonitor,
    last_frame: FrameReadings,
    idle_loops: u32,
    last_radio_tx: Option<Millis>,
    send_started: Option<Millis>,
    sleep_allowed_at: Option<Millis>,
}

impl<'a, B> Scheduler<'a, B>
where
    B: Board,
{
    /// Take ownership of the board and take the first battery reading.
    pub fn new(periph: Peripherals<B>, signals: &'a WakeSignals, config: StationConfig) -> Self {
        log::info!(
            "Station '{}': sensor {:?}, weather every {} ms",
            config.name,
            config.wind_sensor,
            config.broadcast.weather_ms
        );

        let mut scheduler = Self {
            executor: DeepSleepExecutor::new(signals, config.watchdog_period()),
            schedule: config.schedule(),
            session: FrameAcquisitionSession::new(config.wind_sensor.sensor_model()),
            power: PowerMonitor::new(config.power_thresholds()),
            periph,
            config,
            clock: VirtualClock::new(),
            planner: SleepBudgetPlanner::default(),
            pulse: PulseIntegrationWindow::default(),
            wind: WindHistoryStore::default(),
            station: StationHistory::new(),
            last_frame: FrameReadings::default(),
            idle_loops: 0,
            last_radio_tx: None,
            send_started: None,
            sleep_allowed_at: Some(WAKE_SETTLE_MS),
        };

        if let Some(period) = scheduler.config.watchdog_period() {
            scheduler.periph.hal.enable_watchdog(period);
        }
        scheduler.clock.tick(scheduler.periph.hal.millis());
        scheduler.read_battery(scheduler.clock.now());
        scheduler
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn schedule(&self) -> &BroadcastSchedule {
        &self.schedule
    }

    pub fn wind_history(&self) -> &WindHistoryStore {
        &self.wind
    }

    pub fn station_history(&self) -> &StationHistory {
        &self.station
    }

    pub fn power(&self) -> &PowerMonitor {
        &self.power
    }

    pub fn session(&self) -> &FrameAcquisitionSession {
        &self.session
    }

    pub fn peripherals(&self) -> &Peripherals<B> {
        &self.periph
    }

    pub fn peripherals_mut(&mut self) -> &mut Peripherals<B> {
        &mut self.periph
    }

    /// One main loop iteration.
    pub fn poll(&mut self) -> Result<PollOutcome, Error> {
        self.clock.tick(self.periph.hal.millis());
        self.idle_loops = self.idle_loops.saturating_add(1);
        let now = self.clock.now();

        if self.power.state() != BatteryState::Undervoltage {
            self.send_due(now);
        }
        self.track_transmission(now);
        self.save_history(now);

        if self.config.watchdog {
            self.periph.hal.feed_watchdog();
        }

        let sleep_allowed = self.sleep_allowed_at.is_some_and(|at| now > at);
        if self.send_started.is_some() || now <= BOOT_GRACE_MS || !sleep_allowed {
            return Ok(PollOutcome::Active);
        }

        let outcome = self.sleep_cycle(now);
        if matches!(outcome, Ok(PollOutcome::Slept { .. }) | Err(_)) {
            self.on_wake();
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Transmissions
    // ------------------------------------------------------------------

    fn radio_free(&self, now: Millis) -> bool {
        self.send_started.is_none()
            && self
                .last_radio_tx
                .is_none_or(|last| now.saturating_sub(last) > self.config.radio_cooldown_ms)
    }

    fn is_due(&self, kind: MessageKind, now: Millis) -> bool {
        self.radio_free(now)
            && self
                .schedule
                .is_due(kind, now, self.power.state().interval_scale())
    }

    fn send_due(&mut self, now: Millis) {
        if self.is_due(MessageKind::Identification, now) {
            let message = Broadcast::Identification(self.config.name.clone());
            self.transmit(now, &message);
        }

        if self.is_due(MessageKind::Weather, now) && self.weather_ready(now) {
            let report = self.weather_report(now);
            log::info!("Weather: {}", report);
            self.transmit(now, &Broadcast::Weather(report));
        }

        if self.is_due(MessageKind::Info, now) {
            let message = Broadcast::Info {
                battery_volts: self.power.volts().unwrap_or(0.0),
                charging: self.periph.battery.charger_status().charging,
            };
            self.transmit(now, &message);
        }
    }

    /// Whether the weather message has current data behind it. Drops a
    /// serial frame that went stale and lets the station sleep to catch a
    /// fresh one.
    fn weather_ready(&mut self, now: Millis) -> bool {
        if !self.config.wind_sensor.is_serial() {
            return true;
        }

        match self.session.last_complete_at() {
            Some(at) if now.saturating_sub(at) > STALE_FRAME_MS => {
                log::error!("Weather data stale ({} ms), sleeping", now - at);
                self.session.invalidate();
                self.sleep_allowed_at = Some(now + 1);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn transmit(&mut self, now: Millis, message: &Broadcast) {
        let kind = message.kind();
        match self.periph.radio.send(message) {
            Ok(()) => {
                log::info!("Sending {} message", kind.label());
                self.schedule.mark_sent(kind, now);
                self.last_radio_tx = Some(now);
                self.send_started = Some(now);
            }
            Err(e) => log::error!("Failed to send {} message: {}", kind.label(), e),
        }
    }

    fn track_transmission(&mut self, now: Millis) {
        let Some(started) = self.send_started else {
            return;
        };

        if now.saturating_sub(started) > SEND_TIMEOUT_MS {
            log::warn!("Send timed out");
        } else if !self.periph.radio.is_send_complete() {
            return;
        }

        self.send_started = None;
        self.sleep_allowed_at = Some(now + 1);
        self.periph.radio.sleep();
    }

    pub fn weather_report(&self, now: Millis) -> WeatherReport {
        let (wind_speed, direction) = self
            .wind
            .query_window(now, self.config.wind_age_ms)
            .map_or((0.0, 0), |w| (w.avg_wind, w.mean_direction));

        let mut wind_gust = self
            .wind
            .top_gust(now, self.config.gust_age_ms, DEFAULT_GUST_RANK);
        if wind_speed > wind_gust + GUST_LIFT_KMH {
            log::debug!("Lifting gust {:.1} to wind {:.1}", wind_gust, wind_speed);
            wind_gust = wind_speed;
        }

        let heading = (i32::from(direction) + self.config.heading_offset).rem_euclid(360);

        WeatherReport {
            heading: heading as u16,
            wind_speed,
            wind_gust,
            temperature: self.last_frame.temperature,
            humidity: self.last_frame.humidity,
            state_of_charge: self.power.state_of_charge(),
        }
    }

    // ------------------------------------------------------------------
    // Sleep
    // ------------------------------------------------------------------

    fn cadence(&self) -> SensorCadence {
        match self.config.wind_sensor {
            WindSensorKind::None => SensorCadence::None,
            WindSensorKind::Davis6410 => SensorCadence::Pulse {
                integration_ms: self.config.integration_ms,
            },
            _ => SensorCadence::Serial {
                has_data: self.session.last_complete_at().is_some(),
            },
        }
    }

    fn sleep_cycle(&mut self, now: Millis) -> Result<PollOutcome, Error> {
        let budget = self.planner.plan(&PlannerInput {
            now,
            schedule: &self.schedule,
            last_radio_tx: self.last_radio_tx,
            radio_cooldown: self.config.radio_cooldown_ms,
            battery: self.power.state(),
            sensor: self.cadence(),
            idle_loops: self.idle_loops,
        });
        if budget == 0 {
            return Ok(PollOutcome::Active);
        }

        log::info!("Will sleep for {} ms", budget);

        let undervoltage = self.power.state() == BatteryState::Undervoltage;
        let slept = match self.config.wind_sensor {
            WindSensorKind::Davis6410 if !undervoltage => self.pulse.run(
                &mut self.executor,
                &mut self.periph.hal,
                &mut self.periph.counter,
                &mut self.periph.vane,
                &mut self.clock,
                &mut self.wind,
                budget,
            )?
            .elapsed_ms,
            kind if kind.is_serial() && !undervoltage => self.listen_cycle(budget)?,
            _ => self
                .executor
                .sleep_for(&mut self.periph.hal, &mut self.clock, budget)?,
        };

        Ok(PollOutcome::Slept { budget, slept })
    }

    /// Sleep for `budget` with the sensor RX line as wake source, capturing a
    /// frame on every edge. After a complete frame the sensor is ignored for
    /// one frame period.
    fn listen_cycle(&mut self, budget: Millis) -> Result<Millis, SleepError> {
        self.periph.hal.set_external_wake(true);
        self.executor.arm(&mut self.periph.hal, budget)?;

        loop {
            let wake = self.executor.sleep(&mut self.periph.hal)?;
            self.clock.set_slice_offset(wake.elapsed_ms);
            let mut slice_done = wake.timer_fired;

            if wake.reason == WakeReason::ExternalSignal && self.capture_frame() && !slice_done {
                self.nap()?;
                slice_done = true;
            }

            if slice_done {
                let remaining = self.executor.remaining(&self.periph.hal);
                if remaining == 0 {
                    break;
                }
                self.executor.rearm(&mut self.periph.hal, remaining)?;
                self.periph.hal.set_external_wake(true);
            }
        }

        self.executor.finish(&mut self.periph.hal, &mut self.clock)
    }

    /// Listen for one burst. Returns `true` if a complete frame was committed.
    fn capture_frame(&mut self) -> bool {
        let now = self.clock.now();
        match self
            .session
            .listen(&self.periph.hal, &mut self.periph.link, now)
        {
            Ok(Acquisition::Complete(readings)) => {
                self.wind.record(
                    now,
                    readings.wind_speed,
                    readings.wind_gust,
                    readings.wind_dir,
                );
                self.last_frame = readings;
                true
            }
            Ok(Acquisition::Timeout) => false,
            Err(e) => {
                log::error!("Sensor read failed: {}", e);
                false
            }
        }
    }

    /// Sleep through the gap until the next frame without RX wakes.
    fn nap(&mut self) -> Result<(), SleepError> {
        let remaining = self.executor.remaining(&self.periph.hal);
        if remaining == 0 {
            return Ok(());
        }
        let nap = self
            .session
            .model()
            .frame_period_ms()
            .map_or(remaining, |period| period.min(remaining));

        self.periph.hal.set_external_wake(false);
        self.executor.rearm(&mut self.periph.hal, nap)?;
        loop {
            let wake = self.executor.sleep(&mut self.periph.hal)?;
            self.clock.set_slice_offset(wake.elapsed_ms);
            if wake.timer_fired {
                return Ok(());
            }
        }
    }

    // ------------------------------------------------------------------
    // Wake bookkeeping
    // ------------------------------------------------------------------

    fn on_wake(&mut self) {
        self.idle_loops = 0;
        self.clock.tick(self.periph.hal.millis());
        let now = self.clock.now();
        log::info!(
            "Wakeup at {} ms, source {}",
            now,
            self.executor.take_wake_reason().label()
        );

        self.read_battery(now);
        self.sleep_allowed_at = Some(now + WAKE_SETTLE_MS);
    }

    fn read_battery(&mut self, now: Millis) {
        if !self.power.should_read(now) {
            return;
        }

        let volts = self.periph.battery.read_voltage();
        let charger = self.periph.battery.charger_status();
        let reading = self.power.update(now, volts, charger.done);
        log::info!(
            "Battery {:.2} V ({}%, {})",
            reading.volts,
            reading.state_of_charge,
            reading.state
        );

        // The supply switch is active low
        let switched = if reading.sensor_powered {
            self.periph.sensor_power.set_low()
        } else {
            self.periph.sensor_power.set_high()
        };
        if switched.is_err() {
            log::error!("Failed to switch wind sensor supply");
        }

        if reading.state == BatteryState::Undervoltage
            && self.config.wind_sensor == WindSensorKind::Davis6410
        {
            self.periph.counter.stop();
        }
    }

    fn save_history(&mut self, now: Millis) {
        let charger = self.periph.battery.charger_status();
        let snapshot = StationSnapshot {
            wind_kmh: self
                .wind
                .query_window(now, self.config.wind_age_ms)
                .map_or(0.0, |w| w.avg_wind),
            temperature_c: self.last_frame.temperature.unwrap_or(0.0),
            humidity: self.last_frame.humidity.unwrap_or(0),
            light_lux: self.last_frame.light_lux.unwrap_or(0),
            battery_volts: self.power.volts().unwrap_or(0.0),
            pv_charging: charger.charging,
            pv_done: charger.done,
        };
        self.station.save(now, &snapshot);
    }
}
