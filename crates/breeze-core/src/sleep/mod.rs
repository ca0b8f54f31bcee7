//! Deep-sleep executor
//!
//! Owns the `Idle → Armed → Asleep → Woken → Idle` state machine around the
//! MCU's deepest sleep mode. One *episode* starts with [`DeepSleepExecutor::arm`]
//! and ends with [`DeepSleepExecutor::finish`], which is the only place where
//! time spent asleep is added to the [`VirtualClock`]. In between, the
//! episode may be woken and put back to sleep many times.
//!
//! | From | To | Via |
//! |------|----|-----|
//! | Idle | Armed | `arm` |
//! | Armed | Asleep → Woken | `sleep` |
//! | Woken | Asleep → Woken | `sleep` (timer still pending) |
//! | Woken | Armed | `rearm` |
//! | Armed, Woken | Idle | `finish` |

pub mod timing;
pub mod wake;

pub use timing::{MAX_SLICE_MS, TIMER_TICK_MS, TimerSetting, WatchdogPeriod, quantize_timer};
pub use wake::{WakeFlags, WakeSignals};

use crate::clock::{Millis, VirtualClock};
use crate::error::SleepError;
use crate::hal::LowPowerHal;

/// Wakes with no source flagged tolerated by [`DeepSleepExecutor::sleep_for`].
pub const MAX_SPURIOUS_WAKES: u32 = 16;

/// Early-warning window of the watchdog while asleep. Bounds every single
/// deep sleep, including one whose wake timer never fires.
pub const SLEEP_WATCHDOG_WINDOW: WatchdogPeriod = WatchdogPeriod::MAX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WakeReason {
    #[default]
    None,
    TimerExpired,
    ExternalSignal,
    WatchdogWarning,
}

impl WakeReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::TimerExpired => "RTC",
            Self::ExternalSignal => "EIC",
            Self::WatchdogWarning => "WDT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepState {
    Idle,
    Armed,
    Asleep,
    Woken(WakeReason),
}

/// Result of one [`DeepSleepExecutor::sleep`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wake {
    pub reason: WakeReason,
    /// Time counter reading since the episode was armed
    pub elapsed_ms: Millis,
    /// The currently armed timer slice has expired, even if another source
    /// was reported as the reason
    pub timer_fired: bool,
    /// No wake source flagged at all, not even the watchdog warning
    pub spurious: bool,
}

pub struct DeepSleepExecutor<'a> {
    signals: &'a WakeSignals,
    state: SleepState,
    watchdog: Option<WatchdogPeriod>,
    budget_ms: Millis,
    timer_fired: bool,
    last_reason: WakeReason,
}

impl<'a> DeepSleepExecutor<'a> {
    pub fn new(signals: &'a WakeSignals, watchdog: Option<WatchdogPeriod>) -> Self {
        Self {
            signals,
            state: SleepState::Idle,
            watchdog,
            budget_ms: 0,
            timer_fired: false,
            last_reason: WakeReason::None,
        }
    }

    pub fn state(&self) -> SleepState {
        self.state
    }

    /// Reason of the most recent wake. Cleared by [`Self::take_wake_reason`].
    pub fn wake_reason(&self) -> WakeReason {
        self.last_reason
    }

    pub fn take_wake_reason(&mut self) -> WakeReason {
        core::mem::take(&mut self.last_reason)
    }

    fn invalid(&self, action: &'static str) -> SleepError {
        SleepError::InvalidTransition {
            from: self.state,
            action,
        }
    }

    /// Start an episode of `budget_ms`. Resets the time counter and arms the
    /// first timer slice. An enabled watchdog is switched to early-warning
    /// mode for the episode. Returns the duration actually armed.
    pub fn arm<H: LowPowerHal>(
        &mut self,
        hal: &mut H,
        budget_ms: Millis,
    ) -> Result<Millis, SleepError> {
        if self.state != SleepState::Idle {
            return Err(self.invalid("arm"));
        }

        // Drop flags left over from the active phase
        self.signals.take();

        if self.watchdog.is_some() {
            hal.enable_watchdog_warning(SLEEP_WATCHDOG_WINDOW);
        }
        hal.reset_time_counter();
        self.budget_ms = budget_ms;

        let armed = self.arm_slice(hal, budget_ms);
        log::debug!("Sleep armed: budget {} ms, slice {} ms", budget_ms, armed);
        Ok(armed)
    }

    /// Arm a new timer slice inside the running episode without resetting the
    /// time counter.
    pub fn rearm<H: LowPowerHal>(
        &mut self,
        hal: &mut H,
        slice_ms: Millis,
    ) -> Result<Millis, SleepError> {
        match self.state {
            SleepState::Armed | SleepState::Woken(_) => Ok(self.arm_slice(hal, slice_ms)),
            _ => Err(self.invalid("rearm")),
        }
    }

    fn arm_slice<H: LowPowerHal>(&mut self, hal: &mut H, slice_ms: Millis) -> Millis {
        let setting = quantize_timer(slice_ms);
        hal.arm_wake_timer(setting.counts);
        self.timer_fired = false;
        self.state = SleepState::Armed;
        setting.armed_ms
    }

    /// Enter deep sleep until any enabled wake source fires.
    ///
    /// Allowed from `Armed`, and from `Woken` while the armed slice has not
    /// expired yet.
    pub fn sleep<H: LowPowerHal>(&mut self, hal: &mut H) -> Result<Wake, SleepError> {
        match self.state {
            SleepState::Armed => {}
            SleepState::Woken(_) if !self.timer_fired => {}
            _ => return Err(self.invalid("sleep")),
        }

        self.state = SleepState::Asleep;
        hal.gate_peripherals();
        hal.enter_deep_sleep();
        hal.restore_peripherals();

        let flags = self.signals.take();
        if flags.timer {
            self.timer_fired = true;
        }
        if flags.watchdog && self.watchdog.is_some() {
            // The warning handler stopped the watchdog
            hal.enable_watchdog_warning(SLEEP_WATCHDOG_WINDOW);
        }

        let reason = if flags.external {
            WakeReason::ExternalSignal
        } else if flags.timer {
            WakeReason::TimerExpired
        } else {
            WakeReason::WatchdogWarning
        };

        self.state = SleepState::Woken(reason);
        self.last_reason = reason;

        let elapsed_ms = hal.time_counter_ms();
        log::trace!("Woken by {} after {} ms", reason.label(), elapsed_ms);

        Ok(Wake {
            reason,
            elapsed_ms,
            timer_fired: self.timer_fired,
            spurious: flags.is_empty(),
        })
    }

    /// Part of the episode budget not yet slept.
    pub fn remaining<H: LowPowerHal>(&self, hal: &H) -> Millis {
        self.budget_ms.saturating_sub(hal.time_counter_ms())
    }

    /// Close the episode and add the measured sleep time to `clock`.
    ///
    /// This is the only path that advances the clock by slept time, and it
    /// runs once per episode since it returns the executor to `Idle`.
    pub fn finish<H: LowPowerHal>(
        &mut self,
        hal: &mut H,
        clock: &mut VirtualClock,
    ) -> Result<Millis, SleepError> {
        match self.state {
            SleepState::Armed | SleepState::Woken(_) => {}
            _ => return Err(self.invalid("finish")),
        }

        // The time counter also ran through any awake bursts between wakes,
        // which the active tick counted as well. Both are kept, as on the
        // hardware, so `now()` can run slightly ahead after listen cycles.
        let measured = hal.time_counter_ms();
        hal.disarm_wake_timer();
        hal.set_external_wake(false);
        if let Some(period) = self.watchdog {
            hal.enable_watchdog(period);
        }

        clock.advance_by(measured);
        self.state = SleepState::Idle;
        self.timer_fired = false;
        log::debug!("Slept {} ms of {} ms budget", measured, self.budget_ms);
        Ok(measured)
    }

    /// After a timer expiry, re-arm whatever is left of the budget. Returns
    /// `false` once the budget is used up.
    fn continue_after_timer<H: LowPowerHal>(&mut self, hal: &mut H) -> Result<bool, SleepError> {
        let remaining = self.remaining(hal);
        if remaining == 0 {
            return Ok(false);
        }
        self.rearm(hal, remaining)?;
        Ok(true)
    }

    /// Plain sleep of `duration_ms`, re-sleeping after early wakes.
    ///
    /// Watchdog warnings and external edges just put the core back to sleep.
    /// Gives up after [`MAX_SPURIOUS_WAKES`] wakes with no source flagged;
    /// the time slept so far is still applied to `clock`.
    pub fn sleep_for<H: LowPowerHal>(
        &mut self,
        hal: &mut H,
        clock: &mut VirtualClock,
        duration_ms: Millis,
    ) -> Result<Millis, SleepError> {
        self.arm(hal, duration_ms)?;

        let mut spurious = 0;
        loop {
            let wake = self.sleep(hal)?;
            if wake.timer_fired {
                if !self.continue_after_timer(hal)? {
                    break;
                }
                continue;
            }
            if !wake.spurious {
                log::trace!("Ignoring {} wake in plain sleep", wake.reason.label());
                continue;
            }

            spurious += 1;
            if spurious >= MAX_SPURIOUS_WAKES {
                log::warn!("{} spurious wakes, abandoning sleep", spurious);
                self.finish(hal, clock)?;
                return Err(SleepError::TooManySpuriousWakes(spurious));
            }
        }

        self.finish(hal, clock)
    }

    /// Sleep until the wake timer has covered `duration_ms`, discarding every
    /// other wake source.
    ///
    /// Used for integration windows, where waking early would shorten the
    /// measurement.
    pub fn sleep_until_timer<H: LowPowerHal>(
        &mut self,
        hal: &mut H,
        clock: &mut VirtualClock,
        duration_ms: Millis,
    ) -> Result<Millis, SleepError> {
        self.arm(hal, duration_ms)?;

        loop {
            let wake = self.sleep(hal)?;
            if !wake.timer_fired {
                log::trace!("Ignoring {} wake in integration window", wake.reason.label());
                continue;
            }
            if !self.continue_after_timer(hal)? {
                break;
            }
        }

        self.finish(hal, clock)
    }
}
