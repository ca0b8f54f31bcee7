//! Sleep-aware monotonic clock
//!
//! The MCU's millisecond tick stops while the core is in deep sleep, so the
//! station keeps its own notion of "time since boot" by adding every measured
//! sleep episode on top of the active tick.

/// Milliseconds since boot, including time spent asleep.
pub type Millis = u64;

/// Monotonic millisecond clock that survives deep sleep.
///
/// `now() = elapsed + sleep accumulator + slice offset`. The slice offset is
/// the provisional duration of a sleep episode that is still in progress
/// (samples captured mid-episode are stamped with it) and is folded into the
/// accumulator when the episode completes.
///
/// [`VirtualClock::advance_by`] is `pub(crate)`: the only caller is
/// [`crate::sleep::DeepSleepExecutor::finish`].
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    elapsed_ms: Millis,
    sleep_accumulator_ms: Millis,
    slice_offset_ms: Millis,
}

impl VirtualClock {
    pub const fn new() -> Self {
        Self {
            elapsed_ms: 0,
            sleep_accumulator_ms: 0,
            slice_offset_ms: 0,
        }
    }

    /// Current time in milliseconds since boot.
    pub fn now(&self) -> Millis {
        self.elapsed_ms + self.sleep_accumulator_ms + self.slice_offset_ms
    }

    /// Feed the free-running active tick counter.
    ///
    /// A reading below the last one is ignored.
    pub fn tick(&mut self, elapsed_ms: Millis) {
        if elapsed_ms > self.elapsed_ms {
            self.elapsed_ms = elapsed_ms;
        }
    }

    /// Provisional time spent in the sleep episode currently in progress.
    pub fn set_slice_offset(&mut self, offset_ms: Millis) {
        if offset_ms > self.slice_offset_ms {
            self.slice_offset_ms = offset_ms;
        }
    }

    pub fn slice_offset(&self) -> Millis {
        self.slice_offset_ms
    }

    /// Total time spent asleep since boot.
    pub fn slept(&self) -> Millis {
        self.sleep_accumulator_ms
    }

    /// Fold one completed sleep episode into the clock.
    ///
    /// `measured_ms` must be the duration read back from the hardware time
    /// counter, not the requested one. If a larger provisional offset was
    /// already published it wins, so `now()` never steps backwards.
    pub(crate) fn advance_by(&mut self, measured_ms: Millis) {
        let applied = measured_ms.max(self.slice_offset_ms);
        if applied != measured_ms {
            log::warn!(
                "Measured sleep {} ms below provisional offset {} ms",
                measured_ms,
                self.slice_offset_ms
            );
        }
        self.sleep_accumulator_ms += applied;
        self.slice_offset_ms = 0;
    }
}
