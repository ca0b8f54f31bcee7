//! Sleep budget planner
//!
//! Pure function from the station's schedule and battery state to the
//! length of the next sleep episode. Nothing here touches hardware, so every
//! rule is covered by plain unit tests.

use crate::broadcast::BroadcastSchedule;
use crate::clock::Millis;
use crate::power::BatteryState;

/// How the configured wind sensor constrains sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorCadence {
    None,
    /// Serial sensor; `has_data` once a frame arrived since the data was
    /// last invalidated
    Serial { has_data: bool },
    /// Pulse counter that must be read at least every `integration_ms`
    Pulse { integration_ms: Millis },
}

#[derive(Debug, Clone, Copy)]
pub struct PlannerInput<'a> {
    pub now: Millis,
    pub schedule: &'a BroadcastSchedule,
    pub last_radio_tx: Option<Millis>,
    pub radio_cooldown: Millis,
    pub battery: BatteryState,
    pub sensor: SensorCadence,
    /// Main loop iterations since the last wake
    pub idle_loops: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepBudgetPlanner {
    /// Sleep used while a serial sensor has produced no data yet
    pub no_data_sleep: Millis,
    /// Idle loops after which a zero budget is replaced by `busy_loop_floor`
    pub busy_loop_threshold: u32,
    pub busy_loop_floor: Millis,
    pub undervoltage_sleep: Millis,
}

impl Default for SleepBudgetPlanner {
    fn default() -> Self {
        Self {
            no_data_sleep: 12_000,
            busy_loop_threshold: 100,
            busy_loop_floor: 12_000,
            undervoltage_sleep: 1_800_000,
        }
    }
}

impl SleepBudgetPlanner {
    /// Milliseconds to sleep next. Zero means "do not sleep".
    pub fn plan(&self, input: &PlannerInput<'_>) -> Millis {
        let mut tts = if input.battery == BatteryState::Undervoltage {
            self.undervoltage_sleep
        } else {
            let tts = self.until_next_broadcast(input);
            match input.sensor {
                SensorCadence::Serial { has_data: false } => self.no_data_sleep,
                SensorCadence::Pulse { integration_ms } => tts.min(integration_ms),
                _ => tts,
            }
        };

        if tts == 0 && input.idle_loops > self.busy_loop_threshold {
            log::warn!("Looping without work for {} iterations, forcing sleep", input.idle_loops);
            tts = self.busy_loop_floor;
        }

        tts
    }

    fn until_next_broadcast(&self, input: &PlannerInput<'_>) -> Millis {
        let scale = input.battery.interval_scale();
        let Some(mut tts) = input
            .schedule
            .iter()
            .filter(|(_, entry)| entry.enabled())
            .map(|(_, entry)| entry.time_until_due(input.now, scale))
            .min()
        else {
            return 0;
        };

        if let Some(last_tx) = input.last_radio_tx {
            let since_tx = input.now.saturating_sub(last_tx);
            if since_tx + tts < input.radio_cooldown {
                tts += input.radio_cooldown - since_tx;
            }
        }

        tts
    }
}
