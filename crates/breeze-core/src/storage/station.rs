//! Slow station history used by the heater and trend consumers.

use crate::clock::Millis;

/// Minimum spacing between two saved entries.
///
/// Together with [`HISTORY_LEN`] this covers 3 hours, not the 15 days the
/// length was sized for. Both values are kept until the consumers agree on
/// which one is intended.
pub const HISTORY_INTERVAL_MS: Millis = 30_000;

/// 15 days × 24 entries.
pub const HISTORY_LEN: usize = 15 * 24;

/// Readings handed to [`StationHistory::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StationSnapshot {
    pub wind_kmh: f32,
    pub temperature_c: f32,
    pub humidity: i32,
    pub light_lux: i32,
    pub battery_volts: f32,
    pub pv_charging: bool,
    pub pv_done: bool,
}

/// Compact fixed-point history entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryEntry {
    /// km/h × 10
    pub wind: i16,
    /// °C
    pub temperature: i16,
    /// %RH
    pub humidity: i16,
    /// lux / 100
    pub light: i16,
    /// (V - 2) × 100
    pub battery: i16,
    pub pv_charging: bool,
    pub pv_done: bool,
}

impl From<&StationSnapshot> for HistoryEntry {
    fn from(s: &StationSnapshot) -> Self {
        Self {
            wind: saturate(s.wind_kmh * 10.0),
            temperature: saturate(s.temperature_c),
            humidity: saturate(s.humidity as f32),
            light: saturate(s.light_lux as f32 / 100.0),
            battery: saturate((s.battery_volts - 2.0) * 100.0),
            pv_charging: s.pv_charging,
            pv_done: s.pv_done,
        }
    }
}

fn saturate(value: f32) -> i16 {
    // `as` saturates on overflow and maps NaN to 0
    libm::roundf(value) as i16
}

pub struct StationHistory {
    entries: [Option<HistoryEntry>; HISTORY_LEN],
    cursor: usize,
    last_saved: Millis,
}

impl Default for StationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl StationHistory {
    pub fn new() -> Self {
        Self {
            entries: [None; HISTORY_LEN],
            cursor: 0,
            last_saved: 0,
        }
    }

    /// Store a snapshot if more than [`HISTORY_INTERVAL_MS`] passed since the
    /// last one (or since boot). Returns whether an entry was written.
    pub fn save(&mut self, now: Millis, snapshot: &StationSnapshot) -> bool {
        if now.saturating_sub(self.last_saved) <= HISTORY_INTERVAL_MS {
            return false;
        }

        self.last_saved = now;
        self.cursor = (self.cursor + 1) % HISTORY_LEN;
        let entry = HistoryEntry::from(snapshot);
        self.entries[self.cursor] = Some(entry);

        log::debug!(
            "History[{}] wind={} temp={} light={} batt={}",
            self.cursor,
            entry.wind,
            entry.temperature,
            entry.light,
            entry.battery
        );
        true
    }

    /// Newest entry, if any was saved.
    pub fn latest(&self) -> Option<HistoryEntry> {
        self.entries[self.cursor]
    }

    /// Newest-first walk over at most `n` slots.
    fn newest(&self, n: usize) -> impl Iterator<Item = &HistoryEntry> {
        let n = n.min(HISTORY_LEN);
        (0..n)
            .map(move |back| (self.cursor + HISTORY_LEN - back) % HISTORY_LEN)
            .filter_map(|i| self.entries[i].as_ref())
    }

    /// Sum of stored wind (km/h × 10) over the newest `n` slots.
    pub fn sum_wind(&self, n: usize) -> i32 {
        self.newest(n).map(|e| i32::from(e.wind)).sum()
    }

    /// Sum of stored light (lux / 100) over the newest `n` slots.
    pub fn sum_light(&self, n: usize) -> i32 {
        self.newest(n).map(|e| i32::from(e.light)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(wind: f32, lux: i32) -> StationSnapshot {
        StationSnapshot {
            wind_kmh: wind,
            light_lux: lux,
            battery_volts: 3.9,
            ..Default::default()
        }
    }

    #[test]
    fn first_save_waits_for_interval_after_boot() {
        let mut history = StationHistory::new();
        assert!(!history.save(10_000, &snapshot(1.0, 100)));
        assert!(history.save(30_001, &snapshot(1.0, 100)));
        assert!(!history.save(40_000, &snapshot(1.0, 100)));
    }

    #[test]
    fn sums_cover_newest_entries_only() {
        let mut history = StationHistory::new();
        for (i, wind) in [1.0, 2.0, 3.0].iter().enumerate() {
            history.save((i as Millis + 1) * 31_000, &snapshot(*wind, 1_000));
        }

        assert_eq!(history.sum_wind(2), 50);
        assert_eq!(history.sum_wind(10), 60);
        assert_eq!(history.sum_light(3), 30);
    }

    #[test]
    fn battery_above_three_volts_does_not_wrap() {
        let mut history = StationHistory::new();
        history.save(31_000, &snapshot(0.0, 0));
        assert_eq!(history.latest().unwrap().battery, 190);
    }

    #[test]
    fn ring_overwrites_oldest() {
        let mut history = StationHistory::new();
        for i in 0..(HISTORY_LEN as Millis + 5) {
            history.save((i + 1) * 31_000, &snapshot(1.0, 0));
        }
        assert_eq!(history.sum_wind(HISTORY_LEN * 2), HISTORY_LEN as i32 * 10);
    }
}
