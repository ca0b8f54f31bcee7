//! Outgoing radio messages and their send schedule.

use core::fmt::Display;

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::clock::Millis;

/// Maximum station name length carried in an identification message.
pub const STATION_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Weather,
    Identification,
    Info,
}

impl MessageKind {
    pub const ALL: [MessageKind; 3] = [Self::Weather, Self::Identification, Self::Info];

    const fn index(self) -> usize {
        match self {
            Self::Weather => 0,
            Self::Identification => 1,
            Self::Info => 2,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::Identification => "name",
            Self::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleEntry {
    /// 0 disables this message kind
    pub interval_ms: Millis,
    pub last_sent_at: Millis,
}

impl ScheduleEntry {
    pub fn enabled(&self) -> bool {
        self.interval_ms != 0
    }

    /// Time until this entry is due, with the interval stretched by `scale`.
    pub fn time_until_due(&self, now: Millis, scale: u32) -> Millis {
        let interval = self.interval_ms * Millis::from(scale);
        interval.saturating_sub(now.saturating_sub(self.last_sent_at))
    }
}

/// Per-kind broadcast intervals and the time each kind was last sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastSchedule {
    entries: [ScheduleEntry; 3],
}

impl BroadcastSchedule {
    pub fn new(weather_ms: Millis, identification_ms: Millis, info_ms: Millis) -> Self {
        let entry = |interval_ms| ScheduleEntry {
            interval_ms,
            last_sent_at: 0,
        };
        Self {
            entries: [entry(weather_ms), entry(identification_ms), entry(info_ms)],
        }
    }

    pub fn entry(&self, kind: MessageKind) -> &ScheduleEntry {
        &self.entries[kind.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (MessageKind, &ScheduleEntry)> {
        MessageKind::ALL.into_iter().zip(self.entries.iter())
    }

    /// Whether `kind` is enabled and its stretched interval has passed.
    pub fn is_due(&self, kind: MessageKind, now: Millis, scale: u32) -> bool {
        let entry = self.entry(kind);
        entry.enabled() && entry.time_until_due(now, scale) == 0
    }

    pub fn mark_sent(&mut self, kind: MessageKind, now: Millis) {
        self.entries[kind.index()].last_sent_at = now;
    }
}

/// Weather payload handed to the radio collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    /// Degrees, `0..360`
    pub heading: u16,
    /// km/h
    pub wind_speed: f32,
    /// km/h
    pub wind_gust: f32,
    pub temperature: Option<f32>,
    pub humidity: Option<i32>,
    /// 0..=100
    pub state_of_charge: u8,
}

impl Display for WeatherReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}° {:.1} km/h (gust {:.1}) batt {}%",
            self.heading, self.wind_speed, self.wind_gust, self.state_of_charge
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Broadcast {
    Weather(WeatherReport),
    Identification(String<STATION_NAME_LEN>),
    Info {
        battery_volts: f32,
        charging: bool,
    },
}

impl Broadcast {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Weather(_) => MessageKind::Weather,
            Self::Identification(_) => MessageKind::Identification,
            Self::Info { .. } => MessageKind::Info,
        }
    }
}
