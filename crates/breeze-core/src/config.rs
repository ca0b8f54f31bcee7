//! Station configuration.
//!
//! Loaded once at boot from the `key=value` settings file and immutable for
//! the rest of the run. A postcard snapshot can be kept in flash so a station
//! whose settings file went missing keeps its last good configuration.

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::acquisition::SensorModel;
use crate::acquisition::line::{parse_f32_prefix, parse_i32_prefix, parse_line};
use crate::broadcast::{BroadcastSchedule, STATION_NAME_LEN};
use crate::clock::Millis;
use crate::error::{ConfigError, bounded};
use crate::power::PowerThresholds;
use crate::sleep::WatchdogPeriod;

/// Watchdog reset period while awake.
pub const WATCHDOG_PERIOD_MS: u32 = 2_500;

/// Settings understood by other parts of the firmware. Accepted and ignored.
const FOREIGN_KEYS: [&str; 16] = [
    "LON",
    "LAT",
    "ALT",
    "HEATER",
    "V_HEATER",
    "V_MPPT",
    "SENSOR_BARO",
    "SENSOR_GPS",
    "GPS_BAUD",
    "DEBUG",
    "ERRORS",
    "INSOMNIA",
    "TEST_USB",
    "TESTMODE",
    "DIV_CPU_SLOW",
    "FORWARD_UART",
];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WindSensorKind {
    #[default]
    None,
    /// WS80 or WS85, detected from the first frame
    Wsxx,
    Ws80,
    Ws85,
    Davis6410,
}

impl WindSensorKind {
    pub fn is_serial(self) -> bool {
        matches!(self, Self::Wsxx | Self::Ws80 | Self::Ws85)
    }

    pub fn sensor_model(self) -> SensorModel {
        match self {
            Self::Ws80 => SensorModel::Ws80,
            Self::Ws85 => SensorModel::Ws85,
            _ => SensorModel::Unknown,
        }
    }
}

/// Broadcast intervals in milliseconds; 0 disables the message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastIntervals {
    pub weather_ms: Millis,
    pub identification_ms: Millis,
    pub info_ms: Millis,
}

impl Default for BroadcastIntervals {
    fn default() -> Self {
        Self {
            weather_ms: 40_000,
            identification_ms: 5 * 60_000,
            info_ms: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StationConfig {
    pub name: String<STATION_NAME_LEN>,
    /// Degrees added to the sensor direction
    pub heading_offset: i32,
    /// Averaging window for the reported wind
    pub wind_age_ms: Millis,
    /// Window searched for the reported gust
    pub gust_age_ms: Millis,
    pub broadcast: BroadcastIntervals,
    pub reduce_interval_voltage: f32,
    pub wind_sensor: WindSensorKind,
    /// Pulse counting window of the Davis anemometer
    pub integration_ms: Millis,
    pub watchdog: bool,
    /// Minimum spacing between two radio transmissions
    pub radio_cooldown_ms: Millis,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            heading_offset: 0,
            wind_age_ms: 30_000,
            gust_age_ms: 10 * 60_000,
            broadcast: BroadcastIntervals::default(),
            reduce_interval_voltage: 3.5,
            wind_sensor: WindSensorKind::None,
            integration_ms: 12_000,
            watchdog: false,
            radio_cooldown_ms: 4_000,
        }
    }
}

impl StationConfig {
    /// Build a configuration from settings file text.
    ///
    /// Lines that do not parse or carry unknown keys are logged and skipped,
    /// so one typo does not take the station off the air.
    pub fn parse_settings(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines() {
            let Some(kv) = parse_line(line.as_bytes()) else {
                continue;
            };
            if let Err(e) = config.apply_setting(&kv.key, &kv.value) {
                log::warn!("Skipping setting: {}", e);
            }
        }
        config
    }

    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let int = || parse_i32_prefix(value).ok_or_else(|| ConfigError::InvalidValue(bounded(key)));
        let secs = || int().map(|s| Millis::from(s.max(0).unsigned_abs()) * 1000);
        let flag = || int().map(|v| v != 0);

        match key {
            "NAME" => self.name = bounded(value),
            "REDU_INTERV_VOLT" => {
                self.reduce_interval_voltage =
                    parse_f32_prefix(value).ok_or_else(|| ConfigError::InvalidValue(bounded(key)))?
            }
            "HEADING_OFFSET" => self.heading_offset = int()?,
            "GUST_AGE" => self.gust_age_ms = secs()?,
            "WIND_AGE" => self.wind_age_ms = secs()?,
            "BROADCAST_INTERVAL_WEATHER" => self.broadcast.weather_ms = secs()?,
            "BROADCAST_INTERVAL_NAME" => self.broadcast.identification_ms = secs()?,
            "BROADCAST_INTERVAL_INFO" => self.broadcast.info_ms = secs()?,
            "SENSOR_WSXX" => self.select_sensor(WindSensorKind::Wsxx, flag()?),
            "SENSOR_WS80" => self.select_sensor(WindSensorKind::Ws80, flag()?),
            "SENSOR_WS85" => self.select_sensor(WindSensorKind::Ws85, flag()?),
            "SENSOR_DAVIS6410" => self.select_sensor(WindSensorKind::Davis6410, flag()?),
            "SENSOR_INTEGRATION_TIME" => {
                self.integration_ms = Millis::from(int()?.max(0).unsigned_abs())
            }
            "WDT" => self.watchdog = flag()?,
            _ if FOREIGN_KEYS.contains(&key) => log::debug!("Ignoring setting {}", key),
            _ => return Err(ConfigError::UnknownKey(bounded(key))),
        }
        Ok(())
    }

    fn select_sensor(&mut self, kind: WindSensorKind, enabled: bool) {
        if enabled {
            self.wind_sensor = kind;
        } else if self.wind_sensor == kind {
            self.wind_sensor = WindSensorKind::None;
        }
    }

    /// Broadcast schedule for this station. Identification is disabled while
    /// the name is too short to send.
    pub fn schedule(&self) -> BroadcastSchedule {
        let identification_ms = if self.has_name() {
            self.broadcast.identification_ms
        } else {
            0
        };
        BroadcastSchedule::new(
            self.broadcast.weather_ms,
            identification_ms,
            self.broadcast.info_ms,
        )
    }

    pub fn has_name(&self) -> bool {
        self.name.len() > 1
    }

    pub fn power_thresholds(&self) -> PowerThresholds {
        PowerThresholds {
            reduce_interval: self.reduce_interval_voltage,
            ..PowerThresholds::default()
        }
    }

    pub fn watchdog_period(&self) -> Option<WatchdogPeriod> {
        self.watchdog
            .then(|| WatchdogPeriod::from_ms(WATCHDOG_PERIOD_MS))
    }

    /// Serialize into `buf` for flash storage.
    pub fn to_postcard<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|e| {
            log::error!("Config encode failed: {:?}", e);
            ConfigError::Snapshot
        })
    }

    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        postcard::from_bytes(bytes).map_err(|e| {
            log::error!("Config decode failed: {:?}", e);
            ConfigError::Snapshot
        })
    }
}
