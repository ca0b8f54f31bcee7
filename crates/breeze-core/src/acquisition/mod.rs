//! Frame capture from the WS80/WS85 ultrasonic wind sensor.
//!
//! The sensor pushes a text block of `key=value` lines every few seconds over
//! a UART. The core sleeps with the RX pin as a wake source, and on each edge
//! listens for one burst with an inter-byte idle timeout. A frame is complete
//! once its `BatVoltage` line has been parsed; anything short of that is a
//! [`Acquisition::Timeout`] and nothing is committed.

pub mod line;

use heapless::Vec;

use crate::clock::Millis;
use crate::error::AcquisitionError;
use crate::hal::{LowPowerHal, SensorLink};
use line::{KeyValue, parse_f32_prefix, parse_i32_prefix, parse_line};

/// Capacity of the burst buffer.
pub const FRAME_BUFFER_LEN: usize = 1024;

/// Idle timeout before any header has been seen.
pub const IDLE_TIMEOUT_US: u64 = 3_800;
/// Idle timeout once a WS80 header was seen. WS85 keeps [`IDLE_TIMEOUT_US`].
pub const WS80_HEADER_TIMEOUT_US: u64 = 500;
/// Idle timeout once the `=====` trailer is running.
pub const TRAILER_TIMEOUT_US: u64 = 1;
/// Idle timeout for the session after a complete frame.
pub const AFTER_FRAME_TIMEOUT_US: u64 = 120;
/// Hard cap for one burst, however chatty the line is.
pub const BURST_CAP_US: u64 = 250_000;

/// Length of the `=` run that marks the end of a frame.
const TRAILER_RUN: usize = 35;

const HEADER_TAG: &[u8] = b"FreqSel";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SensorModel {
    #[default]
    Unknown,
    Ws80,
    Ws85,
}

impl SensorModel {
    /// Model-specific marker seen near the start of a frame.
    fn tag(self) -> Option<&'static [u8]> {
        match self {
            Self::Unknown => None,
            Self::Ws80 => Some(b"WH80"),
            Self::Ws85 => Some(b"WS85"),
        }
    }

    fn header_timeout_us(self) -> Option<u64> {
        match self {
            Self::Unknown => None,
            Self::Ws80 => Some(WS80_HEADER_TIMEOUT_US),
            Self::Ws85 => Some(IDLE_TIMEOUT_US),
        }
    }

    /// Interval between two frames. The sensor can be ignored this long after
    /// a complete frame.
    pub fn frame_period_ms(self) -> Option<Millis> {
        match self {
            Self::Unknown => None,
            Self::Ws80 => Some(4_685),
            Self::Ws85 => Some(8_350),
        }
    }
}

/// Values decoded from one complete frame. Speeds are in km/h.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameReadings {
    pub wind_dir: Option<i32>,
    pub wind_speed: Option<f32>,
    pub wind_gust: Option<f32>,
    pub temperature: Option<f32>,
    pub humidity: Option<i32>,
    pub light_lux: Option<i32>,
    pub uv_index: Option<f32>,
    pub cap_voltage: Option<f32>,
    pub battery_voltage: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquisition {
    Complete(FrameReadings),
    /// The burst ended without a complete frame
    Timeout,
}

/// Incremental substring matcher fed one byte at a time.
struct Matcher {
    pattern: &'static [u8],
    pos: usize,
}

impl Matcher {
    fn new(pattern: &'static [u8]) -> Self {
        Self { pattern, pos: 0 }
    }

    fn feed(&mut self, byte: u8) -> bool {
        if byte == self.pattern[self.pos] {
            self.pos += 1;
        } else {
            self.pos = usize::from(byte == self.pattern[0]);
        }

        if self.pos == self.pattern.len() {
            self.pos = 0;
            return true;
        }
        false
    }
}

pub struct FrameAcquisitionSession {
    model: SensorModel,
    idle_timeout_us: u64,
    buffer: Vec<u8, FRAME_BUFFER_LEN>,
    last_complete_at: Option<Millis>,
}

impl Default for FrameAcquisitionSession {
    fn default() -> Self {
        Self::new(SensorModel::Unknown)
    }
}

impl FrameAcquisitionSession {
    pub fn new(model: SensorModel) -> Self {
        Self {
            model,
            idle_timeout_us: IDLE_TIMEOUT_US,
            buffer: Vec::new(),
            last_complete_at: None,
        }
    }

    pub fn model(&self) -> SensorModel {
        self.model
    }

    /// Time the last complete frame was decoded.
    pub fn last_complete_at(&self) -> Option<Millis> {
        self.last_complete_at
    }

    /// Forget the last frame, so weather data counts as missing until the
    /// next one arrives.
    pub fn invalidate(&mut self) {
        self.last_complete_at = None;
    }

    pub fn idle_timeout_us(&self) -> u64 {
        self.idle_timeout_us
    }

    /// Listen for one burst and decode it.
    ///
    /// `now` stamps a complete frame. The burst ends when the line has been
    /// idle for the current idle timeout or after [`BURST_CAP_US`].
    pub fn listen<H, L>(
        &mut self,
        hal: &H,
        link: &mut L,
        now: Millis,
    ) -> Result<Acquisition, AcquisitionError>
    where
        H: LowPowerHal,
        L: SensorLink,
    {
        let in_flight = self.capture(hal, link)?;
        if !in_flight {
            log::trace!("No frame header in {} byte burst", self.buffer.len());
            return Ok(Acquisition::Timeout);
        }

        match self.decode() {
            Some(readings) => {
                self.idle_timeout_us = AFTER_FRAME_TIMEOUT_US;
                self.last_complete_at = Some(now);
                log::info!("Sensor frame complete");
                Ok(Acquisition::Complete(readings))
            }
            None => {
                log::debug!("Incomplete sensor frame, {} bytes", self.buffer.len());
                Ok(Acquisition::Timeout)
            }
        }
    }

    /// Read bytes into the buffer until the burst ends. Returns whether a
    /// frame header was seen.
    fn capture<H, L>(&mut self, hal: &H, link: &mut L) -> Result<bool, AcquisitionError>
    where
        H: LowPowerHal,
        L: SensorLink,
    {
        self.buffer.clear();

        let mut header = Matcher::new(HEADER_TAG);
        let mut model_tag = self.model.tag().map(Matcher::new);
        let mut in_flight = false;
        let mut eq_run = 0_usize;

        let started = hal.micros();
        let mut last_byte = started;

        loop {
            let now_us = hal.micros();
            if now_us.saturating_sub(last_byte) >= self.idle_timeout_us {
                break;
            }
            if now_us.saturating_sub(started) >= BURST_CAP_US {
                log::warn!("Sensor burst cut after {} us", BURST_CAP_US);
                break;
            }

            while link.read_ready().map_err(|_| AcquisitionError::Link)? {
                let mut byte = [0_u8; 1];
                if link.read(&mut byte).map_err(|_| AcquisitionError::Link)? == 0 {
                    break;
                }
                let byte = byte[0];
                if byte >= 127 {
                    continue;
                }

                eq_run = if byte == b'=' { eq_run + 1 } else { 0 };

                let header_hit = header.feed(byte);
                let tag_hit = model_tag.as_mut().is_some_and(|m| m.feed(byte));
                if header_hit || tag_hit {
                    in_flight = true;
                    if let Some(timeout) = self.model.header_timeout_us() {
                        self.idle_timeout_us = timeout;
                    }
                }

                last_byte = hal.micros();

                if self.buffer.push(byte).is_err() {
                    log::error!("Sensor frame buffer exceeded");
                    self.buffer.clear();
                    return Err(AcquisitionError::BufferOverflow(FRAME_BUFFER_LEN));
                }

                if in_flight && eq_run > TRAILER_RUN {
                    self.idle_timeout_us = TRAILER_TIMEOUT_US;
                }
            }
        }

        Ok(in_flight)
    }

    /// Parse the newline-terminated lines of the buffer up to `BatVoltage`.
    fn decode(&mut self) -> Option<FrameReadings> {
        let mut readings = FrameReadings::default();
        let mut model = self.model;
        let mut complete = None;

        for line in self.buffer.split_inclusive(|&b| b == b'\n') {
            if line.last() != Some(&b'\n') {
                break;
            }
            let Some(kv) = parse_line(line) else {
                continue;
            };
            if apply_field(&kv, &mut readings, &mut model) {
                complete = Some(readings);
                break;
            }
        }

        if model != self.model {
            log::info!("Detected sensor model {:?}", model);
            self.model = model;
        }
        complete
    }
}

/// Store one field. Returns `true` for the field that completes a frame.
fn apply_field(kv: &KeyValue, readings: &mut FrameReadings, model: &mut SensorModel) -> bool {
    let value = kv.value.as_str();
    match kv.key.as_str() {
        "WindDir" => readings.wind_dir = parse_i32_prefix(value),
        "WindSpeed" => readings.wind_speed = parse_f32_prefix(value).map(|v| v * 3.6),
        "WindGust" => readings.wind_gust = parse_f32_prefix(value).map(|v| v * 3.6),
        "Temperature" => {
            readings.temperature = parse_f32_prefix(value);
            *model = SensorModel::Ws80;
        }
        "GXTS04Temp" => {
            readings.temperature = parse_f32_prefix(value);
            *model = SensorModel::Ws85;
        }
        "Humi" => readings.humidity = parse_i32_prefix(value),
        "Light" => readings.light_lux = parse_i32_prefix(value),
        "UV_Value" => readings.uv_index = parse_f32_prefix(value),
        "CapVoltage" => readings.cap_voltage = parse_f32_prefix(value),
        "BatVoltage" => {
            readings.battery_voltage = parse_f32_prefix(value);
            return true;
        }
        _ => {}
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleep::WakeSignals;
    use crate::testing::{MockHal, MockLink, WS80_FRAME, WS85_FRAME};

    #[test]
    fn ws80_frame_is_decoded() {
        let signals = WakeSignals::new();
        let hal = MockHal::new(&signals);
        let mut link = MockLink::with(WS80_FRAME);
        let mut session = FrameAcquisitionSession::default();

        let result = session.listen(&hal, &mut link, 5_000).unwrap();

        let Acquisition::Complete(readings) = result else {
            panic!("expected a complete frame, got {result:?}");
        };
        assert_eq!(readings.wind_dir, Some(224));
        assert!((readings.wind_speed.unwrap() - 3.6).abs() < 0.01);
        assert!((readings.wind_gust.unwrap() - 7.2).abs() < 0.01);
        assert_eq!(readings.humidity, Some(71));
        assert_eq!(session.model(), SensorModel::Ws80);
        assert_eq!(session.last_complete_at(), Some(5_000));
        assert_eq!(session.idle_timeout_us(), AFTER_FRAME_TIMEOUT_US);
    }

    #[test]
    fn ws85_is_detected() {
        let signals = WakeSignals::new();
        let hal = MockHal::new(&signals);
        let mut link = MockLink::with(WS85_FRAME);
        let mut session = FrameAcquisitionSession::new(SensorModel::Ws80);

        let result = session.listen(&hal, &mut link, 1).unwrap();
        assert!(matches!(result, Acquisition::Complete(_)));
        assert_eq!(session.model(), SensorModel::Ws85);
    }

    #[test]
    fn silence_is_a_timeout() {
        let signals = WakeSignals::new();
        let hal = MockHal::new(&signals);
        let mut link = MockLink::with(b"");
        let mut session = FrameAcquisitionSession::default();

        assert_eq!(session.listen(&hal, &mut link, 0), Ok(Acquisition::Timeout));
        assert_eq!(session.last_complete_at(), None);
    }

    #[test]
    fn noise_without_header_is_a_timeout() {
        let signals = WakeSignals::new();
        let hal = MockHal::new(&signals);
        let mut link = MockLink::with(b"WindSpeed=1.0\nBatVoltage=3.1\n");
        let mut session = FrameAcquisitionSession::default();

        assert_eq!(session.listen(&hal, &mut link, 0), Ok(Acquisition::Timeout));
    }

    #[test]
    fn truncated_frame_is_a_timeout() {
        let signals = WakeSignals::new();
        let hal = MockHal::new(&signals);
        let cut = WS80_FRAME.len() / 2;
        let mut link = MockLink::with(&WS80_FRAME[..cut]);
        let mut session = FrameAcquisitionSession::default();

        assert_eq!(session.listen(&hal, &mut link, 0), Ok(Acquisition::Timeout));
        assert_eq!(session.last_complete_at(), None);
    }

    #[test]
    fn overflow_discards_the_burst() {
        let signals = WakeSignals::new();
        let hal = MockHal::new(&signals);
        let mut link = MockLink::with(&[b'x'; FRAME_BUFFER_LEN + 10]);
        let mut session = FrameAcquisitionSession::default();

        assert_eq!(
            session.listen(&hal, &mut link, 0),
            Err(AcquisitionError::BufferOverflow(FRAME_BUFFER_LEN))
        );
        assert_eq!(session.last_complete_at(), None);
    }

    #[test]
    fn header_shrinks_idle_timeout() {
        let signals = WakeSignals::new();
        let hal = MockHal::new(&signals);
        let mut link = MockLink::with(b"FreqSel=868\n");
        let mut session = FrameAcquisitionSession::new(SensorModel::Ws80);

        session.listen(&hal, &mut link, 0).unwrap();
        assert_eq!(session.idle_timeout_us(), WS80_HEADER_TIMEOUT_US);
    }

    /// Two bursts separated by a few quiet polls of the line.
    fn burst_with_gap(before_gap: &[u8], after_gap: &[u8]) -> MockLink {
        let mut link = MockLink::with(before_gap);
        link.load(after_gap);
        link.pause_at(before_gap.len(), 3);
        link
    }

    #[test]
    fn trailer_run_ends_the_burst_at_once() {
        let signals = WakeSignals::new();
        let hal = MockHal::new(&signals);
        let mut bytes: Vec<u8, 128> = Vec::new();
        bytes.extend_from_slice(b"FreqSel:868M\r\nWindDir=5\r\n").unwrap();
        bytes.extend_from_slice(&[b'='; TRAILER_RUN + 1]).unwrap();
        let mut link = burst_with_gap(&bytes, b"\r\nBatVoltage=3.1\r\n");
        let mut session = FrameAcquisitionSession::default();

        assert_eq!(session.listen(&hal, &mut link, 0), Ok(Acquisition::Timeout));
        assert_eq!(session.idle_timeout_us(), TRAILER_TIMEOUT_US);
        assert_eq!(link.remaining(), b"\r\nBatVoltage=3.1\r\n".len());
    }

    #[test]
    fn equals_run_before_header_is_not_a_trailer() {
        let signals = WakeSignals::new();
        let hal = MockHal::new(&signals);
        let mut bytes: Vec<u8, 128> = Vec::new();
        bytes.extend_from_slice(&[b'='; TRAILER_RUN + 1]).unwrap();
        bytes.extend_from_slice(b"\r\nFreqSel:868M\r\nWindDir=5\r\n").unwrap();
        let mut link = burst_with_gap(&bytes, b"BatVoltage=3.1\r\n");
        let mut session = FrameAcquisitionSession::default();

        let result = session.listen(&hal, &mut link, 7).unwrap();
        let Acquisition::Complete(readings) = result else {
            panic!("expected a complete frame, got {result:?}");
        };
        assert_eq!(readings.wind_dir, Some(5));
        assert_eq!(link.remaining(), 0);
        assert_eq!(session.last_complete_at(), Some(7));
    }

    #[test]
    fn matcher_restarts_on_partial_prefix() {
        let mut matcher = Matcher::new(b"WH80");
        let hits = b"WWH80".iter().filter(|&&b| matcher.feed(b)).count();
        assert_eq!(hits, 1);
    }
}
