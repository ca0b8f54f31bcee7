//! Time-binned wind/gust/direction ring buffer.
//!
//! Readings arrive whenever a sensor frame or pulse window completes. They are
//! folded into fixed-span bins; queries look at every bin whose last update is
//! younger than the requested age.

use core::f32::consts::PI;
use core::fmt::Display;

use crate::clock::Millis;

/// Number of bins in the ring. 150 × 4 s ≈ 10 minutes of gust history.
pub const WIND_HIST_LEN: usize = 150;

/// Span of one bin in milliseconds.
pub const WIND_HIST_STEP_MS: Millis = 4_000;

/// Size of the sorted buffer used for gust spike rejection.
pub const GUST_BUFFER_LEN: usize = 5;

/// Rank reported as "the" gust: 4th largest of the 5 kept.
pub const DEFAULT_GUST_RANK: usize = 4;

/// One bin of wind history.
///
/// Speeds are stored in deci-km/h (25.3 km/h → 253), mirroring the fixed-point
/// milli-unit samples used elsewhere in storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindSample {
    /// Time of the last update, `None` until a reading lands in the bin
    pub timestamp: Option<Millis>,
    /// Average wind speed in deci-km/h
    pub wind: u32,
    /// Gust speed in deci-km/h
    pub gust: u32,
    /// Raw compass direction in degrees
    pub direction_raw: i32,
}

impl WindSample {
    fn age(&self, now: Millis) -> Option<Millis> {
        self.timestamp.map(|ts| now.saturating_sub(ts))
    }
}

/// Aggregated view over a window of bins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindSummary {
    /// Mean wind speed in km/h
    pub avg_wind: f32,
    /// Mean gust speed in km/h
    pub avg_gust: f32,
    /// Vector mean direction in whole degrees, `0..360`
    pub mean_direction: u16,
    /// Number of bins that contributed
    pub samples: usize,
}

impl Display for WindSummary {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[Wind] avg: {:.1} km/h, gust: {:.1} km/h, dir: {}°, bins: {}",
            self.avg_wind, self.avg_gust, self.mean_direction, self.samples
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bin {
    sample: WindSample,
    opened_at: Option<Millis>,
}

/// Fixed-capacity ring of wind bins with an internal cursor.
///
/// Exactly one bin is open for writing. When its span has elapsed the cursor
/// moves on and the new bin inherits the previous wind/gust/direction, so a
/// reading that fails to arrive is not averaged in as zero.
pub struct WindHistoryStore<const N: usize = WIND_HIST_LEN> {
    bins: [Bin; N],
    cursor: usize,
    step_ms: Millis,
}

impl<const N: usize> Default for WindHistoryStore<N> {
    fn default() -> Self {
        Self::new(WIND_HIST_STEP_MS)
    }
}

impl<const N: usize> WindHistoryStore<N> {
    pub fn new(step_ms: Millis) -> Self {
        Self {
            bins: [Bin::default(); N],
            cursor: 0,
            step_ms,
        }
    }

    /// Record any subset of wind (km/h), gust (km/h) and direction (degrees).
    pub fn record(
        &mut self,
        now: Millis,
        wind: Option<f32>,
        gust: Option<f32>,
        direction: Option<i32>,
    ) {
        if wind.is_none() && gust.is_none() && direction.is_none() {
            return;
        }

        self.roll_if_elapsed(now);

        let bin = &mut self.bins[self.cursor];
        if bin.opened_at.is_none() {
            bin.opened_at = Some(now);
        }
        if let Some(wind) = wind {
            bin.sample.wind = to_deci(wind);
        }
        if let Some(gust) = gust {
            bin.sample.gust = to_deci(gust);
        }
        if let Some(direction) = direction {
            bin.sample.direction_raw = direction;
        }
        bin.sample.timestamp = Some(now);
    }

    /// The bin currently open for writing.
    pub fn current(&self) -> WindSample {
        self.bins[self.cursor].sample
    }

    fn roll_if_elapsed(&mut self, now: Millis) {
        let Some(opened_at) = self.bins[self.cursor].opened_at else {
            return;
        };
        if now.saturating_sub(opened_at) < self.step_ms {
            return;
        }

        let carried = self.bins[self.cursor].sample;
        self.cursor = (self.cursor + 1) % N;
        self.bins[self.cursor] = Bin {
            sample: WindSample {
                timestamp: None,
                ..carried
            },
            opened_at: None,
        };
    }

    fn window(&self, now: Millis, age: Millis) -> impl Iterator<Item = &WindSample> {
        self.bins
            .iter()
            .map(|bin| &bin.sample)
            .filter(move |sample| sample.age(now).is_some_and(|a| a < age))
    }

    /// Average wind and gust over bins younger than `age`, with the direction
    /// computed as a vector mean so 350° and 10° average to 0°.
    pub fn query_window(&self, now: Millis, age: Millis) -> Option<WindSummary> {
        let mut wind_sum: u64 = 0;
        let mut gust_sum: u64 = 0;
        let mut x_part = 0.0_f32;
        let mut y_part = 0.0_f32;
        let mut samples = 0_usize;

        for sample in self.window(now, age) {
            wind_sum += u64::from(sample.wind);
            gust_sum += u64::from(sample.gust);
            let rad = sample.direction_raw as f32 * PI / 180.0;
            x_part += libm::cosf(rad);
            y_part += libm::sinf(rad);
            samples += 1;
        }

        if samples == 0 {
            return None;
        }

        let count = samples as f32;
        let degrees = libm::atan2f(y_part / count, x_part / count) * 180.0 / PI;
        let mean_direction = libm::roundf(degrees) as i32;

        Some(WindSummary {
            avg_wind: wind_sum as f32 / count / 10.0,
            avg_gust: gust_sum as f32 / count / 10.0,
            mean_direction: mean_direction.rem_euclid(360) as u16,
            samples,
        })
    }

    /// The `rank`-th largest gust (1-based) among bins younger than `age`.
    ///
    /// Only the [`GUST_BUFFER_LEN`] largest values are kept; reporting the
    /// 4th of them rejects a single spike or corrupt reading. Returns 0 when
    /// fewer than `rank` bins qualify.
    pub fn top_gust(&self, now: Millis, age: Millis, rank: usize) -> f32 {
        let mut top = [0_u32; GUST_BUFFER_LEN];
        for sample in self.window(now, age) {
            insert_sorted(&mut top, sample.gust);
        }

        let rank = rank.clamp(1, GUST_BUFFER_LEN);
        top[rank - 1] as f32 / 10.0
    }
}

/// Insert into a descending buffer, dropping the smallest value.
fn insert_sorted(buffer: &mut [u32], value: u32) {
    let Some(last) = buffer.last() else {
        return;
    };
    if value <= *last {
        return;
    }

    let mut i = buffer.len() - 1;
    while i > 0 && buffer[i - 1] < value {
        buffer[i] = buffer[i - 1];
        i -= 1;
    }
    buffer[i] = value;
}

fn to_deci(kmh: f32) -> u32 {
    libm::roundf(libm::fabsf(kmh) * 10.0) as u32
}
