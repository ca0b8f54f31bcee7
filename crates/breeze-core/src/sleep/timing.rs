//! Quantization of sleep and watchdog periods to what the hardware can count.

use crate::clock::Millis;

/// Resolution of the wake timer (1024 Hz clock, /8 prescaler).
pub const TIMER_TICK_MS: Millis = 8;

/// Longest single timer slice, `(0xFFFF + 1) * 8` ms.
pub const MAX_SLICE_MS: Millis = (u16::MAX as Millis + 1) * TIMER_TICK_MS;

/// Wake timer compare value and the duration it really arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSetting {
    pub counts: u16,
    pub armed_ms: Millis,
}

/// Convert a requested duration into 8 ms timer counts.
///
/// The timer fires one tick after reaching `counts`, so the armed duration is
/// `(counts + 1) * 8`. Requests beyond [`MAX_SLICE_MS`] are clamped; callers
/// slice longer sleeps.
pub fn quantize_timer(ms: Millis) -> TimerSetting {
    let counts = (ms / TIMER_TICK_MS).min(Millis::from(u16::MAX)) as u16;
    TimerSetting {
        counts,
        armed_ms: (Millis::from(counts) + 1) * TIMER_TICK_MS,
    }
}

/// Watchdog period expressed in cycles of its ~1024 Hz clock.
///
/// The hardware only supports powers of two between 8 and 16384 cycles; `bits`
/// is the matching period register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogPeriod {
    cycles: u16,
    bits: u8,
}

impl WatchdogPeriod {
    pub const MAX: Self = Self {
        cycles: 16384,
        bits: 0xB,
    };

    /// Largest supported period not longer than `ms`, with at least 8 cycles.
    /// Zero or anything from 16 s up selects the maximum.
    pub fn from_ms(ms: u32) -> Self {
        if ms == 0 || ms >= 16_000 {
            return Self::MAX;
        }

        let cycles = (u64::from(ms) * 1024 + 500) / 1000;
        let mut bits = 0xA_u8;
        while bits > 0 && cycles < (8_u64 << bits) {
            bits -= 1;
        }

        Self {
            cycles: 8 << bits,
            bits,
        }
    }

    pub fn cycles(self) -> u16 {
        self.cycles
    }

    pub fn bits(self) -> u8 {
        self.bits
    }

    /// Effective period in milliseconds.
    pub fn as_ms(self) -> u32 {
        (u32::from(self.cycles) * 1000 + 512) / 1024
    }
}
