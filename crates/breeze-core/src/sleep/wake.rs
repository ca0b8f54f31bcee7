use core::sync::atomic::{AtomicBool, Ordering};

/// Flags raised by interrupt handlers while the core sleeps.
///
/// Each flag has exactly one writer: the wake-timer ISR stores `timer`, the
/// RX-pin ISR stores `external` and the watchdog early-warning ISR stores
/// `watchdog`. All are single-word stores. The main flow
/// reads and clears them together inside a critical section, since cores
/// without compare-and-swap cannot do an atomic `swap`.
pub struct WakeSignals {
    timer: AtomicBool,
    external: AtomicBool,
    watchdog: AtomicBool,
}

/// Snapshot returned by [`WakeSignals::take`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WakeFlags {
    pub timer: bool,
    pub external: bool,
    pub watchdog: bool,
}

impl WakeFlags {
    /// No source owned up to the wake.
    pub fn is_empty(&self) -> bool {
        !(self.timer || self.external || self.watchdog)
    }
}

impl Default for WakeSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeSignals {
    pub const fn new() -> Self {
        Self {
            timer: AtomicBool::new(false),
            external: AtomicBool::new(false),
            watchdog: AtomicBool::new(false),
        }
    }

    /// Called from the wake-timer interrupt.
    pub fn signal_timer(&self) {
        self.timer.store(true, Ordering::Release);
    }

    /// Called from the sensor RX pin interrupt.
    pub fn signal_external(&self) {
        self.external.store(true, Ordering::Release);
    }

    /// Called from the watchdog early-warning interrupt.
    pub fn signal_watchdog(&self) {
        self.watchdog.store(true, Ordering::Release);
    }

    pub fn take(&self) -> WakeFlags {
        critical_section::with(|_| {
            let flags = WakeFlags {
                timer: self.timer.load(Ordering::Acquire),
                external: self.external.load(Ordering::Acquire),
                watchdog: self.watchdog.load(Ordering::Acquire),
            };
            self.timer.store(false, Ordering::Relaxed);
            self.external.store(false, Ordering::Relaxed);
            self.watchdog.store(false, Ordering::Relaxed);
            flags
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_all_flags() {
        let signals = WakeSignals::new();
        signals.signal_timer();
        signals.signal_external();
        signals.signal_watchdog();

        assert_eq!(
            signals.take(),
            WakeFlags {
                timer: true,
                external: true,
                watchdog: true,
            }
        );
        let flags = signals.take();
        assert_eq!(flags, WakeFlags::default());
        assert!(flags.is_empty());
    }
}
