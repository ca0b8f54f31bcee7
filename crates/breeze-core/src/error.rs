use thiserror_no_std::Error;

use crate::sleep::SleepState;

/// Deep-sleep state machine violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SleepError {
    #[error("Invalid sleep transition from {from:?} via {action}")]
    InvalidTransition {
        from: SleepState,
        action: &'static str,
    },
    #[error("Gave up after {0} spurious wakes")]
    TooManySpuriousWakes(u32),
}

/// Failures while capturing a frame from the serial wind sensor.
///
/// A sensor that simply stays silent is not an error, see
/// [`crate::acquisition::Acquisition::Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("Frame buffer overflow after {0} bytes")]
    BufferOverflow(usize),
    #[error("Serial link read failed")]
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Unknown setting: {0}")]
    UnknownKey(heapless::String<32>),
    #[error("Invalid value for {0}")]
    InvalidValue(heapless::String<32>),
    #[error("Config snapshot encode/decode failed")]
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("Radio is busy with another transmission")]
    Busy,
    #[error("Radio transmission failed")]
    Transmit,
}

/// Errors that stop the main loop. Acquisition, config and radio failures
/// are logged and recovered from where they occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Sleep error: {0}")]
    Sleep(#[from] SleepError),
}

/// Truncating conversion into a bounded string, used for error payloads.
pub(crate) fn bounded<const N: usize>(value: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for ch in value.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail_sleep() -> Result<(), Error> {
        Err(SleepError::InvalidTransition {
            from: SleepState::Idle,
            action: "sleep",
        })?;
        Ok(())
    }

    #[test]
    fn sleep_error_propagates_into_station_error() {
        assert_eq!(
            fail_sleep(),
            Err(Error::Sleep(SleepError::InvalidTransition {
                from: SleepState::Idle,
                action: "sleep",
            }))
        );
    }
}
