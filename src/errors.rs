use std::time::Duration;

use embedded_hal::digital::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("chip not ready after {polls} polls")]
    NotReady { polls: u32 },
    #[error("clock pulse {pulse} held high for {elapsed:?}, chip may have powered down")]
    TimingViolation { pulse: u8, elapsed: Duration },
    #[error("invalid sample: {0:#08x}")]
    InvalidSample(u32),
    #[error("protocol desync: {0}")]
    ProtocolDesync(String),
    #[error("pin error: {0:?}")]
    Pin(ErrorKind),
    #[error("failed to reset HX711: {0}")]
    Reset(#[source] Box<DriverError>),
    #[error("gpio error: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

impl DriverError {
    /// Conditions that only mean "this read did not count"; the caller retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DriverError::NotReady { .. }
                | DriverError::TimingViolation { .. }
                | DriverError::InvalidSample(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(DriverError::NotReady { polls: 40 }.is_transient());
        assert!(DriverError::InvalidSample(0x7f_ffff).is_transient());
        assert!(DriverError::TimingViolation {
            pulse: 3,
            elapsed: Duration::from_micros(80)
        }
        .is_transient());
        assert!(!DriverError::ProtocolDesync("no samples".into()).is_transient());
        assert!(!DriverError::InvalidParameter("gain".into()).is_transient());
        assert!(!DriverError::Pin(ErrorKind::Other).is_transient());
    }

    #[test]
    fn reset_error_keeps_cause() {
        use std::error::Error as _;

        let err = DriverError::Reset(Box::new(DriverError::ProtocolDesync("x".into())));
        assert!(err.to_string().starts_with("failed to reset HX711"));
        assert!(err.source().is_some());
    }
}
