//! Channel, gain and measurement-count configuration for the HX711.
//!
//! The chip has no registers: channel and gain for the *next* conversion are
//! selected by the number of clock pulses sent after the 24 data bits. Every
//! value here therefore maps onto a pulse count, and illegal combinations are
//! rejected before any pin is touched.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{DriverError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Smallest sample count an aggregated read may request by default.
pub const DEFAULT_MIN_MEASURES: usize = 2;

/// Largest sample count an aggregated read may request by default.
pub const DEFAULT_MAX_MEASURES: usize = 100;

/// Fixed gain of channel B.
pub const CHANNEL_B_GAIN: u32 = 32;

/// The chip powers down when the clock line stays high this long.
pub const PULSE_LIMIT: Duration = Duration::from_micros(60);

const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);
const READY_MAX_POLLS: u32 = 40;
const POWER_DELAY: Duration = Duration::from_millis(10);

/// The chip needs >50ms to adjust after a channel/gain change.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

const RESET_SAMPLES: usize = 6;
const RESYNC_SAMPLES: usize = 6;
const MAX_RESYNC_ROUNDS: u32 = 3;
const MAX_DESYNC_RETRIES: u32 = 3;

// ============================================================================
// Channel / Gain
// ============================================================================

/// Input channel of the HX711.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Channel {
    #[default]
    A,
    B,
}

impl FromStr for Channel {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A" => Ok(Channel::A),
            "B" => Ok(Channel::B),
            other => Err(DriverError::InvalidParameter(format!(
                "channel has to be \"A\" or \"B\", got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::A => f.write_str("A"),
            Channel::B => f.write_str("B"),
        }
    }
}

/// Amplifier gain of channel A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gain {
    X64 = 64,
    #[default]
    X128 = 128,
}

impl Gain {
    pub fn value(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Gain {
    type Error = DriverError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            64 => Ok(Gain::X64),
            128 => Ok(Gain::X128),
            other => Err(DriverError::InvalidParameter(format!(
                "{other} is not a valid gain for channel A (64 or 128)"
            ))),
        }
    }
}

/// Number of clock pulses after the data bits that select `channel`/`gain`
/// for the next conversion.
///
/// Channel B has a fixed gain, so `gain` is only checked for channel A.
pub fn trailing_pulses(channel: Channel, gain: u32) -> Result<u8> {
    match channel {
        Channel::A => Ok(pulse_count(channel, Gain::try_from(gain)?)),
        Channel::B => Ok(pulse_count(channel, Gain::default())),
    }
}

fn pulse_count(channel: Channel, gain: Gain) -> u8 {
    match (channel, gain) {
        (Channel::A, Gain::X128) => 1,
        (Channel::A, Gain::X64) => 3,
        (Channel::B, _) => 2,
    }
}

// ============================================================================
// Measurement count
// ============================================================================

/// Closed range of sample counts accepted by an aggregated read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureBounds {
    min: usize,
    max: usize,
}

impl MeasureBounds {
    pub fn new(min: usize, max: usize) -> Result<Self> {
        if min == 0 {
            return Err(DriverError::InvalidParameter(
                "min_measures has to be at least 1".into(),
            ));
        }
        if min > max {
            return Err(DriverError::InvalidParameter(format!(
                "min_measures ({min}) is greater than max_measures ({max})"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn validate(&self, times: usize) -> Result<()> {
        if (self.min..=self.max).contains(&times) {
            Ok(())
        } else {
            Err(DriverError::InvalidParameter(format!(
                "{times} is not within the measure count range {}..={}",
                self.min, self.max
            )))
        }
    }

    /// Validate a count that arrives as a signed integer (Python callers).
    pub fn checked_count(&self, times: i64) -> Result<usize> {
        let count = usize::try_from(times).map_err(|_| {
            DriverError::InvalidParameter(format!(
                "{times} is not within the measure count range {}..={}",
                self.min, self.max
            ))
        })?;
        self.validate(count)?;
        Ok(count)
    }
}

impl Default for MeasureBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_MEASURES,
            max: DEFAULT_MAX_MEASURES,
        }
    }
}

// ============================================================================
// Driver configuration
// ============================================================================

/// Per-instance driver configuration.
///
/// `channel` and `gain` are the initial values applied at construction; later
/// changes go through the driver's setters so the chip is re-programmed.
#[derive(Debug, Clone)]
pub struct Hx711Config {
    pub channel: Channel,
    /// Gain used whenever channel A is selected.
    pub gain: Gain,
    pub measure_bounds: MeasureBounds,
    /// Sleep between two readiness polls of the data line.
    pub ready_poll_interval: Duration,
    /// Polls before a read gives up with `NotReady`.
    pub ready_max_polls: u32,
    /// Maximum high time of a single clock pulse.
    pub pulse_limit: Duration,
    /// Clock high (power down) / low (power up) hold time.
    pub power_delay: Duration,
    /// Wait after the settle read that follows a configuration change.
    pub settle_delay: Duration,
    /// Samples read and discarded by `reset()`.
    pub reset_samples: usize,
    /// Samples read to resynchronize after a late trailing pulse.
    pub resync_samples: usize,
    pub max_resync_rounds: u32,
    /// Consecutive `ProtocolDesync` failures tolerated by an aggregated read.
    pub max_desync_retries: u32,
}

impl Default for Hx711Config {
    fn default() -> Self {
        Self {
            channel: Channel::A,
            gain: Gain::X128,
            measure_bounds: MeasureBounds::default(),
            ready_poll_interval: READY_POLL_INTERVAL,
            ready_max_polls: READY_MAX_POLLS,
            pulse_limit: PULSE_LIMIT,
            power_delay: POWER_DELAY,
            settle_delay: SETTLE_DELAY,
            reset_samples: RESET_SAMPLES,
            resync_samples: RESYNC_SAMPLES,
            max_resync_rounds: MAX_RESYNC_ROUNDS,
            max_desync_retries: MAX_DESYNC_RETRIES,
        }
    }
}

impl Hx711Config {
    /// Build a configuration from the textual channel / integer gain pair the
    /// CLI and the Python bindings accept.
    pub fn from_parts(channel: &str, gain: u32) -> Result<Self> {
        Ok(Self {
            channel: channel.parse()?,
            gain: Gain::try_from(gain)?,
            ..Self::default()
        })
    }

    /// Trailing pulse count for the configured channel/gain.
    pub fn trailing_pulses(&self) -> u8 {
        pulse_count(self.channel, self.gain)
    }

    /// Gain the chip actually applies to the selected channel.
    pub fn effective_gain(&self) -> u32 {
        match self.channel {
            Channel::A => self.gain.value(),
            Channel::B => CHANNEL_B_GAIN,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.resync_samples == 0 || self.reset_samples == 0 {
            return Err(DriverError::InvalidParameter(
                "reset_samples and resync_samples have to be at least 1".into(),
            ));
        }
        if self.ready_max_polls == 0 {
            return Err(DriverError::InvalidParameter(
                "ready_max_polls has to be at least 1".into(),
            ));
        }
        if self.max_resync_rounds == 0 {
            return Err(DriverError::InvalidParameter(
                "max_resync_rounds has to be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_pulse_table() {
        assert_eq!(trailing_pulses(Channel::A, 128).unwrap(), 1);
        assert_eq!(trailing_pulses(Channel::A, 64).unwrap(), 3);
        for gain in [32, 64, 128, 0, 7] {
            assert_eq!(trailing_pulses(Channel::B, gain).unwrap(), 2);
        }
        for gain in [0, 32, 65, 256] {
            assert!(matches!(
                trailing_pulses(Channel::A, gain),
                Err(DriverError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn config_pulses_match_free_function() {
        for channel in [Channel::A, Channel::B] {
            for gain in [Gain::X64, Gain::X128] {
                let config = Hx711Config {
                    channel,
                    gain,
                    ..Hx711Config::default()
                };
                assert_eq!(
                    config.trailing_pulses(),
                    trailing_pulses(channel, gain.value()).unwrap()
                );
            }
        }
    }

    #[test]
    fn channel_parsing() {
        assert_eq!("A".parse::<Channel>().unwrap(), Channel::A);
        assert_eq!("B".parse::<Channel>().unwrap(), Channel::B);
        for bad in ["C", "1", "channel_A", "a", ""] {
            assert!(matches!(
                bad.parse::<Channel>(),
                Err(DriverError::InvalidParameter(_))
            ));
        }
        assert_eq!(Channel::B.to_string(), "B");
    }

    #[test]
    fn gain_parsing() {
        assert_eq!(Gain::try_from(64).unwrap(), Gain::X64);
        assert_eq!(Gain::try_from(128).unwrap(), Gain::X128);
        assert!(Gain::try_from(256).is_err());
        assert!(Gain::try_from(32).is_err());
    }

    #[test]
    fn measure_count_validation() {
        let bounds = MeasureBounds::new(3, 10).unwrap();
        for times in [0, 1, 2, 11, 1000] {
            assert!(bounds.validate(times).is_err(), "{times} accepted");
        }
        for times in 3..=10 {
            assert!(bounds.validate(times).is_ok(), "{times} rejected");
        }
    }

    #[test]
    fn measure_bounds_must_be_sane() {
        assert!(MeasureBounds::new(0, 5).is_err());
        assert!(MeasureBounds::new(6, 5).is_err());
        assert!(MeasureBounds::new(1, 1).is_ok());
        let default = MeasureBounds::default();
        assert_eq!((default.min(), default.max()), (2, 100));
    }

    #[test]
    fn signed_counts_are_validated() {
        let bounds = MeasureBounds::default();
        assert_eq!(bounds.checked_count(5).unwrap(), 5);
        for times in [-10, -1, 0, 1, 101] {
            assert!(matches!(
                bounds.checked_count(times),
                Err(DriverError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn zero_ready_polls_is_rejected() {
        let config = Hx711Config {
            ready_max_polls: 0,
            ..Hx711Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DriverError::InvalidParameter(_))
        ));
    }

    #[test]
    fn defaults() {
        let config = Hx711Config::default();
        assert_eq!(config.channel, Channel::A);
        assert_eq!(config.gain, Gain::X128);
        assert_eq!(config.effective_gain(), 128);
        assert_eq!(config.pulse_limit, Duration::from_micros(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_parts_rejects_bad_values() {
        let config = Hx711Config::from_parts("B", 64).unwrap();
        assert_eq!(config.channel, Channel::B);
        assert_eq!(config.effective_gain(), CHANNEL_B_GAIN);
        assert!(Hx711Config::from_parts("C", 128).is_err());
        assert!(Hx711Config::from_parts("A", 100).is_err());
    }
}
