//! Bit-level HX711 read cycle.
//!
//! This module owns the two GPIO lines and performs one conversion read at a
//! time: wait for the data line to drop, clock out 24 bits MSB first, then send
//! the trailing pulses that select channel/gain for the next conversion.
//!
//! # Timing
//!
//! The chip enters power-down when the clock line stays high for 60µs or
//! more. A user-space process has no real-time guarantee, so every pulse is
//! timed with a monotonic clock instead of assuming a pulse width:
//! - a late data pulse aborts the read (`TimingViolation`), the bits are
//!   undefined;
//! - a late trailing pulse keeps the sample but leaves the chip unconfigured,
//!   which the caller repairs with a resync read.

use std::thread;
use std::time::{Duration, Instant};

use embedded_hal::digital::{Error as _, InputPin, OutputPin};
use log::{debug, trace, warn};

use crate::config::Hx711Config;
use crate::errors::{DriverError, Result};

/// Number of data bits in one conversion.
pub const DATA_BITS: u8 = 24;

/// Raw pattern the chip sends when the input saturates high.
pub const SATURATED_HIGH: u32 = 0x7F_FFFF;
/// Raw pattern the chip sends when the input saturates low.
pub const SATURATED_LOW: u32 = 0x80_0000;

const SIGN_BIT: u32 = 0x80_0000;
const DATA_MASK: u32 = 0xFF_FFFF;

// ============================================================================
// Clock Abstraction
// ============================================================================

/// Monotonic time source and blocking sleep used by the protocol.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

/// `Clock` backed by `Instant::now()` and `thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

// ============================================================================
// Decode
// ============================================================================

/// Convert a 24-bit two's-complement pattern into a signed sample.
///
/// The two saturation patterns are rejected with `InvalidSample`.
pub fn decode(raw: u32) -> Result<i32> {
    let raw = raw & DATA_MASK;
    if raw == SATURATED_HIGH || raw == SATURATED_LOW {
        return Err(DriverError::InvalidSample(raw));
    }
    if raw & SIGN_BIT != 0 {
        Ok(-(((raw ^ DATA_MASK) + 1) as i32))
    } else {
        Ok(raw as i32)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Outcome of one clocked read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    /// 24-bit pattern as clocked out, not yet decoded.
    pub raw: u32,
    /// A trailing pulse overran the pulse limit; the chip did not take the
    /// channel/gain selection.
    pub trailing_overrun: bool,
}

/// Drives the clock line and samples the data line.
pub struct ProtocolEngine<SCK, DOUT, C> {
    sck: SCK,
    dout: DOUT,
    clock: C,
    ready_poll_interval: Duration,
    ready_max_polls: u32,
    pulse_limit: Duration,
    power_delay: Duration,
}

impl<SCK, DOUT, C> ProtocolEngine<SCK, DOUT, C>
where
    SCK: OutputPin,
    DOUT: InputPin,
    C: Clock,
{
    pub fn new(sck: SCK, dout: DOUT, clock: C, config: &Hx711Config) -> Self {
        Self {
            sck,
            dout,
            clock,
            ready_poll_interval: config.ready_poll_interval,
            ready_max_polls: config.ready_max_polls,
            pulse_limit: config.pulse_limit,
            power_delay: config.power_delay,
        }
    }

    /// Put the chip into power-down mode.
    pub fn power_down(&mut self) -> Result<()> {
        self.set_clock(false)?;
        self.set_clock(true)?;
        self.clock.sleep(self.power_delay);
        Ok(())
    }

    /// Wake the chip from power-down. It restarts on channel A, gain 128.
    pub fn power_up(&mut self) -> Result<()> {
        self.set_clock(false)?;
        self.clock.sleep(self.power_delay);
        Ok(())
    }

    pub fn sleep(&mut self, duration: Duration) {
        self.clock.sleep(duration);
    }

    /// Data is ready for reading when DOUT is low.
    pub fn is_ready(&mut self) -> Result<bool> {
        let ready = self.dout.is_low().map_err(|e| DriverError::Pin(e.kind()))?;
        trace!("data ready: {}", ready);
        Ok(ready)
    }

    /// Perform one full read cycle followed by `trailing` configuration pulses.
    pub fn read_conversion(&mut self, trailing: u8) -> Result<Conversion> {
        if !(1..=3).contains(&trailing) {
            return Err(DriverError::InvalidParameter(format!(
                "trailing pulse count has to be 1..=3, got {trailing}"
            )));
        }

        self.set_clock(false)?;
        self.wait_ready()?;

        let mut raw = 0u32;
        for pulse in 1..=DATA_BITS {
            let elapsed = self.pulse()?;
            if elapsed >= self.pulse_limit {
                debug!(
                    "data pulse {} took {:?} (limit {:?}), aborting read",
                    pulse, elapsed, self.pulse_limit
                );
                return Err(DriverError::TimingViolation { pulse, elapsed });
            }
            // Shift in MSB first.
            raw = (raw << 1) | u32::from(self.data_bit()?);
        }

        let mut trailing_overrun = false;
        for index in 1..=trailing {
            let elapsed = self.pulse()?;
            if elapsed >= self.pulse_limit {
                warn!(
                    "setting gain and channel took {:?} on pulse {} (limit {:?})",
                    elapsed,
                    DATA_BITS + index,
                    self.pulse_limit
                );
                trailing_overrun = true;
            }
        }

        trace!("raw conversion: {:#026b}", raw);
        Ok(Conversion {
            raw,
            trailing_overrun,
        })
    }

    /// Hand back the pins and clock.
    pub fn release(self) -> (SCK, DOUT, C) {
        (self.sck, self.dout, self.clock)
    }

    // ------------------------------------------------------------------------
    // Internal Methods
    // ------------------------------------------------------------------------

    fn wait_ready(&mut self) -> Result<()> {
        let mut polls = 0u32;
        while !self.is_ready()? {
            self.clock.sleep(self.ready_poll_interval);
            polls += 1;
            if polls >= self.ready_max_polls {
                debug!("chip not ready after {} polls", polls);
                return Err(DriverError::NotReady { polls });
            }
        }
        Ok(())
    }

    /// One clock pulse; returns how long the line was high.
    fn pulse(&mut self) -> Result<Duration> {
        let start = self.clock.now();
        self.set_clock(true)?;
        self.set_clock(false)?;
        Ok(self.clock.now().saturating_duration_since(start))
    }

    fn data_bit(&mut self) -> Result<bool> {
        self.dout.is_high().map_err(|e| DriverError::Pin(e.kind()))
    }

    fn set_clock(&mut self, high: bool) -> Result<()> {
        let result = if high {
            self.sck.set_high()
        } else {
            self.sck.set_low()
        };
        result.map_err(|e| DriverError::Pin(e.kind()))
    }
}
