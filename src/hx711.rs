//! HX711 driver: configuration setters, sample aggregation and reset.
//!
//! # Example
//! ```ignore
//! let gpio = rppal::gpio::Gpio::new()?;
//! let sck = gpio.get(20)?.into_output_low();
//! let dout = gpio.get(21)?.into_input();
//! let mut hx = Hx711::new(sck, dout, Hx711Config::default())?;
//!
//! hx.reset()?;
//! let samples = hx.get_raw_data(10)?;
//! ```
//!
//! Every aggregated read either returns exactly the requested number of valid
//! samples or keeps retrying. A chip that never becomes ready (e.g. unplugged
//! wiring) blocks the caller; wrap calls with an external deadline and
//! `reset()` the chip before reusing it after abandoning a read.

use embedded_hal::digital::{InputPin, OutputPin};
use log::{debug, info, warn};

use crate::config::{Channel, Gain, Hx711Config, MeasureBounds};
use crate::errors::{DriverError, Result};
use crate::protocol::{decode, Clock, ProtocolEngine, SystemClock};

/// Result of [`Hx711::set_gain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainChange {
    /// The gain was committed and the chip re-programmed.
    Applied,
    /// Channel B is selected; its gain is fixed so nothing changed.
    Ignored,
}

/// Samples of an aggregated read plus the reads that were thrown away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadBatch {
    pub samples: Vec<i32>,
    pub not_ready: usize,
    pub timing_violations: usize,
    pub invalid_samples: usize,
    pub desyncs: usize,
}

impl ReadBatch {
    pub fn discarded(&self) -> usize {
        self.not_ready + self.timing_violations + self.invalid_samples + self.desyncs
    }
}

/// HX711 load cell ADC.
///
/// Owns both GPIO lines for its whole lifetime; they are released when the
/// driver is dropped or handed back by [`Hx711::release`].
pub struct Hx711<SCK, DOUT, C = SystemClock> {
    engine: ProtocolEngine<SCK, DOUT, C>,
    config: Hx711Config,
}

impl<SCK, DOUT> Hx711<SCK, DOUT, SystemClock>
where
    SCK: OutputPin,
    DOUT: InputPin,
{
    /// Create a driver on real time.
    pub fn new(sck: SCK, dout: DOUT, config: Hx711Config) -> Result<Self> {
        Self::with_clock(sck, dout, SystemClock, config)
    }
}

impl<SCK, DOUT, C> Hx711<SCK, DOUT, C>
where
    SCK: OutputPin,
    DOUT: InputPin,
    C: Clock,
{
    /// Create a driver with an explicit time source.
    ///
    /// The initial channel/gain from `config` is programmed into the chip
    /// with one settle read before this returns.
    pub fn with_clock(sck: SCK, dout: DOUT, clock: C, config: Hx711Config) -> Result<Self> {
        config.validate()?;
        let engine = ProtocolEngine::new(sck, dout, clock, &config);
        let mut driver = Self { engine, config };
        debug!(
            "HX711 init: channel={}, gain={}",
            driver.config.channel,
            driver.config.gain.value()
        );
        driver.apply_setting()?;
        Ok(driver)
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    pub fn channel(&self) -> Channel {
        self.config.channel
    }

    /// Gain used on channel A (remembered while channel B is selected).
    pub fn gain(&self) -> Gain {
        self.config.gain
    }

    pub fn config(&self) -> &Hx711Config {
        &self.config
    }

    /// Select the input channel.
    ///
    /// Post-condition: one settle read has been performed with the new
    /// selection, so the next read returns data from `channel`.
    pub fn set_channel(&mut self, channel: Channel) -> Result<()> {
        self.config.channel = channel;
        self.apply_setting()
    }

    /// Set the channel A gain (64 or 128).
    ///
    /// On channel B the call is ignored with a warning. Otherwise the gain is
    /// validated, committed, and a settle read is performed.
    pub fn set_gain(&mut self, gain: u32) -> Result<GainChange> {
        if self.config.channel != Channel::A {
            warn!(
                "current channel is {}, not A; gain {} is not applied",
                self.config.channel, gain
            );
            return Ok(GainChange::Ignored);
        }
        self.config.gain = Gain::try_from(gain)?;
        self.apply_setting()?;
        Ok(GainChange::Applied)
    }

    pub fn measure_bounds(&self) -> MeasureBounds {
        self.config.measure_bounds
    }

    pub fn set_measure_bounds(&mut self, min: usize, max: usize) -> Result<()> {
        self.config.measure_bounds = MeasureBounds::new(min, max)?;
        Ok(())
    }

    pub fn validate_measure_count(&self, times: usize) -> Result<()> {
        self.config.measure_bounds.validate(times)
    }

    // ------------------------------------------------------------------------
    // Power
    // ------------------------------------------------------------------------

    pub fn power_down(&mut self) -> Result<()> {
        self.engine.power_down()
    }

    pub fn power_up(&mut self) -> Result<()> {
        self.engine.power_up()
    }

    /// Power-cycle the chip and discard a few reads so the next data is valid.
    pub fn reset(&mut self) -> Result<()> {
        debug!("power down");
        self.power_down()?;
        debug!("power up");
        self.power_up()?;
        debug!("read some raw data");
        let batch = self
            .collect(self.config.reset_samples)
            .map_err(|e| DriverError::Reset(Box::new(e)))?;
        info!("HX711 reset, discarded {} settle samples", batch.samples.len());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Read one decoded sample.
    ///
    /// `NotReady`, `TimingViolation` and `InvalidSample` mean only that this
    /// read does not count. `ProtocolDesync` means the trailing pulses could
    /// not be re-established.
    pub fn read_one(&mut self) -> Result<i32> {
        let conversion = self.engine.read_conversion(self.config.trailing_pulses())?;
        if conversion.trailing_overrun {
            self.resync()?;
        }
        let sample = decode(conversion.raw)?;
        debug!("sample: {}", sample);
        Ok(sample)
    }

    /// Read exactly `times` valid samples.
    pub fn acquire(&mut self, times: usize) -> Result<Vec<i32>> {
        Ok(self.acquire_with_stats(times)?.samples)
    }

    /// Same as [`Hx711::acquire`].
    pub fn get_raw_data(&mut self, times: usize) -> Result<Vec<i32>> {
        self.acquire(times)
    }

    /// Read exactly `times` valid samples and report what was discarded.
    pub fn acquire_with_stats(&mut self, times: usize) -> Result<ReadBatch> {
        self.validate_measure_count(times)?;
        self.collect(times)
    }

    /// Hand back the pins and clock, consuming the driver.
    pub fn release(self) -> (SCK, DOUT, C) {
        self.engine.release()
    }

    // ------------------------------------------------------------------------
    // Internal Methods
    // ------------------------------------------------------------------------

    fn collect(&mut self, times: usize) -> Result<ReadBatch> {
        let mut batch = ReadBatch {
            samples: Vec::with_capacity(times),
            ..ReadBatch::default()
        };
        let mut consecutive_desyncs = 0u32;

        while batch.samples.len() < times {
            match self.read_one() {
                Ok(sample) => {
                    batch.samples.push(sample);
                    consecutive_desyncs = 0;
                }
                Err(DriverError::NotReady { .. }) => batch.not_ready += 1,
                Err(DriverError::TimingViolation { .. }) => batch.timing_violations += 1,
                Err(DriverError::InvalidSample(_)) => batch.invalid_samples += 1,
                Err(DriverError::ProtocolDesync(reason)) => {
                    batch.desyncs += 1;
                    consecutive_desyncs += 1;
                    if consecutive_desyncs > self.config.max_desync_retries {
                        return Err(DriverError::ProtocolDesync(reason));
                    }
                    warn!(
                        "protocol desync ({}), retry {}/{}",
                        reason, consecutive_desyncs, self.config.max_desync_retries
                    );
                }
                Err(e) => return Err(e),
            }
        }

        if batch.discarded() > 0 {
            debug!(
                "discarded reads in batch: not_ready={}, timing={}, invalid={}, desync={}",
                batch.not_ready, batch.timing_violations, batch.invalid_samples, batch.desyncs
            );
        }
        Ok(batch)
    }

    /// Re-establish the channel/gain selection after a late trailing pulse.
    ///
    /// Each round reads up to `resync_samples` samples. A round succeeds once
    /// it has a valid sample and its last trailing sequence was on time.
    fn resync(&mut self) -> Result<()> {
        let pulses = self.config.trailing_pulses();
        let wanted = self.config.resync_samples;
        let max_attempts = wanted * 4;

        for round in 1..=self.config.max_resync_rounds {
            let mut valid = 0usize;
            let mut tail_clean = true;

            for _ in 0..max_attempts {
                if valid >= wanted {
                    break;
                }
                match self.engine.read_conversion(pulses) {
                    Ok(conversion) => {
                        tail_clean = !conversion.trailing_overrun;
                        if decode(conversion.raw).is_ok() {
                            valid += 1;
                        }
                    }
                    Err(e) if e.is_transient() => {}
                    Err(e) => return Err(e),
                }
            }

            if valid == 0 {
                return Err(DriverError::ProtocolDesync(format!(
                    "no valid samples in resync round {round}"
                )));
            }
            if tail_clean {
                debug!("resync succeeded in round {} ({} samples)", round, valid);
                return Ok(());
            }
            warn!("trailing pulses overran again during resync round {}", round);
        }

        Err(DriverError::ProtocolDesync(format!(
            "channel was not set properly after {} resync rounds",
            self.config.max_resync_rounds
        )))
    }

    /// A channel/gain change takes effect one conversion later: read once with
    /// the new trailing pulses, drop the result, and let the chip settle.
    ///
    /// A desync is retried up to `max_desync_retries` times, then returned.
    fn apply_setting(&mut self) -> Result<()> {
        let mut desyncs = 0u32;
        loop {
            match self.read_one() {
                Ok(_) => break,
                Err(e) if e.is_transient() => {
                    debug!("settle read discarded: {}", e);
                    break;
                }
                Err(DriverError::ProtocolDesync(reason)) => {
                    desyncs += 1;
                    if desyncs > self.config.max_desync_retries {
                        return Err(DriverError::ProtocolDesync(reason));
                    }
                    warn!(
                        "settle read could not resync ({}), retry {}/{}",
                        reason, desyncs, self.config.max_desync_retries
                    );
                }
                Err(e) => return Err(e),
            }
        }
        self.engine.sleep(self.config.settle_delay);
        Ok(())
    }
}
