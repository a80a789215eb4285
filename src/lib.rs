//! HX711 load cell ADC driver with optional Python bindings.
//!
//! The HX711 is read by bit-banging two GPIO lines: a clock output and a data
//! input. This crate drives them through the `embedded-hal` digital traits, so
//! the same driver runs on a Raspberry Pi (via `rppal`) and against simulated
//! pins in tests.
//!
//! # Timing
//!
//! Holding the clock line high for 60µs or more powers the chip down. Each
//! pulse is timed; reads spoiled by scheduling latency are discarded and
//! retried rather than returned. Expect occasional retries on a system without
//! real-time scheduling.
//!
//! # Concurrency
//!
//! One driver per chip. Every read takes `&mut self`; share a driver between
//! threads only behind a `Mutex`.

pub mod config;
pub mod errors;
pub mod hx711;
pub mod logging;
pub mod protocol;

pub use config::{trailing_pulses, Channel, Gain, Hx711Config, MeasureBounds};
pub use errors::*;
pub use hx711::{GainChange, Hx711, ReadBatch};
pub use protocol::{decode, Clock, Conversion, ProtocolEngine, SystemClock};

/// Open the clock and data lines on the Raspberry Pi GPIO header (BCM numbering).
///
/// The clock line starts low so the chip is powered up.
pub fn open_rpi_pins(
    clock_pin: u8,
    data_pin: u8,
) -> Result<(rppal::gpio::OutputPin, rppal::gpio::InputPin)> {
    let gpio = rppal::gpio::Gpio::new()?;
    let sck = gpio.get(clock_pin)?.into_output_low();
    let dout = gpio.get(data_pin)?.into_input();
    Ok((sck, dout))
}

// ============================================================================
// Python Bindings
// ============================================================================

#[cfg(feature = "python")]
mod bindings {
    use pyo3::create_exception;
    use pyo3::exceptions::{PyException, PyValueError};
    use pyo3::prelude::*;

    use crate::logging::{init_python_logging, set_python_log_level_str};
    use crate::{open_rpi_pins, Channel, DriverError, Hx711, Hx711Config};

    create_exception!(_core, ParameterValidationError, PyValueError);
    create_exception!(_core, GenericHX711Exception, PyException);

    fn to_py_err(e: DriverError) -> PyErr {
        match e {
            DriverError::InvalidParameter(msg) => ParameterValidationError::new_err(msg),
            other => GenericHX711Exception::new_err(other.to_string()),
        }
    }

    /// HX711 load cell ADC on Raspberry Pi GPIO pins (BCM numbering).
    ///
    /// Example:
    ///     >>> hx = HX711(dout_pin=21, pd_sck_pin=20, gain=128, channel="A")
    ///     >>> hx.reset()
    ///     >>> hx.get_raw_data(10)
    #[pyclass(name = "HX711", unsendable)]
    struct PyHx711 {
        inner: Hx711<rppal::gpio::OutputPin, rppal::gpio::InputPin>,
    }

    #[pymethods]
    impl PyHx711 {
        /// Claim the pins and program the initial channel/gain.
        ///
        /// Raises:
        ///     ParameterValidationError: invalid gain or channel
        ///     GenericHX711Exception: GPIO could not be opened
        #[new]
        #[pyo3(signature = (dout_pin, pd_sck_pin, gain=128, channel="A"))]
        fn new(dout_pin: u8, pd_sck_pin: u8, gain: u32, channel: &str) -> PyResult<Self> {
            let config = Hx711Config::from_parts(channel, gain).map_err(to_py_err)?;
            let (sck, dout) = open_rpi_pins(pd_sck_pin, dout_pin).map_err(to_py_err)?;
            let inner = Hx711::new(sck, dout, config).map_err(to_py_err)?;
            Ok(PyHx711 { inner })
        }

        /// Power-cycle the chip and discard settle reads.
        ///
        /// Returns:
        ///     True on success
        ///
        /// Raises:
        ///     GenericHX711Exception: the chip could not be resynchronized
        fn reset(&mut self) -> PyResult<bool> {
            self.inner.reset().map_err(to_py_err)?;
            Ok(true)
        }

        fn power_down(&mut self) -> PyResult<bool> {
            self.inner.power_down().map_err(to_py_err)?;
            Ok(true)
        }

        fn power_up(&mut self) -> PyResult<bool> {
            self.inner.power_up().map_err(to_py_err)?;
            Ok(true)
        }

        /// Read `times` raw samples. Blocks until that many valid reads arrive.
        #[pyo3(signature = (times=5))]
        fn get_raw_data(&mut self, times: i64) -> PyResult<Vec<i32>> {
            let times = self
                .inner
                .measure_bounds()
                .checked_count(times)
                .map_err(to_py_err)?;
            self.inner.get_raw_data(times).map_err(to_py_err)
        }

        #[getter]
        fn channel(&self) -> String {
            self.inner.channel().to_string()
        }

        #[setter]
        fn set_channel(&mut self, channel: &str) -> PyResult<()> {
            let channel: Channel = channel.parse().map_err(to_py_err)?;
            self.inner.set_channel(channel).map_err(to_py_err)
        }

        #[getter]
        fn channel_a_gain(&self) -> u32 {
            self.inner.gain().value()
        }

        /// Ignored (with a warning) while channel B is selected.
        #[setter]
        fn set_channel_a_gain(&mut self, gain: u32) -> PyResult<()> {
            self.inner.set_gain(gain).map(|_| ()).map_err(to_py_err)
        }

        #[getter]
        fn min_measures(&self) -> usize {
            self.inner.measure_bounds().min()
        }

        #[setter]
        fn set_min_measures(&mut self, value: usize) -> PyResult<()> {
            let max = self.inner.measure_bounds().max();
            self.inner.set_measure_bounds(value, max).map_err(to_py_err)
        }

        #[getter]
        fn max_measures(&self) -> usize {
            self.inner.measure_bounds().max()
        }

        #[setter]
        fn set_max_measures(&mut self, value: usize) -> PyResult<()> {
            let min = self.inner.measure_bounds().min();
            self.inner.set_measure_bounds(min, value).map_err(to_py_err)
        }

        fn __repr__(&self) -> String {
            format!(
                "HX711(channel={}, channel_a_gain={})",
                self.inner.channel(),
                self.inner.gain().value()
            )
        }
    }

    /// Set the minimum level of records forwarded to Python's `logging`.
    #[pyfunction]
    #[pyo3(signature = (level=None))]
    fn set_log_level(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
        set_python_log_level_str(py, level)
    }

    /// The Python module definition
    #[pymodule]
    fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        init_python_logging(m.py())?;

        m.add_class::<PyHx711>()?;
        m.add_function(wrap_pyfunction!(set_log_level, m)?)?;
        m.add(
            "ParameterValidationError",
            m.py().get_type::<ParameterValidationError>(),
        )?;
        m.add(
            "GenericHX711Exception",
            m.py().get_type::<GenericHX711Exception>(),
        )?;

        m.add("VALID_CHANNELS", vec!["A", "B"])?;
        m.add("VALID_GAINS_FOR_CHANNEL_A", vec![64u32, 128])?;

        Ok(())
    }
}
