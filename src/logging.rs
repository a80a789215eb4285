use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

fn env_level() -> LevelFilter {
    parse_level(
        std::env::var("HX711_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok()
            .as_deref(),
    )
    .unwrap_or(LevelFilter::Info)
}

fn parse_level(input: Option<&str>) -> Option<LevelFilter> {
    input.and_then(|s| s.trim().parse::<LevelFilter>().ok())
}

/// Initialize logging for Rust binaries (stderr formatter) based on `HX711_LOG`/`RUST_LOG`.
///
/// An explicit `level` from the command line wins over the environment.
pub fn init_rust_logging(level: Option<&str>) {
    let explicit = parse_level(level);
    RUST_LOG_ONCE.call_once(|| {
        let env = Env::default().filter_or("HX711_LOG", env_level().as_str());
        let mut builder = env_logger::Builder::from_env(env);
        if let Some(level) = explicit {
            builder.filter_level(level);
        }
        builder
            .format_timestamp_micros()
            .format_module_path(true)
            .format_target(false)
            .init();
    });
}

#[cfg(feature = "python")]
pub use python::{init_python_logging, set_python_log_level_str};

#[cfg(feature = "python")]
mod python {
    use std::sync::{Mutex, Once};

    use log::{Level, LevelFilter, Log, Metadata, Record};
    use once_cell::sync::OnceCell;
    use pyo3::prelude::*;

    use super::{env_level, parse_level};

    static PY_LOG_ONCE: Once = Once::new();
    static PY_LOGGER: OnceCell<&'static PyLogger> = OnceCell::new();

    /// Forwards `log` records to `logging.getLogger(<target>)` so Python
    /// handlers and levels apply, e.g. `hx711_rs._core.hx711`.
    struct PyLogger {
        top_filter: Mutex<LevelFilter>,
    }

    impl PyLogger {
        fn top(&self) -> LevelFilter {
            self.top_filter
                .lock()
                .map(|lf| *lf)
                .unwrap_or(LevelFilter::Off)
        }

        fn python_level(level: Level) -> usize {
            match level {
                Level::Error => 40,
                Level::Warn => 30,
                Level::Info => 20,
                Level::Debug => 10,
                Level::Trace => 5,
            }
        }
    }

    impl Log for PyLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level().to_level_filter() <= self.top()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let target = record.target().replace("::", ".");
            let level = Self::python_level(record.level());
            let message = record.args().to_string();

            Python::attach(|py| {
                let result = py
                    .import("logging")
                    .and_then(|logging| logging.call_method1("getLogger", (target,)))
                    .and_then(|logger| logger.call_method1("log", (level, message)));
                if let Err(e) = result {
                    e.restore(py);
                }
            });
        }

        fn flush(&self) {}
    }

    /// Install the bridge into Python's `logging`. Safe to call multiple times.
    pub fn init_python_logging(_py: Python<'_>) -> PyResult<()> {
        let level = env_level();
        PY_LOG_ONCE.call_once(|| {
            let leaked: &'static PyLogger = Box::leak(Box::new(PyLogger {
                top_filter: Mutex::new(level),
            }));
            if log::set_logger(leaked).is_ok() {
                log::set_max_level(level);
                let _ = PY_LOGGER.set(leaked);
            }
        });
        Ok(())
    }

    /// Parse a string log level (or env fallback) and apply it to the bridge.
    pub fn set_python_log_level_str(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
        init_python_logging(py)?;
        let level = parse_level(level).unwrap_or_else(env_level);
        if let Some(logger) = PY_LOGGER.get() {
            if let Ok(mut lf) = logger.top_filter.lock() {
                *lf = level;
            }
        }
        log::set_max_level(level);
        Ok(())
    }
}
