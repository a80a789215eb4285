//! Simulated HX711 wired to `embedded-hal` pins and a virtual clock.
//!
//! Time only advances through `Clock::sleep` and through "slow" clock edges,
//! so pulse timing is deterministic.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;
use std::time::{Duration, Instant};

use _core::{Clock, Hx711, Hx711Config};
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

const POWER_DOWN_AFTER: Duration = Duration::from_micros(60);

/// Stretch the high phase of a given rising edge (1-based within a conversion).
#[derive(Debug, Clone)]
pub struct SlowEdge {
    pub edge: u32,
    pub delay: Duration,
    pub remaining: u32,
}

#[derive(Debug, Default)]
pub struct ChipState {
    clock_high: bool,
    pub powered_down: bool,
    edges: u32,
    current: Option<u32>,
    busy_left: u32,
    /// Conversion results, oldest first; `default_value` once drained.
    pub values: VecDeque<u32>,
    pub default_value: u32,
    /// "Not ready" answers before each upcoming conversion.
    pub busy_polls: VecDeque<u32>,
    pub slow_edges: Vec<SlowEdge>,
    /// Trailing pulse counts of every fully clocked conversion.
    trailing_log: Vec<u32>,
    pub conversions: u32,
    pub power_downs: u32,
    elapsed: Duration,
}

impl ChipState {
    /// Trailing pulse counts, including the conversion clocked out last.
    pub fn trailing(&self) -> Vec<u32> {
        let mut log = self.trailing_log.clone();
        if self.current.is_some() && self.edges > 24 {
            log.push(self.edges - 24);
        }
        log
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    fn power_down(&mut self) {
        if !self.powered_down {
            self.powered_down = true;
            self.power_downs += 1;
        }
        self.edges = 0;
        self.current = None;
    }

    fn rising_edge(&mut self) {
        self.clock_high = true;
        if self.powered_down || self.current.is_none() {
            return;
        }
        self.edges += 1;
        let edge = self.edges;
        let mut delay = Duration::ZERO;
        for slow in self.slow_edges.iter_mut() {
            if slow.edge == edge && slow.remaining > 0 {
                slow.remaining -= 1;
                delay += slow.delay;
            }
        }
        self.elapsed += delay;
        if delay >= POWER_DOWN_AFTER {
            self.power_down();
        }
    }

    fn falling_edge(&mut self) {
        self.clock_high = false;
        if self.powered_down {
            self.powered_down = false;
            self.busy_left = self.busy_polls.pop_front().unwrap_or(0);
        }
    }

    fn data_line(&mut self) -> bool {
        if self.powered_down {
            return true;
        }
        if self.edges > 24 {
            self.trailing_log.push(self.edges - 24);
            self.edges = 0;
            self.current = None;
            self.busy_left = self.busy_polls.pop_front().unwrap_or(0);
        }
        if self.edges == 0 {
            if self.current.is_some() {
                return false;
            }
            if self.busy_left > 0 {
                self.busy_left -= 1;
                return true;
            }
            let value = self.values.pop_front().unwrap_or(self.default_value);
            self.current = Some(value);
            self.conversions += 1;
            return false;
        }
        let value = self.current.unwrap_or(0);
        (value >> (24 - self.edges)) & 1 == 1
    }

    fn sleep(&mut self, duration: Duration) {
        self.elapsed += duration;
        if self.clock_high && duration >= POWER_DOWN_AFTER {
            self.power_down();
        }
    }
}

pub type Shared = Rc<RefCell<ChipState>>;

pub struct SimClockPin(Shared);

impl ErrorType for SimClockPin {
    type Error = Infallible;
}

impl OutputPin for SimClockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().falling_edge();
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().rising_edge();
        Ok(())
    }
}

pub struct SimDataPin(Shared);

impl ErrorType for SimDataPin {
    type Error = Infallible;
}

impl InputPin for SimDataPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.borrow_mut().data_line())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.borrow_mut().data_line())
    }
}

pub struct VirtualClock {
    base: Instant,
    state: Shared,
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        self.base + self.state.borrow().elapsed
    }

    fn sleep(&mut self, duration: Duration) {
        self.state.borrow_mut().sleep(duration);
    }
}

pub type SimHx711 = Hx711<SimClockPin, SimDataPin, VirtualClock>;

/// A chip that always converts `value`, plus a driver built with `config`.
pub fn simulated(value: u32, config: Hx711Config) -> (SimHx711, Shared) {
    let state: Shared = Rc::new(RefCell::new(ChipState {
        default_value: value,
        ..ChipState::default()
    }));
    let clock = VirtualClock {
        base: Instant::now(),
        state: state.clone(),
    };
    let hx = Hx711::with_clock(
        SimClockPin(state.clone()),
        SimDataPin(state.clone()),
        clock,
        config,
    )
    .expect("driver construction");
    (hx, state)
}

pub fn slow_edge(edge: u32, micros: u64, remaining: u32) -> SlowEdge {
    SlowEdge {
        edge,
        delay: Duration::from_micros(micros),
        remaining,
    }
}
