//! The system clock. A full cycle is Low -> High -> Low; sequential
//! gates sample inputs on the rising edge (`clock_up`) and commit state
//! on the falling edge (`clock_down`).

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{ErrorKind, HdlError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalfPhase {
    Low,
    High,
}

/// Which edge a `tick()` produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Debug)]
pub struct Clock {
    rate: u32,
    value: i64,
    half: HalfPhase,
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

impl Clock {
    pub fn new() -> Clock {
        Clock {
            rate: 1,
            value: -1,
            half: HalfPhase::Low,
        }
    }

    pub fn set_rate(&mut self, hz: u32) -> Result<(), HdlError> {
        if hz == 0 {
            return Err(HdlError {
                msg: String::from("Clock rate must be positive."),
                kind: ErrorKind::Other,
            });
        }
        self.rate = hz;
        Ok(())
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Tick index. -1 until the first rising edge.
    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn half(&self) -> HalfPhase {
        self.half
    }

    /// Advances one half-phase and reports the edge just produced.
    /// The tick index increments on the rising edge.
    pub fn tick(&mut self) -> Edge {
        match self.half {
            HalfPhase::Low => {
                self.half = HalfPhase::High;
                self.value += 1;
                Edge::Rising
            }
            HalfPhase::High => {
                self.half = HalfPhase::Low;
                Edge::Falling
            }
        }
    }

    pub fn reset(&mut self) {
        self.value = -1;
        self.half = HalfPhase::Low;
    }
}

/// Shared handle to a clock. Composites take one of these so tests can
/// inject an isolated clock instead of the process-wide instance.
pub type ClockHandle = Rc<RefCell<Clock>>;

pub fn isolated_clock() -> ClockHandle {
    Rc::new(RefCell::new(Clock::new()))
}

thread_local! {
    static SYSTEM_CLOCK: ClockHandle = isolated_clock();
}

/// The default, process-wide clock.
pub fn system_clock() -> ClockHandle {
    SYSTEM_CLOCK.with(Rc::clone)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tick_protocol() {
        let mut c = Clock::new();
        assert_eq!(c.value(), -1);
        assert_eq!(c.half(), HalfPhase::Low);

        assert_eq!(c.tick(), Edge::Rising);
        assert_eq!(c.value(), 0);
        assert_eq!(c.half(), HalfPhase::High);

        assert_eq!(c.tick(), Edge::Falling);
        assert_eq!(c.value(), 0);
        assert_eq!(c.half(), HalfPhase::Low);

        assert_eq!(c.tick(), Edge::Rising);
        assert_eq!(c.value(), 1);
    }

    #[test]
    fn test_reset() {
        let mut c = Clock::new();
        c.tick();
        c.tick();
        c.tick();
        c.reset();
        assert_eq!(c.value(), -1);
        assert_eq!(c.half(), HalfPhase::Low);
    }

    #[test]
    fn test_rate_must_be_positive() {
        let mut c = Clock::new();
        assert!(c.set_rate(0).is_err());
        c.set_rate(4).unwrap();
        assert_eq!(c.rate(), 4);
    }

    #[test]
    fn test_shared_handle_aliases_one_clock() {
        let h1 = system_clock();
        let h2 = system_clock();
        h1.borrow_mut().reset();
        let before = h2.borrow().value();
        h1.borrow_mut().tick();
        assert_eq!(h2.borrow().value(), before + 1);
        h1.borrow_mut().reset();
    }
}
