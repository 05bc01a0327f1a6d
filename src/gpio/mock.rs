//! In-memory pin driver
//!
//! Records every level written so tests can assert on the full line history
//! without real GPIO. Also selectable at runtime (`gpio.driver = "mock"`) for
//! running the service on a development machine.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Level, LineHandle, PinDriver, PinError};

/// One recorded level write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineWrite {
    pub pin: u32,
    pub level: Level,
}

#[derive(Default)]
struct MockState {
    levels: HashMap<u32, Level>,
    writes: Vec<LineWrite>,
    failing_opens: HashSet<u32>,
    failing_writes: HashSet<u32>,
    open: usize,
}

/// Mock driver; clones share the same simulated hardware
#[derive(Clone, Default)]
pub struct MockPinDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockPinDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not poison the simulated hardware
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every subsequent `open_line(pin)` fail
    pub fn fail_pin(&self, pin: u32) {
        self.state().failing_opens.insert(pin);
    }

    /// Let `open_line(pin)` succeed but make `set_level` fail
    pub fn fail_writes(&self, pin: u32) {
        self.state().failing_writes.insert(pin);
    }

    /// Clear injected failures for `pin`
    pub fn heal(&self, pin: u32) {
        let mut state = self.state();
        state.failing_opens.remove(&pin);
        state.failing_writes.remove(&pin);
    }

    /// Last level latched on `pin`, if it was ever written
    pub fn level(&self, pin: u32) -> Option<Level> {
        self.state().levels.get(&pin).copied()
    }

    /// All writes in order
    pub fn writes(&self) -> Vec<LineWrite> {
        self.state().writes.clone()
    }

    /// Writes to a single pin in order
    pub fn writes_for(&self, pin: u32) -> Vec<Level> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.pin == pin)
            .map(|w| w.level)
            .collect()
    }

    /// Number of handles currently open (should be 0 between toggles)
    pub fn open_lines(&self) -> usize {
        self.state().open
    }
}

impl PinDriver for MockPinDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open_line(&self, pin: u32) -> Result<Box<dyn LineHandle>, PinError> {
        let mut state = self.state();
        if state.failing_opens.contains(&pin) {
            return Err(PinError::Unavailable {
                pin,
                reason: "simulated open failure".to_string(),
            });
        }
        state.open += 1;
        Ok(Box::new(MockLine {
            pin,
            output: false,
            released: false,
            driver: self.clone(),
        }))
    }
}

struct MockLine {
    pin: u32,
    output: bool,
    released: bool,
    driver: MockPinDriver,
}

impl LineHandle for MockLine {
    fn configure_output(&mut self) -> Result<(), PinError> {
        self.output = true;
        Ok(())
    }

    fn set_level(&mut self, level: Level) -> Result<(), PinError> {
        if !self.output {
            return Err(PinError::Unavailable {
                pin: self.pin,
                reason: "line not configured as output".to_string(),
            });
        }
        let mut state = self.driver.state();
        if state.failing_writes.contains(&self.pin) {
            return Err(PinError::Unavailable {
                pin: self.pin,
                reason: "simulated write failure".to_string(),
            });
        }
        state.levels.insert(self.pin, level);
        state.writes.push(LineWrite {
            pin: self.pin,
            level,
        });
        Ok(())
    }

    fn release(&mut self) -> Result<(), PinError> {
        if !self.released {
            self.released = true;
            let mut state = self.driver.state();
            state.open = state.open.saturating_sub(1);
        }
        Ok(())
    }
}
