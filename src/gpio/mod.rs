//! Pin-driver capability
//!
//! The relay engine never touches hardware directly. It asks a [`PinDriver`]
//! for a [`LineHandle`], configures it as an output, sets a level and
//! releases it again, all inside a single toggle.
//!
//! Drivers:
//! - [`SysfsPinDriver`] - Linux `/sys/class/gpio` interface (Raspberry Pi)
//! - [`MockPinDriver`] - in-memory driver for tests and dry runs

pub mod mock;
pub mod sysfs;

pub use mock::{LineWrite, MockPinDriver};
pub use sysfs::SysfsPinDriver;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Electrical level of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    Low,
}

impl Level {
    /// Level that represents the logical `active` state for the given wiring.
    ///
    /// Active-low relay boards energise the coil when the line is pulled low.
    pub fn for_state(active: bool, active_low: bool) -> Self {
        if active != active_low {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Pin driver failures
#[derive(Debug, Error)]
pub enum PinError {
    #[error("gpio {pin}: {op} failed: {source}")]
    Io {
        pin: u32,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("gpio {pin} unavailable: {reason}")]
    Unavailable { pin: u32, reason: String },
}

/// An open numbered line. Only valid between `open_line` and `release`.
pub trait LineHandle: Send {
    fn configure_output(&mut self) -> Result<(), PinError>;

    fn set_level(&mut self, level: Level) -> Result<(), PinError>;

    /// Release the line. The level written last stays latched on the pin.
    fn release(&mut self) -> Result<(), PinError>;
}

/// Capability to open numbered output lines
pub trait PinDriver: Send + Sync {
    /// Driver name for logs and /status
    fn name(&self) -> &'static str;

    fn open_line(&self, pin: u32) -> Result<Box<dyn LineHandle>, PinError>;
}

/// Shared driver handle
pub type SharedPinDriver = Arc<dyn PinDriver>;

/// Open `pin`, configure it as output, set `level`, release it.
///
/// Once the line is open it is released on every path, including when
/// configuring or writing fails. The first error wins.
pub fn drive_line(driver: &dyn PinDriver, pin: u32, level: Level) -> Result<(), PinError> {
    let mut line = driver.open_line(pin)?;
    let result = line
        .configure_output()
        .and_then(|()| line.set_level(level));
    let released = line.release();
    result.and(released)
}
