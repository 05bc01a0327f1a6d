//! Pi Relay
//!
//! REST service for switching relays wired to Raspberry Pi GPIO lines.
//!
//! This library provides:
//! - A registry of relays keyed by id, each bound to one GPIO pin
//! - Timed auto-revert ("on for 90 seconds", "off until 06:00")
//! - Sysfs and in-memory pin drivers
//! - The axum router serving `/api/v1`

pub mod api;
pub mod config;
pub mod gpio;
pub mod relay;
