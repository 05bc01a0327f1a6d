//! Relay engine
//!
//! - [`RelayRegistry`] - the set of relays, keyed by id
//! - [`ToggleScheduler`] - applies state changes and arms deferred reverts
//! - [`duration`] - turns a client duration into a delay

pub mod duration;
mod error;
mod record;
mod registry;
mod scheduler;

pub use duration::DurationSpec;
pub use error::RelayError;
pub use record::{RelayRecord, RelaySpec, ToggleSpec};
pub use registry::{BatchOutcome, RegistryStats, RelayRegistry};
pub use scheduler::{PendingRevert, ToggleScheduler};
