use thiserror::Error;

use crate::gpio::PinError;

/// Relay engine errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// `end_date` present but not a timestamp. The line is not touched.
    #[error("unable to parse end date {value:?}")]
    InvalidDurationFormat { value: String },

    #[error("relay not found: {0}")]
    NotFound(String),

    #[error("relay id already registered: {0}")]
    DuplicateId(String),

    #[error("gpio {pin} is already owned by relay {owner}")]
    PinInUse { pin: u32, owner: String },

    #[error("invalid relay request: {0}")]
    InvalidSpec(String),

    /// Pin driver failure. The record is left unchanged.
    #[error("relay {id}: {source}")]
    HardwareError {
        id: String,
        #[source]
        source: PinError,
    },
}
