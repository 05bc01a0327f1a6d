use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DurationSpec;
use crate::gpio::Level;

/// Public view of one registered relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRecord {
    pub id: String,
    #[serde(rename = "gpio")]
    pub pin: u32,
    /// Logical state; `true` energises the relay regardless of wiring polarity
    #[serde(rename = "state")]
    pub active: bool,
    pub active_low: bool,
    /// When the pending auto-revert fires, if one is armed
    #[serde(
        rename = "end_date",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub scheduled_revert_at: Option<DateTime<Utc>>,
}

impl RelayRecord {
    /// Fresh inactive record with no revert pending
    pub fn new(id: impl Into<String>, pin: u32, active_low: bool) -> Self {
        Self {
            id: id.into(),
            pin,
            active: false,
            active_low,
            scheduled_revert_at: None,
        }
    }

    /// Level currently latched on the line for this record's state
    pub fn level(&self) -> Level {
        Level::for_state(self.active, self.active_low)
    }

    pub fn revert_pending(&self) -> bool {
        self.scheduled_revert_at.is_some()
    }
}

/// Request to register a relay
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelaySpec {
    pub id: String,
    pub gpio: u32,
    /// Initial state, inactive when omitted
    #[serde(default)]
    pub state: bool,
    #[serde(default)]
    pub duration: Option<DurationSpec>,
    /// Overrides `gpio.active_low` for this relay
    #[serde(default)]
    pub active_low: Option<bool>,
}

impl RelaySpec {
    pub fn new(id: impl Into<String>, gpio: u32) -> Self {
        Self {
            id: id.into(),
            gpio,
            state: false,
            duration: None,
            active_low: None,
        }
    }

    pub fn active(mut self, duration: Option<DurationSpec>) -> Self {
        self.state = true;
        self.duration = duration;
        self
    }
}

/// Request to change a relay's state
///
/// `id` is required for `PUT /api/v1/state` and ignored when the id comes
/// from the path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToggleSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub state: bool,
    #[serde(default)]
    pub duration: Option<DurationSpec>,
}

impl ToggleSpec {
    pub fn new(state: bool, duration: Option<DurationSpec>) -> Self {
        Self {
            id: None,
            state,
            duration,
        }
    }

    pub fn for_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Registry-internal slot: the record plus bookkeeping for deferred reverts
#[derive(Debug)]
pub(crate) struct RelayEntry {
    pub(crate) record: RelayRecord,
    /// Bumped on every state change and cancellation. A deferred revert only
    /// fires if the epoch it captured is still current.
    pub(crate) epoch: u64,
    pub(crate) removed: bool,
}

impl RelayEntry {
    pub(crate) fn new(record: RelayRecord) -> Self {
        Self {
            record,
            epoch: 0,
            removed: false,
        }
    }
}
