//! Toggle application and deferred reverts
//!
//! `apply` is the only place a record's state changes. It runs synchronously
//! under the record's lock: resolve the duration, drive the line, then commit
//! state and revert schedule together.
//!
//! Deferred reverts are plain spawned tasks that carry only
//! `(id, epoch, revert_to)`. When they wake they look the record up again by
//! id and fire only if the record still exists and its epoch is unchanged, so
//! a retoggle or delete cancels them without keeping any handle around.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::duration::{self, DurationSpec};
use super::record::RelayEntry;
use super::{RelayError, RelayRegistry};
use crate::gpio::{drive_line, Level, SharedPinDriver};

/// A revert that `apply` decided to arm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRevert {
    pub id: String,
    pub epoch: u64,
    pub revert_to: bool,
    pub delay: Duration,
}

#[derive(Clone)]
pub struct ToggleScheduler {
    driver: SharedPinDriver,
    epochs: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl ToggleScheduler {
    pub fn new(driver: SharedPinDriver, shutdown: CancellationToken) -> Self {
        Self {
            driver,
            epochs: Arc::new(AtomicU64::new(0)),
            shutdown,
        }
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Registry-wide counter; a record recreated under the same id never
    /// sees an epoch an older task captured.
    pub(crate) fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Drive the line for `desired` and commit the new state.
    ///
    /// On `InvalidDurationFormat` or `HardwareError` the entry is untouched,
    /// including any revert already pending.
    pub(crate) fn apply(
        &self,
        entry: &mut RelayEntry,
        desired: bool,
        duration: Option<&DurationSpec>,
    ) -> Result<Option<PendingRevert>, RelayError> {
        self.apply_at(entry, desired, duration, Utc::now())
    }

    fn apply_at(
        &self,
        entry: &mut RelayEntry,
        desired: bool,
        duration: Option<&DurationSpec>,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingRevert>, RelayError> {
        let delay = duration::resolve(duration, now)?;

        let record = &mut entry.record;
        let level = Level::for_state(desired, record.active_low);
        drive_line(self.driver.as_ref(), record.pin, level).map_err(|source| {
            RelayError::HardwareError {
                id: record.id.clone(),
                source,
            }
        })?;

        record.active = desired;
        entry.epoch = self.next_epoch();

        let Some(delay) = delay else {
            record.scheduled_revert_at = None;
            tracing::info!(
                "Relay {} (gpio {}) -> {} [{:?}]",
                record.id,
                record.pin,
                on_off(desired),
                level
            );
            return Ok(None);
        };

        let revert_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        record.scheduled_revert_at = Some(revert_at);
        tracing::info!(
            "Relay {} (gpio {}) -> {} [{:?}], reverting to {} at {}",
            record.id,
            record.pin,
            on_off(desired),
            level,
            on_off(!desired),
            revert_at
        );

        Ok(Some(PendingRevert {
            id: record.id.clone(),
            epoch: entry.epoch,
            revert_to: !desired,
            delay,
        }))
    }

    /// Spawn the deferred revert. Abandoned when the service shuts down.
    pub(crate) fn arm(&self, registry: RelayRegistry, pending: PendingRevert) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(
                        "Dropping scheduled revert of relay {} (shutting down)",
                        pending.id
                    );
                }
                _ = tokio::time::sleep(pending.delay) => {
                    registry.fire_revert(pending).await;
                }
            }
        });
    }
}

fn on_off(active: bool) -> &'static str {
    if active {
        "on"
    } else {
        "off"
    }
}
