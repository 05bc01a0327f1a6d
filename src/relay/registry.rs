//! Relay registry
//!
//! Table of relays keyed by id, in insertion order. The table lock is only
//! held to insert, remove or look up slots; state changes happen under the
//! individual record's lock so toggles on different relays never contend.
//!
//! Lock order is table, then record. Nothing takes the table lock while it
//! holds a record lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::record::RelayEntry;
use super::scheduler::{PendingRevert, ToggleScheduler};
use super::{duration, RelayError, RelayRecord, RelaySpec, ToggleSpec};
use crate::gpio::SharedPinDriver;

type Slot = Arc<Mutex<RelayEntry>>;

#[derive(Default)]
struct RelayTable {
    order: Vec<String>,
    slots: HashMap<String, Slot>,
    /// pin -> owning relay id
    pins: HashMap<u32, String>,
}

impl RelayTable {
    fn insert(&mut self, id: &str, pin: u32, slot: Slot) {
        self.pins.insert(pin, id.to_string());
        self.order.push(id.to_string());
        self.slots.insert(id.to_string(), slot);
    }

    fn remove(&mut self, id: &str) -> Option<Slot> {
        let slot = self.slots.remove(id)?;
        self.order.retain(|existing| existing != id);
        self.pins.retain(|_, owner| owner != id);
        Some(slot)
    }

    /// Slots in registry order
    fn snapshot(&self) -> Vec<(String, Slot)> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(id).map(|slot| (id.clone(), slot.clone())))
            .collect()
    }
}

/// Result of a multi-relay operation
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Records that were created or toggled, in processing order
    pub records: Vec<RelayRecord>,
    /// `(relay, request)` pairs that matched
    pub matched: usize,
    /// Per-relay failures; the rest of the batch still went through
    pub failures: Vec<RelayError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub relays: usize,
    pub active: usize,
    pub pending_reverts: usize,
}

#[derive(Clone)]
pub struct RelayRegistry {
    table: Arc<RwLock<RelayTable>>,
    scheduler: ToggleScheduler,
    default_active_low: bool,
}

impl RelayRegistry {
    pub fn new(driver: SharedPinDriver, shutdown: CancellationToken) -> Self {
        Self {
            table: Arc::new(RwLock::new(RelayTable::default())),
            scheduler: ToggleScheduler::new(driver, shutdown),
            default_active_low: true,
        }
    }

    /// Polarity for relays whose create request does not say
    pub fn with_default_active_low(mut self, active_low: bool) -> Self {
        self.default_active_low = active_low;
        self
    }

    pub fn driver_name(&self) -> &'static str {
        self.scheduler.driver_name()
    }

    /// Register one relay and apply its initial state.
    ///
    /// A hardware failure on the initial toggle leaves the relay registered
    /// (inactive) and is returned as the error.
    pub async fn create(&self, spec: RelaySpec) -> Result<RelayRecord, RelayError> {
        let id = spec.id.clone();
        let mut outcome = self.create_batch(vec![spec]).await?;
        if let Some(err) = outcome.failures.pop() {
            return Err(err);
        }
        outcome.records.pop().ok_or(RelayError::NotFound(id))
    }

    /// Register several relays at once.
    ///
    /// The whole batch is validated first: an empty id, a duplicate id or a
    /// pin already owned by another relay rejects the batch and nothing is
    /// registered. Initial toggles that fail on hardware are collected in
    /// [`BatchOutcome::failures`]; an unparseable initial duration is logged
    /// and the relay is created inactive.
    pub async fn create_batch(&self, specs: Vec<RelaySpec>) -> Result<BatchOutcome, RelayError> {
        let mut claimed = Vec::with_capacity(specs.len());
        {
            let mut table = self.table.write().await;
            validate_new(&table, &specs)?;

            for spec in specs {
                let active_low = spec.active_low.unwrap_or(self.default_active_low);
                let record = RelayRecord::new(spec.id.clone(), spec.gpio, active_low);
                let slot: Slot = Arc::new(Mutex::new(RelayEntry::new(record)));
                // Not yet published, so this never waits
                let entry = slot.clone().lock_owned().await;
                table.insert(&spec.id, spec.gpio, slot);
                claimed.push((entry, spec));
            }
        }

        // Initial toggles run with only the new records locked
        let mut outcome = BatchOutcome::default();
        let mut pending = Vec::new();
        for (mut entry, spec) in claimed {
            match self
                .scheduler
                .apply(&mut entry, spec.state, spec.duration.as_ref())
            {
                Ok(armed) => pending.extend(armed),
                Err(err @ RelayError::InvalidDurationFormat { .. }) => {
                    tracing::warn!(
                        "Relay {} created inactive: {}",
                        entry.record.id,
                        err
                    );
                }
                Err(err) => {
                    tracing::error!("Initial toggle failed: {}", err);
                    outcome.failures.push(err);
                }
            }

            tracing::info!(
                "Registered relay {} on gpio {} (active_low={})",
                entry.record.id,
                entry.record.pin,
                entry.record.active_low
            );
            outcome.matched += 1;
            outcome.records.push(entry.record.clone());
        }

        for revert in pending {
            self.scheduler.arm(self.clone(), revert);
        }
        Ok(outcome)
    }

    pub async fn get(&self, id: &str) -> Result<RelayRecord, RelayError> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| RelayError::NotFound(id.to_string()))?;
        let entry = slot.lock().await;
        if entry.removed {
            return Err(RelayError::NotFound(id.to_string()));
        }
        Ok(entry.record.clone())
    }

    /// All relays in registry order
    pub async fn list(&self) -> Vec<RelayRecord> {
        let slots = self.table.read().await.snapshot();
        let mut records = Vec::with_capacity(slots.len());
        for (_, slot) in slots {
            let entry = slot.lock().await;
            if !entry.removed {
                records.push(entry.record.clone());
            }
        }
        records
    }

    /// Toggle one relay. The request's own `id` is ignored.
    pub async fn update(&self, id: &str, spec: &ToggleSpec) -> Result<RelayRecord, RelayError> {
        let slot = self
            .slot(id)
            .await
            .ok_or_else(|| RelayError::NotFound(id.to_string()))?;
        self.toggle(&slot, spec)
            .await?
            .ok_or_else(|| RelayError::NotFound(id.to_string()))
    }

    /// Toggle relays by id.
    ///
    /// Every request needs an id and a parseable duration, otherwise nothing
    /// is toggled. Requests are then applied in registry order; a request
    /// naming an unknown id simply matches nothing.
    pub async fn update_batch(&self, specs: &[ToggleSpec]) -> Result<BatchOutcome, RelayError> {
        let now = chrono::Utc::now();
        for spec in specs {
            if spec.id.as_deref().map_or(true, str::is_empty) {
                return Err(RelayError::InvalidSpec("state change without id".to_string()));
            }
            duration::resolve(spec.duration.as_ref(), now)?;
        }

        let mut outcome = BatchOutcome::default();
        let slots = self.table.read().await.snapshot();
        for (id, slot) in slots {
            for spec in specs.iter().filter(|s| s.id.as_deref() == Some(id.as_str())) {
                match self.toggle(&slot, spec).await {
                    Ok(Some(record)) => {
                        outcome.matched += 1;
                        outcome.records.push(record);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::error!("State change failed: {}", err);
                        outcome.matched += 1;
                        outcome.failures.push(err);
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Remove a relay and cancel its pending revert. The line is left as is.
    ///
    /// The pin is only released once an in-flight toggle of this relay has
    /// finished with it.
    pub async fn delete(&self, id: &str) -> Result<RelayRecord, RelayError> {
        let mut table = self.table.write().await;
        let slot = table
            .slots
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(id.to_string()))?;

        let mut entry = slot.lock().await;
        entry.removed = true;
        entry.epoch = self.scheduler.next_epoch();
        entry.record.scheduled_revert_at = None;
        table.remove(id);
        drop(table);

        tracing::info!(
            "Removed relay {} (gpio {} left {})",
            entry.record.id,
            entry.record.pin,
            if entry.record.active { "on" } else { "off" }
        );
        Ok(entry.record.clone())
    }

    pub async fn stats(&self) -> RegistryStats {
        let records = self.list().await;
        RegistryStats {
            relays: records.len(),
            active: records.iter().filter(|r| r.active).count(),
            pending_reverts: records.iter().filter(|r| r.revert_pending()).count(),
        }
    }

    /// Called by the deferred task once its delay elapses
    pub(crate) async fn fire_revert(&self, pending: PendingRevert) {
        let Some(slot) = self.slot(&pending.id).await else {
            tracing::debug!("Revert for relay {} skipped: relay removed", pending.id);
            return;
        };

        let mut entry = slot.lock().await;
        if entry.removed || entry.epoch != pending.epoch {
            tracing::debug!(
                "Revert for relay {} skipped: superseded (epoch {} != {})",
                pending.id,
                pending.epoch,
                entry.epoch
            );
            return;
        }

        if let Err(err) = self.scheduler.apply(&mut entry, pending.revert_to, None) {
            tracing::error!("Scheduled revert failed: {}", err);
            entry.record.scheduled_revert_at = None;
            entry.epoch = self.scheduler.next_epoch();
        }
    }

    async fn slot(&self, id: &str) -> Option<Slot> {
        self.table.read().await.slots.get(id).cloned()
    }

    /// Apply `spec` to the relay behind `slot`; `Ok(None)` if it was removed
    /// in the meantime.
    async fn toggle(
        &self,
        slot: &Slot,
        spec: &ToggleSpec,
    ) -> Result<Option<RelayRecord>, RelayError> {
        let (record, armed) = {
            let mut entry = slot.lock().await;
            if entry.removed {
                return Ok(None);
            }
            let armed = self
                .scheduler
                .apply(&mut entry, spec.state, spec.duration.as_ref())?;
            (entry.record.clone(), armed)
        };

        if let Some(revert) = armed {
            self.scheduler.arm(self.clone(), revert);
        }
        Ok(Some(record))
    }
}

fn validate_new(table: &RelayTable, specs: &[RelaySpec]) -> Result<(), RelayError> {
    let mut ids = HashSet::new();
    let mut pins: HashMap<u32, &str> = HashMap::new();

    for spec in specs {
        if spec.id.is_empty() {
            return Err(RelayError::InvalidSpec("relay id must not be empty".to_string()));
        }
        if table.slots.contains_key(&spec.id) || !ids.insert(spec.id.as_str()) {
            return Err(RelayError::DuplicateId(spec.id.clone()));
        }
        if let Some(owner) = table.pins.get(&spec.gpio) {
            return Err(RelayError::PinInUse {
                pin: spec.gpio,
                owner: owner.clone(),
            });
        }
        if let Some(owner) = pins.insert(spec.gpio, spec.id.as_str()) {
            return Err(RelayError::PinInUse {
                pin: spec.gpio,
                owner: owner.to_string(),
            });
        }
    }
    Ok(())
}
