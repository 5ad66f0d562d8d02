//! Exposure tracker.
//!
//! Aggregate stake and liability per `(draw, bet type, number)`. Each
//! record sits behind its own mutex so that admission can serialize
//! check-then-increment per key while unrelated numbers proceed in
//! parallel.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::locks::lock;
use crate::types::{Amount, DrawId, ExposureKey};

/// Aggregate exposure on one number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub key: ExposureKey,
    pub total_stake: Amount,
    /// Sum of `stake * multiplier` over every bet on this number.
    pub total_liability: Amount,
    pub bet_count: u64,
}

impl ExposureRecord {
    pub fn empty(key: ExposureKey) -> Self {
        Self {
            key,
            total_stake: 0,
            total_liability: 0,
            bet_count: 0,
        }
    }
}

#[derive(Default)]
pub struct ExposureTracker {
    records: DashMap<ExposureKey, Arc<Mutex<ExposureRecord>>>,
}

impl ExposureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<ExposureRecord>) -> Self {
        let tracker = Self::new();
        for record in records {
            tracker.records.insert(record.key, Arc::new(Mutex::new(record)));
        }
        tracker
    }

    /// The lockable record for a key, created empty on first use.
    ///
    /// The map shard is released before returning, so callers may lock
    /// the record without holding any map lock.
    pub(crate) fn slot(&self, key: ExposureKey) -> Arc<Mutex<ExposureRecord>> {
        self.records
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(ExposureRecord::empty(key))))
            .value()
            .clone()
    }

    /// Current exposure on a key (zero if nothing was ever placed).
    pub fn get(&self, key: ExposureKey) -> ExposureRecord {
        let slot = self.records.get(&key).map(|entry| entry.value().clone());
        match slot {
            Some(slot) => lock(&slot).clone(),
            None => ExposureRecord::empty(key),
        }
    }

    /// All non-empty records of a draw, sorted by key.
    pub fn records_for(&self, draw_id: DrawId) -> Vec<ExposureRecord> {
        let slots: Vec<_> = self
            .records
            .iter()
            .filter(|entry| entry.key().draw_id == draw_id)
            .map(|entry| entry.value().clone())
            .collect();
        let mut records: Vec<ExposureRecord> = slots
            .iter()
            .map(|slot| lock(slot).clone())
            .filter(|record| record.bet_count > 0)
            .collect();
        records.sort_by_key(|record| record.key);
        records
    }

    /// Remove every record of a draw. Returns the removed non-empty records.
    ///
    /// Must only be called while the draw is closed to admission.
    pub fn release_period(&self, draw_id: DrawId) -> Vec<ExposureRecord> {
        let keys: Vec<ExposureKey> = self
            .records
            .iter()
            .filter(|entry| entry.key().draw_id == draw_id)
            .map(|entry| *entry.key())
            .collect();

        let mut released = Vec::new();
        for key in keys {
            if let Some((_, slot)) = self.records.remove(&key) {
                let record = lock(&slot).clone();
                if record.bet_count > 0 {
                    released.push(record);
                }
            }
        }
        released.sort_by_key(|record| record.key);

        debug!(draw_id, released = released.len(), "Exposure released");
        released
    }

    /// Every non-empty record, sorted by key.
    pub fn snapshot(&self) -> Vec<ExposureRecord> {
        let slots: Vec<_> = self.records.iter().map(|entry| entry.value().clone()).collect();
        let mut records: Vec<ExposureRecord> = slots
            .iter()
            .map(|slot| lock(slot).clone())
            .filter(|record| record.bet_count > 0)
            .collect();
        records.sort_by_key(|record| record.key);
        records
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
