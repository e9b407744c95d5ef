//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::consent::{ConsentId, ConsentKey, ConsentRecord, PatientId, ProgrammeId};
use crate::status::{ConsentStatus, PatientConsentStatus};
use crate::storage::traits::{
    ConsentSnapshot, ConsentStatusStore, ConsentStore, Invalidation, StatusWrite, StorageError,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::LockPoisoned(context)
}

#[derive(Debug, Default)]
struct ConsentState {
    by_id: HashMap<ConsentId, ConsentRecord>,
    by_key: HashMap<ConsentKey, Vec<ConsentId>>,
    by_patient: HashMap<PatientId, Vec<ConsentId>>,
    revisions: HashMap<ConsentKey, u64>,
}

impl ConsentState {
    fn bump_revision(&mut self, key: ConsentKey) -> u64 {
        let revision = self.revisions.entry(key).or_insert(0);
        *revision += 1;
        *revision
    }
}

/// Thread-safe in-memory consent record store.
#[derive(Debug, Default)]
pub struct InMemoryConsentStore {
    state: RwLock<ConsentState>,
}

impl InMemoryConsentStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsentStore for InMemoryConsentStore {
    fn insert(&self, record: ConsentRecord) -> Result<u64, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("consent.insert"))?;
        if state.by_id.contains_key(&record.id) {
            return Err(StorageError::DuplicateConsent(record.id));
        }

        let key = record.key();
        state.by_key.entry(key).or_default().push(record.id);
        state
            .by_patient
            .entry(record.patient_id)
            .or_default()
            .push(record.id);
        state.by_id.insert(record.id, record);
        Ok(state.bump_revision(key))
    }

    fn get(&self, id: ConsentId) -> Result<Option<ConsentRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("consent.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn invalidate(&self, id: ConsentId) -> Result<Invalidation, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("consent.invalidate"))?;
        let record = state
            .by_id
            .get_mut(&id)
            .ok_or(StorageError::ConsentNotFound(id))?;

        let key = record.key();
        if record.invalidated {
            let revision = state.revisions.get(&key).copied().unwrap_or(0);
            return Ok(Invalidation {
                key,
                revision,
                changed: false,
            });
        }

        record.invalidated = true;
        let revision = state.bump_revision(key);
        Ok(Invalidation {
            key,
            revision,
            changed: true,
        })
    }

    fn snapshot(&self, key: ConsentKey) -> Result<ConsentSnapshot, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("consent.snapshot"))?;
        let records: Vec<ConsentRecord> = state
            .by_key
            .get(&key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(ConsentSnapshot {
            key,
            revision: state.revisions.get(&key).copied().unwrap_or(0),
            records,
        })
    }

    fn find_by_patient(&self, patient_id: PatientId) -> Result<Vec<ConsentRecord>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("consent.find_by_patient"))?;
        let Some(ids) = state.by_patient.get(&patient_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect())
    }
}

#[derive(Debug, Default)]
struct StatusState {
    by_key: HashMap<ConsentKey, PatientConsentStatus>,
    by_status: HashMap<(ProgrammeId, ConsentStatus), HashSet<ConsentKey>>,
}

/// Thread-safe in-memory materialized status store.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    state: RwLock<StatusState>,
}

impl InMemoryStatusStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsentStatusStore for InMemoryStatusStore {
    fn get(&self, key: ConsentKey) -> Result<Option<PatientConsentStatus>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("status.get"))?;
        Ok(state.by_key.get(&key).cloned())
    }

    fn put(&self, status: PatientConsentStatus) -> Result<StatusWrite, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("status.put"))?;
        let key = status.key();

        if let Some(existing) = state.by_key.get(&key) {
            if existing.revision > status.revision {
                return Ok(StatusWrite::Stale {
                    stored_revision: existing.revision,
                });
            }
            if *existing == status {
                return Ok(StatusWrite::Unchanged);
            }
            let old_index = (existing.programme_id, existing.status);
            if let Some(set) = state.by_status.get_mut(&old_index) {
                set.remove(&key);
                if set.is_empty() {
                    state.by_status.remove(&old_index);
                }
            }
        }

        state
            .by_status
            .entry((status.programme_id, status.status))
            .or_default()
            .insert(key);
        state.by_key.insert(key, status);
        Ok(StatusWrite::Written)
    }

    fn find_by_status(
        &self,
        programme_id: ProgrammeId,
        status: ConsentStatus,
    ) -> Result<Vec<PatientConsentStatus>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("status.find_by_status"))?;
        let Some(keys) = state.by_status.get(&(programme_id, status)) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<PatientConsentStatus> = keys
            .iter()
            .filter_map(|key| state.by_key.get(key).cloned())
            .collect();
        out.sort_by_key(PatientConsentStatus::key);
        Ok(out)
    }
}

/// Bundle of in-memory stores.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    /// Consent record store.
    pub consents: InMemoryConsentStore,
    /// Materialized status store.
    pub statuses: InMemoryStatusStore,
}

impl InMemoryStores {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
