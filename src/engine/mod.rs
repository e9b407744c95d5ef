//! Consent engine: the status materializer and its workflow entry points.
//!
//! `ConsentEngine` is synchronous. Every write that can change a key's outcome
//! (`submit_consent`, `invalidate`) recomputes that key before returning, and
//! recomputes for one key are serialized by a per-key lock held across
//! snapshot, resolution and write. Different keys never wait on each other.

/// Sharded message-passing runtime.
pub mod runtime;

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::consent::{ConsentId, ConsentKey, ConsentRecord, PatientId, ProgrammeId};
use crate::error::{ConsentError, ConsentResult, ExecutionError, ValidationError};
use crate::resolution::{resolve, select_active_decisions};
use crate::status::{ConsentStatus, PatientConsentStatus};
use crate::storage::{ConsentStatusStore, ConsentStore, StatusWrite, StorageError};

/// Result of `submit_consent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// ID of the stored record.
    pub consent_id: ConsentId,
    /// Status of the record's key after the recompute.
    pub status: PatientConsentStatus,
}

/// Number of lock stripes. Keys sharing a stripe serialize with each other.
const KEY_LOCK_STRIPES: usize = 64;

/// Fixed set of striped locks; a key always maps to the same stripe.
#[derive(Debug)]
struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self {
            stripes: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }
}

impl KeyLocks {
    fn stripe_for(&self, key: ConsentKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let stripe = (hasher.finish() % self.stripes.len() as u64) as usize;
        stripe
    }

    fn lock(&self, key: ConsentKey) -> ConsentResult<MutexGuard<'_, ()>> {
        self.stripes[self.stripe_for(key)]
            .lock()
            .map_err(|_| ConsentError::internal(format!("key lock poisoned: {key}")))
    }
}

/// Consent resolution engine.
#[derive(Clone)]
pub struct ConsentEngine {
    consents: Arc<dyn ConsentStore>,
    statuses: Arc<dyn ConsentStatusStore>,
    key_locks: Arc<KeyLocks>,
}

impl ConsentEngine {
    /// Create a new engine using the given stores.
    #[must_use]
    pub fn new(consents: Arc<dyn ConsentStore>, statuses: Arc<dyn ConsentStatusStore>) -> Self {
        Self {
            consents,
            statuses,
            key_locks: Arc::new(KeyLocks::default()),
        }
    }

    /// Get a reference to the consent record store.
    pub fn consent_store(&self) -> &Arc<dyn ConsentStore> {
        &self.consents
    }

    /// Get a reference to the materialized status store.
    pub fn status_store(&self) -> &Arc<dyn ConsentStatusStore> {
        &self.statuses
    }

    /// Store a new consent response and recompute its key.
    ///
    /// Records are validated again here, since they may not have come through
    /// `ConsentRecord::builder()`. A record cannot be submitted already
    /// invalidated, and an ID can only be submitted once.
    pub fn submit_consent(&self, record: ConsentRecord) -> ConsentResult<SubmitOutcome> {
        let key = record.key();
        let consent_id = record.id;
        if record.invalidated {
            return Err(ValidationError::SubmittedInvalidated { id: consent_id }.into());
        }
        record.validate()?;
        debug!(
            consent = %consent_id,
            key = %key,
            responder = %record.responder,
            decision = %record.decision,
            "storing consent"
        );

        self.consents.insert(record).map_err(Self::storage_err)?;
        let status = self.recompute_key(key)?;
        Ok(SubmitOutcome { consent_id, status })
    }

    /// Invalidate a consent record and recompute its key.
    ///
    /// Invalidating an already invalidated record still recomputes, which is
    /// harmless because recompute is idempotent.
    pub fn invalidate(&self, consent_id: ConsentId) -> ConsentResult<PatientConsentStatus> {
        let invalidation = self.consents.invalidate(consent_id).map_err(Self::storage_err)?;
        if !invalidation.changed {
            debug!(consent = %consent_id, "consent already invalidated");
        }
        self.recompute_key(invalidation.key)
    }

    /// Recompute and persist the status for a (patient, programme) pair.
    pub fn recompute(
        &self,
        patient_id: PatientId,
        programme_id: ProgrammeId,
    ) -> ConsentResult<PatientConsentStatus> {
        self.recompute_key(ConsentKey::new(patient_id, programme_id))
    }

    /// Recompute and persist the status for a key.
    ///
    /// Either the new status is stored in full or the previous one stays in
    /// place and the error is returned; callers may retry.
    pub fn recompute_key(&self, key: ConsentKey) -> ConsentResult<PatientConsentStatus> {
        let _guard = self.key_locks.lock(key)?;

        let snapshot = self.consents.snapshot(key).map_err(|err| {
            warn!(key = %key, error = %err, "consent snapshot failed");
            Self::storage_err(err)
        })?;

        // No consent activity yet: nothing to materialize.
        if snapshot.revision == 0 {
            debug!(key = %key, "no consent activity, skipping status write");
            return Ok(PatientConsentStatus::no_response(key));
        }

        debug!(
            key = %key,
            revision = snapshot.revision,
            records = snapshot.records.len(),
            active = select_active_decisions(&snapshot.records).len(),
            "resolving consent"
        );

        let resolution = resolve(&snapshot.records);
        let status = PatientConsentStatus {
            patient_id: key.patient_id,
            programme_id: key.programme_id,
            status: resolution.status,
            vaccine_methods: resolution.vaccine_methods,
            revision: snapshot.revision,
        };

        let write = self.statuses.put(status.clone()).map_err(|err| {
            warn!(key = %key, error = %err, "consent status write failed");
            Self::storage_err(err)
        })?;

        match write {
            StatusWrite::Written => {
                info!(
                    key = %key,
                    status = %status.status,
                    methods = ?status.vaccine_methods,
                    revision = status.revision,
                    "consent status updated"
                );
                Ok(status)
            }
            StatusWrite::Unchanged => Ok(status),
            StatusWrite::Stale { stored_revision } => {
                warn!(
                    key = %key,
                    revision = status.revision,
                    stored_revision,
                    "discarding stale consent status"
                );
                Ok(self
                    .statuses
                    .get(key)
                    .map_err(Self::storage_err)?
                    .unwrap_or(status))
            }
        }
    }

    /// Recompute every programme with consent activity for a patient.
    pub fn recompute_patient(
        &self,
        patient_id: PatientId,
    ) -> ConsentResult<Vec<PatientConsentStatus>> {
        let programmes: BTreeSet<ProgrammeId> = self
            .consents
            .find_by_patient(patient_id)
            .map_err(Self::storage_err)?
            .into_iter()
            .map(|r| r.programme_id)
            .collect();

        programmes
            .into_iter()
            .map(|programme_id| self.recompute(patient_id, programme_id))
            .collect()
    }

    /// Read the materialized status for a pair.
    ///
    /// Pairs with no consent activity report `NoResponse`.
    pub fn get_status(
        &self,
        patient_id: PatientId,
        programme_id: ProgrammeId,
    ) -> ConsentResult<PatientConsentStatus> {
        let key = ConsentKey::new(patient_id, programme_id);
        Ok(self
            .statuses
            .get(key)
            .map_err(Self::storage_err)?
            .unwrap_or_else(|| PatientConsentStatus::no_response(key)))
    }

    /// Every status in a programme with the given outcome.
    pub fn patients_with_status(
        &self,
        programme_id: ProgrammeId,
        status: ConsentStatus,
    ) -> ConsentResult<Vec<PatientConsentStatus>> {
        self.statuses
            .find_by_status(programme_id, status)
            .map_err(Self::storage_err)
    }

    /// All records for a pair, most recently submitted first.
    pub fn consent_history(
        &self,
        patient_id: PatientId,
        programme_id: ProgrammeId,
    ) -> ConsentResult<Vec<ConsentRecord>> {
        let mut records = self
            .consents
            .snapshot(ConsentKey::new(patient_id, programme_id))
            .map_err(Self::storage_err)?
            .records;
        records.sort_by(|a, b| {
            (b.submitted_at, b.created_at, b.id).cmp(&(a.submitted_at, a.created_at, a.id))
        });
        Ok(records)
    }

    pub(crate) fn storage_err(err: StorageError) -> ConsentError {
        match err {
            StorageError::ConsentNotFound(id) => {
                ConsentError::Execution(ExecutionError::ConsentNotFound { id })
            }
            StorageError::DuplicateConsent(id) => {
                ConsentError::Execution(ExecutionError::DuplicateConsent { id })
            }
            StorageError::LockPoisoned(context) => {
                ConsentError::internal(format!("storage lock poisoned: {context}"))
            }
            other => ConsentError::Execution(ExecutionError::Storage {
                message: other.to_string(),
            }),
        }
    }
}
