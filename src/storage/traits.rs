//! Abstract storage traits for the consent engine.
//!
//! The engine never depends on a concrete backend. It reads consent history
//! through [`ConsentStore`] and writes materialized results through
//! [`ConsentStatusStore`]; the in-memory backends in [`super::memory`] are the
//! reference implementation.

use thiserror::Error;

use crate::consent::{ConsentId, ConsentKey, ConsentRecord, PatientId, ProgrammeId};
use crate::status::{ConsentStatus, PatientConsentStatus};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Consent record not found.
    #[error("Consent not found: {0}")]
    ConsentNotFound(ConsentId),

    /// A record with this ID is already stored.
    #[error("Duplicate consent: {0}")]
    DuplicateConsent(ConsentId),

    /// A lock guarding backend state was poisoned by a panicking writer.
    #[error("Poisoned lock: {0}")]
    LockPoisoned(&'static str),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// An immutable copy of every record for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentSnapshot {
    /// The key the records belong to.
    pub key: ConsentKey,
    /// Revision of the key at the time the snapshot was taken.
    pub revision: u64,
    /// Records in insertion order, invalidated ones included.
    pub records: Vec<ConsentRecord>,
}

/// Outcome of invalidating a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
    /// Key of the invalidated record.
    pub key: ConsentKey,
    /// Revision of the key after the call.
    pub revision: u64,
    /// False if the record was already invalidated.
    pub changed: bool,
}

/// Outcome of writing a materialized status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    /// The status replaced the stored one (or was the first for its key).
    Written,
    /// An identical status was already stored.
    Unchanged,
    /// A status computed from a newer revision is already stored.
    Stale {
        /// Revision currently stored.
        stored_revision: u64,
    },
}

/// Storage for the append-only consent history.
///
/// # Revisions
/// Every key carries a revision counter that starts at zero and increases on
/// every insert and on every invalidation that changes a record. Snapshots
/// report the revision they were taken at.
pub trait ConsentStore: Send + Sync {
    /// Insert a new record. Returns the key's new revision.
    fn insert(&self, record: ConsentRecord) -> Result<u64, StorageError>;

    /// Get a record by ID.
    fn get(&self, id: ConsentId) -> Result<Option<ConsentRecord>, StorageError>;

    /// Mark a record invalidated. Invalidating twice is not an error.
    fn invalidate(&self, id: ConsentId) -> Result<Invalidation, StorageError>;

    /// Take a consistent snapshot of every record for a key.
    fn snapshot(&self, key: ConsentKey) -> Result<ConsentSnapshot, StorageError>;

    /// Find all records for a patient, across programmes.
    fn find_by_patient(&self, patient_id: PatientId) -> Result<Vec<ConsentRecord>, StorageError>;
}

/// Storage for materialized consent statuses, one per key.
///
/// # Atomicity
/// `put` must replace the whole status or leave the previous one in place.
pub trait ConsentStatusStore: Send + Sync {
    /// Get the status for a key.
    fn get(&self, key: ConsentKey) -> Result<Option<PatientConsentStatus>, StorageError>;

    /// Replace the status for its key unless a newer revision is stored.
    fn put(&self, status: PatientConsentStatus) -> Result<StatusWrite, StorageError>;

    /// Find every status in a programme with the given outcome.
    fn find_by_status(
        &self,
        programme_id: ProgrammeId,
        status: ConsentStatus,
    ) -> Result<Vec<PatientConsentStatus>, StorageError>;
}
