//! # consent-engine
//!
//! Resolves the vaccination consent responses collected for a patient in a
//! programme into one materialized status, and keeps that status current as
//! responses are submitted and invalidated.
//!
//! ## Core Concepts
//!
//! - **ConsentRecord**: One responder's decision, immutable apart from invalidation
//! - **Selector**: Picks the latest usable decision per responder
//! - **Aggregator**: Combines those decisions into a status and permitted methods
//! - **PatientConsentStatus**: The materialized result, one per (patient, programme)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use consent_engine::{ConsentEngine, ConsentRecord, ConsentStatus, InMemoryStores, VaccineMethod};
//!
//! let stores = InMemoryStores::new();
//! let engine = ConsentEngine::new(Arc::new(stores.consents), Arc::new(stores.statuses));
//!
//! let record = ConsentRecord::builder()
//!     .patient(patient_id)
//!     .programme(programme_id)
//!     .parent(parent_id)
//!     .given([VaccineMethod::Injection])
//!     .build()?;
//!
//! let outcome = engine.submit_consent(record)?;
//! assert_eq!(outcome.status.status, ConsentStatus::Given);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod consent;
pub mod error;
pub mod status;
pub mod vaccine;

// Resolution, storage, and execution
pub mod engine;
pub mod resolution;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use consent::{
    ConsentBuilder, ConsentId, ConsentKey, ConsentRecord, Decision, ParentId, PatientId,
    ProgrammeId, Responder,
};
pub use error::{ConsentError, ConsentResult, ExecutionError, ValidationError};
pub use status::{AdministrationGate, ConsentStatus, PatientConsentStatus};
pub use vaccine::{DeliveryMethod, VaccineMethod};

pub use engine::runtime::{ConsentRuntime, HashRouter, JobHandle, KeyRouter, RuntimeConfig};
pub use engine::{ConsentEngine, SubmitOutcome};
pub use resolution::{aggregate, resolve, select_active_decisions, supersedes, Resolution};
pub use storage::{
    ConsentSnapshot, ConsentStatusStore, ConsentStore, InMemoryConsentStore, InMemoryStatusStore,
    InMemoryStores, Invalidation, StatusWrite, StorageError,
};
