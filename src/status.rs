//! Materialized consent status for a (patient, programme) pair.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consent::{ConsentKey, PatientId, ProgrammeId};
use crate::error::ValidationError;
use crate::vaccine::{DeliveryMethod, VaccineMethod};

/// The resolved consent outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    /// No active decision from any responder.
    #[default]
    NoResponse,

    /// Consent given for at least one common method (or by the patient).
    Given,

    /// Every active decision is a refusal.
    Refused,

    /// Responders disagree, or agree only on disjoint methods.
    Conflicts,
}

impl ConsentStatus {
    /// Returns the stable tag for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoResponse => "no_response",
            Self::Given => "given",
            Self::Refused => "refused",
            Self::Conflicts => "conflicts",
        }
    }

    /// What a session workflow may do with a patient in this status.
    #[must_use]
    pub const fn administration_gate(self) -> AdministrationGate {
        match self {
            Self::Given => AdministrationGate::Permitted,
            Self::Refused | Self::Conflicts => AdministrationGate::Blocked,
            Self::NoResponse => AdministrationGate::AwaitingConsent,
        }
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "no_response" => Ok(Self::NoResponse),
            "given" => Ok(Self::Given),
            "refused" => Ok(Self::Refused),
            "conflicts" => Ok(Self::Conflicts),
            other => Err(ValidationError::UnknownTag {
                kind: "consent status",
                value: other.to_string(),
            }),
        }
    }
}

/// Whether a dose may be recorded as administered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdministrationGate {
    /// Vaccinate using one of the consented methods.
    Permitted,

    /// Do not vaccinate.
    Blocked,

    /// Do not vaccinate; consent still needs to be captured.
    AwaitingConsent,
}

/// The queryable consent status for one key.
///
/// Always recomputed in full from the record history, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientConsentStatus {
    /// The patient.
    pub patient_id: PatientId,

    /// The programme.
    pub programme_id: ProgrammeId,

    /// The resolved outcome.
    pub status: ConsentStatus,

    /// Consented methods. Non-empty only when `status` is `Given`.
    pub vaccine_methods: Vec<VaccineMethod>,

    /// Record-store revision of the snapshot this was computed from.
    /// Zero means no consent activity has been seen for the key.
    pub revision: u64,
}

impl PatientConsentStatus {
    /// The status reported for a key with no consent activity.
    #[must_use]
    pub const fn no_response(key: ConsentKey) -> Self {
        Self {
            patient_id: key.patient_id,
            programme_id: key.programme_id,
            status: ConsentStatus::NoResponse,
            vaccine_methods: Vec::new(),
            revision: 0,
        }
    }

    /// The aggregate key.
    #[must_use]
    pub const fn key(&self) -> ConsentKey {
        ConsentKey::new(self.patient_id, self.programme_id)
    }

    /// Returns true if consent covers the given vaccine method.
    #[must_use]
    pub fn permits(&self, method: VaccineMethod) -> bool {
        self.status == ConsentStatus::Given && self.vaccine_methods.contains(&method)
    }

    /// Returns true if a dose may be recorded with the given route.
    #[must_use]
    pub fn permits_delivery(&self, delivery: DeliveryMethod) -> bool {
        self.permits(delivery.vaccine_method())
    }
}
