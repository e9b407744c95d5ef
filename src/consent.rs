//! Consent records: the raw history the engine resolves.
//!
//! A consent record is one submitted response from one responder for one
//! (patient, programme) pair. Records are immutable once stored except for the
//! `invalidated` flag, which only ever moves from `false` to `true`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::vaccine::VaccineMethod;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a consent record.
    ConsentId
);
uuid_id!(
    /// Unique identifier for a patient.
    PatientId
);
uuid_id!(
    /// Unique identifier for a vaccination programme.
    ProgrammeId
);
uuid_id!(
    /// Unique identifier for a parent or guardian.
    ParentId
);

/// The aggregate key: one materialized status exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConsentKey {
    /// The patient the consent is about.
    pub patient_id: PatientId,
    /// The programme the consent is for.
    pub programme_id: ProgrammeId,
}

impl ConsentKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(patient_id: PatientId, programme_id: ProgrammeId) -> Self {
        Self {
            patient_id,
            programme_id,
        }
    }
}

impl fmt::Display for ConsentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.patient_id, self.programme_id)
    }
}

/// Who submitted a consent response.
///
/// `SelfConsent` sorts before any parent, so it is the first group emitted
/// by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum Responder {
    /// The patient consenting on their own behalf.
    SelfConsent,

    /// A parent or guardian.
    Parent(ParentId),
}

impl Responder {
    /// Returns true for self-consent.
    #[must_use]
    pub const fn is_self(&self) -> bool {
        matches!(self, Self::SelfConsent)
    }
}

impl fmt::Display for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelfConsent => f.write_str("self"),
            Self::Parent(id) => write!(f, "parent:{id}"),
        }
    }
}

impl FromStr for Responder {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "self" {
            return Ok(Self::SelfConsent);
        }
        s.strip_prefix("parent:")
            .and_then(|id| Uuid::parse_str(id).ok())
            .map(|id| Self::Parent(ParentId::from_uuid(id)))
            .ok_or_else(|| ValidationError::UnknownTag {
                kind: "responder",
                value: s.to_string(),
            })
    }
}

/// The answer a responder gave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Consent given.
    Given,

    /// Consent refused.
    Refused,

    /// The responder was contacted but gave no answer.
    NotProvided,
}

impl Decision {
    /// Returns the stable tag for this decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Given => "given",
            Self::Refused => "refused",
            Self::NotProvided => "not_provided",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "given" => Ok(Self::Given),
            "refused" => Ok(Self::Refused),
            "not_provided" => Ok(Self::NotProvided),
            other => Err(ValidationError::UnknownTag {
                kind: "decision",
                value: other.to_string(),
            }),
        }
    }
}

/// One submitted consent response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Unique identifier, also the final tie-breaker between submissions.
    pub id: ConsentId,

    /// The patient the consent is about.
    pub patient_id: PatientId,

    /// The programme the consent is for.
    pub programme_id: ProgrammeId,

    /// Who responded.
    pub responder: Responder,

    /// What they answered.
    pub decision: Decision,

    /// Methods consented to, in the responder's order. Empty unless `Given`.
    pub vaccine_methods: Vec<VaccineMethod>,

    /// Set once the record is withdrawn; never cleared.
    pub invalidated: bool,

    /// When the record was stored.
    pub created_at: DateTime<Utc>,

    /// When the responder submitted the answer. Governs precedence.
    pub submitted_at: DateTime<Utc>,
}

impl ConsentRecord {
    /// Returns a builder for a new record.
    pub fn builder() -> ConsentBuilder {
        ConsentBuilder::new()
    }

    /// The aggregate key this record belongs to.
    #[must_use]
    pub const fn key(&self) -> ConsentKey {
        ConsentKey::new(self.patient_id, self.programme_id)
    }

    /// Checks the method set against the decision.
    ///
    /// Methods are an ordered set, and only a `Given` decision may carry any.
    /// Records that did not come from [`ConsentBuilder`] (deserialized or
    /// edited in place) must pass this before they are stored.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.decision != Decision::Given && !self.vaccine_methods.is_empty() {
            return Err(ValidationError::MethodsWithoutConsent {
                decision: self.decision.to_string(),
            });
        }

        for (i, method) in self.vaccine_methods.iter().enumerate() {
            if self.vaccine_methods[..i].contains(method) {
                return Err(ValidationError::DuplicateVaccineMethod {
                    method: method.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns true if this record can become a responder's active decision.
    #[must_use]
    pub fn is_resolvable(&self) -> bool {
        !self.invalidated && self.decision != Decision::NotProvided
    }
}

/// Builder for [`ConsentRecord`], validating at the ingestion boundary.
#[derive(Debug, Clone, Default)]
pub struct ConsentBuilder {
    id: Option<ConsentId>,
    patient_id: Option<PatientId>,
    programme_id: Option<ProgrammeId>,
    responder: Option<Responder>,
    decision: Option<Decision>,
    vaccine_methods: Vec<VaccineMethod>,
    created_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
}

impl ConsentBuilder {
    /// Creates a new consent builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the record ID (optional, will be generated if not set).
    #[must_use]
    pub fn id(mut self, id: ConsentId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the patient.
    #[must_use]
    pub fn patient(mut self, patient_id: PatientId) -> Self {
        self.patient_id = Some(patient_id);
        self
    }

    /// Sets the programme.
    #[must_use]
    pub fn programme(mut self, programme_id: ProgrammeId) -> Self {
        self.programme_id = Some(programme_id);
        self
    }

    /// Sets both patient and programme from a key.
    #[must_use]
    pub fn key(self, key: ConsentKey) -> Self {
        self.patient(key.patient_id).programme(key.programme_id)
    }

    /// Sets the responder.
    #[must_use]
    pub fn responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Marks the response as coming from a parent.
    #[must_use]
    pub fn parent(self, parent_id: ParentId) -> Self {
        self.responder(Responder::Parent(parent_id))
    }

    /// Marks the response as self-consent.
    #[must_use]
    pub fn self_consent(self) -> Self {
        self.responder(Responder::SelfConsent)
    }

    /// Sets the decision.
    #[must_use]
    pub fn decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self
    }

    /// Sets the consented methods, in the responder's order.
    #[must_use]
    pub fn vaccine_methods(mut self, methods: impl IntoIterator<Item = VaccineMethod>) -> Self {
        self.vaccine_methods = methods.into_iter().collect();
        self
    }

    /// Shorthand for a `Given` decision with the given methods.
    #[must_use]
    pub fn given(self, methods: impl IntoIterator<Item = VaccineMethod>) -> Self {
        self.decision(Decision::Given).vaccine_methods(methods)
    }

    /// Shorthand for a `Refused` decision.
    #[must_use]
    pub fn refused(self) -> Self {
        self.decision(Decision::Refused)
    }

    /// Shorthand for a `NotProvided` decision.
    #[must_use]
    pub fn not_provided(self) -> Self {
        self.decision(Decision::NotProvided)
    }

    /// Sets the storage timestamp (defaults to now).
    #[must_use]
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Sets the submission timestamp (defaults to `created_at`).
    #[must_use]
    pub fn submitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.submitted_at = Some(at);
        self
    }

    /// Builds the record.
    ///
    /// Returns `ValidationError` if a required field is missing, a vaccine
    /// method is repeated, or methods are supplied with a decision other than
    /// `Given`.
    pub fn build(self) -> Result<ConsentRecord, ValidationError> {
        let patient_id = self.patient_id.ok_or_else(|| missing("patient_id"))?;
        let programme_id = self.programme_id.ok_or_else(|| missing("programme_id"))?;
        let responder = self.responder.ok_or_else(|| missing("responder"))?;
        let decision = self.decision.ok_or_else(|| missing("decision"))?;

        let created_at = self.created_at.unwrap_or_else(Utc::now);
        let record = ConsentRecord {
            id: self.id.unwrap_or_default(),
            patient_id,
            programme_id,
            responder,
            decision,
            vaccine_methods: self.vaccine_methods,
            invalidated: false,
            created_at,
            submitted_at: self.submitted_at.unwrap_or(created_at),
        };
        record.validate()?;
        Ok(record)
    }
}

fn missing(field: &str) -> ValidationError {
    ValidationError::MissingField {
        field: field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    fn base() -> ConsentBuilder {
        ConsentRecord::builder()
            .patient(PatientId::new())
            .programme(ProgrammeId::new())
            .parent(ParentId::new())
    }

    #[test]
    fn build_given_keeps_method_order() {
        let record = base()
            .given([VaccineMethod::Nasal, VaccineMethod::Injection])
            .build()
            .unwrap();
        assert_eq!(record.decision, Decision::Given);
        assert_eq!(record.vaccine_methods, vec![VaccineMethod::Nasal, VaccineMethod::Injection]);
        assert!(!record.invalidated);
    }

    #[test]
    fn submitted_at_defaults_to_created_at() {
        let at = Utc::now() - Duration::days(3);
        let record = base().refused().created_at(at).build().unwrap();
        assert_eq!(record.submitted_at, at);
    }

    #[test]
    fn missing_responder_is_rejected() {
        let err = ConsentRecord::builder()
            .patient(PatientId::new())
            .programme(ProgrammeId::new())
            .refused()
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { field } if field == "responder"));
    }

    #[test]
    fn methods_on_refusal_are_rejected() {
        let err = base()
            .refused()
            .vaccine_methods([VaccineMethod::Injection])
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::MethodsWithoutConsent { .. }));
    }

    #[test]
    fn duplicate_methods_are_rejected() {
        let err = base()
            .given([VaccineMethod::Injection, VaccineMethod::Injection])
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateVaccineMethod { method } if method == "injection"));
    }

    #[test]
    fn validate_catches_records_edited_after_build() {
        let mut record = base().given([VaccineMethod::Injection]).build().unwrap();
        assert!(record.validate().is_ok());

        record.vaccine_methods.push(VaccineMethod::Injection);
        assert!(matches!(
            record.validate(),
            Err(ValidationError::DuplicateVaccineMethod { .. })
        ));

        record.vaccine_methods = vec![VaccineMethod::Nasal];
        record.decision = Decision::Refused;
        assert!(matches!(
            record.validate(),
            Err(ValidationError::MethodsWithoutConsent { .. })
        ));
    }

    #[test]
    fn deserialized_record_with_repeated_methods_fails_validation() {
        let record = base().given([VaccineMethod::Nasal]).build().unwrap();
        let mut json = serde_json::to_value(&record).unwrap();
        json["vaccine_methods"] = serde_json::json!(["nasal", "nasal"]);
        let decoded: ConsentRecord = serde_json::from_value(json).unwrap();
        assert!(decoded.validate().is_err());
    }

    #[test]
    fn given_without_methods_is_valid() {
        let record = base().given([]).build().unwrap();
        assert!(record.vaccine_methods.is_empty());
        assert!(record.is_resolvable());
    }

    #[test]
    fn not_provided_is_not_resolvable() {
        let record = base().not_provided().build().unwrap();
        assert!(!record.is_resolvable());
    }

    #[test]
    fn self_consent_sorts_before_parents() {
        assert!(Responder::SelfConsent < Responder::Parent(ParentId::new()));
    }

    #[test]
    fn responder_round_trips_through_its_tag() {
        let parent = Responder::Parent(ParentId::new());
        assert_eq!(parent.to_string().parse::<Responder>().unwrap(), parent);
        assert_eq!("self".parse::<Responder>().unwrap(), Responder::SelfConsent);
        assert!("guardian".parse::<Responder>().is_err());
    }

    #[test]
    fn unknown_decision_tag_is_rejected() {
        let err = "maybe".parse::<Decision>().unwrap_err();
        assert!(matches!(err, ValidationError::UnknownTag { kind: "decision", .. }));
        assert_eq!("not_provided".parse::<Decision>().unwrap(), Decision::NotProvided);
    }

    #[test]
    fn record_serializes_with_tagged_responder() {
        let record = ConsentRecord::builder()
            .patient(PatientId::new())
            .programme(ProgrammeId::new())
            .self_consent()
            .given([VaccineMethod::Injection])
            .build()
            .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["responder"]["type"], "self_consent");
        assert_eq!(json["decision"], "given");
        assert_eq!(json["vaccine_methods"][0], "injection");
    }
}
