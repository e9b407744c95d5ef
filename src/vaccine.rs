//! Vaccine methods and delivery routes.
//!
//! A [`VaccineMethod`] is what a responder consents to (an injection, a nasal
//! spray). A [`DeliveryMethod`] is the clinical route recorded when a dose is
//! actually administered. Every delivery method belongs to exactly one vaccine
//! method, which is how an administered dose is checked against consent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A delivery route a responder can consent to.
///
/// The declaration order is the canonical order used when a method set is
/// built from several responders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaccineMethod {
    /// Intramuscular or subcutaneous injection.
    Injection,

    /// Nasal spray.
    Nasal,
}

impl VaccineMethod {
    /// All methods in canonical order.
    pub const ALL: [Self; 2] = [Self::Injection, Self::Nasal];

    /// Returns the stable tag for this method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Injection => "injection",
            Self::Nasal => "nasal",
        }
    }

    /// Delivery routes that administer this method.
    #[must_use]
    pub const fn delivery_methods(self) -> &'static [DeliveryMethod] {
        match self {
            Self::Injection => &[DeliveryMethod::Intramuscular, DeliveryMethod::Subcutaneous],
            Self::Nasal => &[DeliveryMethod::NasalSpray],
        }
    }
}

impl fmt::Display for VaccineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VaccineMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "injection" => Ok(Self::Injection),
            "nasal" => Ok(Self::Nasal),
            other => Err(ValidationError::UnknownTag {
                kind: "vaccine method",
                value: other.to_string(),
            }),
        }
    }
}

/// The route by which a dose was administered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    /// Intramuscular injection.
    Intramuscular,

    /// Subcutaneous injection.
    Subcutaneous,

    /// Nasal spray.
    NasalSpray,
}

impl DeliveryMethod {
    /// The vaccine method a responder must have consented to for this route.
    #[must_use]
    pub const fn vaccine_method(self) -> VaccineMethod {
        match self {
            Self::Intramuscular | Self::Subcutaneous => VaccineMethod::Injection,
            Self::NasalSpray => VaccineMethod::Nasal,
        }
    }

    /// SNOMED CT concept id for the route.
    #[must_use]
    pub const fn snomed_code(self) -> &'static str {
        match self {
            Self::Intramuscular => "78421000",
            Self::Subcutaneous => "34206005",
            Self::NasalSpray => "46713006",
        }
    }

    /// SNOMED CT preferred term for the route.
    #[must_use]
    pub const fn snomed_term(self) -> &'static str {
        match self {
            Self::Intramuscular => "Intramuscular route (qualifier value)",
            Self::Subcutaneous => "Subcutaneous route (qualifier value)",
            Self::NasalSpray => "Nasal route (qualifier value)",
        }
    }

    /// Returns the stable tag for this route.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intramuscular => "intramuscular",
            Self::Subcutaneous => "subcutaneous",
            Self::NasalSpray => "nasal_spray",
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "intramuscular" => Ok(Self::Intramuscular),
            "subcutaneous" => Ok(Self::Subcutaneous),
            "nasal_spray" => Ok(Self::NasalSpray),
            other => Err(ValidationError::UnknownTag {
                kind: "delivery method",
                value: other.to_string(),
            }),
        }
    }
}
