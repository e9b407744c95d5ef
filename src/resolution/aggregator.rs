use serde::{Deserialize, Serialize};

use crate::consent::{ConsentRecord, Decision};
use crate::status::ConsentStatus;
use crate::vaccine::VaccineMethod;

/// Output of the aggregator: a status and the methods it permits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Resolved status.
    pub status: ConsentStatus,
    /// Permitted methods. Empty unless `status` is `Given`.
    pub vaccine_methods: Vec<VaccineMethod>,
}

impl Resolution {
    const fn without_methods(status: ConsentStatus) -> Self {
        Self {
            status,
            vaccine_methods: Vec::new(),
        }
    }

    fn given(vaccine_methods: Vec<VaccineMethod>) -> Self {
        Self {
            status: ConsentStatus::Given,
            vaccine_methods,
        }
    }
}

/// Combines one active decision per responder into a [`Resolution`].
///
/// `active` is the output of [`super::select_active_decisions`].
///
/// - No decisions resolve to `NoResponse`.
/// - A given self-consent is authoritative: its own methods are returned and
///   every parental decision is ignored. A refused self-consent counts like
///   any other refusal.
/// - Any refusal alongside a given decision is `Conflicts`; refusals alone
///   are `Refused`.
/// - Given decisions resolve to the intersection of their methods, or
///   `Conflicts` if that intersection is empty.
#[must_use]
pub fn aggregate(active: &[&ConsentRecord]) -> Resolution {
    if active.is_empty() {
        return Resolution::without_methods(ConsentStatus::NoResponse);
    }

    if let Some(self_given) = active
        .iter()
        .find(|r| r.responder.is_self() && r.decision == Decision::Given)
    {
        return Resolution::given(self_given.vaccine_methods.clone());
    }

    let mut given: Vec<&ConsentRecord> = Vec::with_capacity(active.len());
    let mut any_refused = false;
    for &record in active {
        match record.decision {
            Decision::Given => given.push(record),
            Decision::Refused => any_refused = true,
            // Filtered out by the selector.
            Decision::NotProvided => {}
        }
    }

    match (given.is_empty(), any_refused) {
        (true, false) => Resolution::without_methods(ConsentStatus::NoResponse),
        (true, true) => Resolution::without_methods(ConsentStatus::Refused),
        (false, true) => Resolution::without_methods(ConsentStatus::Conflicts),
        (false, false) => {
            let methods = intersect_methods(&given);
            if methods.is_empty() {
                Resolution::without_methods(ConsentStatus::Conflicts)
            } else {
                Resolution::given(methods)
            }
        }
    }
}

/// Methods every given decision agrees on.
///
/// A single decision passes through in its own order; two or more produce
/// canonical order.
fn intersect_methods(given: &[&ConsentRecord]) -> Vec<VaccineMethod> {
    match given {
        [only] => only.vaccine_methods.clone(),
        _ => VaccineMethod::ALL
            .into_iter()
            .filter(|method| given.iter().all(|r| r.vaccine_methods.contains(method)))
            .collect(),
    }
}
