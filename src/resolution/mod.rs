//! Consent resolution.
//!
//! Resolution is two pure steps with no I/O, so a materialized status can be
//! reproduced from the same record history:
//!
//! - [`select_active_decisions`] keeps each responder's latest live answer.
//! - [`aggregate`] folds those answers into a status and a method set.

mod aggregator;
mod selector;

pub use aggregator::{aggregate, Resolution};
pub use selector::{select_active_decisions, supersedes};

use crate::consent::ConsentRecord;

/// Runs the selector then the aggregator over a record history.
#[must_use]
pub fn resolve(records: &[ConsentRecord]) -> Resolution {
    aggregate(&select_active_decisions(records))
}
