use std::collections::BTreeMap;

use crate::consent::{ConsentRecord, Responder};

/// Returns true if `candidate` takes precedence over `current` for the same
/// responder.
///
/// Later `submitted_at` wins. Ties fall back to later `created_at`, then to
/// the greater record id.
#[must_use]
pub fn supersedes(candidate: &ConsentRecord, current: &ConsentRecord) -> bool {
    (candidate.submitted_at, candidate.created_at, candidate.id)
        > (current.submitted_at, current.created_at, current.id)
}

/// Reduces a record history to at most one active decision per responder.
///
/// Invalidated and `NotProvided` records are discarded first, so a responder
/// whose latest answer was invalidated falls back to their previous live one.
/// The result is ordered by responder: self-consent first, then parents.
#[must_use]
pub fn select_active_decisions(records: &[ConsentRecord]) -> Vec<&ConsentRecord> {
    let mut latest: BTreeMap<Responder, &ConsentRecord> = BTreeMap::new();

    for record in records.iter().filter(|r| r.is_resolvable()) {
        latest
            .entry(record.responder)
            .and_modify(|current| {
                if supersedes(record, *current) {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    latest.into_values().collect()
}
