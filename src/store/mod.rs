//! Persistence for credentials and the role/permission graph.
//!
//! Functions here are synchronous diesel calls; handlers run them through
//! [`crate::db::with_conn`].

use std::collections::HashSet;
use uuid::Uuid;

use crate::error::FieldError;

pub mod permissions;
pub mod roles;
pub mod users;

/// Distinct ids in first-seen order.
pub(crate) fn dedupe_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// One error per submitted position whose id was not found, indexed against
/// the caller's list as sent.
pub(crate) fn missing_id_errors(
    field: &str,
    label: &str,
    submitted: &[Uuid],
    found: &HashSet<Uuid>,
) -> Vec<FieldError> {
    submitted
        .iter()
        .enumerate()
        .filter(|(_, id)| !found.contains(id))
        .map(|(i, id)| FieldError::new(format!("{field}[{i}]"), format!("{label} {id} not found")))
        .collect()
}
