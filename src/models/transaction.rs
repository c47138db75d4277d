use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// A transaction belonging to exactly one [`Account`](super::Account).
///
/// Append-only and immutable: once stored it is never mutated, and new
/// remote transactions are fetched only from the date of the most recent
/// locally known transaction onward. Deleted only as a side effect of its
/// parent account being deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Id,
    pub account_id: Id,
    /// The provider's transaction id, normalized as a string. Used to filter
    /// overlap caused by the provider's day-level date rounding.
    pub remote_id: String,
    /// Posting date. The provider reports day precision only.
    pub date: NaiveDate,
    /// Signed amount as a string; negative for debits.
    pub amount: String,
    pub currency: String,
    pub description: String,
    #[serde(default)]
    pub pending: bool,
    pub created_at: DateTime<Utc>,
}
