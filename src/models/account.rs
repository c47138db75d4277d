use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// A financial account (checking, savings, card, ...) attached to exactly one
/// [`AccountLink`](super::AccountLink) via the originating provider-account.
///
/// Created, updated, and deleted only by the reconciliation engine and the
/// teardown operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Id,
    pub link_id: Id,
    pub user_id: Id,
    /// The provider-account this account belongs to at the provider.
    pub provider_account_ref: String,
    /// The provider's id for this account, normalized as a string. This is
    /// the reconciliation match key.
    pub remote_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Balance>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A point-in-time balance. Amounts stay strings end to end; the engine never
/// does arithmetic on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub amount: String,
    pub currency: String,
}

impl Balance {
    pub fn new(amount: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            currency: currency.into(),
        }
    }
}
