//! Serde types for the provider's wire format.
//!
//! The provider serializes several identifiers as bare JSON numbers that can
//! exceed what an `f64` or `i64` holds, so every id field deserializes
//! number-or-string into a `String`.

use serde::{Deserialize, Deserializer, Serialize};

/// The provider's view of one linked institution login. Parent to one or
/// more remote accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAccount {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    /// The institution this provider-account is for.
    #[serde(deserialize_with = "id_as_string")]
    pub provider_id: String,
    /// Refresh sub-status. Absent until the provider has started working on
    /// the link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<RefreshInfo>,
    /// MFA form waiting for user input, when the institution asked for one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_form: Option<LoginForm>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshInfo {
    pub status: RefreshStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// Provider refresh status. Anything the provider reports that is neither
/// in progress nor failed counts as a completed refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RefreshStatus {
    InProgress,
    Failed,
    Completed,
}

impl From<String> for RefreshStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "IN_PROGRESS" => Self::InProgress,
            "FAILED" => Self::Failed,
            _ => Self::Completed,
        }
    }
}

impl From<RefreshStatus> for String {
    fn from(value: RefreshStatus) -> Self {
        match value {
            RefreshStatus::InProgress => "IN_PROGRESS",
            RefreshStatus::Failed => "FAILED",
            RefreshStatus::Completed => "COMPLETED",
        }
        .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginForm {
    pub form_type: String,
    pub rows: Vec<LoginFormRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginFormRow {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// An account as the provider reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAccount {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(deserialize_with = "id_as_string")]
    pub provider_account_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<RemoteBalance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteBalance {
    #[serde(deserialize_with = "amount_as_string")]
    pub amount: String,
    pub currency: String,
}

/// A transaction as the provider reports it. Dates carry day precision only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTransaction {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(deserialize_with = "id_as_string")]
    pub account_id: String,
    pub date: chrono::NaiveDate,
    #[serde(deserialize_with = "amount_as_string")]
    pub amount: String,
    pub currency: String,
    pub description: String,
    #[serde(default)]
    pub pending: bool,
}

/// Normalize a provider identifier for comparison. Ids are compared as
/// strings, never as native numbers.
pub(crate) fn normalize_remote_id(raw: &str) -> String {
    raw.trim().to_string()
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(serde_json::Number),
        String(String),
    }

    Ok(match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n.to_string(),
        NumberOrString::String(s) => s,
    })
}

fn amount_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    id_as_string(deserializer)
}
