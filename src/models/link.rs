use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::{Clock, SystemClock};
use crate::provider::ProviderAccount;

use super::Id;

/// One user's attempt to connect one financial institution through the
/// aggregation provider.
///
/// Mutated only by the link state machine and the reconciliation engine;
/// deleted only by the teardown operation. At most one link per
/// (user, provider) pair may be in a non-terminal status at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountLink {
    /// Unique identifier, immutable once created.
    pub id: Id,
    /// Owning user.
    pub user_id: Id,
    /// The institution's identifier at the aggregation provider.
    pub provider_id: String,
    /// Display name for the institution.
    pub provider_name: String,
    /// Current link status. The sole channel through which callers observe
    /// the outcome of an attempt.
    pub status: LinkStatus,
    /// Where the link's data comes from.
    pub source: SourceOfTruth,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountLink {
    pub fn new(user_id: Id, provider_id: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self::new_with_clock(user_id, provider_id, provider_name, &SystemClock)
    }

    pub fn new_with_clock(
        user_id: Id,
        provider_id: impl Into<String>,
        provider_name: impl Into<String>,
        clock: &dyn Clock,
    ) -> Self {
        let now = clock.now();
        Self {
            id: Id::new(),
            user_id,
            provider_id: provider_id.into(),
            provider_name: provider_name.into(),
            status: LinkStatus::InProgress(InProgressPhase::Initializing),
            source: SourceOfTruth::Empty,
            created_at: now,
            updated_at: now,
        }
    }

    /// The provider-account id this link is bound to, if the provider has
    /// produced a snapshot yet.
    pub fn provider_account_id(&self) -> Option<&str> {
        match &self.source {
            SourceOfTruth::Provider { snapshot } => Some(snapshot.id.as_str()),
            SourceOfTruth::Empty => None,
        }
    }

    /// The login form the provider is currently waiting on, if any.
    pub fn pending_login_form(&self) -> Option<&crate::provider::LoginForm> {
        match &self.source {
            SourceOfTruth::Provider { snapshot } => snapshot.login_form.as_ref(),
            SourceOfTruth::Empty => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Where an [`AccountLink`]'s data comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceOfTruth {
    /// No linking attempt has produced provider data yet.
    Empty,
    /// The provider owns the data; `snapshot` is the latest raw
    /// provider-account view, including its refresh sub-status and any
    /// pending login form.
    Provider { snapshot: ProviderAccount },
}

/// Semantic status of a link attempt. A closed enumeration, not a string.
///
/// `Success` and every `Failed` value are terminal; nothing transitions out
/// of them for a given attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "detail", rename_all = "snake_case")]
pub enum LinkStatus {
    InProgress(InProgressPhase),
    Mfa(MfaPhase),
    Success,
    Failed(FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InProgressPhase {
    Initializing,
    VerifyingCredentials,
    DownloadingData,
    /// Reconciliation against the remote snapshot is running.
    DownloadingFromSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaPhase {
    /// The provider requires user input but has not produced the form yet.
    WaitingForLoginForm,
    /// A login form is present and waiting to be filled in by the user.
    PendingUserInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    BadCredentials,
    MfaFailure,
    ExternalServiceFailure,
    InternalServiceFailure,
    /// The provider asked for user input during a non-interactive attempt.
    UserInputRequestInBackground,
    /// User input never arrived within the poll budget.
    Timeout,
}

impl LinkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkStatus::Success | LinkStatus::Failed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::InProgress(InProgressPhase::Initializing) => "in_progress/initializing",
            LinkStatus::InProgress(InProgressPhase::VerifyingCredentials) => {
                "in_progress/verifying_credentials"
            }
            LinkStatus::InProgress(InProgressPhase::DownloadingData) => {
                "in_progress/downloading_data"
            }
            LinkStatus::InProgress(InProgressPhase::DownloadingFromSource) => {
                "in_progress/downloading_from_source"
            }
            LinkStatus::Mfa(MfaPhase::WaitingForLoginForm) => "mfa/waiting_for_login_form",
            LinkStatus::Mfa(MfaPhase::PendingUserInput) => "mfa/pending_user_input",
            LinkStatus::Success => "success",
            LinkStatus::Failed(FailureReason::BadCredentials) => "failed/bad_credentials",
            LinkStatus::Failed(FailureReason::MfaFailure) => "failed/mfa_failure",
            LinkStatus::Failed(FailureReason::ExternalServiceFailure) => {
                "failed/external_service_failure"
            }
            LinkStatus::Failed(FailureReason::InternalServiceFailure) => {
                "failed/internal_service_failure"
            }
            LinkStatus::Failed(FailureReason::UserInputRequestInBackground) => {
                "failed/user_input_request_in_background"
            }
            LinkStatus::Failed(FailureReason::Timeout) => "failed/timeout",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
