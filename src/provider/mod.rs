//! The aggregation-provider boundary.
//!
//! The engine consumes this boundary, it does not reimplement the provider:
//! [`ProviderClient`] is the opaque RPC surface, [`gateway::ProviderGateway`]
//! wraps it with session caching, the permit gate, and retry policy.

mod gateway;
mod http;
mod wire;

pub use gateway::ProviderGateway;
pub use http::HttpProviderClient;
pub use wire::{
    LoginForm, LoginFormRow, ProviderAccount, RefreshInfo, RefreshStatus, RemoteAccount,
    RemoteBalance, RemoteTransaction,
};
pub(crate) use wire::normalize_remote_id;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use secrecy::SecretString;

/// Provider-side status codes the engine interprets. Anything else is
/// deliberately treated as an open set.
pub mod status {
    pub const LOGIN_IN_PROGRESS: &str = "LOGIN_IN_PROGRESS";
    pub const USER_INPUT_REQUIRED: &str = "USER_INPUT_REQUIRED";
    pub const LOGIN_FAILED: &str = "LOGIN_FAILED";
    /// Additional statuses the provider reports when an MFA challenge was
    /// abandoned or answered too late.
    pub const MFA_TIMEOUT: [&str; 2] = ["MFA_TIMEDOUT", "MFA_INFO_NOT_PROVIDED_IN_REAL_TIME"];
}

/// Credentials for logging in, either to the provider itself or to an
/// institution through the provider.
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let password: String = password.into();
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }
}

/// An authenticated provider session. Tokens expire; the gateway probes and
/// refreshes them transparently.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Errors surfaced by the provider, keyed by its machine-readable codes.
///
/// Unrecognized codes classify as [`ProviderError::Other`], which the state
/// machine maps to an internal service failure.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rejected the credentials ({code})")]
    Auth { code: String },
    #[error("multi-factor step failed ({code})")]
    Mfa { code: String },
    #[error("transient provider failure ({code}): {message}")]
    Transient { code: String, message: String },
    #[error("provider call failed ({code}): {message}")]
    Other { code: String, message: String },
}

impl ProviderError {
    pub fn code(&self) -> &str {
        match self {
            ProviderError::Auth { code }
            | ProviderError::Mfa { code }
            | ProviderError::Transient { code, .. }
            | ProviderError::Other { code, .. } => code,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }
}

/// The provider's RPC surface. One implementation speaks HTTP
/// ([`HttpProviderClient`]); tests script their own.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Authenticate against the provider.
    async fn login(&self, credentials: &Credentials) -> Result<Session, ProviderError>;

    /// Probe whether a session token is still accepted upstream.
    async fn session_active(&self, session: &Session) -> Result<bool, ProviderError>;

    /// Start linking an institution: log in to it through the provider and
    /// return the freshly created provider-account snapshot.
    async fn initiate_link(
        &self,
        session: &Session,
        provider_id: &str,
        credentials: &Credentials,
    ) -> Result<ProviderAccount, ProviderError>;

    /// Fetch the current snapshot of a provider-account, or `None` if the
    /// provider no longer knows it.
    async fn fetch_provider_account(
        &self,
        session: &Session,
        provider_account_id: &str,
    ) -> Result<Option<ProviderAccount>, ProviderError>;

    /// Submit a filled MFA login form.
    async fn submit_login_form(
        &self,
        session: &Session,
        provider_account_id: &str,
        form: &LoginForm,
    ) -> Result<(), ProviderError>;

    /// List the accounts under a provider-account.
    async fn fetch_accounts(
        &self,
        session: &Session,
        provider_account_id: &str,
    ) -> Result<Vec<RemoteAccount>, ProviderError>;

    /// Fetch transactions for an account, from `since` onward when given.
    /// The provider rounds dates to day precision, so the window is
    /// inclusive and overlap is expected.
    async fn fetch_transactions(
        &self,
        session: &Session,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RemoteTransaction>, ProviderError>;

    /// Delete a provider-account. Cascades to its remote accounts and
    /// transactions on the provider side.
    async fn delete_provider_account(
        &self,
        session: &Session,
        provider_account_id: &str,
    ) -> Result<(), ProviderError>;
}
