//! Gated access to the provider with session caching and retry policy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::LinkError;
use crate::gate::Gate;

use super::{
    Credentials, LoginForm, ProviderAccount, ProviderClient, ProviderError, RemoteAccount,
    RemoteTransaction, Session,
};

/// Retries on a failed provider call before the failure surfaces to the
/// state machine.
const MAX_RETRIES: u32 = 1;

/// Owns everything needed to issue provider calls: the client, the cached
/// session, and the permit gate serializing calls.
///
/// One gateway is built at process start and shared; the provider session is
/// per user-of-the-provider, not per link, so a single gate covers every
/// in-flight attempt.
pub struct ProviderGateway {
    client: Arc<dyn ProviderClient>,
    credentials: Credentials,
    gate: Gate,
    session: Mutex<Option<Session>>,
    retry_backoff: Duration,
    clock: Arc<dyn Clock>,
}

impl ProviderGateway {
    pub fn new(
        client: Arc<dyn ProviderClient>,
        credentials: Credentials,
        gate: Gate,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            client,
            credentials,
            gate,
            session: Mutex::new(None),
            retry_backoff,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Return a session that is valid right now, probing the cached one and
    /// logging in again when it has expired.
    async fn ensure_session(&self) -> Result<Session, LinkError> {
        let mut cached = self.session.lock().await;

        if let Some(session) = cached.clone() {
            if session.expires_at > self.clock.now() {
                let active = self
                    .gated(|| self.client.session_active(&session))
                    .await?;
                if active {
                    return Ok(session);
                }
                tracing::debug!("provider session rejected upstream, logging in again");
            }
        }

        let session = self.gated(|| self.client.login(&self.credentials)).await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Run one provider call inside the gate, retrying transient failures a
    /// bounded number of times with a fixed backoff.
    async fn gated<T, F, Fut>(&self, mut call: F) -> Result<T, LinkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let backoff = self.retry_backoff;
        let result = self
            .gate
            .with_permit(|| async {
                let mut attempt = 0;
                loop {
                    match call().await {
                        Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                            attempt += 1;
                            tracing::debug!(
                                error = %err,
                                attempt,
                                "transient provider failure, retrying"
                            );
                            tokio::time::sleep(backoff).await;
                        }
                        other => return other,
                    }
                }
            })
            .await?;
        Ok(result?)
    }

    pub async fn initiate_link(
        &self,
        provider_id: &str,
        credentials: &Credentials,
    ) -> Result<ProviderAccount, LinkError> {
        let session = self.ensure_session().await?;
        self.gated(|| self.client.initiate_link(&session, provider_id, credentials))
            .await
    }

    pub async fn fetch_provider_account(
        &self,
        provider_account_id: &str,
    ) -> Result<Option<ProviderAccount>, LinkError> {
        let session = self.ensure_session().await?;
        self.gated(|| self.client.fetch_provider_account(&session, provider_account_id))
            .await
    }

    pub async fn submit_login_form(
        &self,
        provider_account_id: &str,
        form: &LoginForm,
    ) -> Result<(), LinkError> {
        let session = self.ensure_session().await?;
        self.gated(|| self.client.submit_login_form(&session, provider_account_id, form))
            .await
    }

    pub async fn fetch_accounts(
        &self,
        provider_account_id: &str,
    ) -> Result<Vec<RemoteAccount>, LinkError> {
        let session = self.ensure_session().await?;
        self.gated(|| self.client.fetch_accounts(&session, provider_account_id))
            .await
    }

    pub async fn fetch_transactions(
        &self,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RemoteTransaction>, LinkError> {
        let session = self.ensure_session().await?;
        self.gated(|| self.client.fetch_transactions(&session, account_id, since))
            .await
    }

    pub async fn delete_provider_account(
        &self,
        provider_account_id: &str,
    ) -> Result<(), LinkError> {
        let session = self.ensure_session().await?;
        self.gated(|| self.client.delete_provider_account(&session, provider_account_id))
            .await
    }
}
