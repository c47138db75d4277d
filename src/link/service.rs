//! Async driver for the link state machine.
//!
//! Owns the side effects the machine implies: gated provider calls, link
//! persistence, the inter-poll delay, the audit trail, and the top-level
//! error boundary that keeps attempts from staying "in progress" forever.

use std::sync::Arc;
use std::time::Duration;

use crate::audit::AttemptLog;
use crate::clock::{Clock, SystemClock};
use crate::error::LinkError;
use crate::models::{
    AccountLink, FailureReason, Id, InProgressPhase, LinkStatus, MfaPhase, SourceOfTruth,
};
use crate::provider::{Credentials, LoginForm, ProviderAccount, ProviderError, ProviderGateway};
use crate::reconcile::{ReconcileEngine, ReconcileSummary};
use crate::storage::Storage;

use super::machine::{next, LinkEvent, LinkMode, LinkState};

/// Payload for starting a link attempt: which institution, and the user's
/// credentials at that institution.
pub struct LinkRequest {
    pub provider_id: String,
    pub provider_name: String,
    pub credentials: Credentials,
}

/// How a driven attempt ended.
#[derive(Debug)]
pub enum LinkOutcome {
    /// The attempt reached a terminal status (success or failure); the
    /// stored record carries it.
    Completed(AccountLink),
    /// Another actor deleted the record or terminated it out from under the
    /// poll loop; the loop stopped without overwriting. `link` is the
    /// authoritative record when one still exists.
    Superseded { link: Option<AccountLink> },
}

enum Checkpoint {
    Active,
    Stopped(LinkOutcome),
}

pub struct LinkService {
    storage: Arc<dyn Storage>,
    gateway: Arc<ProviderGateway>,
    reconciler: ReconcileEngine,
    audit: AttemptLog,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl LinkService {
    pub fn new(
        storage: Arc<dyn Storage>,
        gateway: Arc<ProviderGateway>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            reconciler: ReconcileEngine::new(Arc::clone(&gateway), Arc::clone(&storage)),
            audit: AttemptLog::new(Arc::clone(&storage)),
            storage,
            gateway,
            clock: Arc::new(SystemClock),
            poll_interval,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.reconciler = self.reconciler.with_clock(Arc::clone(&clock));
        self.audit = self.audit.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    pub(super) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub(super) fn gateway(&self) -> &ProviderGateway {
        self.gateway.as_ref()
    }

    pub async fn get_link(&self, link_id: &Id) -> Result<Option<AccountLink>, LinkError> {
        Ok(self.storage.get_link(link_id).await?)
    }

    pub async fn list_links(&self, user_id: &Id) -> Result<Vec<AccountLink>, LinkError> {
        Ok(self.storage.list_links(user_id).await?)
    }

    /// Re-run reconciliation for an already linked record, e.g. from a
    /// scheduled refresh.
    pub async fn reconcile(&self, link: &AccountLink) -> Result<ReconcileSummary, LinkError> {
        self.reconciler.reconcile_link(link).await
    }

    /// Start a link attempt for `(user, provider)` and drive it to a
    /// terminal status.
    ///
    /// Rejected with `BadRequest` before any write when the pair already has
    /// a non-terminal attempt. A prior terminal record for the pair is
    /// re-initialized rather than duplicated.
    pub async fn begin_link(
        &self,
        user_id: &Id,
        request: LinkRequest,
        mode: LinkMode,
    ) -> Result<LinkOutcome, LinkError> {
        if request.provider_id.trim().is_empty() {
            return Err(LinkError::BadRequest("provider id must not be empty".to_string()));
        }

        let existing = self
            .storage
            .find_link_for_provider(user_id, &request.provider_id)
            .await?;
        if let Some(existing) = &existing {
            if !existing.is_terminal() {
                return Err(LinkError::BadRequest(format!(
                    "a link attempt against provider {} is already in flight ({})",
                    request.provider_id, existing.status
                )));
            }
        }

        let link = match existing {
            Some(mut link) => {
                link.status = LinkStatus::InProgress(InProgressPhase::Initializing);
                link.provider_name = request.provider_name.clone();
                link.updated_at = self.clock.now();
                link
            }
            None => AccountLink::new_with_clock(
                user_id.clone(),
                request.provider_id.clone(),
                request.provider_name.clone(),
                self.clock.as_ref(),
            ),
        };
        self.storage.save_link(&link).await?;

        self.perform_link(&link.id, request, mode).await
    }

    /// Drive one attempt end to end. On any uncaught failure the error
    /// boundary force-sets `failed/internal_service_failure` and closes the
    /// audit trail, then re-raises. This is a last-resort safety net, not a
    /// replacement for the status table.
    pub async fn perform_link(
        &self,
        link_id: &Id,
        request: LinkRequest,
        mode: LinkMode,
    ) -> Result<LinkOutcome, LinkError> {
        self.audit.started(link_id).await;

        match self.run(link_id, request, mode).await {
            Ok(outcome) => {
                let status = match &outcome {
                    LinkOutcome::Completed(link) => Some(link.status),
                    LinkOutcome::Superseded { link } => link.as_ref().map(|l| l.status),
                };
                self.audit.finished(link_id, status).await;
                Ok(outcome)
            }
            Err(err) => {
                tracing::error!(link_id = %link_id, error = %err, "link attempt aborted");
                let status = LinkStatus::Failed(FailureReason::InternalServiceFailure);
                if let Ok(Some(mut link)) = self.storage.get_link(link_id).await {
                    if !link.is_terminal() {
                        link.status = status;
                        link.updated_at = self.clock.now();
                        if let Err(save_err) = self.storage.save_link(&link).await {
                            tracing::error!(
                                link_id = %link_id,
                                error = %save_err,
                                "failed to force-fail link record"
                            );
                        }
                    }
                }
                self.audit.finished(link_id, Some(status)).await;
                Err(err)
            }
        }
    }

    /// Submit a filled MFA login form for a link waiting on user input.
    pub async fn submit_mfa(&self, link_id: &Id, form: &LoginForm) -> Result<(), LinkError> {
        let Some(link) = self.storage.get_link(link_id).await? else {
            return Err(LinkError::BadRequest(format!("no such link: {link_id}")));
        };
        if link.status != LinkStatus::Mfa(MfaPhase::PendingUserInput) {
            return Err(LinkError::BadRequest(format!(
                "link {link_id} is not waiting for user input ({})",
                link.status
            )));
        }
        let Some(provider_account_id) = link.provider_account_id() else {
            return Err(LinkError::InternalInvariant(format!(
                "link {link_id} is in an MFA status without a provider account"
            )));
        };
        self.gateway
            .submit_login_form(provider_account_id, form)
            .await
    }

    async fn run(
        &self,
        link_id: &Id,
        request: LinkRequest,
        mode: LinkMode,
    ) -> Result<LinkOutcome, LinkError> {
        let mut latest: Option<ProviderAccount> = None;
        let mut state = LinkState::Initializing;

        loop {
            match state {
                LinkState::Initializing => {
                    let event = match self
                        .gateway
                        .initiate_link(&request.provider_id, &request.credentials)
                        .await
                    {
                        Ok(snapshot) => LinkEvent::SnapshotUpdated(Some(snapshot)),
                        Err(LinkError::Provider(err)) => {
                            tracing::warn!(
                                link_id = %link_id,
                                code = err.code(),
                                "link initiation rejected by provider"
                            );
                            state = LinkState::UpdateAndTerminate {
                                status: LinkStatus::Failed(failure_reason_for(&err)),
                            };
                            continue;
                        }
                        Err(other) => return Err(other),
                    };
                    state = next(LinkState::Initializing, event, mode);
                }

                LinkState::Polling {
                    snapshot,
                    status,
                    mfa_polls,
                } => {
                    // The stored record is authoritative: a deletion or a
                    // terminal status written by another actor stops this
                    // loop instead of being overwritten.
                    if let Checkpoint::Stopped(outcome) = self.checkpoint(link_id).await? {
                        return Ok(outcome);
                    }

                    latest = Some(snapshot.clone());
                    if self.persist(link_id, Some(&snapshot), status).await?.is_none() {
                        return Ok(LinkOutcome::Superseded { link: None });
                    }
                    self.audit.status(link_id, status).await;

                    // The re-poll timer lives inside this sequential loop;
                    // leaving the state drops it, so no callback can fire
                    // into a superseded machine.
                    tokio::time::sleep(self.poll_interval).await;

                    let event = match self.gateway.fetch_provider_account(&snapshot.id).await {
                        Ok(refreshed) => LinkEvent::SnapshotUpdated(refreshed),
                        Err(LinkError::Provider(err)) => {
                            tracing::warn!(
                                link_id = %link_id,
                                code = err.code(),
                                "snapshot poll failed"
                            );
                            state = LinkState::UpdateAndTerminate {
                                status: LinkStatus::Failed(failure_reason_for(&err)),
                            };
                            continue;
                        }
                        Err(other) => return Err(other),
                    };
                    state = next(
                        LinkState::Polling {
                            snapshot,
                            status,
                            mfa_polls,
                        },
                        event,
                        mode,
                    );
                }

                LinkState::SyncWithSource { snapshot } => {
                    latest = Some(snapshot.clone());
                    let Some(link) = self
                        .persist(
                            link_id,
                            Some(&snapshot),
                            LinkStatus::InProgress(InProgressPhase::DownloadingFromSource),
                        )
                        .await?
                    else {
                        return Ok(LinkOutcome::Superseded { link: None });
                    };
                    self.audit.status(link_id, link.status).await;

                    let summary = self.reconciler.reconcile_link(&link).await?;
                    tracing::info!(
                        link_id = %link_id,
                        accounts_created = summary.accounts_created,
                        accounts_updated = summary.accounts_updated,
                        accounts_deleted = summary.accounts_deleted,
                        transactions_inserted = summary.transactions_inserted,
                        transactions_deleted = summary.transactions_deleted,
                        "reconciled remote snapshot"
                    );
                    state = LinkState::UpdateAndTerminate {
                        status: LinkStatus::Success,
                    };
                }

                LinkState::UpdateAndTerminate { status } => {
                    if self.persist(link_id, latest.as_ref(), status).await?.is_none() {
                        return Ok(LinkOutcome::Superseded { link: None });
                    }
                    state = LinkState::Terminate { status };
                }

                LinkState::Terminate { .. } => {
                    return match self.storage.get_link(link_id).await? {
                        Some(link) => Ok(LinkOutcome::Completed(link)),
                        None => Ok(LinkOutcome::Superseded { link: None }),
                    };
                }

                LinkState::Failed { message } => {
                    tracing::error!(link_id = %link_id, message = %message, "link machine failed");
                    let persisted = self
                        .persist(
                            link_id,
                            latest.as_ref(),
                            LinkStatus::Failed(FailureReason::InternalServiceFailure),
                        )
                        .await?;
                    return Ok(match persisted {
                        Some(link) => LinkOutcome::Completed(link),
                        None => LinkOutcome::Superseded { link: None },
                    });
                }
            }
        }
    }

    async fn checkpoint(&self, link_id: &Id) -> Result<Checkpoint, LinkError> {
        match self.storage.get_link(link_id).await? {
            None => {
                tracing::info!(link_id = %link_id, "link record deleted mid-attempt, stopping");
                Ok(Checkpoint::Stopped(LinkOutcome::Superseded { link: None }))
            }
            Some(stored) if stored.is_terminal() => {
                tracing::info!(
                    link_id = %link_id,
                    status = %stored.status,
                    "link record terminated by another actor, deferring"
                );
                Ok(Checkpoint::Stopped(LinkOutcome::Superseded {
                    link: Some(stored),
                }))
            }
            Some(_) => Ok(Checkpoint::Active),
        }
    }

    /// Read-current, compute-next, write. Last writer wins. A record another
    /// actor deleted is never resurrected; `None` tells the caller to stop.
    async fn persist(
        &self,
        link_id: &Id,
        snapshot: Option<&ProviderAccount>,
        status: LinkStatus,
    ) -> Result<Option<AccountLink>, LinkError> {
        let Some(mut link) = self.storage.get_link(link_id).await? else {
            tracing::info!(link_id = %link_id, "link record deleted mid-attempt, not persisting");
            return Ok(None);
        };
        link.status = status;
        if let Some(snapshot) = snapshot {
            link.source = SourceOfTruth::Provider {
                snapshot: snapshot.clone(),
            };
        }
        link.updated_at = self.clock.now();
        self.storage.save_link(&link).await?;
        Ok(Some(link))
    }
}

/// Map a provider error that exhausted its retries onto a terminal failure
/// status. Unrecognized provider codes land on the internal bucket.
fn failure_reason_for(err: &ProviderError) -> FailureReason {
    match err {
        ProviderError::Auth { .. } => FailureReason::BadCredentials,
        ProviderError::Mfa { .. } => FailureReason::MfaFailure,
        ProviderError::Transient { .. } => FailureReason::ExternalServiceFailure,
        ProviderError::Other { .. } => FailureReason::InternalServiceFailure,
    }
}
