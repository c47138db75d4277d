//! The link-attempt state machine.
//!
//! States and events are closed tagged unions and [`next`] is a pure
//! function, so every transition is exhaustively checked at compile time and
//! testable without I/O. The async driver in [`super::service`] owns the
//! side effects each state implies.

use crate::models::{FailureReason, InProgressPhase, LinkStatus, MfaPhase};
use crate::provider::{status, ProviderAccount, RefreshStatus};

/// MFA poll cycles allowed before an attempt that never received user input
/// fails with a timeout.
pub const MAX_MFA_POLLS: u32 = 5;

/// Whether a user is present to answer MFA challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// A user is driving the attempt and can fill in login forms.
    Interactive,
    /// A scheduled refresh; any request for user input is a failure.
    Background,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// Initiate the link against the provider and wait for the first
    /// snapshot.
    Initializing,
    /// Waiting on the provider; re-fetch the snapshot after a fixed delay.
    /// `mfa_polls` counts consecutive snapshots that derived an MFA status.
    Polling {
        snapshot: ProviderAccount,
        status: LinkStatus,
        mfa_polls: u32,
    },
    /// The provider finished; reconcile the remote snapshot into local
    /// storage, then terminate successfully.
    SyncWithSource { snapshot: ProviderAccount },
    /// Persist a final status, then terminate.
    UpdateAndTerminate { status: LinkStatus },
    /// Stopped with a final status.
    Terminate { status: LinkStatus },
    /// An internal error interrupted the attempt. Persists
    /// `failed/internal_service_failure` and stops.
    Failed { message: String },
}

impl LinkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Terminate { .. } | LinkState::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A fresh provider-account snapshot, or `None` if the provider no
    /// longer knows the account.
    SnapshotUpdated(Option<ProviderAccount>),
    /// An internal failure. Highest priority: interrupts any non-terminal
    /// state.
    Error { message: String },
}

/// Derive the semantic link status from a raw provider snapshot.
///
/// Evaluated in order, first match wins. Anything that is neither in
/// progress nor failed counts as a completed refresh.
pub fn derive_status(snapshot: &ProviderAccount, mode: LinkMode) -> LinkStatus {
    let Some(refresh) = &snapshot.refresh else {
        return LinkStatus::InProgress(InProgressPhase::Initializing);
    };

    match refresh.status {
        RefreshStatus::InProgress => match refresh.additional_status.as_deref() {
            Some(status::LOGIN_IN_PROGRESS) => {
                LinkStatus::InProgress(InProgressPhase::VerifyingCredentials)
            }
            Some(status::USER_INPUT_REQUIRED) => match mode {
                LinkMode::Background => {
                    LinkStatus::Failed(FailureReason::UserInputRequestInBackground)
                }
                LinkMode::Interactive if snapshot.login_form.is_some() => {
                    LinkStatus::Mfa(MfaPhase::PendingUserInput)
                }
                LinkMode::Interactive => LinkStatus::Mfa(MfaPhase::WaitingForLoginForm),
            },
            _ => LinkStatus::InProgress(InProgressPhase::DownloadingData),
        },
        RefreshStatus::Failed => match refresh.additional_status.as_deref() {
            Some(code) if status::MFA_TIMEOUT.contains(&code) => {
                LinkStatus::Failed(FailureReason::MfaFailure)
            }
            Some(status::LOGIN_FAILED) => LinkStatus::Failed(FailureReason::BadCredentials),
            _ => LinkStatus::Failed(FailureReason::InternalServiceFailure),
        },
        RefreshStatus::Completed => LinkStatus::Success,
    }
}

/// Compute the next state. Pure; never performs I/O.
pub fn next(state: LinkState, event: LinkEvent, mode: LinkMode) -> LinkState {
    let snapshot = match event {
        LinkEvent::Error { message } => {
            return if state.is_terminal() {
                state
            } else {
                LinkState::Failed { message }
            };
        }
        LinkEvent::SnapshotUpdated(snapshot) => snapshot,
    };

    let prior_mfa_polls = match &state {
        LinkState::Initializing => 0,
        LinkState::Polling {
            status: LinkStatus::Mfa(_),
            mfa_polls,
            ..
        } => *mfa_polls,
        LinkState::Polling { .. } => 0,
        // Terminal-bound states ignore late snapshots: no state is
        // re-enterable once the machine is past polling.
        other => return other.clone(),
    };

    let Some(snapshot) = snapshot else {
        return LinkState::Failed {
            message: "provider account missing after initiation reported success".to_string(),
        };
    };

    let derived = derive_status(&snapshot, mode);
    match derived {
        LinkStatus::Success => LinkState::SyncWithSource { snapshot },
        LinkStatus::Failed(_) => LinkState::UpdateAndTerminate { status: derived },
        LinkStatus::Mfa(_) => {
            let mfa_polls = prior_mfa_polls + 1;
            if mfa_polls > MAX_MFA_POLLS {
                LinkState::UpdateAndTerminate {
                    status: LinkStatus::Failed(FailureReason::Timeout),
                }
            } else {
                LinkState::Polling {
                    snapshot,
                    status: derived,
                    mfa_polls,
                }
            }
        }
        LinkStatus::InProgress(_) => LinkState::Polling {
            snapshot,
            status: derived,
            mfa_polls: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LoginForm, LoginFormRow, RefreshInfo};

    fn snapshot(refresh: Option<RefreshInfo>, with_form: bool) -> ProviderAccount {
        ProviderAccount {
            id: "911".to_string(),
            provider_id: "10164".to_string(),
            refresh,
            login_form: with_form.then(|| LoginForm {
                form_type: "token".to_string(),
                rows: vec![LoginFormRow {
                    id: "otp".to_string(),
                    label: "One-time passcode".to_string(),
                    value: None,
                }],
            }),
        }
    }

    fn refresh(status: RefreshStatus, additional: Option<&str>) -> Option<RefreshInfo> {
        Some(RefreshInfo {
            status,
            additional_status: additional.map(str::to_string),
            status_message: None,
        })
    }

    fn in_progress(additional: Option<&str>) -> ProviderAccount {
        snapshot(refresh(RefreshStatus::InProgress, additional), false)
    }

    #[test]
    fn missing_refresh_derives_initializing() {
        let derived = derive_status(&snapshot(None, false), LinkMode::Interactive);
        assert_eq!(derived, LinkStatus::InProgress(InProgressPhase::Initializing));
    }

    #[test]
    fn login_in_progress_derives_verifying_credentials() {
        let derived = derive_status(
            &in_progress(Some("LOGIN_IN_PROGRESS")),
            LinkMode::Interactive,
        );
        assert_eq!(
            derived,
            LinkStatus::InProgress(InProgressPhase::VerifyingCredentials)
        );
    }

    #[test]
    fn user_input_without_form_derives_waiting_for_login_form() {
        let derived = derive_status(
            &in_progress(Some("USER_INPUT_REQUIRED")),
            LinkMode::Interactive,
        );
        assert_eq!(derived, LinkStatus::Mfa(MfaPhase::WaitingForLoginForm));
    }

    #[test]
    fn user_input_with_form_derives_pending_user_input() {
        let with_form = snapshot(
            refresh(RefreshStatus::InProgress, Some("USER_INPUT_REQUIRED")),
            true,
        );
        let derived = derive_status(&with_form, LinkMode::Interactive);
        assert_eq!(derived, LinkStatus::Mfa(MfaPhase::PendingUserInput));
    }

    #[test]
    fn user_input_in_background_mode_is_a_failure() {
        let derived = derive_status(
            &in_progress(Some("USER_INPUT_REQUIRED")),
            LinkMode::Background,
        );
        assert_eq!(
            derived,
            LinkStatus::Failed(FailureReason::UserInputRequestInBackground)
        );
    }

    #[test]
    fn other_in_progress_statuses_derive_downloading_data() {
        for additional in [Some("DATA_RETRIEVAL_IN_PROGRESS"), None] {
            let derived = derive_status(&in_progress(additional), LinkMode::Interactive);
            assert_eq!(
                derived,
                LinkStatus::InProgress(InProgressPhase::DownloadingData)
            );
        }
    }

    #[test]
    fn failed_with_mfa_timeout_signature_derives_mfa_failure() {
        for code in status::MFA_TIMEOUT {
            let failed = snapshot(refresh(RefreshStatus::Failed, Some(code)), false);
            let derived = derive_status(&failed, LinkMode::Interactive);
            assert_eq!(derived, LinkStatus::Failed(FailureReason::MfaFailure));
        }
    }

    #[test]
    fn failed_login_derives_bad_credentials() {
        let failed = snapshot(refresh(RefreshStatus::Failed, Some("LOGIN_FAILED")), false);
        let derived = derive_status(&failed, LinkMode::Interactive);
        assert_eq!(derived, LinkStatus::Failed(FailureReason::BadCredentials));
    }

    #[test]
    fn failed_with_unknown_code_derives_internal_failure() {
        let failed = snapshot(refresh(RefreshStatus::Failed, Some("TECH_ERROR")), false);
        let derived = derive_status(&failed, LinkMode::Interactive);
        assert_eq!(
            derived,
            LinkStatus::Failed(FailureReason::InternalServiceFailure)
        );
    }

    #[test]
    fn completed_refresh_derives_success() {
        let done = snapshot(refresh(RefreshStatus::Completed, None), false);
        let derived = derive_status(&done, LinkMode::Interactive);
        assert_eq!(derived, LinkStatus::Success);
    }

    #[test]
    fn in_progress_sequences_stay_in_polling() {
        let updates = [
            in_progress(None),
            in_progress(Some("LOGIN_IN_PROGRESS")),
            in_progress(Some("DATA_RETRIEVAL_IN_PROGRESS")),
            in_progress(Some("LOGIN_IN_PROGRESS")),
        ];

        let mut state = LinkState::Initializing;
        for update in updates {
            state = next(
                state,
                LinkEvent::SnapshotUpdated(Some(update)),
                LinkMode::Interactive,
            );
            assert!(matches!(state, LinkState::Polling { .. }));
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn success_enters_sync_with_source_not_terminate() {
        let state = next(
            LinkState::Initializing,
            LinkEvent::SnapshotUpdated(Some(snapshot(refresh(RefreshStatus::Completed, None), false))),
            LinkMode::Interactive,
        );
        assert!(matches!(state, LinkState::SyncWithSource { .. }));
    }

    #[test]
    fn failed_login_terminates_with_bad_credentials() {
        let state = next(
            LinkState::Initializing,
            LinkEvent::SnapshotUpdated(Some(snapshot(
                refresh(RefreshStatus::Failed, Some("LOGIN_FAILED")),
                false,
            ))),
            LinkMode::Interactive,
        );
        assert_eq!(
            state,
            LinkState::UpdateAndTerminate {
                status: LinkStatus::Failed(FailureReason::BadCredentials)
            }
        );
    }

    #[test]
    fn mfa_polls_exhaust_into_timeout() {
        let mfa = in_progress(Some("USER_INPUT_REQUIRED"));

        let mut state = LinkState::Initializing;
        for _ in 0..MAX_MFA_POLLS {
            state = next(
                state,
                LinkEvent::SnapshotUpdated(Some(mfa.clone())),
                LinkMode::Interactive,
            );
            assert!(matches!(state, LinkState::Polling { .. }));
        }

        state = next(
            state,
            LinkEvent::SnapshotUpdated(Some(mfa)),
            LinkMode::Interactive,
        );
        assert_eq!(
            state,
            LinkState::UpdateAndTerminate {
                status: LinkStatus::Failed(FailureReason::Timeout)
            }
        );
    }

    #[test]
    fn non_mfa_poll_resets_the_mfa_counter() {
        let mfa = in_progress(Some("USER_INPUT_REQUIRED"));
        let downloading = in_progress(Some("DATA_RETRIEVAL_IN_PROGRESS"));

        let mut state = LinkState::Initializing;
        for _ in 0..MAX_MFA_POLLS {
            state = next(
                state,
                LinkEvent::SnapshotUpdated(Some(mfa.clone())),
                LinkMode::Interactive,
            );
        }
        state = next(
            state,
            LinkEvent::SnapshotUpdated(Some(downloading)),
            LinkMode::Interactive,
        );
        // A fresh MFA round starts counting from zero again.
        state = next(
            state,
            LinkEvent::SnapshotUpdated(Some(mfa)),
            LinkMode::Interactive,
        );
        assert!(matches!(
            state,
            LinkState::Polling {
                status: LinkStatus::Mfa(_),
                mfa_polls: 1,
                ..
            }
        ));
    }

    #[test]
    fn error_event_interrupts_any_active_state() {
        let polling = next(
            LinkState::Initializing,
            LinkEvent::SnapshotUpdated(Some(in_progress(None))),
            LinkMode::Interactive,
        );
        let state = next(
            polling,
            LinkEvent::Error {
                message: "storage write refused".to_string(),
            },
            LinkMode::Interactive,
        );
        assert!(matches!(state, LinkState::Failed { .. }));
    }

    #[test]
    fn terminal_states_ignore_further_events() {
        let terminal = LinkState::Terminate {
            status: LinkStatus::Success,
        };
        let after = next(
            terminal.clone(),
            LinkEvent::SnapshotUpdated(Some(in_progress(None))),
            LinkMode::Interactive,
        );
        assert_eq!(after, terminal);

        let after = next(
            terminal.clone(),
            LinkEvent::Error {
                message: "late".to_string(),
            },
            LinkMode::Interactive,
        );
        assert_eq!(after, terminal);
    }

    #[test]
    fn vanished_snapshot_is_an_invariant_violation() {
        let state = next(
            LinkState::Initializing,
            LinkEvent::SnapshotUpdated(None),
            LinkMode::Interactive,
        );
        assert!(matches!(state, LinkState::Failed { .. }));
    }
}
