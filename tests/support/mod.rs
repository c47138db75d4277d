#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use ledgerlink::gate::Gate;
use ledgerlink::link::LinkService;
use ledgerlink::provider::{
    Credentials, LoginForm, ProviderAccount, ProviderClient, ProviderError, ProviderGateway,
    RefreshInfo, RefreshStatus, RemoteAccount, RemoteBalance, RemoteTransaction, Session,
};
use ledgerlink::storage::MemoryStorage;

pub const PROVIDER_ACCOUNT_ID: &str = "pa-911";
pub const PROVIDER_ID: &str = "10164";

/// A provider whose responses are scripted up front. Snapshot polls are
/// consumed in order; the last one repeats once the queue drains.
pub struct ScriptedProvider {
    script: Mutex<Script>,
    pub fetch_accounts_calls: AtomicUsize,
    pub transactions_since: Mutex<Vec<Option<NaiveDate>>>,
    pub submitted_forms: Mutex<Vec<LoginForm>>,
    pub deleted_provider_accounts: Mutex<Vec<String>>,
}

struct Script {
    initial: ProviderAccount,
    polls: VecDeque<Option<ProviderAccount>>,
    repeat: Option<ProviderAccount>,
    accounts: Vec<RemoteAccount>,
    transactions: HashMap<String, Vec<RemoteTransaction>>,
}

impl ScriptedProvider {
    pub fn new(initial: ProviderAccount) -> Self {
        Self {
            script: Mutex::new(Script {
                repeat: Some(initial.clone()),
                initial,
                polls: VecDeque::new(),
                accounts: Vec::new(),
                transactions: HashMap::new(),
            }),
            fetch_accounts_calls: AtomicUsize::new(0),
            transactions_since: Mutex::new(Vec::new()),
            submitted_forms: Mutex::new(Vec::new()),
            deleted_provider_accounts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_poll(mut self, snapshot: ProviderAccount) -> Self {
        let script = self.script.get_mut().unwrap();
        script.repeat = Some(snapshot.clone());
        script.polls.push_back(Some(snapshot));
        self
    }

    /// Script the provider-account disappearing on the next poll.
    pub fn with_vanish(mut self) -> Self {
        let script = self.script.get_mut().unwrap();
        script.repeat = None;
        script.polls.push_back(None);
        self
    }

    pub fn with_accounts(mut self, accounts: Vec<RemoteAccount>) -> Self {
        self.script.get_mut().unwrap().accounts = accounts;
        self
    }

    pub fn with_transactions(mut self, account_id: &str, txns: Vec<RemoteTransaction>) -> Self {
        self.script
            .get_mut()
            .unwrap()
            .transactions
            .insert(account_id.to_string(), txns);
        self
    }

    /// Queue another snapshot while an attempt is running.
    pub fn push_poll(&self, snapshot: ProviderAccount) {
        let mut script = self.script.lock().unwrap();
        script.repeat = Some(snapshot.clone());
        script.polls.push_back(Some(snapshot));
    }

    pub fn set_accounts(&self, accounts: Vec<RemoteAccount>) {
        self.script.lock().unwrap().accounts = accounts;
    }

    pub fn set_transactions(&self, account_id: &str, txns: Vec<RemoteTransaction>) {
        self.script
            .lock()
            .unwrap()
            .transactions
            .insert(account_id.to_string(), txns);
    }
}

fn session() -> Session {
    Session {
        token: "scripted-session".to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn login(&self, _credentials: &Credentials) -> Result<Session, ProviderError> {
        Ok(session())
    }

    async fn session_active(&self, _session: &Session) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn initiate_link(
        &self,
        _session: &Session,
        _provider_id: &str,
        _credentials: &Credentials,
    ) -> Result<ProviderAccount, ProviderError> {
        Ok(self.script.lock().unwrap().initial.clone())
    }

    async fn fetch_provider_account(
        &self,
        _session: &Session,
        _provider_account_id: &str,
    ) -> Result<Option<ProviderAccount>, ProviderError> {
        let mut script = self.script.lock().unwrap();
        match script.polls.pop_front() {
            Some(next) => Ok(next),
            None => Ok(script.repeat.clone()),
        }
    }

    async fn submit_login_form(
        &self,
        _session: &Session,
        _provider_account_id: &str,
        form: &LoginForm,
    ) -> Result<(), ProviderError> {
        self.submitted_forms.lock().unwrap().push(form.clone());
        Ok(())
    }

    async fn fetch_accounts(
        &self,
        _session: &Session,
        _provider_account_id: &str,
    ) -> Result<Vec<RemoteAccount>, ProviderError> {
        self.fetch_accounts_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().unwrap().accounts.clone())
    }

    async fn fetch_transactions(
        &self,
        _session: &Session,
        account_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<RemoteTransaction>, ProviderError> {
        self.transactions_since.lock().unwrap().push(since);
        let script = self.script.lock().unwrap();
        let txns = script
            .transactions
            .get(account_id)
            .cloned()
            .unwrap_or_default();
        // The provider's window is inclusive at day precision.
        Ok(match since {
            Some(since) => txns.into_iter().filter(|t| t.date >= since).collect(),
            None => txns,
        })
    }

    async fn delete_provider_account(
        &self,
        _session: &Session,
        provider_account_id: &str,
    ) -> Result<(), ProviderError> {
        self.deleted_provider_accounts
            .lock()
            .unwrap()
            .push(provider_account_id.to_string());
        Ok(())
    }
}

fn snapshot(refresh: Option<RefreshInfo>, login_form: Option<LoginForm>) -> ProviderAccount {
    ProviderAccount {
        id: PROVIDER_ACCOUNT_ID.to_string(),
        provider_id: PROVIDER_ID.to_string(),
        refresh,
        login_form,
    }
}

pub fn snapshot_in_progress(additional: &str) -> ProviderAccount {
    snapshot(
        Some(RefreshInfo {
            status: RefreshStatus::InProgress,
            additional_status: Some(additional.to_string()),
            status_message: None,
        }),
        None,
    )
}

pub fn snapshot_mfa_with_form() -> ProviderAccount {
    snapshot(
        Some(RefreshInfo {
            status: RefreshStatus::InProgress,
            additional_status: Some("USER_INPUT_REQUIRED".to_string()),
            status_message: None,
        }),
        Some(LoginForm {
            form_type: "token".to_string(),
            rows: vec![ledgerlink::provider::LoginFormRow {
                id: "otp".to_string(),
                label: "One-time passcode".to_string(),
                value: None,
            }],
        }),
    )
}

pub fn snapshot_failed(additional: &str) -> ProviderAccount {
    snapshot(
        Some(RefreshInfo {
            status: RefreshStatus::Failed,
            additional_status: Some(additional.to_string()),
            status_message: None,
        }),
        None,
    )
}

pub fn snapshot_completed() -> ProviderAccount {
    snapshot(
        Some(RefreshInfo {
            status: RefreshStatus::Completed,
            additional_status: None,
            status_message: None,
        }),
        None,
    )
}

pub fn remote_account(id: &str, name: &str, amount: &str) -> RemoteAccount {
    RemoteAccount {
        id: id.to_string(),
        provider_account_id: PROVIDER_ACCOUNT_ID.to_string(),
        name: name.to_string(),
        account_type: Some("checking".to_string()),
        balance: Some(RemoteBalance {
            amount: amount.to_string(),
            currency: "USD".to_string(),
        }),
    }
}

pub fn remote_transaction(id: &str, account_id: &str, date: &str, amount: &str) -> RemoteTransaction {
    RemoteTransaction {
        id: id.to_string(),
        account_id: account_id.to_string(),
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        amount: amount.to_string(),
        currency: "USD".to_string(),
        description: format!("transaction {id}"),
        pending: false,
    }
}

pub fn gateway(provider: Arc<ScriptedProvider>) -> Arc<ProviderGateway> {
    Arc::new(ProviderGateway::new(
        provider,
        Credentials::new("svc-user", "svc-pass"),
        Gate::new(1).unwrap(),
        Duration::from_millis(1),
    ))
}

pub fn service(provider: Arc<ScriptedProvider>, storage: Arc<MemoryStorage>) -> LinkService {
    service_with_interval(provider, storage, Duration::from_millis(1))
}

/// A service with a slower poll cadence, for tests that race an external
/// actor against the poll loop.
pub fn service_with_interval(
    provider: Arc<ScriptedProvider>,
    storage: Arc<MemoryStorage>,
    poll_interval: Duration,
) -> LinkService {
    LinkService::new(storage, gateway(provider), poll_interval)
}

pub fn link_request(provider_id: &str) -> ledgerlink::link::LinkRequest {
    ledgerlink::link::LinkRequest {
        provider_id: provider_id.to_string(),
        provider_name: "First Example Bank".to_string(),
        credentials: Credentials::new("member-1", "hunter2"),
    }
}
