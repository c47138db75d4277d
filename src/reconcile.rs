//! Diff-and-apply reconciliation of the provider's snapshot into local
//! storage.
//!
//! Accounts are classified create/update/delete against the remote account
//! list, applied as one batched write set, and only then are transactions
//! synced in two independent sub-passes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future;

use crate::clock::{Clock, SystemClock};
use crate::error::LinkError;
use crate::models::{Account, AccountLink, Balance, Id, Transaction};
use crate::provider::{normalize_remote_id, ProviderGateway, RemoteAccount, RemoteTransaction};
use crate::storage::{Storage, WriteOp, MAX_BATCH_OPS};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub accounts_created: usize,
    pub accounts_updated: usize,
    pub accounts_deleted: usize,
    pub transactions_inserted: usize,
    pub transactions_deleted: usize,
}

pub struct ReconcileEngine {
    gateway: Arc<ProviderGateway>,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl ReconcileEngine {
    pub fn new(gateway: Arc<ProviderGateway>, storage: Arc<dyn Storage>) -> Self {
        Self {
            gateway,
            storage,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sync the remote account/transaction state for one link into local
    /// storage. Idempotent: an unchanged remote snapshot produces zero
    /// writes.
    pub async fn reconcile_link(&self, link: &AccountLink) -> Result<ReconcileSummary, LinkError> {
        let Some(provider_account_id) = link.provider_account_id() else {
            return Err(LinkError::InternalInvariant(format!(
                "account link {} has no provider account to reconcile from",
                link.id
            )));
        };

        let remote = self.gateway.fetch_accounts(provider_account_id).await?;
        let local = self.storage.list_accounts_for_link(&link.id).await?;
        let AccountPlan {
            ops,
            created,
            updated,
            deleted,
            live,
        } = plan_accounts(link, provider_account_id, &remote, &local, self.clock.now());

        tracing::debug!(
            link_id = %link.id,
            create = created.len(),
            update = updated.len(),
            delete = deleted.len(),
            "planned account reconciliation"
        );
        commit_chunked(self.storage.as_ref(), ops).await?;

        // Transaction sync runs only after the account batch commits. The
        // two sub-passes are independent and run concurrently.
        let (transactions_deleted, transactions_inserted) = future::try_join(
            self.purge_transactions(&deleted),
            self.import_transactions(&live),
        )
        .await?;

        Ok(ReconcileSummary {
            accounts_created: created.len(),
            accounts_updated: updated.len(),
            accounts_deleted: deleted.len(),
            transactions_inserted,
            transactions_deleted,
        })
    }

    /// Delete every transaction under the accounts removed by the plan. No
    /// remote call: deletion is implied by the account's deletion.
    async fn purge_transactions(&self, deleted: &[Account]) -> Result<usize, LinkError> {
        let mut ops = Vec::new();
        for account in deleted {
            let txns = self.storage.list_transactions(&account.id).await?;
            ops.extend(txns.into_iter().map(|txn| WriteOp::DeleteTransaction {
                account_id: account.id.clone(),
                transaction_id: txn.id,
            }));
        }
        let deleted_count = ops.len();
        commit_chunked(self.storage.as_ref(), ops).await?;
        Ok(deleted_count)
    }

    /// Fetch and insert new transactions for every surviving account.
    ///
    /// The fetch window starts at the latest locally known transaction's
    /// date (the provider rounds to days, so the boundary date comes back
    /// again and is dropped by the id filter). This trusts the provider
    /// never to backdate a transaction behind that watermark.
    async fn import_transactions(&self, live: &[Account]) -> Result<usize, LinkError> {
        let mut inserted = 0;
        for account in live {
            let since = self
                .storage
                .latest_transaction(&account.id)
                .await?
                .map(|txn| txn.date);
            let remote = self
                .gateway
                .fetch_transactions(&account.remote_id, since)
                .await?;
            if remote.is_empty() {
                continue;
            }

            let known: HashSet<String> = self
                .storage
                .list_transactions(&account.id)
                .await?
                .into_iter()
                .map(|txn| txn.remote_id)
                .collect();

            let now = self.clock.now();
            let ops: Vec<WriteOp> = remote
                .into_iter()
                .filter(|txn| !known.contains(&normalize_remote_id(&txn.id)))
                .map(|txn| WriteOp::PutTransaction(new_transaction(account, txn, now)))
                .collect();

            inserted += ops.len();
            commit_chunked(self.storage.as_ref(), ops).await?;
        }
        Ok(inserted)
    }
}

struct AccountPlan {
    ops: Vec<WriteOp>,
    created: Vec<Account>,
    updated: Vec<Account>,
    deleted: Vec<Account>,
    /// Every account still present remotely (created or kept, changed or
    /// not); the transaction import covers all of them.
    live: Vec<Account>,
}

/// Classify local accounts against the remote list. Pure; the match key is
/// the provider's account id compared as a normalized string.
fn plan_accounts(
    link: &AccountLink,
    provider_account_id: &str,
    remote: &[RemoteAccount],
    local: &[Account],
    now: DateTime<Utc>,
) -> AccountPlan {
    let local_by_remote_id: HashMap<String, &Account> = local
        .iter()
        .map(|account| (account.remote_id.clone(), account))
        .collect();

    let mut plan = AccountPlan {
        ops: Vec::new(),
        created: Vec::new(),
        updated: Vec::new(),
        deleted: Vec::new(),
        live: Vec::new(),
    };
    let mut seen: HashSet<String> = HashSet::new();

    for remote_account in remote {
        let remote_id = normalize_remote_id(&remote_account.id);
        seen.insert(remote_id.clone());

        match local_by_remote_id.get(&remote_id) {
            Some(existing) => {
                let refreshed = refresh_account(existing, remote_account, now);
                if changed(existing, &refreshed) {
                    plan.ops.push(WriteOp::PutAccount(refreshed.clone()));
                    plan.updated.push(refreshed.clone());
                }
                plan.live.push(refreshed);
            }
            None => {
                let account = new_account(link, provider_account_id, remote_account, now);
                plan.ops.push(WriteOp::PutAccount(account.clone()));
                plan.created.push(account.clone());
                plan.live.push(account);
            }
        }
    }

    for account in local {
        if !seen.contains(&account.remote_id) {
            plan.ops.push(WriteOp::DeleteAccount(account.id.clone()));
            plan.deleted.push(account.clone());
        }
    }

    plan
}

fn new_account(
    link: &AccountLink,
    provider_account_id: &str,
    remote: &RemoteAccount,
    now: DateTime<Utc>,
) -> Account {
    let remote_id = normalize_remote_id(&remote.id);
    Account {
        // Deterministic so a re-run after a partial failure converges on the
        // same local ids.
        id: Id::from_external(&format!("{provider_account_id}:{remote_id}")),
        link_id: link.id.clone(),
        user_id: link.user_id.clone(),
        provider_account_ref: provider_account_id.to_string(),
        remote_id,
        name: remote.name.clone(),
        account_type: remote.account_type.clone(),
        balance: remote
            .balance
            .as_ref()
            .map(|b| Balance::new(b.amount.clone(), b.currency.clone())),
        created_at: now,
        updated_at: now,
    }
}

fn refresh_account(existing: &Account, remote: &RemoteAccount, now: DateTime<Utc>) -> Account {
    Account {
        name: remote.name.clone(),
        account_type: remote.account_type.clone(),
        balance: remote
            .balance
            .as_ref()
            .map(|b| Balance::new(b.amount.clone(), b.currency.clone())),
        updated_at: now,
        ..existing.clone()
    }
}

fn changed(existing: &Account, refreshed: &Account) -> bool {
    existing.name != refreshed.name
        || existing.account_type != refreshed.account_type
        || existing.balance != refreshed.balance
}

fn new_transaction(account: &Account, remote: RemoteTransaction, now: DateTime<Utc>) -> Transaction {
    let remote_id = normalize_remote_id(&remote.id);
    Transaction {
        id: Id::from_external(&format!("{}:{remote_id}", account.remote_id)),
        account_id: account.id.clone(),
        remote_id,
        date: remote.date,
        amount: remote.amount,
        currency: remote.currency,
        description: remote.description,
        pending: remote.pending,
        created_at: now,
    }
}

/// Commit a write set in chunks of at most [`MAX_BATCH_OPS`]; chunks commit
/// independently and concurrently.
async fn commit_chunked(storage: &dyn Storage, ops: Vec<WriteOp>) -> Result<(), LinkError> {
    if ops.is_empty() {
        return Ok(());
    }
    let chunks: Vec<&[WriteOp]> = ops.chunks(MAX_BATCH_OPS).collect();
    future::try_join_all(chunks.into_iter().map(|chunk| storage.commit_batch(chunk))).await?;
    Ok(())
}
