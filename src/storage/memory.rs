//! In-memory storage implementation for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use tokio::sync::Mutex;

use crate::audit::AuditEntry;
use crate::models::{Account, AccountLink, Id, Transaction};

use super::{check_batch_size, Storage, WriteOp};

/// In-memory storage for tests. Counts write operations so idempotency can
/// be asserted directly.
pub struct MemoryStorage {
    links: Mutex<HashMap<Id, AccountLink>>,
    accounts: Mutex<HashMap<Id, Account>>,
    transactions: Mutex<HashMap<Id, Vec<Transaction>>>,
    audit: Mutex<HashMap<Id, Vec<AuditEntry>>>,
    write_ops: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            audit: Mutex::new(HashMap::new()),
            write_ops: AtomicUsize::new(0),
        }
    }

    /// Total operations applied through `commit_batch` and `save_link` so
    /// far.
    pub fn write_op_count(&self) -> usize {
        self.write_ops.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn get_link(&self, id: &Id) -> Result<Option<AccountLink>> {
        let links = self.links.lock().await;
        Ok(links.get(id).cloned())
    }

    async fn save_link(&self, link: &AccountLink) -> Result<()> {
        let mut links = self.links.lock().await;
        links.insert(link.id.clone(), link.clone());
        self.write_ops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_link(&self, id: &Id) -> Result<bool> {
        let mut links = self.links.lock().await;
        self.write_ops.fetch_add(1, Ordering::SeqCst);
        Ok(links.remove(id).is_some())
    }

    async fn find_link_for_provider(
        &self,
        user_id: &Id,
        provider_id: &str,
    ) -> Result<Option<AccountLink>> {
        let links = self.links.lock().await;
        Ok(links
            .values()
            .find(|l| &l.user_id == user_id && l.provider_id == provider_id)
            .cloned())
    }

    async fn list_links(&self, user_id: &Id) -> Result<Vec<AccountLink>> {
        let links = self.links.lock().await;
        let mut found: Vec<AccountLink> = links
            .values()
            .filter(|l| &l.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn get_account(&self, id: &Id) -> Result<Option<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts.get(id).cloned())
    }

    async fn list_accounts_for_link(&self, link_id: &Id) -> Result<Vec<Account>> {
        let accounts = self.accounts.lock().await;
        let mut found: Vec<Account> = accounts
            .values()
            .filter(|a| &a.link_id == link_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        Ok(found)
    }

    async fn list_transactions(&self, account_id: &Id) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.lock().await;
        Ok(transactions.get(account_id).cloned().unwrap_or_default())
    }

    async fn latest_transaction(&self, account_id: &Id) -> Result<Option<Transaction>> {
        let transactions = self.transactions.lock().await;
        Ok(transactions
            .get(account_id)
            .and_then(|txns| txns.iter().max_by_key(|t| (t.date, t.created_at)).cloned()))
    }

    async fn commit_batch(&self, ops: &[WriteOp]) -> Result<()> {
        check_batch_size(ops)?;

        let mut accounts = self.accounts.lock().await;
        let mut transactions = self.transactions.lock().await;
        for op in ops {
            match op {
                WriteOp::PutAccount(account) => {
                    accounts.insert(account.id.clone(), account.clone());
                }
                WriteOp::DeleteAccount(id) => {
                    accounts.remove(id);
                }
                WriteOp::PutTransaction(txn) => {
                    transactions
                        .entry(txn.account_id.clone())
                        .or_default()
                        .push(txn.clone());
                }
                WriteOp::DeleteTransaction {
                    account_id,
                    transaction_id,
                } => {
                    if let Some(txns) = transactions.get_mut(account_id) {
                        txns.retain(|t| &t.id != transaction_id);
                    }
                }
            }
        }
        self.write_ops.fetch_add(ops.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let mut audit = self.audit.lock().await;
        audit
            .entry(entry.link_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, link_id: &Id) -> Result<Vec<AuditEntry>> {
        let audit = self.audit.lock().await;
        Ok(audit.get(link_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let storage = MemoryStorage::new();
        let ops: Vec<WriteOp> = (0..super::super::MAX_BATCH_OPS + 1)
            .map(|i| WriteOp::DeleteAccount(Id::from_string(format!("acc-{i}"))))
            .collect();

        let err = storage.commit_batch(&ops).await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
