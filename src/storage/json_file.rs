//! JSON file-based storage implementation.
//!
//! Directory structure:
//! ```text
//! data/
//!   links/{link_id}.json
//!   accounts/{account_id}.json
//!   transactions/{account_id}/{transaction_id}.json
//!   audit/{link_id}.jsonl
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::audit::AuditEntry;
use crate::models::{Account, AccountLink, Id, Transaction};

use super::{check_batch_size, Storage, WriteOp};

pub struct JsonFileStorage {
    base_path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn links_dir(&self) -> PathBuf {
        self.base_path.join("links")
    }

    fn accounts_dir(&self) -> PathBuf {
        self.base_path.join("accounts")
    }

    fn transactions_dir(&self, account_id: &Id) -> PathBuf {
        self.base_path.join("transactions").join(account_id.as_str())
    }

    fn link_file(&self, id: &Id) -> PathBuf {
        self.links_dir().join(format!("{id}.json"))
    }

    fn account_file(&self, id: &Id) -> PathBuf {
        self.accounts_dir().join(format!("{id}.json"))
    }

    fn transaction_file(&self, account_id: &Id, transaction_id: &Id) -> PathBuf {
        self.transactions_dir(account_id)
            .join(format!("{transaction_id}.json"))
    }

    fn audit_file(&self, link_id: &Id) -> PathBuf {
        self.base_path.join("audit").join(format!("{link_id}.jsonl"))
    }

    async fn read_json<T: for<'de> serde::Deserialize<'de>>(
        &self,
        path: &Path,
    ) -> Result<Option<T>> {
        match fs::read_to_string(path).await {
            Ok(content) => {
                let value = serde_json::from_str(&content)
                    .with_context(|| format!("failed to parse JSON from {path:?}"))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {path:?}")),
        }
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create storage directory")?;
        }
        let content = serde_json::to_string_pretty(value).context("failed to serialize JSON")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("failed to write {path:?}"))?;
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to delete {path:?}")),
        }
    }

    async fn read_dir_json<T: for<'de> serde::Deserialize<'de>>(
        &self,
        dir: &Path,
    ) -> Result<Vec<T>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("failed to list {dir:?}")),
        };

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(item) = self.read_json(&path).await? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

#[async_trait::async_trait]
impl Storage for JsonFileStorage {
    async fn get_link(&self, id: &Id) -> Result<Option<AccountLink>> {
        self.read_json(&self.link_file(id)).await
    }

    async fn save_link(&self, link: &AccountLink) -> Result<()> {
        self.write_json(&self.link_file(&link.id), link).await
    }

    async fn delete_link(&self, id: &Id) -> Result<bool> {
        self.remove_file(&self.link_file(id)).await
    }

    async fn find_link_for_provider(
        &self,
        user_id: &Id,
        provider_id: &str,
    ) -> Result<Option<AccountLink>> {
        let links: Vec<AccountLink> = self.read_dir_json(&self.links_dir()).await?;
        Ok(links
            .into_iter()
            .find(|l| &l.user_id == user_id && l.provider_id == provider_id))
    }

    async fn list_links(&self, user_id: &Id) -> Result<Vec<AccountLink>> {
        let links: Vec<AccountLink> = self.read_dir_json(&self.links_dir()).await?;
        let mut found: Vec<AccountLink> = links
            .into_iter()
            .filter(|l| &l.user_id == user_id)
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn get_account(&self, id: &Id) -> Result<Option<Account>> {
        self.read_json(&self.account_file(id)).await
    }

    async fn list_accounts_for_link(&self, link_id: &Id) -> Result<Vec<Account>> {
        let accounts: Vec<Account> = self.read_dir_json(&self.accounts_dir()).await?;
        let mut found: Vec<Account> = accounts
            .into_iter()
            .filter(|a| &a.link_id == link_id)
            .collect();
        found.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        Ok(found)
    }

    async fn list_transactions(&self, account_id: &Id) -> Result<Vec<Transaction>> {
        self.read_dir_json(&self.transactions_dir(account_id)).await
    }

    async fn latest_transaction(&self, account_id: &Id) -> Result<Option<Transaction>> {
        let txns = self.list_transactions(account_id).await?;
        Ok(txns.into_iter().max_by_key(|t| (t.date, t.created_at)))
    }

    async fn commit_batch(&self, ops: &[WriteOp]) -> Result<()> {
        check_batch_size(ops)?;

        for op in ops {
            match op {
                WriteOp::PutAccount(account) => {
                    self.write_json(&self.account_file(&account.id), account)
                        .await?;
                }
                WriteOp::DeleteAccount(id) => {
                    self.remove_file(&self.account_file(id)).await?;
                }
                WriteOp::PutTransaction(txn) => {
                    self.write_json(&self.transaction_file(&txn.account_id, &txn.id), txn)
                        .await?;
                }
                WriteOp::DeleteTransaction {
                    account_id,
                    transaction_id,
                } => {
                    self.remove_file(&self.transaction_file(account_id, transaction_id))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let path = self.audit_file(&entry.link_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create audit directory")?;
        }

        let mut line = serde_json::to_string(entry).context("failed to serialize audit entry")?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {path:?}"))?;
        file.write_all(line.as_bytes())
            .await
            .context("failed to append audit entry")?;
        Ok(())
    }

    async fn list_audit(&self, link_id: &Id) -> Result<Vec<AuditEntry>> {
        let path = self.audit_file(link_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("failed to read {path:?}")),
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(line)
                .with_context(|| format!("failed to parse audit line: {line}"))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
