mod json_file;
mod memory;

pub use json_file::JsonFileStorage;
pub use memory::MemoryStorage;

use anyhow::Result;

use crate::audit::AuditEntry;
use crate::models::{Account, AccountLink, Id, Transaction};

/// Upper bound on operations per committed batch, matching the storage
/// engine's batched-write limit. Callers chunk larger write sets.
pub const MAX_BATCH_OPS: usize = 500;

/// One write in a batched commit.
#[derive(Debug, Clone)]
pub enum WriteOp {
    PutAccount(Account),
    DeleteAccount(Id),
    PutTransaction(Transaction),
    DeleteTransaction { account_id: Id, transaction_id: Id },
}

/// Document-store boundary the engine writes through.
///
/// Semantics required of implementations: read-your-write consistency per
/// document and last-writer-wins on conflicting saves. No multi-document
/// transaction is assumed; `commit_batch` batches for throughput, not
/// atomicity.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    // Account links
    async fn get_link(&self, id: &Id) -> Result<Option<AccountLink>>;
    async fn save_link(&self, link: &AccountLink) -> Result<()>;
    async fn delete_link(&self, id: &Id) -> Result<bool>;
    /// Look up the link a user has against one provider, if any.
    async fn find_link_for_provider(
        &self,
        user_id: &Id,
        provider_id: &str,
    ) -> Result<Option<AccountLink>>;
    async fn list_links(&self, user_id: &Id) -> Result<Vec<AccountLink>>;

    // Accounts
    async fn get_account(&self, id: &Id) -> Result<Option<Account>>;
    async fn list_accounts_for_link(&self, link_id: &Id) -> Result<Vec<Account>>;

    // Transactions
    async fn list_transactions(&self, account_id: &Id) -> Result<Vec<Transaction>>;
    /// The most recent transaction for an account, by posting date.
    async fn latest_transaction(&self, account_id: &Id) -> Result<Option<Transaction>>;

    /// Apply a batch of at most [`MAX_BATCH_OPS`] writes.
    async fn commit_batch(&self, ops: &[WriteOp]) -> Result<()>;

    // Audit trail
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
    async fn list_audit(&self, link_id: &Id) -> Result<Vec<AuditEntry>>;
}

pub(crate) fn check_batch_size(ops: &[WriteOp]) -> Result<()> {
    if ops.len() > MAX_BATCH_OPS {
        anyhow::bail!(
            "batch of {} operations exceeds the {MAX_BATCH_OPS}-op limit",
            ops.len()
        );
    }
    Ok(())
}
