//! Link deletion.
//!
//! Ordering is mandatory: the remote provider-account goes first (the
//! provider cascades its own children), then local transactions, then local
//! accounts, then the link record. A system without foreign-key cascades
//! must never delete a parent before its children.

use crate::error::LinkError;
use crate::models::{AccountLink, Id, SourceOfTruth};
use crate::provider::ProviderGateway;
use crate::storage::{Storage, WriteOp, MAX_BATCH_OPS};

use super::service::LinkService;

impl LinkService {
    /// Delete a link and everything under it, local and remote.
    pub async fn delete_link(&self, link_id: &Id) -> Result<(), LinkError> {
        let Some(link) = self.storage().get_link(link_id).await? else {
            return Err(LinkError::BadRequest(format!("no such link: {link_id}")));
        };
        delete_link(self.storage(), self.gateway(), &link).await
    }
}

pub(super) async fn delete_link(
    storage: &dyn Storage,
    gateway: &ProviderGateway,
    link: &AccountLink,
) -> Result<(), LinkError> {
    match &link.source {
        SourceOfTruth::Empty => {
            // Nothing was ever linked; only the record itself exists.
            storage.delete_link(&link.id).await?;
        }
        SourceOfTruth::Provider { snapshot } => {
            gateway.delete_provider_account(&snapshot.id).await?;

            let accounts = storage.list_accounts_for_link(&link.id).await?;

            let mut transaction_ops = Vec::new();
            for account in &accounts {
                let txns = storage.list_transactions(&account.id).await?;
                transaction_ops.extend(txns.into_iter().map(|txn| WriteOp::DeleteTransaction {
                    account_id: account.id.clone(),
                    transaction_id: txn.id,
                }));
            }
            commit_chunks(storage, transaction_ops).await?;

            let account_ops: Vec<WriteOp> = accounts
                .iter()
                .map(|account| WriteOp::DeleteAccount(account.id.clone()))
                .collect();
            commit_chunks(storage, account_ops).await?;

            storage.delete_link(&link.id).await?;
        }
    }

    tracing::info!(link_id = %link.id, "deleted account link");
    Ok(())
}

async fn commit_chunks(storage: &dyn Storage, ops: Vec<WriteOp>) -> Result<(), LinkError> {
    for chunk in ops.chunks(MAX_BATCH_OPS) {
        storage.commit_batch(chunk).await?;
    }
    Ok(())
}
