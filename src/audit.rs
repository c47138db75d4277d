//! Best-effort audit trail of link attempts.
//!
//! Consumed only by operational tooling (the `is_running` flag is how
//! reporting finds stuck attempts). Writes are swallowed on failure; the
//! trail must never affect a linking outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::models::{Id, LinkStatus};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Started,
    Status,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub link_id: Id,
    pub event: AuditEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LinkStatus>,
    /// True from attempt start until the finish entry lands.
    pub is_running: bool,
    pub at: DateTime<Utc>,
}

pub struct AttemptLog {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl AttemptLog {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn started(&self, link_id: &Id) {
        self.record(link_id, AuditEvent::Started, None, true).await;
    }

    pub async fn status(&self, link_id: &Id, status: LinkStatus) {
        self.record(link_id, AuditEvent::Status, Some(status), true)
            .await;
    }

    pub async fn finished(&self, link_id: &Id, status: Option<LinkStatus>) {
        self.record(link_id, AuditEvent::Finished, status, false)
            .await;
    }

    async fn record(
        &self,
        link_id: &Id,
        event: AuditEvent,
        status: Option<LinkStatus>,
        is_running: bool,
    ) {
        let entry = AuditEntry {
            link_id: link_id.clone(),
            event,
            status,
            is_running,
            at: self.clock.now(),
        };
        if let Err(err) = self.storage.append_audit(&entry).await {
            tracing::warn!(link_id = %link_id, error = %err, "failed to write audit entry");
        }
    }
}
