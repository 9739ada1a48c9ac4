use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::lead::Lead;
use crate::storage::{Storage, VISITOR_ID_KEY};
use crate::types::{Message, VisitorRecord};

/// `v_<unix millis>_<9 random hex chars>`.
pub fn generate_visitor_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("v_{}_{}", Utc::now().timestamp_millis(), &random[..9])
}

/// Returns the persisted visitor id, creating and persisting one on first use.
pub fn ensure_visitor_id<S: Storage>(storage: &mut S) -> String {
    if let Some(existing) = storage
        .load(VISITOR_ID_KEY)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
    {
        return existing;
    }
    let id = generate_visitor_id();
    info!(visitor_id = %id, "created visitor id");
    storage.save(VISITOR_ID_KEY, &id);
    id
}

/// What the server knew about this visitor, after merging into local state.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub lead_complete: bool,
    /// Server history that should replace the local log. Never empty.
    pub history: Option<Vec<Message>>,
}

pub async fn fetch_record<B: Backend>(backend: &B, visitor_id: &str) -> Option<VisitorRecord> {
    match backend.lookup_visitor(visitor_id).await {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(visitor_id, error = %err, "visitor lookup failed");
            None
        }
    }
}

pub fn reconcile(record: VisitorRecord, lead: &mut Lead) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();
    if let Some(stored) = &record.lead {
        if lead.merge(stored) {
            debug!("merged stored lead");
        }
        outcome.lead_complete = lead.is_complete();
    }
    outcome.history = record.history.filter(|history| !history.is_empty());
    outcome
}
