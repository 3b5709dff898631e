//! Notification drain (`NOTIFY_*` topics).
//!
//! Exactly-once by the unique `(tenant, outbox_id)` on the notifications
//! table: a reclaimed message finds its row already present and does
//! nothing.

use chrono::Utc;

use settleproxy_store::{NotificationRow, OutboxMessage};

use crate::error::PipelineError;
use crate::runtime::Runtime;

pub fn run(runtime: &Runtime, message: &OutboxMessage) -> Result<Option<String>, PipelineError> {
    let outbox_id = message.id;
    let tenant_id = message.tenant_id.clone();
    let topic = message.topic.clone();
    let payload = message.payload.clone();

    runtime.store().transact(move |state| {
        let exists = state
            .notifications
            .iter()
            .any(|n| n.tenant_id == tenant_id && n.outbox_id == outbox_id);
        if !exists {
            let id = state.notifications.len() as u64 + 1;
            state.notifications.push(NotificationRow {
                id,
                tenant_id: tenant_id.clone(),
                outbox_id,
                topic: topic.clone(),
                payload: payload.clone(),
                created_at: Utc::now(),
            });
        }
        Ok(())
    })?;
    Ok(None)
}
