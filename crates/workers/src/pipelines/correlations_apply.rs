//! Correlation upsert pipeline (`CORRELATION_APPLY`).
//!
//! Conflicts do not retry: the message completes with the conflict recorded
//! as its `last_error` so operators can see the losing upsert.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use settleproxy_core::AggregateId;
use settleproxy_store::{OutboxMessage, StoreError, upsert_correlation};

use crate::error::PipelineError;
use crate::runtime::Runtime;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorrelationPayload {
    site_id: String,
    correlation_key: String,
    job_id: String,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    force: bool,
}

pub fn run(runtime: &Runtime, message: &OutboxMessage) -> Result<Option<String>, PipelineError> {
    let payload: CorrelationPayload = serde_json::from_value(message.payload.clone())
        .map_err(|e| PipelineError::Payload(e.to_string()))?;
    if payload.site_id.is_empty() || payload.correlation_key.is_empty() || payload.job_id.is_empty()
    {
        return Err(PipelineError::Payload(
            "correlation requires siteId, correlationKey and jobId".to_string(),
        ));
    }

    let job_id = AggregateId::new(payload.job_id);
    let tenant_id = message.tenant_id.clone();
    let result = runtime.store().transact(|state| {
        upsert_correlation(
            state,
            &tenant_id,
            &payload.site_id,
            &payload.correlation_key,
            &job_id,
            payload.expires_at,
            payload.force,
            Utc::now(),
        )
    });

    match result {
        Ok(_) => Ok(None),
        Err(err @ StoreError::CorrelationConflict { .. }) => Ok(Some(err.to_string())),
        Err(err) => Err(err.into()),
    }
}
