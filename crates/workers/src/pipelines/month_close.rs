//! Month-close orchestration (`MONTH_CLOSE_REQUESTED`).
//!
//! Produces the period's artifact fan-out in a fixed order, enqueues
//! deliveries for each artifact, appends the server-signed `MONTH_CLOSED`
//! event together with the finance-pack enqueue (one commit, so a crash can
//! never close the month without queueing the bundle), and retires the
//! message. Every step is idempotent: artifact ids and hashes are
//! deterministic in (period, generatedAt, job set), deliveries dedupe, and a
//! close request for an already-closed month is a no-op.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use settleproxy_artifacts::{
    Artifact, Destination, GlAccountMap, build_gl_batch, build_journal_csv_artifact,
    build_monthly_statement, build_party_statements, build_payout_instructions,
    render_journal_csv, route_artifact,
};
use settleproxy_artifacts::statement::SettledJob;
use settleproxy_canon::{EventDraft, append_chained_event};
use settleproxy_core::{ActorRef, CurrencyCode, TenantId};
use settleproxy_store::{
    CommitRequest, JournalCsvGate, MonthSnapshot, MonthStatus, OutboxMessage, StreamKey, TxOp,
    failpoint_names, topics,
};

use crate::error::PipelineError;
use crate::runtime::Runtime;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonthClosePayload {
    period: String,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    #[serde(default)]
    generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    request_event_id: Option<String>,
}

pub fn run(runtime: &Runtime, message: &OutboxMessage) -> Result<Option<String>, PipelineError> {
    let payload: MonthClosePayload = serde_json::from_value(message.payload.clone())
        .map_err(|e| PipelineError::Payload(e.to_string()))?;
    let store = runtime.store();
    let tenant_id = &message.tenant_id;
    let period = payload.period.clone();
    let month_key = StreamKey::new(tenant_id.clone(), "month", period.clone());

    // Already closed: the close ran to completion earlier (possibly under a
    // different message); nothing to redo.
    let month_events = store.load_stream(&month_key)?;
    if let Some(row) = store.snapshot(&month_key)? {
        let snapshot: MonthSnapshot = serde_json::from_value(row.snapshot_json)
            .map_err(|e| PipelineError::Payload(format!("month snapshot: {e}")))?;
        if snapshot.status == MonthStatus::Closed {
            info!(%period, "month already closed, close request is a no-op");
            return Ok(Some("already closed".to_string()));
        }
    }

    // Stable generatedAt: message, then the request event's business time,
    // then wall clock for ad-hoc closes.
    let generated_at = payload
        .generated_at
        .or_else(|| {
            let wanted = payload.request_event_id.as_deref();
            month_events
                .iter()
                .filter(|e| e.event.event_type == "MONTH_CLOSE_REQUESTED")
                .filter(|e| wanted.is_none_or(|id| e.event.id.as_str() == id))
                .map(|e| e.event.at)
                .next_back()
        })
        .unwrap_or_else(Utc::now);

    // Jobs settled in [startAt, endAt), deterministically ordered by job id.
    let jobs = settled_jobs(runtime, tenant_id, payload.start_at, payload.end_at)?;
    info!(%period, job_count = jobs.len(), "computing month close");

    let (destinations, account_map, gate) = store.read(|state| {
        let destinations: Vec<Destination> = state
            .destinations
            .iter()
            .filter(|((t, _), _)| t == tenant_id)
            .map(|(_, d)| d.clone())
            .collect();
        let account_map = state
            .finance_account_maps
            .get(tenant_id)
            .cloned()
            .unwrap_or_default();
        let gate = state.billing(tenant_id).journal_csv_gate;
        (destinations, account_map, gate)
    })?;

    // 1. Monthly statement.
    let statement = build_monthly_statement(&period, generated_at, &jobs)?;
    let statement_artifact_id = statement.artifact_id.clone();
    commit_artifacts(runtime, tenant_id, &destinations, vec![statement])?;

    // 2. Party statements, one per party with a nonzero allocation.
    let party_statements = build_party_statements(&period, generated_at, &jobs)?;
    commit_artifacts(runtime, tenant_id, &destinations, party_statements)?;

    store
        .failpoints()
        .hit(failpoint_names::MONTH_CLOSE_AFTER_PARTY_STATEMENTS)?;

    // 3. Payout instructions, one per payee with a positive amount.
    let payouts = build_payout_instructions(&period, generated_at, &jobs)?;
    commit_artifacts(runtime, tenant_id, &destinations, payouts)?;

    store
        .failpoints()
        .hit(failpoint_names::MONTH_CLOSE_AFTER_PAYOUTS)?;

    // 4. GL batch, then the gated journal CSV.
    let gl_batch = build_gl_batch(&period, generated_at, &jobs, &account_map)?;
    commit_artifacts(runtime, tenant_id, &destinations, vec![gl_batch])?;

    if let Some(csv_artifact) = journal_csv(&period, generated_at, &jobs, &account_map, gate)? {
        commit_artifacts(runtime, tenant_id, &destinations, vec![csv_artifact])?;
    }

    // 5. Close the month and queue the finance pack in one commit.
    let head = store.head(&month_key)?;
    let closed_draft = EventDraft::new(
        "MONTH_CLOSED",
        generated_at,
        ActorRef::server(),
        serde_json::json!({
            "period": period,
            "statementArtifactId": statement_artifact_id,
            "jobCount": jobs.len(),
        }),
    );
    let closed_event = append_chained_event(
        head.chain_hash.as_deref(),
        closed_draft,
        Some(runtime.signer()),
    )?;

    store.commit_tx(
        CommitRequest::new(tenant_id.clone(), generated_at)
            .op(TxOp::AppendEvents {
                aggregate_type: month_key.aggregate_type.clone(),
                aggregate_id: month_key.aggregate_id.clone(),
                events: vec![closed_event],
            })
            .op(TxOp::EnqueueOutbox {
                topic: topics::FINANCE_PACK_BUNDLE_ENQUEUE.to_string(),
                aggregate_type: Some("month".to_string()),
                aggregate_id: Some(month_key.aggregate_id.clone()),
                payload: serde_json::json!({ "period": period }),
            }),
    )?;

    Ok(None)
}

fn settled_jobs(
    runtime: &Runtime,
    tenant_id: &TenantId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<SettledJob>, PipelineError> {
    let mut out = Vec::new();
    for (job_id, snapshot) in runtime.store().settled_jobs_in(tenant_id, start, end)? {
        let Some(payee) = snapshot.payee_party_id.clone() else {
            warn!(job_id = %job_id, "settled job has no payee party, excluded from close");
            continue;
        };
        let Some(settled_at) = snapshot.settled_at else {
            continue;
        };
        let currency = CurrencyCode::new(snapshot.currency.clone())
            .unwrap_or_else(|_| CurrencyCode::usd());
        out.push(SettledJob {
            job_id: job_id.as_str().to_string(),
            settled_at,
            amount_cents: snapshot.amount_cents,
            currency,
            payee_party_id: payee,
            allocations: snapshot.effective_allocations(),
        });
    }
    Ok(out)
}

/// Put artifacts and their delivery fan-out in one commit.
fn commit_artifacts(
    runtime: &Runtime,
    tenant_id: &TenantId,
    destinations: &[Destination],
    artifacts: Vec<Artifact>,
) -> Result<(), PipelineError> {
    if artifacts.is_empty() {
        return Ok(());
    }
    let mut request = CommitRequest::new(tenant_id.clone(), Utc::now());
    for artifact in artifacts {
        let deliveries = route_artifact(tenant_id, destinations, &artifact);
        request = request.op(TxOp::PutArtifact { artifact });
        for delivery in deliveries {
            request = request.op(TxOp::InsertDelivery {
                request: delivery,
                expires_at: None,
            });
        }
    }
    runtime.store().commit_tx(request)?;
    Ok(())
}

fn journal_csv(
    period: &str,
    generated_at: DateTime<Utc>,
    jobs: &[SettledJob],
    account_map: &GlAccountMap,
    gate: JournalCsvGate,
) -> Result<Option<Artifact>, PipelineError> {
    let (csv, unmapped) = render_journal_csv(jobs, account_map);
    if !unmapped.is_empty() {
        match gate {
            JournalCsvGate::Warn => {
                warn!(period, ?unmapped, "journal csv skipped: unmapped accounts");
                return Ok(None);
            }
            JournalCsvGate::Strict => {
                return Err(PipelineError::Gate {
                    period: period.to_string(),
                    accounts: unmapped,
                });
            }
        }
    }
    Ok(Some(build_journal_csv_artifact(period, generated_at, &csv)?))
}
