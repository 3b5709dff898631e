//! Finance-pack bundle assembler (`FINANCE_PACK_BUNDLE_ENQUEUE`).
//!
//! Collects the period's evidence (month events, statements, GL batch,
//! journal CSV, governance stream), reconciles it, builds a deterministic
//! ZIP, stores it write-once in the evidence store, and persists a pointer
//! artifact with its own delivery fan-out. The bundle bytes are
//! content-addressed: the evidence ref embeds the bundle hash, so a crash
//! between the blob write and the pointer commit recovers by finding the
//! identical blob already present.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use settleproxy_artifacts::{
    Artifact, Destination, reconcile_finance_pack, route_artifact, types,
};
use settleproxy_canon::{build_deterministic_zip, canonical_json, sha256_hex};
use settleproxy_core::TenantId;
use settleproxy_store::{
    ArtifactRow, CommitRequest, OutboxMessage, StoredEvent, TxOp, failpoint_names, get_artifact,
    list_artifacts,
};

use crate::error::PipelineError;
use crate::runtime::Runtime;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinancePackPayload {
    period: String,
}

pub fn run(runtime: &Runtime, message: &OutboxMessage) -> Result<Option<String>, PipelineError> {
    let payload: FinancePackPayload = serde_json::from_value(message.payload.clone())
        .map_err(|e| PipelineError::Payload(e.to_string()))?;
    let store = runtime.store();
    let tenant_id = &message.tenant_id;
    let period = payload.period;

    // Gather the period's evidence. The statement and GL batch are
    // mandatory; the journal CSV may have been skipped by its gate.
    let statement = require_artifact(runtime, tenant_id, &format!("ms-{period}"))?;
    let gl_batch = require_artifact(runtime, tenant_id, &format!("gl-{period}"))?;
    let journal_csv = store.read(|state| get_artifact(state, tenant_id, &format!("jcsv-{period}")))?;
    if journal_csv.is_none() {
        warn!(%period, "bundle has no journal csv (gate skipped it)");
    }

    let party_statements = period_artifacts(runtime, tenant_id, types::PARTY_STATEMENT, &period)?;
    let payouts = period_artifacts(runtime, tenant_id, types::PAYOUT_INSTRUCTION, &period)?;
    let month_events = store.load_stream(&settleproxy_store::StreamKey::new(
        tenant_id.clone(),
        "month",
        period.clone(),
    ))?;
    let governance_events = store.read(|state| {
        state
            .events
            .iter()
            .filter(|(key, _)| key.tenant_id == *tenant_id && key.aggregate_type == "governance")
            .flat_map(|(_, events)| events.iter().cloned())
            .collect::<Vec<StoredEvent>>()
    })?;

    // Reconcile before bundling; failures are retriable.
    let findings = reconcile_finance_pack(
        &statement.artifact,
        &collect(&party_statements),
        &collect(&payouts),
        &gl_batch.artifact,
    );
    if !findings.is_empty() {
        warn!(%period, count = findings.len(), "finance pack failed reconciliation");
        return Err(PipelineError::Reconciliation {
            period,
            findings: findings.len(),
        });
    }

    // Deterministic bundle bytes.
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    entries.push((
        "monthly_statement.json".to_string(),
        canonical_json(&statement.artifact.body)?.into_bytes(),
    ));
    entries.push((
        "gl_batch.json".to_string(),
        canonical_json(&gl_batch.artifact.body)?.into_bytes(),
    ));
    for row in &party_statements {
        entries.push((
            format!("party_statements/{}.json", row.artifact.artifact_id),
            canonical_json(&row.artifact.body)?.into_bytes(),
        ));
    }
    for row in &payouts {
        entries.push((
            format!("payouts/{}.json", row.artifact.artifact_id),
            canonical_json(&row.artifact.body)?.into_bytes(),
        ));
    }
    if let Some(csv) = &journal_csv {
        let text = csv.artifact.body["csv"].as_str().unwrap_or_default();
        entries.push(("journal.csv".to_string(), text.as_bytes().to_vec()));
    }
    entries.push(("events.jsonl".to_string(), events_jsonl(&month_events)?));
    if !governance_events.is_empty() {
        entries.push((
            "governance.jsonl".to_string(),
            events_jsonl(&governance_events)?,
        ));
    }
    let mut file_names: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();
    file_names.sort();
    entries.push((
        "manifest.json".to_string(),
        canonical_json(&json!({
            "schema": "FinancePackManifest.v1",
            "period": period,
            "files": file_names,
        }))?
        .into_bytes(),
    ));

    let bytes = build_deterministic_zip(&entries)?;
    let bundle_hash = sha256_hex(&bytes);
    let evidence_ref = format!("obj://finance-pack/{period}/{bundle_hash}.zip");

    // Write-once: read first, compare bytes, then put.
    match runtime.evidence().read_evidence(tenant_id, &evidence_ref)? {
        Some(existing) if existing == bytes => {
            info!(%period, %evidence_ref, "bundle already stored, resuming after earlier crash");
        }
        Some(_) => {
            return Err(PipelineError::ImmutabilityBreach { evidence_ref });
        }
        None => {
            runtime.evidence().put_evidence(tenant_id, &evidence_ref, &bytes)?;
        }
    }

    store.failpoints().hit(failpoint_names::FINANCE_PACK_AFTER_ZIP)?;

    // Pointer artifact + deliveries in a fresh transaction.
    let pointer = Artifact::build(
        format!("fpb-{period}"),
        types::FINANCE_PACK_POINTER,
        json!({
            "schema": types::FINANCE_PACK_POINTER,
            "period": period,
            "bundleHash": bundle_hash,
            "evidenceRef": evidence_ref,
            "fileCount": entries.len(),
        }),
    )?;
    let destinations: Vec<Destination> = store.read(|state| {
        state
            .destinations
            .iter()
            .filter(|((t, _), _)| t == tenant_id)
            .map(|(_, d)| d.clone())
            .collect()
    })?;
    let deliveries = route_artifact(tenant_id, &destinations, &pointer);
    let mut request = CommitRequest::new(tenant_id.clone(), chrono::Utc::now())
        .op(TxOp::PutArtifact { artifact: pointer });
    for delivery in deliveries {
        request = request.op(TxOp::InsertDelivery {
            request: delivery,
            expires_at: None,
        });
    }
    store.commit_tx(request)?;

    store
        .failpoints()
        .hit(failpoint_names::FINANCE_PACK_AFTER_POINTER)?;

    Ok(None)
}

fn require_artifact(
    runtime: &Runtime,
    tenant_id: &TenantId,
    artifact_id: &str,
) -> Result<ArtifactRow, PipelineError> {
    runtime
        .store()
        .read(|state| get_artifact(state, tenant_id, artifact_id))?
        .ok_or_else(|| PipelineError::Bundle(format!("artifact {artifact_id} not found yet")))
}

/// The period's artifacts of one type, oldest first by id for stable bundle
/// layout.
fn period_artifacts(
    runtime: &Runtime,
    tenant_id: &TenantId,
    artifact_type: &str,
    period: &str,
) -> Result<Vec<ArtifactRow>, PipelineError> {
    let mut rows = runtime.store().read(|state| {
        list_artifacts(state, tenant_id, Some(artifact_type), usize::MAX)
            .into_iter()
            .filter(|row| row.artifact.body["period"].as_str() == Some(period))
            .collect::<Vec<ArtifactRow>>()
    })?;
    rows.sort_by(|a, b| a.artifact.artifact_id.cmp(&b.artifact.artifact_id));
    Ok(rows)
}

fn collect(rows: &[ArtifactRow]) -> Vec<Artifact> {
    rows.iter().map(|row| row.artifact.clone()).collect()
}

fn events_jsonl(events: &[StoredEvent]) -> Result<Vec<u8>, PipelineError> {
    let mut out = String::new();
    for stored in events {
        let value = serde_json::to_value(&stored.event)
            .map_err(|e| PipelineError::Bundle(e.to_string()))?;
        out.push_str(&canonical_json(&value)?);
        out.push('\n');
    }
    Ok(out.into_bytes())
}
