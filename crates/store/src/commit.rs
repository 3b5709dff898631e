//! The single write boundary: one transaction fanning a closed set of
//! tagged operations into the kernel's tables, plus an audit row.

use chrono::{DateTime, Utc};
use serde_json::Value;

use settleproxy_artifacts::{Artifact, DeliveryRequest, Destination, GlAccountMap};
use settleproxy_canon::ChainedEvent;
use settleproxy_core::{ActorRef, AggregateId, TenantId};

use crate::artifact_store::{self, PutArtifactOutcome};
use crate::config::StoreConfig;
use crate::correlations::{self, CorrelationOutcome};
use crate::delivery::{self, InsertDeliveryOutcome};
use crate::error::StoreResult;
use crate::events;
use crate::idempotency::{self, IdempotencyOutcome};
use crate::ingest::{self, IngestOutcome};
use crate::outbox::{self, topics};
use crate::signer_keys;
use crate::state::{
    BillingConfigRow, ContractRow, IdempotencyKey, IngestStatus, SignerKeyStatus, StoreState,
    StoredEvent, StreamKey,
};

/// One tagged operation inside a commit.
#[derive(Debug, Clone)]
pub enum TxOp {
    /// Append chained events to one aggregate stream (rebuilds its snapshot).
    AppendEvents {
        aggregate_type: String,
        aggregate_id: AggregateId,
        events: Vec<ChainedEvent>,
    },
    /// Put a content-hashed artifact.
    PutArtifact { artifact: Artifact },
    /// Resolve an idempotency key for the surrounding command. When the key
    /// replays, the remaining operations of this commit are skipped: the
    /// original command already ran them.
    PutIdempotency {
        principal: String,
        endpoint: String,
        idempotency_key: String,
        request_hash: String,
        status_code: u16,
        response_body: Value,
    },
    /// Validate a journal entry and queue it for exactly-once application by
    /// the ledger pipeline.
    StageLedgerEntry {
        entry: settleproxy_ledger::JournalEntry,
        job_id: Option<AggregateId>,
    },
    /// Enqueue an outbox message.
    EnqueueOutbox {
        topic: String,
        aggregate_type: Option<String>,
        aggregate_id: Option<AggregateId>,
        payload: Value,
    },
    /// Insert a delivery row (dedupe + quota enforced).
    InsertDelivery {
        request: DeliveryRequest,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Upsert a correlation key.
    UpsertCorrelation {
        site_id: String,
        correlation_key: String,
        job_id: AggregateId,
        expires_at: DateTime<Utc>,
        force: bool,
    },
    /// Upsert a signer key (fresh keys start active).
    PutSignerKey {
        key_id: String,
        public_key: String,
        purpose: String,
    },
    /// Upsert an API auth key. Revocation stamps `revoked_at` once.
    PutAuthKey {
        key_id: String,
        principal: String,
        secret_hash: String,
        active: bool,
    },
    /// Move a signer key through its lifecycle.
    SetSignerKeyStatus {
        key_id: String,
        status: SignerKeyStatus,
    },
    /// Record an external event id for ingest dedupe.
    PutIngestRecord {
        source: String,
        external_event_id: String,
        status: IngestStatus,
        accepted_event_id: Option<String>,
        expires_at: DateTime<Utc>,
    },
    /// Upsert a delivery destination.
    UpsertDestination { destination: Destination },
    /// Upsert the tenant's billing configuration.
    UpsertBillingConfig { config: BillingConfigRow },
    /// Upsert the tenant's finance account map.
    UpsertAccountMap { map: GlAccountMap },
    /// Upsert an operator contract row (content-addressed).
    UpsertContract { contract: ContractRow },
}

/// Optional audit row appended with the commit.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor: ActorRef,
    pub action: String,
    pub detail: Value,
}

/// A commit: tenant scope, logical time, ordered operations, audit.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub tenant_id: TenantId,
    pub at: DateTime<Utc>,
    pub ops: Vec<TxOp>,
    pub audit: Option<AuditEntry>,
}

impl CommitRequest {
    pub fn new(tenant_id: TenantId, at: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            at,
            ops: Vec::new(),
            audit: None,
        }
    }

    pub fn op(mut self, op: TxOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn audited(mut self, actor: ActorRef, action: impl Into<String>, detail: Value) -> Self {
        self.audit = Some(AuditEntry {
            actor,
            action: action.into(),
            detail,
        });
        self
    }
}

/// What a commit did, per operation family.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    pub appended: Vec<StoredEvent>,
    pub idempotency: Option<IdempotencyOutcome>,
    pub artifacts: Vec<PutArtifactOutcome>,
    pub outbox_ids: Vec<u64>,
    pub deliveries: Vec<InsertDeliveryOutcome>,
    pub correlations: Vec<CorrelationOutcome>,
    pub ingests: Vec<IngestOutcome>,
    /// True when a replayed idempotency key short-circuited later ops.
    pub replayed: bool,
}

/// Apply a commit to the open transaction. Dispatch preserves caller order;
/// the first error aborts everything.
pub fn apply_commit(
    state: &mut StoreState,
    config: &StoreConfig,
    request: &CommitRequest,
) -> StoreResult<CommitOutcome> {
    let mut outcome = CommitOutcome::default();
    let tenant_id = &request.tenant_id;
    let now = request.at;

    for op in &request.ops {
        if outcome.replayed {
            break;
        }
        match op {
            TxOp::AppendEvents {
                aggregate_type,
                aggregate_id,
                events,
            } => {
                let key = StreamKey::new(
                    tenant_id.clone(),
                    aggregate_type.clone(),
                    aggregate_id.clone(),
                );
                let (_, stored) =
                    events::append_events(state, config, &key, events.clone(), now)?;
                outcome.appended.extend(stored);
            }
            TxOp::PutArtifact { artifact } => {
                outcome
                    .artifacts
                    .push(artifact_store::put_artifact(state, tenant_id, artifact.clone(), now)?);
            }
            TxOp::PutIdempotency {
                principal,
                endpoint,
                idempotency_key,
                request_hash,
                status_code,
                response_body,
            } => {
                let key = IdempotencyKey {
                    tenant_id: tenant_id.clone(),
                    principal: principal.clone(),
                    endpoint: endpoint.clone(),
                    idempotency_key: idempotency_key.clone(),
                };
                let resolved = idempotency::put_idempotency(
                    state,
                    key,
                    request_hash,
                    *status_code,
                    response_body.clone(),
                    now,
                )?;
                outcome.replayed = resolved.is_replay();
                outcome.idempotency = Some(resolved);
            }
            TxOp::StageLedgerEntry { entry, job_id } => {
                settleproxy_ledger::validate_entry(entry)?;
                let payload = serde_json::json!({
                    "entry": entry,
                    "jobId": job_id.as_ref().map(|j| j.as_str()),
                });
                outcome.outbox_ids.push(outbox::enqueue_outbox(
                    state,
                    tenant_id,
                    topics::LEDGER_ENTRY_APPLY,
                    None,
                    job_id.as_ref(),
                    payload,
                ));
            }
            TxOp::EnqueueOutbox {
                topic,
                aggregate_type,
                aggregate_id,
                payload,
            } => {
                outcome.outbox_ids.push(outbox::enqueue_outbox(
                    state,
                    tenant_id,
                    topic,
                    aggregate_type.as_deref(),
                    aggregate_id.as_ref(),
                    payload.clone(),
                ));
            }
            TxOp::InsertDelivery {
                request: delivery_request,
                expires_at,
            } => {
                outcome.deliveries.push(delivery::insert_delivery(
                    state,
                    config,
                    tenant_id,
                    delivery_request,
                    *expires_at,
                    now,
                )?);
            }
            TxOp::UpsertCorrelation {
                site_id,
                correlation_key,
                job_id,
                expires_at,
                force,
            } => {
                outcome.correlations.push(correlations::upsert_correlation(
                    state,
                    tenant_id,
                    site_id,
                    correlation_key,
                    job_id,
                    *expires_at,
                    *force,
                    now,
                )?);
            }
            TxOp::PutSignerKey {
                key_id,
                public_key,
                purpose,
            } => {
                signer_keys::put_signer_key(state, tenant_id, key_id, public_key, purpose, now);
            }
            TxOp::SetSignerKeyStatus { key_id, status } => {
                signer_keys::set_signer_key_status(state, tenant_id, key_id, *status, now)?;
            }
            TxOp::PutAuthKey {
                key_id,
                principal,
                secret_hash,
                active,
            } => {
                state
                    .auth_keys
                    .entry((tenant_id.clone(), key_id.clone()))
                    .and_modify(|row| {
                        row.principal = principal.clone();
                        row.secret_hash = secret_hash.clone();
                        row.active = *active;
                        if !active {
                            row.revoked_at = row.revoked_at.or(Some(now));
                        }
                    })
                    .or_insert_with(|| crate::state::AuthKeyRow {
                        key_id: key_id.clone(),
                        principal: principal.clone(),
                        secret_hash: secret_hash.clone(),
                        active: *active,
                        created_at: now,
                        revoked_at: if *active { None } else { Some(now) },
                    });
            }
            TxOp::PutIngestRecord {
                source,
                external_event_id,
                status,
                accepted_event_id,
                expires_at,
            } => {
                outcome.ingests.push(ingest::put_ingest_record(
                    state,
                    tenant_id,
                    source,
                    external_event_id,
                    *status,
                    accepted_event_id.as_deref(),
                    *expires_at,
                    now,
                ));
            }
            TxOp::UpsertDestination { destination } => {
                state.destinations.insert(
                    (tenant_id.clone(), destination.destination_id.clone()),
                    destination.clone(),
                );
            }
            TxOp::UpsertBillingConfig { config: billing } => {
                state
                    .tenant_billing_config
                    .insert(tenant_id.clone(), billing.clone());
            }
            TxOp::UpsertAccountMap { map } => {
                state
                    .finance_account_maps
                    .insert(tenant_id.clone(), map.clone());
            }
            TxOp::UpsertContract { contract } => {
                state.contracts.insert(
                    (tenant_id.clone(), contract.contract_hash.clone()),
                    contract.clone(),
                );
            }
        }
    }

    if let Some(audit) = &request.audit {
        state.push_audit(
            tenant_id.clone(),
            audit.actor.clone(),
            audit.action.clone(),
            audit.detail.clone(),
            now,
        );
    }

    Ok(outcome)
}
