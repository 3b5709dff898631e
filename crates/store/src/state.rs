//! Row types and the table image of the backing store.
//!
//! `StoreState` is the whole database as one cloneable value; the in-memory
//! backend implements transactions by cloning it, mutating the clone, and
//! swapping on success. Every uniqueness constraint includes the tenant id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use settleproxy_artifacts::{Artifact, Destination};
use settleproxy_canon::ChainedEvent;
use settleproxy_core::{ActorRef, AggregateId, DestinationId, PartyId, TenantId};
use settleproxy_ledger::{Allocation, JournalEntry};

/// Identity of an aggregate stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub tenant_id: TenantId,
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
}

impl StreamKey {
    pub fn new(
        tenant_id: TenantId,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<AggregateId>,
    ) -> Self {
        Self {
            tenant_id,
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }

    pub fn stream_name(&self) -> String {
        format!(
            "{}:{}:{}",
            self.tenant_id.as_str(),
            self.aggregate_type,
            self.aggregate_id.as_str()
        )
    }
}

/// An event persisted in a stream, with its assigned sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub key: StreamKey,
    /// 1-based, contiguous per stream.
    pub seq: u64,
    pub event: ChainedEvent,
}

/// Head of a stream: last assigned sequence number and chain hash.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamHead {
    pub seq: u64,
    pub chain_hash: Option<String>,
}

/// Snapshot row, co-located with the stream it mirrors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub seq: u64,
    pub at_chain_hash: String,
    pub snapshot_json: Value,
    pub updated_at: DateTime<Utc>,
}

/// Reservation row projected from active job snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRow {
    pub job_id: AggregateId,
    pub reserved_from: DateTime<Utc>,
    pub reserved_until: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Idempotency registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub tenant_id: TenantId,
    pub principal: String,
    pub endpoint: String,
    pub idempotency_key: String,
}

impl IdempotencyKey {
    pub fn describe(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.tenant_id.as_str(),
            self.principal,
            self.endpoint,
            self.idempotency_key
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub request_hash: String,
    pub status_code: u16,
    pub response_body: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRow {
    pub artifact: Artifact,
    pub created_at: DateTime<Utc>,
}

/// Outbox message: follow-up work committed with its producing transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: u64,
    pub tenant_id: TenantId,
    pub topic: String,
    pub aggregate_type: Option<String>,
    pub aggregate_id: Option<AggregateId>,
    pub payload: Value,
    pub attempts: u32,
    pub worker: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxMessage {
    /// A processed message whose error carries the DLQ prefix is tombstoned.
    pub fn is_dlq(&self) -> bool {
        self.processed_at.is_some()
            && self
                .last_error
                .as_deref()
                .is_some_and(|e| e.starts_with("DLQ:"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: u64,
    pub tenant_id: TenantId,
    pub outbox_id: u64,
    pub topic: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed,
    Dlq,
}

/// Delivery row: one externally-addressed shipment of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRow {
    pub id: u64,
    pub tenant_id: TenantId,
    pub destination_id: DestinationId,
    pub artifact_type: String,
    pub artifact_id: String,
    pub artifact_hash: String,
    pub dedupe_key: String,
    pub scope_key: String,
    pub order_seq: u64,
    pub priority: i32,
    pub order_key: String,
    pub state: DeliveryState,
    pub attempts: u32,
    pub worker: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
    pub ack_received_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub delivery_id: u64,
    pub destination_id: DestinationId,
    pub artifact_hash: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRow {
    pub site_id: String,
    pub correlation_key: String,
    pub job_id: AggregateId,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKeyStatus {
    Active,
    Rotated,
    Revoked,
}

impl SignerKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerKeyStatus::Active => "active",
            SignerKeyStatus::Rotated => "rotated",
            SignerKeyStatus::Revoked => "revoked",
        }
    }
}

/// API authentication key (distinct from signer keys: auth keys gate
/// command access, signer keys gate event signatures).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthKeyRow {
    pub key_id: String,
    pub principal: String,
    pub secret_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignerKeyRow {
    pub key_id: String,
    pub public_key: String,
    /// Matches the actor type allowed to sign with this key.
    pub purpose: String,
    pub status: SignerKeyStatus,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Accepted,
    Duplicate,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub source: String,
    pub external_event_id: String,
    pub status: IngestStatus,
    pub accepted_event_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntryRow {
    pub entry: JournalEntry,
    pub job_id: Option<AggregateId>,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRow {
    pub contract_hash: String,
    pub operator_party_id: PartyId,
    pub commission_bps: u32,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyRow {
    pub party_id: PartyId,
    pub display_name: String,
    pub roles: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Gate mode for the journal CSV artifact during month close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalCsvGate {
    #[default]
    Warn,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BillingConfigRow {
    pub max_pending_deliveries: u64,
    pub journal_csv_gate: JournalCsvGate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow {
    pub id: u64,
    pub tenant_id: TenantId,
    pub actor: ActorRef,
    pub action: String,
    pub detail: Value,
    pub at: DateTime<Utc>,
}

/// The whole backing store as one value.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub events: BTreeMap<StreamKey, Vec<StoredEvent>>,
    pub snapshots: HashMap<StreamKey, SnapshotRow>,
    pub reservations: HashMap<(TenantId, AggregateId), ReservationRow>,
    pub idempotency: HashMap<IdempotencyKey, IdempotencyRecord>,

    pub artifacts: BTreeMap<(TenantId, String), ArtifactRow>,
    /// `(tenant, job_id, artifact_type, source_event_id)` -> artifact id.
    pub artifact_source_index: HashMap<(TenantId, String, String, String), String>,
    /// `(tenant, party_id)` -> reputation-event artifact ids.
    pub reputation_index: HashMap<(TenantId, String), Vec<String>>,

    pub outbox: BTreeMap<u64, OutboxMessage>,
    pub next_outbox_id: u64,
    pub notifications: Vec<NotificationRow>,

    pub deliveries: BTreeMap<u64, DeliveryRow>,
    pub delivery_dedupe: HashMap<(TenantId, String), u64>,
    pub next_delivery_id: u64,
    pub delivery_receipts: HashMap<(TenantId, u64), DeliveryReceipt>,

    pub correlations: HashMap<(TenantId, String, String), CorrelationRow>,
    pub signer_keys: HashMap<(TenantId, String), SignerKeyRow>,
    pub auth_keys: HashMap<(TenantId, String), AuthKeyRow>,
    pub ingest_records: HashMap<(TenantId, String, String), IngestRecord>,

    pub ledger_entries: HashMap<(TenantId, String), LedgerEntryRow>,
    pub ledger_balances: HashMap<(TenantId, String), i128>,
    /// `(tenant, entry_id, posting_id, party_id)` -> allocation.
    pub ledger_allocations: BTreeMap<(TenantId, String, String, PartyId), Allocation>,

    pub contracts: HashMap<(TenantId, String), ContractRow>,
    pub parties: HashMap<(TenantId, PartyId), PartyRow>,
    pub finance_account_maps: HashMap<TenantId, settleproxy_artifacts::GlAccountMap>,
    pub destinations: BTreeMap<(TenantId, DestinationId), Destination>,
    pub tenant_billing_config: HashMap<TenantId, BillingConfigRow>,

    pub ops_audit: Vec<AuditRow>,
    pub next_audit_id: u64,
}

impl StoreState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream head: `(0, None)` when the stream is empty.
    pub fn head(&self, key: &StreamKey) -> StreamHead {
        match self.events.get(key).and_then(|s| s.last()) {
            Some(last) => StreamHead {
                seq: last.seq,
                chain_hash: Some(last.event.chain_hash.clone()),
            },
            None => StreamHead::default(),
        }
    }

    pub fn billing(&self, tenant_id: &TenantId) -> BillingConfigRow {
        self.tenant_billing_config
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn pending_delivery_count(&self, tenant_id: &TenantId) -> u64 {
        self.deliveries
            .values()
            .filter(|d| d.tenant_id == *tenant_id && d.state == DeliveryState::Pending)
            .count() as u64
    }

    pub fn push_audit(
        &mut self,
        tenant_id: TenantId,
        actor: ActorRef,
        action: impl Into<String>,
        detail: Value,
        at: DateTime<Utc>,
    ) -> u64 {
        self.next_audit_id += 1;
        let id = self.next_audit_id;
        self.ops_audit.push(AuditRow {
            id,
            tenant_id,
            actor,
            action: action.into(),
            detail,
            at,
        });
        id
    }
}
