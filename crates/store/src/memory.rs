//! In-memory transactional backend.
//!
//! Intended for tests/dev and canonical for the test suite. A transaction
//! clones the table image, runs the closure against the clone, and swaps it
//! in on success; any error (including an armed failpoint) discards the
//! clone, which is exactly the all-or-nothing contract of the write
//! boundary. The single `RwLock` serializes writers the way a transactional
//! advisory lock serializes same-stream appenders in a database deployment.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use settleproxy_core::{ActorRef, AggregateId, DestinationId, TenantId};
use settleproxy_ledger::{BalancesProjection, JournalEntry};

use crate::commit::{self, CommitOutcome, CommitRequest};
use crate::config::StoreConfig;
use crate::delivery;
use crate::error::{StoreError, StoreResult};
use crate::events;
use crate::failpoints::{FailpointRegistry, names};
use crate::outbox::{self, TopicMatch};
use crate::snapshots::{JobSnapshot, JobStatus};
use crate::state::{
    DeliveryRow, DeliveryState, OutboxMessage, SnapshotRow, StoreState, StoredEvent, StreamHead,
    StreamKey,
};

/// Process-local cache of committed projections. Best-effort only: the
/// canonical state is the table image; paths that must be correct re-read
/// from it.
#[derive(Debug, Default)]
pub struct Mirror {
    pub snapshots: HashMap<StreamKey, SnapshotRow>,
    pub balances: BalancesProjection,
}

/// The in-memory kernel store.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    config: StoreConfig,
    failpoints: Arc<FailpointRegistry>,
    mirror: RwLock<Mirror>,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            state: RwLock::new(StoreState::new()),
            config,
            failpoints: Arc::new(FailpointRegistry::new()),
            mirror: RwLock::new(Mirror::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(StoreConfig::default())
    }

    pub fn arc(config: StoreConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn failpoints(&self) -> &FailpointRegistry {
        &self.failpoints
    }

    /// Run one transaction: all-or-nothing against the table image.
    pub fn transact<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| StoreError::Storage("state lock poisoned".to_string()))?;
        let mut working = guard.clone();
        let out = f(&mut working)?;
        *guard = working;
        Ok(out)
    }

    /// Read-only access to committed state.
    pub fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> StoreResult<T> {
        let guard = self
            .state
            .read()
            .map_err(|_| StoreError::Storage("state lock poisoned".to_string()))?;
        Ok(f(&guard))
    }

    // ----- commit boundary -------------------------------------------------

    /// The single write boundary (§commit). After the transaction commits,
    /// the append failpoint fires (kill-test hook) and committed snapshots
    /// are mirrored into the process-local cache.
    pub fn commit_tx(&self, request: CommitRequest) -> StoreResult<CommitOutcome> {
        let config = self.config.clone();
        let outcome = self.transact(|state| commit::apply_commit(state, &config, &request))?;

        if !outcome.appended.is_empty() {
            // State is committed at this point; an armed failpoint here
            // simulates dying before any post-commit work.
            self.failpoints.hit(names::APPEND_AFTER_COMMIT)?;
            self.mirror_appended(&outcome.appended)?;
        }
        Ok(outcome)
    }

    fn mirror_appended(&self, appended: &[StoredEvent]) -> StoreResult<()> {
        let mut keys: Vec<StreamKey> = appended.iter().map(|e| e.key.clone()).collect();
        keys.sort();
        keys.dedup();
        let snapshots: Vec<(StreamKey, Option<SnapshotRow>)> = self.read(|state| {
            keys.iter()
                .map(|k| (k.clone(), state.snapshots.get(k).cloned()))
                .collect()
        })?;
        let mut mirror = self
            .mirror
            .write()
            .map_err(|_| StoreError::Storage("mirror lock poisoned".to_string()))?;
        for (key, row) in snapshots {
            if let Some(row) = row {
                mirror.snapshots.insert(key, row);
            }
        }
        Ok(())
    }

    /// Fold a committed ledger entry into the mirror (pipeline fast-read path).
    pub fn mirror_ledger_entry(&self, tenant_id: &TenantId, entry: &JournalEntry) {
        if let Ok(mut mirror) = self.mirror.write() {
            mirror.balances.apply_entry(tenant_id, entry);
        }
    }

    /// Mirror balance read; zero when the mirror has not seen the entry.
    pub fn mirror_balance(&self, tenant_id: &TenantId, account_id: &str) -> i128 {
        self.mirror
            .read()
            .map(|m| m.balances.balance(tenant_id, account_id))
            .unwrap_or(0)
    }

    pub fn mirror_snapshot(&self, key: &StreamKey) -> Option<SnapshotRow> {
        self.mirror
            .read()
            .ok()
            .and_then(|m| m.snapshots.get(key).cloned())
    }

    // ----- outbox ----------------------------------------------------------

    /// Claim outbox messages (its own transaction, `SKIP LOCKED` semantics).
    pub fn claim_outbox(
        &self,
        topic: TopicMatch<'_>,
        max_messages: usize,
        worker: &str,
    ) -> StoreResult<Vec<OutboxMessage>> {
        let config = self.config.clone();
        let now = Utc::now();
        let claimed =
            self.transact(|state| Ok(outbox::claim_outbox(state, &config, topic, max_messages, worker, now)))?;
        if !claimed.is_empty() {
            self.failpoints.hit(names::OUTBOX_AFTER_LOCK)?;
        }
        Ok(claimed)
    }

    pub fn mark_processed(&self, ids: &[u64], last_error: Option<&str>) -> StoreResult<()> {
        self.transact(|state| outbox::mark_processed(state, ids, last_error, Utc::now()))
    }

    pub fn mark_failed(&self, ids: &[u64], last_error: &str) -> StoreResult<()> {
        self.transact(|state| outbox::mark_failed(state, ids, last_error, Utc::now()))
    }

    // ----- deliveries ------------------------------------------------------

    pub fn claim_due_deliveries(
        &self,
        tenant_id: Option<&TenantId>,
        max: usize,
        worker: &str,
    ) -> StoreResult<Vec<DeliveryRow>> {
        let config = self.config.clone();
        let now = Utc::now();
        self.transact(|state| {
            Ok(delivery::claim_due_deliveries(state, &config, tenant_id, max, worker, now))
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_delivery_attempt(
        &self,
        id: u64,
        delivered: bool,
        next_state: Option<DeliveryState>,
        next_attempt_at: Option<DateTime<Utc>>,
        last_status: Option<u16>,
        last_error: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<DeliveryRow> {
        self.transact(|state| {
            delivery::update_delivery_attempt(
                state,
                id,
                delivered,
                next_state,
                next_attempt_at,
                last_status,
                last_error,
                expires_at,
                Utc::now(),
            )
        })
    }

    pub fn ack_delivery(
        &self,
        tenant_id: &TenantId,
        id: u64,
        destination_id: Option<&DestinationId>,
        artifact_hash: Option<&str>,
        received_at: Option<DateTime<Utc>>,
    ) -> StoreResult<DeliveryRow> {
        self.transact(|state| {
            delivery::ack_delivery(
                state,
                tenant_id,
                id,
                destination_id,
                artifact_hash,
                received_at,
                Utc::now(),
            )
        })
    }

    pub fn requeue_delivery(
        &self,
        tenant_id: &TenantId,
        id: u64,
        actor: ActorRef,
    ) -> StoreResult<DeliveryRow> {
        self.transact(|state| delivery::requeue_delivery(state, tenant_id, id, actor, Utc::now()))
    }

    // ----- reads -----------------------------------------------------------

    pub fn head(&self, key: &StreamKey) -> StoreResult<StreamHead> {
        self.read(|state| state.head(key))
    }

    pub fn load_stream(&self, key: &StreamKey) -> StoreResult<Vec<StoredEvent>> {
        self.read(|state| events::load_stream(state, key))
    }

    pub fn snapshot(&self, key: &StreamKey) -> StoreResult<Option<SnapshotRow>> {
        self.read(|state| state.snapshots.get(key).cloned())
    }

    /// Jobs settled in `[start, end)`, ordered by job id. The close math
    /// depends on this ordering for deterministic artifact hashes.
    pub fn settled_jobs_in(
        &self,
        tenant_id: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<(AggregateId, JobSnapshot)>> {
        self.read(|state| {
            let mut jobs: Vec<(AggregateId, JobSnapshot)> = state
                .snapshots
                .iter()
                .filter(|(key, _)| key.tenant_id == *tenant_id && key.aggregate_type == "job")
                .filter_map(|(key, row)| {
                    serde_json::from_value::<JobSnapshot>(row.snapshot_json.clone())
                        .ok()
                        .map(|snapshot| (key.aggregate_id.clone(), snapshot))
                })
                .filter(|(_, snapshot)| {
                    snapshot.status == JobStatus::Settled
                        && snapshot
                            .settled_at
                            .is_some_and(|at| at >= start && at < end)
                })
                .collect();
            jobs.sort_by(|a, b| a.0.cmp(&b.0));
            jobs
        })
    }

    pub fn audit_log(&self) -> StoreResult<Vec<crate::state::AuditRow>> {
        self.read(|state| state.ops_audit.clone())
    }

    /// Test support: arm-free snapshot of an outbox message.
    pub fn outbox_message(&self, id: u64) -> StoreResult<Option<OutboxMessage>> {
        self.read(|state| state.outbox.get(&id).cloned())
    }

    pub fn delivery(&self, id: u64) -> StoreResult<Option<DeliveryRow>> {
        self.read(|state| state.deliveries.get(&id).cloned())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::TxOp;
    use crate::failpoints::FailMode;
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use settleproxy_canon::{EventDraft, append_chained_event};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
    }

    fn append_op(id: &str, prev: Option<&str>) -> (TxOp, String) {
        let draft = EventDraft::new("JOB_CREATED", at(), ActorRef::server(), json!({"amountCents": 100, "currency": "USD", "payeePartyId": "P1"}))
            .with_id(id);
        let event = append_chained_event(prev, draft, None).unwrap();
        let hash = event.chain_hash.clone();
        (
            TxOp::AppendEvents {
                aggregate_type: "job".to_string(),
                aggregate_id: AggregateId::new("J1"),
                events: vec![event],
            },
            hash,
        )
    }

    #[test]
    fn failed_commit_leaves_no_trace() {
        let store = MemoryStore::with_defaults();
        let (op, _) = append_op("E1", None);
        // Second op fails (stale prev hash), so the append must roll back too.
        let (bad_op, _) = append_op("E2", Some(&"0".repeat(64)));
        let request = CommitRequest::new(TenantId::default_tenant(), at())
            .op(op)
            .op(bad_op);
        assert!(store.commit_tx(request).is_err());

        let key = StreamKey::new(TenantId::default_tenant(), "job", "J1");
        assert_eq!(store.head(&key).unwrap().seq, 0);
        assert!(store.snapshot(&key).unwrap().is_none());
    }

    #[test]
    fn commit_appends_and_mirrors_snapshot() {
        let store = MemoryStore::with_defaults();
        let (op, _) = append_op("E1", None);
        let outcome = store
            .commit_tx(CommitRequest::new(TenantId::default_tenant(), at()).op(op))
            .unwrap();
        assert_eq!(outcome.appended.len(), 1);

        let key = StreamKey::new(TenantId::default_tenant(), "job", "J1");
        assert_eq!(store.head(&key).unwrap().seq, 1);
        assert!(store.mirror_snapshot(&key).is_some());
    }

    #[test]
    fn append_after_commit_failpoint_fires_post_commit() {
        let store = MemoryStore::with_defaults();
        store
            .failpoints()
            .arm(names::APPEND_AFTER_COMMIT, FailMode::Once);
        let (op, _) = append_op("E1", None);
        let err = store
            .commit_tx(CommitRequest::new(TenantId::default_tenant(), at()).op(op))
            .unwrap_err();
        assert!(matches!(err, StoreError::Failpoint(_)));

        // The transaction itself committed (crash happened after commit).
        let key = StreamKey::new(TenantId::default_tenant(), "job", "J1");
        assert_eq!(store.head(&key).unwrap().seq, 1);
        // The mirror missed the update (process "died" before refreshing it).
        assert!(store.mirror_snapshot(&key).is_none());
    }

    #[test]
    fn replayed_idempotency_short_circuits_side_effects() {
        let store = MemoryStore::with_defaults();
        let idem = |body: Value| TxOp::PutIdempotency {
            principal: "robot:r1".to_string(),
            endpoint: "POST /jobs".to_string(),
            idempotency_key: "idem-1".to_string(),
            request_hash: "h1".to_string(),
            status_code: 201,
            response_body: body,
        };

        let (op, _) = append_op("E1", None);
        let outcome = store
            .commit_tx(
                CommitRequest::new(TenantId::default_tenant(), at())
                    .op(idem(json!({"jobId": "J1"})))
                    .op(op),
            )
            .unwrap();
        assert!(!outcome.replayed);
        assert_eq!(outcome.appended.len(), 1);

        // Replay: same key and hash, different (ignored) side effects.
        let (op2, _) = append_op("E9", None);
        let outcome = store
            .commit_tx(
                CommitRequest::new(TenantId::default_tenant(), at())
                    .op(idem(json!({"jobId": "WRONG"})))
                    .op(op2),
            )
            .unwrap();
        assert!(outcome.replayed);
        assert!(outcome.appended.is_empty());
        assert_eq!(
            outcome.idempotency.unwrap().record().response_body,
            json!({"jobId": "J1"})
        );
        let key = StreamKey::new(TenantId::default_tenant(), "job", "J1");
        assert_eq!(store.head(&key).unwrap().seq, 1);
    }
}
