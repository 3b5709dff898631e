//! Delivery outbox: scope-ordered, deduped shipments to destinations.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::instrument;

use settleproxy_artifacts::DeliveryRequest;
use settleproxy_core::{ActorRef, DestinationId, TenantId};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::state::{DeliveryReceipt, DeliveryRow, DeliveryState, StoreState};

/// Outcome of inserting a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertDeliveryOutcome {
    Inserted(u64),
    /// `(tenant, dedupe_key)` already exists; exactly-once by dedupe.
    Deduped(u64),
}

impl InsertDeliveryOutcome {
    pub fn id(&self) -> u64 {
        match self {
            InsertDeliveryOutcome::Inserted(id) | InsertDeliveryOutcome::Deduped(id) => *id,
        }
    }
}

/// Insert a delivery row (inside the producing transaction).
///
/// Enforces dedupe uniqueness and the tenant's pending-delivery quota
/// (tenant limit clamped by the platform cap).
pub fn insert_delivery(
    state: &mut StoreState,
    config: &StoreConfig,
    tenant_id: &TenantId,
    request: &DeliveryRequest,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StoreResult<InsertDeliveryOutcome> {
    let dedupe = (tenant_id.clone(), request.dedupe_key.clone());
    if let Some(existing) = state.delivery_dedupe.get(&dedupe) {
        return Ok(InsertDeliveryOutcome::Deduped(*existing));
    }

    let cap = config.effective_delivery_cap(state.billing(tenant_id).max_pending_deliveries);
    if cap > 0 {
        let pending = state.pending_delivery_count(tenant_id);
        if pending >= cap {
            return Err(StoreError::TenantQuotaExceeded {
                kind: "maxPendingDeliveries".to_string(),
                limit: cap,
                current: pending,
            });
        }
    }

    // Scope order reflects insertion order within (tenant, scope_key).
    let order_seq = state
        .deliveries
        .values()
        .filter(|d| d.tenant_id == *tenant_id && d.scope_key == request.scope_key)
        .map(|d| d.order_seq)
        .max()
        .unwrap_or(0)
        + 1;

    state.next_delivery_id += 1;
    let id = state.next_delivery_id;
    let row = DeliveryRow {
        id,
        tenant_id: tenant_id.clone(),
        destination_id: request.destination_id.clone(),
        artifact_type: request.artifact_type.clone(),
        artifact_id: request.artifact_id.clone(),
        artifact_hash: request.artifact_hash.clone(),
        dedupe_key: request.dedupe_key.clone(),
        scope_key: request.scope_key.clone(),
        order_seq,
        priority: request.priority,
        order_key: format!("{}:{:012}:{:06}", request.scope_key, order_seq, request.priority),
        state: DeliveryState::Pending,
        attempts: 0,
        worker: None,
        claimed_at: None,
        next_attempt_at: now,
        delivered_at: None,
        acked_at: None,
        ack_received_at: None,
        expires_at,
        last_status: None,
        last_error: None,
        created_at: now,
    };
    state.deliveries.insert(id, row);
    state.delivery_dedupe.insert(dedupe, id);
    Ok(InsertDeliveryOutcome::Inserted(id))
}

/// Claim due deliveries for a worker, in strict per-scope order.
///
/// Order: `(next_attempt_at, scope_key, order_seq, priority, id)`.
#[instrument(skip(state, config), fields(worker))]
pub fn claim_due_deliveries(
    state: &mut StoreState,
    config: &StoreConfig,
    tenant_id: Option<&TenantId>,
    max: usize,
    worker: &str,
    now: DateTime<Utc>,
) -> Vec<DeliveryRow> {
    let reclaim_before = now - config.reclaim_after;
    let mut due: Vec<u64> = state
        .deliveries
        .values()
        .filter(|d| d.state == DeliveryState::Pending)
        .filter(|d| tenant_id.is_none_or(|t| d.tenant_id == *t))
        .filter(|d| d.next_attempt_at <= now)
        .filter(|d| d.claimed_at.is_none_or(|c| c <= reclaim_before))
        .map(|d| d.id)
        .collect();

    due.sort_by(|a, b| {
        let da = &state.deliveries[a];
        let db = &state.deliveries[b];
        da.next_attempt_at
            .cmp(&db.next_attempt_at)
            .then_with(|| da.scope_key.cmp(&db.scope_key))
            .then_with(|| da.order_seq.cmp(&db.order_seq))
            .then_with(|| da.priority.cmp(&db.priority))
            .then_with(|| da.id.cmp(&db.id))
    });
    due.truncate(max);

    let mut claimed = Vec::with_capacity(due.len());
    for id in due {
        if let Some(row) = state.deliveries.get_mut(&id) {
            row.worker = Some(worker.to_string());
            row.claimed_at = Some(now);
            row.attempts += 1;
            claimed.push(row.clone());
        }
    }
    claimed
}

/// Move the delivery state machine after an attempt.
#[allow(clippy::too_many_arguments)]
pub fn update_delivery_attempt(
    state: &mut StoreState,
    id: u64,
    delivered: bool,
    next_state: Option<DeliveryState>,
    next_attempt_at: Option<DateTime<Utc>>,
    last_status: Option<u16>,
    last_error: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StoreResult<DeliveryRow> {
    let row = state
        .deliveries
        .get_mut(&id)
        .ok_or_else(|| StoreError::Invalid(format!("unknown delivery {id}")))?;

    row.worker = None;
    row.claimed_at = None;
    row.last_status = last_status;
    row.last_error = last_error.map(str::to_string);
    if let Some(expires) = expires_at {
        row.expires_at = Some(expires);
    }

    if delivered {
        row.state = DeliveryState::Delivered;
        row.delivered_at = Some(now);
    } else if let Some(next) = next_state {
        row.state = next;
        if next == DeliveryState::Pending {
            row.next_attempt_at = next_attempt_at.unwrap_or(now);
        }
    }
    Ok(row.clone())
}

/// Acknowledge a delivery. Idempotent: the first ack sets `acked_at` and
/// writes the one receipt row; later acks observe the same state.
pub fn ack_delivery(
    state: &mut StoreState,
    tenant_id: &TenantId,
    id: u64,
    destination_id: Option<&DestinationId>,
    artifact_hash: Option<&str>,
    received_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StoreResult<DeliveryRow> {
    let row = state
        .deliveries
        .get_mut(&id)
        .filter(|d| d.tenant_id == *tenant_id)
        .ok_or_else(|| StoreError::Invalid(format!("unknown delivery {id}")))?;

    if let Some(destination) = destination_id {
        if *destination != row.destination_id {
            return Err(StoreError::Invalid(format!(
                "ack destination {} does not match delivery destination {}",
                destination.as_str(),
                row.destination_id.as_str()
            )));
        }
    }
    if let Some(hash) = artifact_hash {
        if hash != row.artifact_hash {
            return Err(StoreError::Invalid(format!(
                "ack artifact hash does not match delivery {id}"
            )));
        }
    }

    if row.acked_at.is_none() {
        row.acked_at = Some(now);
    }
    row.ack_received_at = received_at.or(row.ack_received_at).or(Some(now));

    let receipt_key = (tenant_id.clone(), id);
    state.delivery_receipts.entry(receipt_key).or_insert_with(|| DeliveryReceipt {
        delivery_id: id,
        destination_id: row.destination_id.clone(),
        artifact_hash: row.artifact_hash.clone(),
        received_at: received_at.unwrap_or(now),
    });

    Ok(state.deliveries[&id].clone())
}

/// Reset a delivery to fresh pending (operator action, audited).
pub fn requeue_delivery(
    state: &mut StoreState,
    tenant_id: &TenantId,
    id: u64,
    actor: ActorRef,
    now: DateTime<Utc>,
) -> StoreResult<DeliveryRow> {
    let row = state
        .deliveries
        .get_mut(&id)
        .filter(|d| d.tenant_id == *tenant_id)
        .ok_or_else(|| StoreError::Invalid(format!("unknown delivery {id}")))?;

    row.state = DeliveryState::Pending;
    row.attempts = 0;
    row.worker = None;
    row.claimed_at = None;
    row.next_attempt_at = now;
    row.delivered_at = None;
    row.last_status = None;
    row.last_error = None;
    let snapshot = row.clone();

    state.push_audit(
        tenant_id.clone(),
        actor,
        "delivery.requeue",
        json!({"deliveryId": id, "dedupeKey": snapshot.dedupe_key}),
        now,
    );
    Ok(snapshot)
}
