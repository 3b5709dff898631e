//! Snapshot projection: pure reducers per aggregate type, rebuilt in the
//! same transaction as the append that changed the stream.
//!
//! Snapshots live in one polymorphic table keyed by the stream; each known
//! aggregate type has a concrete reducer, everything else folds to a generic
//! summary. Some types carry projection side effects (job reservations,
//! party rows, contract rows) that are applied together with the snapshot.

pub mod job;
pub mod month;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::error::{StoreError, StoreResult};
use crate::state::{
    ContractRow, PartyRow, ReservationRow, SnapshotRow, StoreState, StoredEvent, StreamKey,
};
use settleproxy_core::PartyId;

pub use job::{JobSnapshot, JobStatus};
pub use month::{MonthSnapshot, MonthStatus};

/// Reduce a stream to its snapshot value.
pub fn reduce(aggregate_type: &str, events: &[StoredEvent]) -> StoreResult<Value> {
    match aggregate_type {
        "job" => {
            let snapshot = job::reduce(events);
            serde_json::to_value(&snapshot).map_err(|e| StoreError::Serialization(e.to_string()))
        }
        "month" => {
            let snapshot = month::reduce(events);
            serde_json::to_value(&snapshot).map_err(|e| StoreError::Serialization(e.to_string()))
        }
        "party" => Ok(reduce_party(events)),
        "contract" => Ok(reduce_contract(events)),
        _ => Ok(reduce_generic(events)),
    }
}

/// Rebuild the snapshot row for a stream and apply projection side effects.
pub fn rebuild_snapshot(
    state: &mut StoreState,
    key: &StreamKey,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let events = state.events.get(key).cloned().unwrap_or_default();
    let head = state.head(key);
    let Some(chain_hash) = head.chain_hash else {
        // Empty stream: nothing to project.
        return Ok(());
    };

    let snapshot_json = reduce(&key.aggregate_type, &events)?;
    state.snapshots.insert(
        key.clone(),
        SnapshotRow {
            seq: head.seq,
            at_chain_hash: chain_hash,
            snapshot_json: snapshot_json.clone(),
            updated_at: now,
        },
    );

    match key.aggregate_type.as_str() {
        "job" => project_job_reservation(state, key, &snapshot_json, now)?,
        "party" => project_party_row(state, key, &snapshot_json, now)?,
        "contract" => project_contract_row(state, key, &snapshot_json)?,
        _ => {}
    }
    Ok(())
}

/// A job snapshot with an active reservation window keeps a reservation row;
/// settled/aborted jobs (or jobs without a window) drop it.
fn project_job_reservation(
    state: &mut StoreState,
    key: &StreamKey,
    snapshot_json: &Value,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let snapshot: JobSnapshot = serde_json::from_value(snapshot_json.clone())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let reservation_key = (key.tenant_id.clone(), key.aggregate_id.clone());

    let active = !matches!(snapshot.status, JobStatus::Settled | JobStatus::Aborted);
    match (&snapshot.reservation, active) {
        (Some(window), true) => {
            state.reservations.insert(
                reservation_key,
                ReservationRow {
                    job_id: key.aggregate_id.clone(),
                    reserved_from: window.reserved_from,
                    reserved_until: window.reserved_until,
                    updated_at: now,
                },
            );
        }
        _ => {
            state.reservations.remove(&reservation_key);
        }
    }
    Ok(())
}

fn project_party_row(
    state: &mut StoreState,
    key: &StreamKey,
    snapshot_json: &Value,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let party_id = PartyId::new(key.aggregate_id.as_str());
    let display_name = snapshot_json["displayName"]
        .as_str()
        .unwrap_or(key.aggregate_id.as_str())
        .to_string();
    let roles = snapshot_json["roles"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    state.parties.insert(
        (key.tenant_id.clone(), party_id.clone()),
        PartyRow {
            party_id,
            display_name,
            roles,
            updated_at: now,
        },
    );
    Ok(())
}

fn project_contract_row(
    state: &mut StoreState,
    key: &StreamKey,
    snapshot_json: &Value,
) -> StoreResult<()> {
    let Some(operator) = snapshot_json["operatorPartyId"].as_str() else {
        return Ok(());
    };
    let signed_at = snapshot_json["signedAt"]
        .as_str()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .unwrap_or_default();
    state.contracts.insert(
        (key.tenant_id.clone(), key.aggregate_id.as_str().to_string()),
        ContractRow {
            contract_hash: key.aggregate_id.as_str().to_string(),
            operator_party_id: PartyId::new(operator),
            commission_bps: snapshot_json["commissionBps"].as_u64().unwrap_or(0) as u32,
            signed_at,
        },
    );
    Ok(())
}

fn reduce_party(events: &[StoredEvent]) -> Value {
    let mut display_name = Value::Null;
    let mut roles = Value::Array(vec![]);
    for stored in events {
        let payload = &stored.event.payload;
        if let Some(name) = payload.get("displayName") {
            display_name = name.clone();
        }
        if let Some(r) = payload.get("roles") {
            roles = r.clone();
        }
    }
    json!({
        "displayName": display_name,
        "roles": roles,
        "eventCount": events.len(),
    })
}

fn reduce_contract(events: &[StoredEvent]) -> Value {
    let mut out = json!({ "eventCount": events.len() });
    for stored in events {
        if stored.event.event_type == "CONTRACT_SIGNED" {
            let payload = &stored.event.payload;
            out["operatorPartyId"] = payload["operatorPartyId"].clone();
            out["commissionBps"] = payload["commissionBps"].clone();
            out["signedAt"] =
                json!(settleproxy_canon::hash::canonical_timestamp(stored.event.at));
        }
    }
    out
}

fn reduce_generic(events: &[StoredEvent]) -> Value {
    match events.last() {
        Some(last) => json!({
            "lastEventType": last.event.event_type,
            "lastEventId": last.event.id.as_str(),
            "eventCount": events.len(),
        }),
        None => json!({ "eventCount": 0 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StreamKey;
    use chrono::TimeZone;
    use settleproxy_canon::{EventDraft, append_chained_event};
    use settleproxy_core::{ActorRef, TenantId};

    fn stored(key: &StreamKey, seq: u64, event_type: &str, payload: Value) -> StoredEvent {
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let draft = EventDraft::new(event_type, at, ActorRef::server(), payload)
            .with_id(format!("E{seq}"));
        StoredEvent {
            key: key.clone(),
            seq,
            event: append_chained_event(None, draft, None).unwrap(),
        }
    }

    #[test]
    fn unknown_types_reduce_generically() {
        let key = StreamKey::new(TenantId::default_tenant(), "governance", "G1");
        let events = vec![
            stored(&key, 1, "POLICY_SET", json!({"a": 1})),
            stored(&key, 2, "POLICY_CLEARED", json!({})),
        ];
        let snapshot = reduce("governance", &events).unwrap();
        assert_eq!(snapshot["eventCount"], 2);
        assert_eq!(snapshot["lastEventType"], "POLICY_CLEARED");
    }

    #[test]
    fn snapshot_equivalence_reduce_matches_rebuild() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let key = StreamKey::new(TenantId::default_tenant(), "job", "J1");
        let mut state = StoreState::new();
        let events = vec![stored(
            &key,
            1,
            "JOB_CREATED",
            json!({"amountCents": 5000, "currency": "USD", "payeePartyId": "P1"}),
        )];
        state.events.insert(key.clone(), events.clone());
        rebuild_snapshot(&mut state, &key, now).unwrap();

        let row = state.snapshots.get(&key).unwrap();
        assert_eq!(row.seq, 1);
        assert_eq!(row.snapshot_json, reduce("job", &events).unwrap());
        assert_eq!(row.at_chain_hash, events[0].event.chain_hash);
    }

    #[test]
    fn settled_job_drops_reservation_row() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let key = StreamKey::new(TenantId::default_tenant(), "job", "J1");
        let mut state = StoreState::new();
        state.events.insert(
            key.clone(),
            vec![stored(
                &key,
                1,
                "JOB_CREATED",
                json!({
                    "amountCents": 100, "currency": "USD", "payeePartyId": "P1",
                    "reservation": {
                        "reservedFrom": "2026-02-01T00:00:00Z",
                        "reservedUntil": "2026-02-02T00:00:00Z"
                    }
                }),
            )],
        );
        rebuild_snapshot(&mut state, &key, now).unwrap();
        assert!(
            state
                .reservations
                .contains_key(&(key.tenant_id.clone(), key.aggregate_id.clone()))
        );

        let mut events = state.events.get(&key).unwrap().clone();
        events.push(stored(&key, 2, "JOB_SETTLED", json!({})));
        state.events.insert(key.clone(), events);
        rebuild_snapshot(&mut state, &key, now).unwrap();
        assert!(
            !state
                .reservations
                .contains_key(&(key.tenant_id.clone(), key.aggregate_id.clone()))
        );
    }
}
