//! Ingest dedupe records for externally-sourced events.

use chrono::{DateTime, Utc};

use settleproxy_core::TenantId;

use crate::state::{IngestRecord, IngestStatus, StoreState};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Inserted(IngestRecord),
    /// The `(source, externalEventId)` pair was already recorded.
    Duplicate(IngestRecord),
}

/// Record an external event id. First write wins; the second and later
/// writes observe the original record.
pub fn put_ingest_record(
    state: &mut StoreState,
    tenant_id: &TenantId,
    source: &str,
    external_event_id: &str,
    status: IngestStatus,
    accepted_event_id: Option<&str>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> IngestOutcome {
    let key = (
        tenant_id.clone(),
        source.to_string(),
        external_event_id.to_string(),
    );
    if let Some(existing) = state.ingest_records.get(&key) {
        return IngestOutcome::Duplicate(existing.clone());
    }
    let record = IngestRecord {
        source: source.to_string(),
        external_event_id: external_event_id.to_string(),
        status,
        accepted_event_id: accepted_event_id.map(str::to_string),
        expires_at,
        created_at: now,
    };
    state.ingest_records.insert(key, record.clone());
    IngestOutcome::Inserted(record)
}

/// Drop expired records (retention sweep).
pub fn prune_ingest_records(state: &mut StoreState, now: DateTime<Utc>) -> usize {
    let before = state.ingest_records.len();
    state.ingest_records.retain(|_, r| r.expires_at > now);
    before - state.ingest_records.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn first_write_wins() {
        let mut state = StoreState::new();
        let tenant = TenantId::default_tenant();
        let first = put_ingest_record(
            &mut state,
            &tenant,
            "webhook",
            "ext-1",
            IngestStatus::Accepted,
            Some("E1"),
            at(28),
            at(1),
        );
        assert!(matches!(first, IngestOutcome::Inserted(_)));

        let second = put_ingest_record(
            &mut state,
            &tenant,
            "webhook",
            "ext-1",
            IngestStatus::Rejected,
            None,
            at(28),
            at(2),
        );
        match second {
            IngestOutcome::Duplicate(record) => {
                assert_eq!(record.status, IngestStatus::Accepted);
                assert_eq!(record.accepted_event_id.as_deref(), Some("E1"));
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[test]
    fn retention_sweep_drops_expired() {
        let mut state = StoreState::new();
        let tenant = TenantId::default_tenant();
        put_ingest_record(
            &mut state,
            &tenant,
            "webhook",
            "ext-1",
            IngestStatus::Accepted,
            None,
            at(2),
            at(1),
        );
        put_ingest_record(
            &mut state,
            &tenant,
            "webhook",
            "ext-2",
            IngestStatus::Accepted,
            None,
            at(20),
            at(1),
        );
        assert_eq!(prune_ingest_records(&mut state, at(10)), 1);
        assert_eq!(state.ingest_records.len(), 1);
    }
}
