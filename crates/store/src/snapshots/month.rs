//! Month aggregate reducer.
//!
//! The month stream orchestrates close: `MONTH_CLOSE_REQUESTED` events queue
//! work for the close pipeline, `MONTH_CLOSED` finishes the period. The
//! snapshot tracks which requests are still pending so reruns are no-ops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::StoredEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonthStatus {
    #[default]
    Open,
    CloseRequested,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MonthSnapshot {
    pub period: String,
    pub status: MonthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_artifact_id: Option<String>,
    #[serde(default)]
    pub pending_request_event_ids: Vec<String>,
    pub event_count: u64,
}

pub fn reduce(events: &[StoredEvent]) -> MonthSnapshot {
    let mut snapshot = MonthSnapshot::default();
    for stored in events {
        match stored.event.event_type.as_str() {
            "MONTH_CLOSE_REQUESTED" => {
                snapshot.period = stored.key.aggregate_id.as_str().to_string();
                if snapshot.status != MonthStatus::Closed {
                    snapshot.status = MonthStatus::CloseRequested;
                }
                snapshot
                    .pending_request_event_ids
                    .push(stored.event.id.as_str().to_string());
            }
            "MONTH_CLOSED" => {
                snapshot.period = stored.key.aggregate_id.as_str().to_string();
                snapshot.status = MonthStatus::Closed;
                snapshot.closed_at = Some(stored.event.at);
                snapshot.statement_artifact_id = stored.event.payload["statementArtifactId"]
                    .as_str()
                    .map(str::to_string);
                snapshot.pending_request_event_ids.clear();
            }
            _ => {}
        }
        snapshot.event_count += 1;
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StreamKey;
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use settleproxy_canon::{EventDraft, append_chained_event};
    use settleproxy_core::{ActorRef, TenantId};

    fn stored(seq: u64, event_type: &str, payload: Value) -> StoredEvent {
        let key = StreamKey::new(TenantId::default_tenant(), "month", "2026-02");
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let draft =
            EventDraft::new(event_type, at, ActorRef::server(), payload).with_id(format!("E{seq}"));
        StoredEvent {
            key,
            seq,
            event: append_chained_event(None, draft, None).unwrap(),
        }
    }

    #[test]
    fn close_request_queues_and_close_drains() {
        let events = vec![stored(
            1,
            "MONTH_CLOSE_REQUESTED",
            json!({"startAt": "2026-02-01T00:00:00Z", "endAt": "2026-03-01T00:00:00Z"}),
        )];
        let snapshot = reduce(&events);
        assert_eq!(snapshot.status, MonthStatus::CloseRequested);
        assert_eq!(snapshot.pending_request_event_ids, vec!["E1".to_string()]);
        assert_eq!(snapshot.period, "2026-02");

        let mut events = events;
        events.push(stored(
            2,
            "MONTH_CLOSED",
            json!({"statementArtifactId": "ms-2026-02"}),
        ));
        let snapshot = reduce(&events);
        assert_eq!(snapshot.status, MonthStatus::Closed);
        assert!(snapshot.pending_request_event_ids.is_empty());
        assert_eq!(
            snapshot.statement_artifact_id.as_deref(),
            Some("ms-2026-02")
        );
    }
}
