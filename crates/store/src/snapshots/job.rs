//! Job aggregate reducer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use settleproxy_artifacts::PartyLine;
use settleproxy_core::PartyId;

use crate::state::StoredEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Open,
    InProgress,
    Settled,
    Aborted,
}

/// Reservation window carried by an active job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationWindow {
    pub reserved_from: DateTime<Utc>,
    pub reserved_until: DateTime<Utc>,
}

/// Snapshot of a job stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payee_party_id: Option<PartyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allocations: Vec<PartyLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationWindow>,
    pub event_count: u64,
}

impl JobSnapshot {
    /// The per-party split, synthesizing a single payee line when the job
    /// carries no explicit allocations.
    pub fn effective_allocations(&self) -> Vec<PartyLine> {
        if !self.allocations.is_empty() {
            return self.allocations.clone();
        }
        match &self.payee_party_id {
            Some(payee) => vec![PartyLine {
                party_id: payee.clone(),
                party_role: "payee".to_string(),
                amount_cents: self.amount_cents,
            }],
            None => Vec::new(),
        }
    }
}

/// Fold a job stream. Events the reducer does not know keep the fold stable
/// (they still count toward `event_count`).
pub fn reduce(events: &[StoredEvent]) -> JobSnapshot {
    let mut snapshot = JobSnapshot::default();
    for stored in events {
        let payload = &stored.event.payload;
        match stored.event.event_type.as_str() {
            "JOB_CREATED" => {
                snapshot.job_id = stored.key.aggregate_id.as_str().to_string();
                snapshot.status = JobStatus::Open;
                snapshot.amount_cents = payload["amountCents"].as_i64().unwrap_or(0);
                snapshot.currency = payload["currency"].as_str().unwrap_or("USD").to_string();
                snapshot.payee_party_id = payload["payeePartyId"].as_str().map(PartyId::new);
                snapshot.site_id = payload["siteId"].as_str().map(str::to_string);
                snapshot.contract_hash = payload["contractHash"].as_str().map(str::to_string);
                if let Ok(window) =
                    serde_json::from_value::<ReservationWindow>(payload["reservation"].clone())
                {
                    snapshot.reservation = Some(window);
                }
                if let Ok(lines) =
                    serde_json::from_value::<Vec<PartyLine>>(payload["allocations"].clone())
                {
                    snapshot.allocations = lines;
                }
            }
            "JOB_STATUS_CHANGED" => {
                if let Some(status) = payload["status"].as_str() {
                    snapshot.status = match status {
                        "IN_PROGRESS" => JobStatus::InProgress,
                        "SETTLED" => JobStatus::Settled,
                        "ABORTED" => JobStatus::Aborted,
                        _ => JobStatus::Open,
                    };
                }
            }
            "JOB_SETTLED" => {
                snapshot.status = JobStatus::Settled;
                snapshot.settled_at = Some(
                    payload["settledAt"]
                        .as_str()
                        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
                        .unwrap_or(stored.event.at),
                );
                if let Some(amount) = payload["amountCents"].as_i64() {
                    snapshot.amount_cents = amount;
                }
            }
            "JOB_ABORTED" => {
                snapshot.status = JobStatus::Aborted;
            }
            "JOB_RESERVATION_SET" => {
                if let Ok(window) =
                    serde_json::from_value::<ReservationWindow>(payload.clone())
                {
                    snapshot.reservation = Some(window);
                }
            }
            "JOB_RESERVATION_CLEARED" => {
                snapshot.reservation = None;
            }
            "JOB_ALLOCATIONS_SET" => {
                if let Ok(lines) =
                    serde_json::from_value::<Vec<PartyLine>>(payload["allocations"].clone())
                {
                    snapshot.allocations = lines;
                }
            }
            _ => {}
        }
        snapshot.event_count += 1;
    }
    snapshot
}
