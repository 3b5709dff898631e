//! Transactional outbox: topic-partitioned follow-up work.
//!
//! Messages are enqueued inside the business transaction that produced them
//! and claimed by named workers under a lease. FIFO within a topic by id; no
//! cross-topic ordering.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::instrument;

use settleproxy_core::{AggregateId, TenantId};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::state::{OutboxMessage, StoreState};

/// The closed set of topics.
pub mod topics {
    pub const LEDGER_ENTRY_APPLY: &str = "LEDGER_ENTRY_APPLY";
    pub const CORRELATION_APPLY: &str = "CORRELATION_APPLY";
    pub const JOB_STATUS_CHANGED: &str = "JOB_STATUS_CHANGED";
    pub const JOB_SETTLED: &str = "JOB_SETTLED";
    pub const MONTH_CLOSE_REQUESTED: &str = "MONTH_CLOSE_REQUESTED";
    pub const FINANCE_PACK_BUNDLE_ENQUEUE: &str = "FINANCE_PACK_BUNDLE_ENQUEUE";
    /// Notification topics share this prefix; the drain claims by prefix.
    pub const NOTIFY_PREFIX: &str = "NOTIFY_";
}

/// Prefix marking a processed message as dead-lettered.
pub const DLQ_PREFIX: &str = "DLQ:";

/// Enqueue a message (inside the producing transaction).
pub fn enqueue_outbox(
    state: &mut StoreState,
    tenant_id: &TenantId,
    topic: &str,
    aggregate_type: Option<&str>,
    aggregate_id: Option<&AggregateId>,
    payload: Value,
) -> u64 {
    state.next_outbox_id += 1;
    let id = state.next_outbox_id;
    state.outbox.insert(
        id,
        OutboxMessage {
            id,
            tenant_id: tenant_id.clone(),
            topic: topic.to_string(),
            aggregate_type: aggregate_type.map(str::to_string),
            aggregate_id: aggregate_id.cloned(),
            payload,
            attempts: 0,
            worker: None,
            claimed_at: None,
            processed_at: None,
            last_error: None,
        },
    );
    id
}

/// How a claim matches topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicMatch<'a> {
    Exact(&'a str),
    Prefix(&'a str),
}

impl TopicMatch<'_> {
    fn matches(&self, topic: &str) -> bool {
        match self {
            TopicMatch::Exact(t) => topic == *t,
            TopicMatch::Prefix(p) => topic.starts_with(p),
        }
    }
}

/// Claim up to `max_messages` unprocessed messages for `worker`.
///
/// A message is claimable when it is unprocessed, its lease is absent or
/// expired, and its attempts have not reached the DLQ threshold. Claiming
/// takes the lease and increments attempts.
#[instrument(skip(state, config), fields(worker))]
pub fn claim_outbox(
    state: &mut StoreState,
    config: &StoreConfig,
    topic: TopicMatch<'_>,
    max_messages: usize,
    worker: &str,
    now: DateTime<Utc>,
) -> Vec<OutboxMessage> {
    let reclaim_before = now - config.reclaim_after;
    let mut claimed = Vec::new();
    for message in state.outbox.values_mut() {
        if claimed.len() >= max_messages {
            break;
        }
        if message.processed_at.is_some() || !topic.matches(&message.topic) {
            continue;
        }
        if message.attempts >= config.outbox_max_attempts {
            continue;
        }
        if let Some(claimed_at) = message.claimed_at {
            if claimed_at > reclaim_before {
                continue;
            }
        }
        message.worker = Some(worker.to_string());
        message.claimed_at = Some(now);
        message.attempts += 1;
        claimed.push(message.clone());
    }
    claimed
}

/// Mark messages processed. An error beginning with `DLQ:` tombstones the
/// row permanently.
pub fn mark_processed(
    state: &mut StoreState,
    ids: &[u64],
    last_error: Option<&str>,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    for id in ids {
        let message = state
            .outbox
            .get_mut(id)
            .ok_or_else(|| StoreError::Invalid(format!("unknown outbox message {id}")))?;
        message.processed_at = Some(now);
        message.last_error = last_error.map(str::to_string);
    }
    Ok(())
}

/// Record a transient failure: clear the lease so the message becomes
/// claimable once the reclaim interval passes.
pub fn mark_failed(
    state: &mut StoreState,
    ids: &[u64],
    last_error: &str,
    _now: DateTime<Utc>,
) -> StoreResult<()> {
    for id in ids {
        let message = state
            .outbox
            .get_mut(id)
            .ok_or_else(|| StoreError::Invalid(format!("unknown outbox message {id}")))?;
        message.worker = None;
        message.claimed_at = None;
        message.last_error = Some(last_error.to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
    }

    fn enqueue(state: &mut StoreState, topic: &str) -> u64 {
        enqueue_outbox(
            state,
            &TenantId::default_tenant(),
            topic,
            None,
            None,
            json!({}),
        )
    }

    #[test]
    fn claim_is_fifo_and_leases_block_reclaim() {
        let mut state = StoreState::new();
        let config = StoreConfig::default();
        let first = enqueue(&mut state, topics::LEDGER_ENTRY_APPLY);
        let second = enqueue(&mut state, topics::LEDGER_ENTRY_APPLY);

        let claimed = claim_outbox(
            &mut state,
            &config,
            TopicMatch::Exact(topics::LEDGER_ENTRY_APPLY),
            1,
            "w1",
            now(),
        );
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, first);
        assert_eq!(claimed[0].attempts, 1);

        // The second claim skips the leased message.
        let claimed = claim_outbox(
            &mut state,
            &config,
            TopicMatch::Exact(topics::LEDGER_ENTRY_APPLY),
            10,
            "w2",
            now(),
        );
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, second);

        // After the reclaim interval the abandoned lease returns to the pool.
        let later = now() + chrono::Duration::seconds(120);
        let reclaimed = claim_outbox(
            &mut state,
            &config,
            TopicMatch::Exact(topics::LEDGER_ENTRY_APPLY),
            10,
            "w3",
            later,
        );
        assert_eq!(reclaimed.len(), 2);
        assert_eq!(reclaimed[0].attempts, 2);
        assert_eq!(reclaimed[0].worker.as_deref(), Some("w3"));
    }

    #[test]
    fn processed_and_exhausted_messages_are_not_claimed() {
        let mut state = StoreState::new();
        let mut config = StoreConfig::default();
        config.reclaim_after = Duration::ZERO;
        config.outbox_max_attempts = 2;

        let id = enqueue(&mut state, topics::MONTH_CLOSE_REQUESTED);
        let selector = TopicMatch::Exact(topics::MONTH_CLOSE_REQUESTED);

        let mut t = now();
        for _ in 0..2 {
            t += chrono::Duration::seconds(1);
            let claimed = claim_outbox(&mut state, &config, selector, 10, "w", t);
            assert_eq!(claimed.len(), 1);
            mark_failed(&mut state, &[id], "boom", t).unwrap();
        }
        // Attempts exhausted: no longer claimable.
        t += chrono::Duration::seconds(1);
        assert!(claim_outbox(&mut state, &config, selector, 10, "w", t).is_empty());

        mark_processed(&mut state, &[id], Some("DLQ: max attempts"), t).unwrap();
        assert!(state.outbox[&id].is_dlq());
    }

    #[test]
    fn prefix_match_covers_notify_topics() {
        let mut state = StoreState::new();
        let config = StoreConfig::default();
        enqueue(&mut state, "NOTIFY_EMAIL");
        enqueue(&mut state, "NOTIFY_SLACK");
        enqueue(&mut state, topics::JOB_SETTLED);

        let claimed = claim_outbox(
            &mut state,
            &config,
            TopicMatch::Prefix(topics::NOTIFY_PREFIX),
            10,
            "drain",
            now(),
        );
        assert_eq!(claimed.len(), 2);
    }

    #[test]
    fn mark_failed_clears_lease_and_keeps_attempts() {
        let mut state = StoreState::new();
        let mut config = StoreConfig::default();
        config.reclaim_after = Duration::ZERO;
        let id = enqueue(&mut state, topics::LEDGER_ENTRY_APPLY);

        claim_outbox(
            &mut state,
            &config,
            TopicMatch::Exact(topics::LEDGER_ENTRY_APPLY),
            1,
            "w1",
            now(),
        );
        mark_failed(&mut state, &[id], "transient", now()).unwrap();
        let message = &state.outbox[&id];
        assert_eq!(message.attempts, 1);
        assert!(message.worker.is_none());
        assert_eq!(message.last_error.as_deref(), Some("transient"));

        let claimed = claim_outbox(
            &mut state,
            &config,
            TopicMatch::Exact(topics::LEDGER_ENTRY_APPLY),
            1,
            "w1",
            now() + chrono::Duration::seconds(1),
        );
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 2);
    }
}
