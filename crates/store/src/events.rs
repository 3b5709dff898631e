//! Append-only event store with per-stream hash chains.
//!
//! Appends are serialized per stream by an advisory transaction lock keyed
//! on a stable hash of `tenant:type:id`. The optimistic-concurrency
//! precondition is the chain itself: the first incoming event must link to
//! the current head's chain hash (or null on an empty stream).

use chrono::{DateTime, Utc};
use tracing::instrument;

use settleproxy_canon::{ChainedEvent, hash};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::snapshots;
use crate::state::{SignerKeyStatus, StoreState, StoredEvent, StreamHead, StreamKey};

/// Advisory lock key for a stream: first 8 bytes of SHA-256 over the stream
/// name. This is the key a relational deployment takes as a transactional
/// advisory lock to serialize same-stream appenders; the in-memory backend's
/// transactions are already serialized, so the key only has to be stable.
pub fn advisory_key(key: &StreamKey) -> i64 {
    let digest = hash::sha256_hex(key.stream_name().as_bytes());
    let bytes = hex::decode(&digest[..16]).unwrap_or_else(|_| vec![0; 8]);
    let mut first = [0u8; 8];
    first.copy_from_slice(&bytes[..8]);
    i64::from_be_bytes(first)
}

/// Append a batch of chained events to one stream.
///
/// The whole batch succeeds or fails: a chain precondition or signer-key
/// violation aborts the transaction (and with it every other operation in
/// the same commit).
#[instrument(skip(state, config, events), fields(stream = %key.stream_name(), count = events.len()))]
pub fn append_events(
    state: &mut StoreState,
    config: &StoreConfig,
    key: &StreamKey,
    events: Vec<ChainedEvent>,
    now: DateTime<Utc>,
) -> StoreResult<(StreamHead, Vec<StoredEvent>)> {
    if events.is_empty() {
        return Ok((state.head(key), Vec::new()));
    }

    let head = state.head(key);

    // Optimistic concurrency: the batch must link to the current head.
    if events[0].prev_chain_hash != head.chain_hash {
        return Err(StoreError::PrevChainHashMismatch {
            stream: key.stream_name(),
            expected: head.chain_hash,
            got: events[0].prev_chain_hash.clone(),
        });
    }

    let mut prev = head.chain_hash.clone();
    let mut next_seq = head.seq;
    let mut stored = Vec::with_capacity(events.len());

    for event in events {
        // Intra-batch continuity.
        if event.prev_chain_hash != prev {
            return Err(StoreError::PrevChainHashMismatch {
                stream: key.stream_name(),
                expected: prev,
                got: event.prev_chain_hash.clone(),
            });
        }

        // The chain hash must be exactly what the event's fields imply.
        let expected = hash::chain_hash(
            prev.as_deref(),
            event.id.as_str(),
            &event.event_type,
            event.at,
            &event.actor,
            &event.payload_hash,
        )?;
        if event.chain_hash != expected {
            return Err(StoreError::Invalid(format!(
                "chain hash of event {} does not match its fields",
                event.id.as_str()
            )));
        }

        check_signer_key(state, config, key, &event)?;

        next_seq += 1;
        prev = Some(event.chain_hash.clone());
        stored.push(StoredEvent {
            key: key.clone(),
            seq: next_seq,
            event,
        });
    }

    state
        .events
        .entry(key.clone())
        .or_default()
        .extend(stored.iter().cloned());

    // Snapshot rebuild happens in the same transaction as the append.
    snapshots::rebuild_snapshot(state, key, now)?;

    Ok((
        StreamHead {
            seq: next_seq,
            chain_hash: prev,
        },
        stored,
    ))
}

/// Signer keys other than the server bootstrap key must exist, be active,
/// and carry a purpose matching the event's actor type.
fn check_signer_key(
    state: &StoreState,
    config: &StoreConfig,
    key: &StreamKey,
    event: &ChainedEvent,
) -> StoreResult<()> {
    let Some(signer_key_id) = &event.signer_key_id else {
        return Ok(());
    };
    if signer_key_id.as_str() == config.bootstrap_key_id {
        return Ok(());
    }

    let row = state
        .signer_keys
        .get(&(key.tenant_id.clone(), signer_key_id.as_str().to_string()))
        .ok_or_else(|| StoreError::SignerKeyUnknown(signer_key_id.as_str().to_string()))?;

    if row.status != SignerKeyStatus::Active {
        return Err(StoreError::SignerKeyInactive(
            signer_key_id.as_str().to_string(),
        ));
    }
    let actor_type = event.actor.actor_type.as_str();
    if row.purpose != actor_type {
        return Err(StoreError::SignerKeyPurposeMismatch {
            key_id: signer_key_id.as_str().to_string(),
            purpose: row.purpose.clone(),
            actor_type: actor_type.to_string(),
        });
    }
    Ok(())
}

/// Load a full stream in sequence order.
pub fn load_stream(state: &StoreState, key: &StreamKey) -> Vec<StoredEvent> {
    state.events.get(key).cloned().unwrap_or_default()
}
