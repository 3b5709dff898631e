//! Chained-event drafts and the append construction.
//!
//! An `EventDraft` is what a command handler produces: identity, type, time,
//! actor, payload. Appending computes `payloadHash`, links `prevChainHash`,
//! derives `chainHash`, and binds an optional signature to the chain hash.
//! Sequence numbers are assigned by the event store, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use settleproxy_core::{ActorRef, EventId, SignerKeyId};

use crate::error::CanonError;
use crate::hash::{chain_hash, payload_hash};
use crate::signer::Signer;

/// An event before it has been chained (no hashes yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub at: DateTime<Utc>,
    pub actor: ActorRef,
    pub payload: Value,
}

impl EventDraft {
    pub fn new(
        event_type: impl Into<String>,
        at: DateTime<Utc>,
        actor: ActorRef,
        payload: Value,
    ) -> Self {
        Self {
            id: EventId::generate(),
            event_type: event_type.into(),
            at,
            actor,
            payload,
        }
    }

    /// Pin the event id (callers supply ids for deterministic replays).
    pub fn with_id(mut self, id: impl Into<EventId>) -> Self {
        self.id = id.into();
        self
    }
}

/// Create a draft; alias kept close to the wire vocabulary.
pub fn create_chained_event(
    event_type: impl Into<String>,
    at: DateTime<Utc>,
    actor: ActorRef,
    payload: Value,
) -> EventDraft {
    EventDraft::new(event_type, at, actor, payload)
}

/// A fully chained (and possibly signed) event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainedEvent {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub at: DateTime<Utc>,
    pub actor: ActorRef,
    pub payload: Value,
    pub payload_hash: String,
    pub prev_chain_hash: Option<String>,
    pub chain_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_key_id: Option<SignerKeyId>,
}

/// Chain a draft onto the given head.
pub fn append_chained_event(
    prev: Option<&str>,
    draft: EventDraft,
    signer: Option<&dyn Signer>,
) -> Result<ChainedEvent, CanonError> {
    let payload_hash = payload_hash(&draft.payload)?;
    let chain = chain_hash(
        prev,
        draft.id.as_str(),
        &draft.event_type,
        draft.at,
        &draft.actor,
        &payload_hash,
    )?;
    let (signature, signer_key_id) = match signer {
        Some(s) => (Some(s.sign(&chain)), Some(s.key_id().clone())),
        None => (None, None),
    };
    Ok(ChainedEvent {
        id: draft.id,
        event_type: draft.event_type,
        at: draft.at,
        actor: draft.actor,
        payload: draft.payload,
        payload_hash,
        prev_chain_hash: prev.map(str::to_string),
        chain_hash: chain,
        signature,
        signer_key_id,
    })
}

/// Chain a draft onto a sequence of already-chained events.
pub fn chain_extend(
    events: &mut Vec<ChainedEvent>,
    draft: EventDraft,
    signer: Option<&dyn Signer>,
) -> Result<(), CanonError> {
    let prev = events.last().map(|e| e.chain_hash.clone());
    let chained = append_chained_event(prev.as_deref(), draft, signer)?;
    events.push(chained);
    Ok(())
}

/// Verify chain continuity and hash integrity over a full stream.
pub fn verify_chain(events: &[ChainedEvent]) -> Result<(), CanonError> {
    let mut prev: Option<&str> = None;
    for (i, e) in events.iter().enumerate() {
        if e.prev_chain_hash.as_deref() != prev {
            return Err(CanonError::ChainBroken(format!(
                "event {} ({}) prevChainHash does not match predecessor",
                i,
                e.id.as_str()
            )));
        }
        let expected_payload = payload_hash(&e.payload)?;
        if e.payload_hash != expected_payload {
            return Err(CanonError::ChainBroken(format!(
                "event {} ({}) payloadHash mismatch",
                i,
                e.id.as_str()
            )));
        }
        let expected_chain = chain_hash(
            prev,
            e.id.as_str(),
            &e.event_type,
            e.at,
            &e.actor,
            &e.payload_hash,
        )?;
        if e.chain_hash != expected_chain {
            return Err(CanonError::ChainBroken(format!(
                "event {} ({}) chainHash mismatch",
                i,
                e.id.as_str()
            )));
        }
        prev = Some(&e.chain_hash);
    }
    Ok(())
}
