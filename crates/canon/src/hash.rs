//! SHA-256 helpers and the hash constructions used by the substrate.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use settleproxy_core::ActorRef;
use sha2::{Digest, Sha256};

use crate::error::CanonError;
use crate::json::canonical_json;

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash of a payload: SHA-256 over its canonical JSON.
pub fn payload_hash(payload: &Value) -> Result<String, CanonError> {
    Ok(sha256_hex(canonical_json(payload)?.as_bytes()))
}

/// Timestamps entering a hash are normalized to RFC 3339 with milliseconds.
pub fn canonical_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Chain hash binding an event to its predecessor.
///
/// `chainHash = H(canonical({prev, id, type, at, actor, payloadHash}))` where
/// `prev` is the predecessor's chain hash or null for the first event.
pub fn chain_hash(
    prev: Option<&str>,
    id: &str,
    event_type: &str,
    at: DateTime<Utc>,
    actor: &ActorRef,
    payload_hash: &str,
) -> Result<String, CanonError> {
    let input = json!({
        "prev": prev,
        "id": id,
        "type": event_type,
        "at": canonical_timestamp(at),
        "actor": {"type": actor.actor_type.as_str(), "id": actor.id},
        "payloadHash": payload_hash,
    });
    Ok(sha256_hex(canonical_json(&input)?.as_bytes()))
}

/// Content hash of an artifact body.
///
/// The `artifactHash` field is stripped before hashing so the hash can be
/// embedded back into the stored body without changing what it addresses.
pub fn compute_artifact_hash(body: &Value) -> Result<String, CanonError> {
    let stripped = match body {
        Value::Object(map) => {
            let mut map = map.clone();
            map.remove("artifactHash");
            Value::Object(map)
        }
        other => other.clone(),
    };
    Ok(sha256_hex(canonical_json(&stripped)?.as_bytes()))
}
