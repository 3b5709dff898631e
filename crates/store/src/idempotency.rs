//! Idempotency registry: first-write-wins per command key.

use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::state::{IdempotencyKey, IdempotencyRecord, StoreState};

/// Outcome of resolving an idempotency key inside a command transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyOutcome {
    /// First use: the record was stored, side effects should proceed.
    Inserted(IdempotencyRecord),
    /// Replay with the same request hash: return the stored response and
    /// skip side effects.
    Replayed(IdempotencyRecord),
}

impl IdempotencyOutcome {
    pub fn record(&self) -> &IdempotencyRecord {
        match self {
            IdempotencyOutcome::Inserted(r) | IdempotencyOutcome::Replayed(r) => r,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, IdempotencyOutcome::Replayed(_))
    }
}

/// Resolve an idempotency key.
///
/// - no record: insert and return `Inserted`
/// - record with the same request hash: return `Replayed` with the original
///   response bytes
/// - record with a different request hash: `IdempotencyConflict`
pub fn put_idempotency(
    state: &mut StoreState,
    key: IdempotencyKey,
    request_hash: &str,
    status_code: u16,
    response_body: serde_json::Value,
    now: DateTime<Utc>,
) -> StoreResult<IdempotencyOutcome> {
    if let Some(existing) = state.idempotency.get(&key) {
        if existing.request_hash != request_hash {
            return Err(StoreError::IdempotencyConflict {
                key: key.describe(),
            });
        }
        return Ok(IdempotencyOutcome::Replayed(existing.clone()));
    }

    let record = IdempotencyRecord {
        request_hash: request_hash.to_string(),
        status_code,
        response_body,
        created_at: now,
    };
    state.idempotency.insert(key, record.clone());
    Ok(IdempotencyOutcome::Inserted(record))
}
