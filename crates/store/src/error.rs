//! Kernel error model.
//!
//! This is the closed set of failure kinds the transactional kernel can
//! surface. Workers classify each as retriable (clear the lease, try again
//! later) or terminal (surface / DLQ).

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency on event append. Retriable after re-fetching
    /// the stream head.
    #[error("prev chain hash mismatch on {stream}: expected {expected:?}, got {got:?}")]
    PrevChainHashMismatch {
        stream: String,
        expected: Option<String>,
        got: Option<String>,
    },

    /// Event carries a signer key id the tenant does not know.
    #[error("signer key unknown: {0}")]
    SignerKeyUnknown(String),

    /// Signer key exists but is rotated or revoked.
    #[error("signer key inactive: {0}")]
    SignerKeyInactive(String),

    /// Signer key purpose does not match the event's actor type.
    #[error("signer key {key_id} purpose '{purpose}' does not match actor type '{actor_type}'")]
    SignerKeyPurposeMismatch {
        key_id: String,
        purpose: String,
        actor_type: String,
    },

    /// Same idempotency key replayed with a different request hash.
    #[error("idempotency conflict for {key}")]
    IdempotencyConflict { key: String },

    /// Artifact id already bound to a different content hash.
    #[error("artifact hash mismatch for {artifact_id}: stored {stored}, got {got}")]
    ArtifactHashMismatch {
        artifact_id: String,
        stored: String,
        got: String,
    },

    /// (job, type, source event) already bound to a different artifact.
    #[error("artifact source-event conflict for job {job_id} type {artifact_type} event {source_event_id}")]
    ArtifactSourceEventConflict {
        job_id: String,
        artifact_type: String,
        source_event_id: String,
    },

    /// Concurrent insert race on the artifact keys; retriable internally.
    #[error("artifact insert race for {0}")]
    ArtifactInsertRace(String),

    /// Correlation key already held by another job.
    #[error("correlation conflict: key held by job {existing_job_id}")]
    CorrelationConflict { existing_job_id: String },

    /// Tenant exceeded a quota.
    #[error("tenant quota exceeded: {kind} (limit {limit}, current {current})")]
    TenantQuotaExceeded {
        kind: String,
        limit: u64,
        current: u64,
    },

    /// The backing store cancelled the statement; transient.
    #[error("statement timeout")]
    StatementTimeout,

    /// An armed failpoint aborted execution (simulated crash).
    #[error("failpoint {0} triggered")]
    Failpoint(&'static str),

    /// Payload or snapshot (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Caller violated an operation contract (bad batch, unknown id, ...).
    #[error("invalid operation: {0}")]
    Invalid(String),

    /// Backing-store failure (connection, constraint, io).
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Whether a worker should clear its lease and retry later.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StoreError::PrevChainHashMismatch { .. }
                | StoreError::ArtifactInsertRace(_)
                | StoreError::StatementTimeout
                | StoreError::Failpoint(_)
                | StoreError::Storage(_)
        )
    }
}

impl From<settleproxy_canon::CanonError> for StoreError {
    fn from(err: settleproxy_canon::CanonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<settleproxy_core::DomainError> for StoreError {
    fn from(err: settleproxy_core::DomainError) -> Self {
        StoreError::Invalid(err.to_string())
    }
}
