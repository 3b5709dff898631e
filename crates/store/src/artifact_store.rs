//! Content-hashed, immutable artifact store.

use chrono::{DateTime, Utc};
use tracing::instrument;

use settleproxy_artifacts::{Artifact, types};
use settleproxy_core::TenantId;

use crate::error::{StoreError, StoreResult};
use crate::state::{ArtifactRow, StoreState};

/// Outcome of an artifact put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutArtifactOutcome {
    Inserted,
    /// Same id (and source-event key) with identical hash: no-op.
    Idempotent,
}

/// Insert an artifact, enforcing both uniqueness contracts.
///
/// - `(tenant, job_id, artifact_type, source_event_id)` with a different
///   hash is `ArtifactSourceEventConflict`; identical hash is idempotent.
/// - `(tenant, artifact_id)` with a different hash is
///   `ArtifactHashMismatch`; identical hash is idempotent.
///
/// Idempotent hits still refresh secondary indexes (the reputation-event
/// index for `ReputationEvent.v1`).
#[instrument(skip(state, artifact), fields(tenant = %tenant_id.as_str(), artifact_id = %artifact.artifact_id))]
pub fn put_artifact(
    state: &mut StoreState,
    tenant_id: &TenantId,
    artifact: Artifact,
    now: DateTime<Utc>,
) -> StoreResult<PutArtifactOutcome> {
    // Source-event uniqueness first: a job may emit one artifact of a given
    // type per source event, ever.
    if let (Some(job_id), Some(source_event_id)) = (&artifact.job_id, &artifact.source_event_id) {
        let source_key = (
            tenant_id.clone(),
            job_id.clone(),
            artifact.artifact_type.clone(),
            source_event_id.clone(),
        );
        if let Some(existing_id) = state.artifact_source_index.get(&source_key) {
            let existing = state
                .artifacts
                .get(&(tenant_id.clone(), existing_id.clone()))
                .ok_or_else(|| StoreError::ArtifactInsertRace(artifact.artifact_id.clone()))?;
            if existing.artifact.artifact_hash != artifact.artifact_hash {
                return Err(StoreError::ArtifactSourceEventConflict {
                    job_id: job_id.clone(),
                    artifact_type: artifact.artifact_type.clone(),
                    source_event_id: source_event_id.clone(),
                });
            }
            refresh_indexes(state, tenant_id, &artifact);
            return Ok(PutArtifactOutcome::Idempotent);
        }
    }

    let id_key = (tenant_id.clone(), artifact.artifact_id.clone());
    if let Some(existing) = state.artifacts.get(&id_key) {
        if existing.artifact.artifact_hash != artifact.artifact_hash {
            return Err(StoreError::ArtifactHashMismatch {
                artifact_id: artifact.artifact_id.clone(),
                stored: existing.artifact.artifact_hash.clone(),
                got: artifact.artifact_hash.clone(),
            });
        }
        refresh_indexes(state, tenant_id, &artifact);
        return Ok(PutArtifactOutcome::Idempotent);
    }

    if let (Some(job_id), Some(source_event_id)) = (&artifact.job_id, &artifact.source_event_id) {
        state.artifact_source_index.insert(
            (
                tenant_id.clone(),
                job_id.clone(),
                artifact.artifact_type.clone(),
                source_event_id.clone(),
            ),
            artifact.artifact_id.clone(),
        );
    }
    refresh_indexes(state, tenant_id, &artifact);
    state.artifacts.insert(
        id_key,
        ArtifactRow {
            artifact,
            created_at: now,
        },
    );
    Ok(PutArtifactOutcome::Inserted)
}

fn refresh_indexes(state: &mut StoreState, tenant_id: &TenantId, artifact: &Artifact) {
    if artifact.artifact_type != types::REPUTATION_EVENT {
        return;
    }
    let Some(party) = artifact.body.get("partyId").and_then(|v| v.as_str()) else {
        return;
    };
    let ids = state
        .reputation_index
        .entry((tenant_id.clone(), party.to_string()))
        .or_default();
    if !ids.iter().any(|id| id == &artifact.artifact_id) {
        ids.push(artifact.artifact_id.clone());
    }
}

pub fn get_artifact(state: &StoreState, tenant_id: &TenantId, artifact_id: &str) -> Option<ArtifactRow> {
    state
        .artifacts
        .get(&(tenant_id.clone(), artifact_id.to_string()))
        .cloned()
}

/// List a tenant's artifacts, optionally by type, ordered
/// `(created_at DESC, artifact_id DESC)` with bytewise id comparison.
pub fn list_artifacts(
    state: &StoreState,
    tenant_id: &TenantId,
    artifact_type: Option<&str>,
    limit: usize,
) -> Vec<ArtifactRow> {
    let mut rows: Vec<ArtifactRow> = state
        .artifacts
        .iter()
        .filter(|((t, _), _)| t == tenant_id)
        .filter(|(_, row)| artifact_type.is_none_or(|ty| row.artifact.artifact_type == ty))
        .map(|(_, row)| row.clone())
        .collect();
    rows.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.artifact.artifact_id.cmp(&a.artifact.artifact_id))
    });
    rows.truncate(limit);
    rows
}
