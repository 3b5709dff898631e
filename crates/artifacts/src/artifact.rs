//! Artifact envelope: an immutable, content-hashed document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use settleproxy_canon::{CanonError, compute_artifact_hash};

/// Stable artifact type names. The store special-cases `ReputationEvent.v1`
/// (secondary index); everything else is routed by string match.
pub mod types {
    pub const MONTHLY_STATEMENT: &str = "MonthlyStatement.v1";
    pub const PARTY_STATEMENT: &str = "PartyStatement.v1";
    pub const PAYOUT_INSTRUCTION: &str = "PayoutInstruction.v1";
    pub const GL_BATCH: &str = "GLBatch.v1";
    pub const JOURNAL_CSV: &str = "JournalCsv.v1";
    pub const FINANCE_PACK_POINTER: &str = "FinancePackBundlePointer.v1";
    pub const REPUTATION_EVENT: &str = "ReputationEvent.v1";
}

/// A content-addressed document. The body is canonical JSON carrying its own
/// `artifactHash`; the hash is computed with that field stripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub artifact_id: String,
    pub artifact_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_chain_hash: Option<String>,
    pub artifact_hash: String,
    pub body: Value,
}

impl Artifact {
    /// Build an artifact: compute the content hash of `body` (ignoring any
    /// embedded `artifactHash`) and re-embed it.
    pub fn build(
        artifact_id: impl Into<String>,
        artifact_type: impl Into<String>,
        mut body: Value,
    ) -> Result<Self, CanonError> {
        let artifact_hash = compute_artifact_hash(&body)?;
        if let Value::Object(map) = &mut body {
            map.insert("artifactHash".to_string(), Value::String(artifact_hash.clone()));
        }
        Ok(Self {
            artifact_id: artifact_id.into(),
            artifact_type: artifact_type.into(),
            job_id: None,
            source_event_id: None,
            at_chain_hash: None,
            artifact_hash,
            body,
        })
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_source_event(mut self, event_id: impl Into<String>) -> Self {
        self.source_event_id = Some(event_id.into());
        self
    }

    pub fn with_chain_head(mut self, chain_hash: impl Into<String>) -> Self {
        self.at_chain_hash = Some(chain_hash.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_embedded_and_stable() {
        let a = Artifact::build("A1", types::GL_BATCH, json!({"period": "2026-02"})).unwrap();
        assert_eq!(a.body["artifactHash"], json!(a.artifact_hash));
        // Rebuilding from the embedded body yields the same hash.
        let b = Artifact::build("A1", types::GL_BATCH, a.body.clone()).unwrap();
        assert_eq!(a.artifact_hash, b.artifact_hash);
    }

    #[test]
    fn different_bodies_hash_differently() {
        let a = Artifact::build("A1", types::GL_BATCH, json!({"period": "2026-02"})).unwrap();
        let b = Artifact::build("A1", types::GL_BATCH, json!({"period": "2026-03"})).unwrap();
        assert_ne!(a.artifact_hash, b.artifact_hash);
    }
}
