//! Delivery routing: which destinations receive which artifacts, and the
//! dedupe/scope/priority keys that make delivery exactly-once and
//! scope-ordered.

use serde::{Deserialize, Serialize};

use settleproxy_core::{DestinationId, TenantId};

use crate::artifact::{Artifact, types};

/// A configured delivery destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub destination_id: DestinationId,
    /// Artifact types this destination accepts.
    pub artifact_types: Vec<String>,
    pub active: bool,
}

impl Destination {
    pub fn accepts(&self, artifact_type: &str) -> bool {
        self.active && self.artifact_types.iter().any(|t| t == artifact_type)
    }
}

/// One delivery to insert, fully keyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub destination_id: DestinationId,
    pub artifact_type: String,
    pub artifact_id: String,
    pub artifact_hash: String,
    pub dedupe_key: String,
    pub scope_key: String,
    pub priority: i32,
}

/// Claim priority per artifact type; lower claims first within a scope.
pub fn priority_for(artifact_type: &str) -> i32 {
    match artifact_type {
        types::MONTHLY_STATEMENT => 10,
        types::PARTY_STATEMENT => 20,
        types::PAYOUT_INSTRUCTION => 30,
        types::GL_BATCH => 40,
        types::JOURNAL_CSV => 50,
        types::FINANCE_PACK_POINTER => 60,
        _ => 100,
    }
}

/// Scope key for an artifact: period-wide documents share the period scope,
/// party-addressed documents get their own scope per party.
pub fn scope_key_for(artifact: &Artifact) -> String {
    let period = artifact.body["period"].as_str().unwrap_or("unknown");
    match artifact.artifact_type.as_str() {
        types::PARTY_STATEMENT => {
            let party = artifact.body["partyId"].as_str().unwrap_or("unknown");
            format!("period:{period}:party:{party}")
        }
        types::PAYOUT_INSTRUCTION => {
            let party = artifact.body["payeePartyId"].as_str().unwrap_or("unknown");
            format!("period:{period}:payout:{party}")
        }
        _ => format!("period:{period}"),
    }
}

/// Deterministic dedupe key.
pub fn dedupe_key(
    tenant_id: &TenantId,
    destination_id: &DestinationId,
    artifact: &Artifact,
) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        tenant_id.as_str(),
        destination_id.as_str(),
        artifact.artifact_type,
        artifact.artifact_id,
        artifact.artifact_hash,
    )
}

/// Fan one artifact out to every destination that accepts its type.
pub fn route_artifact(
    tenant_id: &TenantId,
    destinations: &[Destination],
    artifact: &Artifact,
) -> Vec<DeliveryRequest> {
    let mut sorted: Vec<&Destination> = destinations
        .iter()
        .filter(|d| d.accepts(&artifact.artifact_type))
        .collect();
    sorted.sort_by(|a, b| a.destination_id.cmp(&b.destination_id));

    sorted
        .into_iter()
        .map(|d| DeliveryRequest {
            destination_id: d.destination_id.clone(),
            artifact_type: artifact.artifact_type.clone(),
            artifact_id: artifact.artifact_id.clone(),
            artifact_hash: artifact.artifact_hash.clone(),
            dedupe_key: dedupe_key(tenant_id, &d.destination_id, artifact),
            scope_key: scope_key_for(artifact),
            priority: priority_for(&artifact.artifact_type),
        })
        .collect()
}
