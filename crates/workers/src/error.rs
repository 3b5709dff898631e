//! Pipeline error model and its retry classification.

use thiserror::Error;

use settleproxy_store::StoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Stored bundle bytes differ from the freshly built ones. Operator
    /// escalation; never retried blindly.
    #[error("finance pack bundle immutability breach at {evidence_ref}")]
    ImmutabilityBreach { evidence_ref: String },

    /// Evidence store failure (io, backend).
    #[error("evidence store: {0}")]
    Evidence(String),

    /// The period's documents disagree; retriable (inputs may still be
    /// materializing).
    #[error("reconciliation failed with {findings} findings for {period}")]
    Reconciliation { period: String, findings: usize },

    /// The outbox payload cannot be understood; retrying cannot help.
    #[error("malformed message payload: {0}")]
    Payload(String),

    /// Strict journal-CSV gate: accounts without a GL mapping block the
    /// close until the account map is fixed.
    #[error("journal csv gate blocked close of {period}: unmapped accounts {accounts:?}")]
    Gate {
        period: String,
        accounts: Vec<String>,
    },

    #[error("bundle build failed: {0}")]
    Bundle(String),
}

impl From<settleproxy_canon::CanonError> for PipelineError {
    fn from(err: settleproxy_canon::CanonError) -> Self {
        PipelineError::Bundle(err.to_string())
    }
}

impl PipelineError {
    /// An armed failpoint models process death: the dispatcher must stop
    /// without touching the message (the lease stays until reclaimed).
    pub fn is_crash(&self) -> bool {
        matches!(self, PipelineError::Store(StoreError::Failpoint(_)))
    }

    /// Terminal errors go straight to the DLQ instead of burning attempts.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineError::ImmutabilityBreach { .. } | PipelineError::Payload(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settleproxy_store::failpoint_names;

    #[test]
    fn classification() {
        let crash = PipelineError::Store(StoreError::Failpoint(
            failpoint_names::LEDGER_AFTER_INSERT,
        ));
        assert!(crash.is_crash());
        assert!(!crash.is_terminal());

        let breach = PipelineError::ImmutabilityBreach {
            evidence_ref: "obj://finance-pack/2026-02/x.zip".to_string(),
        };
        assert!(breach.is_terminal());
        assert!(!breach.is_crash());

        let transient = PipelineError::Reconciliation {
            period: "2026-02".to_string(),
            findings: 2,
        };
        assert!(!transient.is_terminal());
        assert!(!transient.is_crash());
    }
}
