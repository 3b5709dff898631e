//! Kernel runtime: the store plus its collaborators (evidence store, server
//! signer), and the commit entry point that drives pipelines forward.

use std::sync::Arc;

use tracing::warn;

use settleproxy_canon::{BootstrapSigner, Signer};
use settleproxy_store::{CommitOutcome, CommitRequest, MemoryStore, StoreResult};

use crate::error::PipelineError;
use crate::evidence::{EvidenceStore, MemoryEvidenceStore};
use crate::pipelines::{self, ProcessOptions, ProcessReport};

/// Everything a worker process needs to run the kernel.
pub struct Runtime {
    store: Arc<MemoryStore>,
    evidence: Arc<dyn EvidenceStore>,
    signer: Arc<dyn Signer>,
    worker_name: String,
}

impl Runtime {
    pub fn new(store: Arc<MemoryStore>, evidence: Arc<dyn EvidenceStore>) -> Self {
        Self {
            store,
            evidence,
            signer: Arc::new(BootstrapSigner::default()),
            worker_name: format!("worker-{}", std::process::id()),
        }
    }

    /// In-memory everything; the common test/dev setup.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::with_defaults()),
            Arc::new(MemoryEvidenceStore::new()),
        )
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn store_arc(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    pub fn evidence(&self) -> &dyn EvidenceStore {
        self.evidence.as_ref()
    }

    pub fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Commit a transaction, then drive the pipelines forward (best effort:
    /// pipeline failures stay in the outbox for the next drain, they never
    /// fail the commit itself).
    pub fn commit(&self, request: CommitRequest) -> StoreResult<CommitOutcome> {
        let outcome = self.store.commit_tx(request)?;
        if let Err(err) = self.process_outbox(ProcessOptions::default()) {
            warn!(error = %err, "post-commit outbox drain stopped early");
        }
        Ok(outcome)
    }

    /// Drain all topics once.
    pub fn process_outbox(&self, options: ProcessOptions) -> Result<ProcessReport, PipelineError> {
        pipelines::process_outbox(self, options)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("worker_name", &self.worker_name)
            .finish_non_exhaustive()
    }
}
