//! Evidence store: write-once, content-addressed blob storage.
//!
//! The finance-pack assembler is the only kernel client. The medium is
//! opaque; only these two operations are contractual. Writing identical
//! bytes to an existing ref is accepted (idempotent restore after a crash);
//! writing different bytes is refused.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use settleproxy_core::TenantId;

use crate::error::PipelineError;

pub trait EvidenceStore: Send + Sync {
    /// Write-once put. Identical re-puts succeed; differing bytes fail.
    fn put_evidence(
        &self,
        tenant_id: &TenantId,
        evidence_ref: &str,
        bytes: &[u8],
    ) -> Result<(), PipelineError>;

    /// Read a blob; `None` when the ref does not exist.
    fn read_evidence(
        &self,
        tenant_id: &TenantId,
        evidence_ref: &str,
    ) -> Result<Option<Vec<u8>>, PipelineError>;
}

/// In-memory evidence store for tests/dev.
#[derive(Debug, Default)]
pub struct MemoryEvidenceStore {
    blobs: RwLock<HashMap<(TenantId, String), Vec<u8>>>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test support: replace stored bytes without the write-once check, to
    /// simulate medium corruption.
    pub fn overwrite_unchecked(&self, tenant_id: &TenantId, evidence_ref: &str, bytes: Vec<u8>) {
        self.blobs
            .write()
            .unwrap()
            .insert((tenant_id.clone(), evidence_ref.to_string()), bytes);
    }

    /// Test support: the refs stored for a tenant, sorted.
    pub fn refs(&self, tenant_id: &TenantId) -> Vec<String> {
        let blobs = self.blobs.read().unwrap();
        let mut refs: Vec<String> = blobs
            .keys()
            .filter(|(t, _)| t == tenant_id)
            .map(|(_, r)| r.clone())
            .collect();
        refs.sort();
        refs
    }
}

impl EvidenceStore for MemoryEvidenceStore {
    fn put_evidence(
        &self,
        tenant_id: &TenantId,
        evidence_ref: &str,
        bytes: &[u8],
    ) -> Result<(), PipelineError> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| PipelineError::Evidence("lock poisoned".to_string()))?;
        let key = (tenant_id.clone(), evidence_ref.to_string());
        if let Some(existing) = blobs.get(&key) {
            if existing != bytes {
                return Err(PipelineError::Evidence(format!(
                    "refusing to overwrite {evidence_ref} with different bytes"
                )));
            }
            return Ok(());
        }
        blobs.insert(key, bytes.to_vec());
        Ok(())
    }

    fn read_evidence(
        &self,
        tenant_id: &TenantId,
        evidence_ref: &str,
    ) -> Result<Option<Vec<u8>>, PipelineError> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| PipelineError::Evidence("lock poisoned".to_string()))?;
        Ok(blobs
            .get(&(tenant_id.clone(), evidence_ref.to_string()))
            .cloned())
    }
}

/// Filesystem evidence store. The `obj://` ref maps to a path under the
/// root, one directory per tenant.
#[derive(Debug)]
pub struct FsEvidenceStore {
    root: PathBuf,
}

impl FsEvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, tenant_id: &TenantId, evidence_ref: &str) -> Result<PathBuf, PipelineError> {
        let relative = evidence_ref
            .strip_prefix("obj://")
            .unwrap_or(evidence_ref);
        if relative.split('/').any(|part| part == "..") {
            return Err(PipelineError::Evidence(format!(
                "evidence ref escapes the store root: {evidence_ref}"
            )));
        }
        Ok(self.root.join(tenant_id.as_str()).join(relative))
    }
}

impl EvidenceStore for FsEvidenceStore {
    fn put_evidence(
        &self,
        tenant_id: &TenantId,
        evidence_ref: &str,
        bytes: &[u8],
    ) -> Result<(), PipelineError> {
        let path = self.blob_path(tenant_id, evidence_ref)?;
        match std::fs::read(&path) {
            Ok(existing) => {
                if existing != bytes {
                    return Err(PipelineError::Evidence(format!(
                        "refusing to overwrite {evidence_ref} with different bytes"
                    )));
                }
                return Ok(());
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(map_io(&path, err)),
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| map_io(parent, e))?;
        }
        std::fs::write(&path, bytes).map_err(|e| map_io(&path, e))
    }

    fn read_evidence(
        &self,
        tenant_id: &TenantId,
        evidence_ref: &str,
    ) -> Result<Option<Vec<u8>>, PipelineError> {
        let path = self.blob_path(tenant_id, evidence_ref)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(map_io(&path, err)),
        }
    }
}

fn map_io(path: &Path, err: io::Error) -> PipelineError {
    PipelineError::Evidence(format!("{}: {err}", path.display()))
}
