//! Signer interface consulted when events are appended.
//!
//! Signature algorithm internals live outside the substrate; the kernel only
//! needs a key id and a detached signature over the chain hash.

use settleproxy_core::SignerKeyId;

use crate::hash::sha256_hex;

/// Signs chain hashes on behalf of a principal.
pub trait Signer: Send + Sync {
    /// Key id recorded on the event as `signerKeyId`.
    fn key_id(&self) -> &SignerKeyId;

    /// Detached signature over the chain hash.
    fn sign(&self, chain_hash: &str) -> String;
}

/// Signer that leaves events unsigned. Appends carry no `signerKeyId`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSigner;

/// Deterministic development/bootstrap signer.
///
/// Produces `sha256(keyId ":" chainHash)`. Not a real signature scheme; the
/// production signer is injected by the host process.
#[derive(Debug, Clone)]
pub struct BootstrapSigner {
    key_id: SignerKeyId,
}

impl BootstrapSigner {
    pub const DEFAULT_KEY_ID: &'static str = "server-bootstrap";

    pub fn new(key_id: impl Into<SignerKeyId>) -> Self {
        Self {
            key_id: key_id.into(),
        }
    }
}

impl Default for BootstrapSigner {
    fn default() -> Self {
        Self::new(SignerKeyId::new(Self::DEFAULT_KEY_ID))
    }
}

impl Signer for BootstrapSigner {
    fn key_id(&self) -> &SignerKeyId {
        &self.key_id
    }

    fn sign(&self, chain_hash: &str) -> String {
        sha256_hex(format!("{}:{}", self.key_id.as_str(), chain_hash).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_signatures_are_deterministic() {
        let signer = BootstrapSigner::default();
        assert_eq!(signer.sign("abc"), signer.sign("abc"));
        assert_ne!(signer.sign("abc"), signer.sign("abd"));
    }
}
