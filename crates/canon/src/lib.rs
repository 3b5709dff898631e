//! Canonical hashing and chained events.
//!
//! Everything that feeds a hash goes through this crate: the canonical JSON
//! serializer, SHA-256 helpers, artifact content addressing, the per-stream
//! chain-hash construction, and the deterministic ZIP writer used for
//! finance-pack bundles. A general JSON encoder is never used for hashing.

pub mod event;
pub mod hash;
pub mod json;
pub mod signer;
pub mod zip;

mod error;

pub use error::CanonError;
pub use event::{
    ChainedEvent, EventDraft, append_chained_event, chain_extend, create_chained_event,
    verify_chain,
};
pub use hash::{chain_hash, compute_artifact_hash, payload_hash, sha256_hex};
pub use json::canonical_json;
pub use signer::{BootstrapSigner, NullSigner, Signer};
pub use zip::build_deterministic_zip;
