//! Worker pipelines over the transactional outbox.
//!
//! Every pipeline is a claim -> work -> mark loop: messages are claimed
//! under a lease, the work runs in its own transactions with named
//! failpoints between them, and completion marks the message processed (or
//! failed / DLQ). All pipelines are re-entrant and safe under kill -9 at any
//! failpoint.

pub mod error;
pub mod evidence;
pub mod pipelines;
pub mod runtime;
pub mod worker_loop;

pub use error::PipelineError;
pub use evidence::{EvidenceStore, FsEvidenceStore, MemoryEvidenceStore};
pub use pipelines::{ProcessOptions, ProcessReport};
pub use runtime::Runtime;
pub use worker_loop::WorkerHandle;
