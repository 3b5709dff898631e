//! Transactional storage-and-pipeline kernel.
//!
//! The kernel owns the append-only event store (per-aggregate hash chains,
//! optimistic concurrency), snapshots, the idempotency registry, the
//! artifact store, the outbox, the delivery outbox, correlations, signer
//! keys, ingest records, the ledger tables, and the single `commit_tx`
//! write boundary that fans a closed set of operations into them.
//!
//! The backing store is `MemoryStore`: one table image behind clone-and-swap
//! transactions. Its operation semantics are database-shaped (advisory lock
//! keys, skip-locked claim behavior, insert-if-absent by natural keys) so a
//! relational deployment can reproduce them query for query.

pub mod artifact_store;
pub mod commit;
pub mod config;
pub mod correlations;
pub mod delivery;
pub mod error;
pub mod events;
pub mod failpoints;
pub mod idempotency;
pub mod ingest;
pub mod ledger_rows;
pub mod memory;
pub mod outbox;
pub mod signer_keys;
pub mod snapshots;
pub mod state;

pub use artifact_store::{PutArtifactOutcome, get_artifact, list_artifacts, put_artifact};
pub use commit::{AuditEntry, CommitOutcome, CommitRequest, TxOp, apply_commit};
pub use config::StoreConfig;
pub use correlations::{CorrelationOutcome, get_correlation, upsert_correlation};
pub use delivery::{
    InsertDeliveryOutcome, ack_delivery, claim_due_deliveries, insert_delivery, requeue_delivery,
    update_delivery_attempt,
};
pub use error::{StoreError, StoreResult};
pub use events::{advisory_key, append_events, load_stream};
pub use failpoints::{FailMode, FailpointRegistry, names as failpoint_names};
pub use idempotency::{IdempotencyOutcome, put_idempotency};
pub use ingest::{IngestOutcome, prune_ingest_records, put_ingest_record};
pub use memory::{MemoryStore, Mirror};
pub use outbox::{
    DLQ_PREFIX, TopicMatch, claim_outbox, enqueue_outbox, mark_failed, mark_processed, topics,
};
pub use signer_keys::{get_signer_key, put_signer_key, set_signer_key_status};
pub use snapshots::{JobSnapshot, JobStatus, MonthSnapshot, MonthStatus};
pub use state::{
    ArtifactRow, AuditRow, AuthKeyRow, BillingConfigRow, ContractRow, CorrelationRow,
    DeliveryReceipt,
    DeliveryRow, DeliveryState, IdempotencyKey, IdempotencyRecord, IngestRecord, IngestStatus,
    JournalCsvGate, LedgerEntryRow, NotificationRow, OutboxMessage, PartyRow, ReservationRow,
    SignerKeyRow, SignerKeyStatus, SnapshotRow, StoreState, StoredEvent, StreamHead, StreamKey,
};
