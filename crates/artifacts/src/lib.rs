//! Financial artifacts: content-hashed documents produced by month close and
//! the finance-pack assembler, plus the pure math that derives them from job
//! snapshots and the routing that turns them into deliveries.

pub mod artifact;
pub mod gl;
pub mod reconcile;
pub mod routing;
pub mod statement;

pub use artifact::{Artifact, types};
pub use gl::{GlAccountMap, build_gl_batch, build_journal_csv_artifact, render_journal_csv};
pub use reconcile::{ReconcileFinding, reconcile_finance_pack};
pub use routing::{
    DeliveryRequest, Destination, dedupe_key, priority_for, route_artifact, scope_key_for,
};
pub use statement::{
    PartyLine, SettledJob, build_monthly_statement, build_party_statements,
    build_payout_instructions, party_totals,
};
