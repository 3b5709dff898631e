//! Double-entry ledger domain: journal entries, postings, per-party
//! allocations, and the process-local balances mirror.

pub mod allocation;
pub mod balances;
pub mod entry;

pub use allocation::{Allocation, AllocationProfile, OperatorCommission, PartyShare, compute_allocations};
pub use balances::BalancesProjection;
pub use entry::{JournalEntry, Posting, validate_entry};
