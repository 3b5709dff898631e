//! Named failpoints for crash-recovery testing.
//!
//! In production every hook is a no-op. Tests arm a hook with a fail mode;
//! an armed hit returns `StoreError::Failpoint`, which aborts the current
//! unit of work exactly where a kill -9 would. The hook names are a stable
//! contract: they define where a worker may die and still recover.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{StoreError, StoreResult};

/// Stable failpoint names.
pub mod names {
    pub const LEDGER_AFTER_INSERT: &str = "ledger.apply.after_insert_before_outbox_done";
    pub const LEDGER_AFTER_POSTINGS: &str = "ledger.apply.after_postings_before_allocations";
    pub const LEDGER_AFTER_ALLOCATIONS: &str = "ledger.apply.after_allocations_before_outbox_done";
    pub const OUTBOX_AFTER_LOCK: &str = "outbox.claim.after_lock";
    pub const APPEND_AFTER_COMMIT: &str = "pg.append.after_commit";
    pub const MONTH_CLOSE_AFTER_PARTY_STATEMENTS: &str =
        "month_close.after_party_statements_before_payouts";
    pub const MONTH_CLOSE_AFTER_PAYOUTS: &str = "month_close.after_payouts_before_outbox_done";
    pub const FINANCE_PACK_AFTER_ZIP: &str = "finance_pack.after_zip_store_before_pointer";
    pub const FINANCE_PACK_AFTER_POINTER: &str = "finance_pack.after_pointer_before_outbox_done";
}

/// How an armed failpoint behaves on each hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Fail the next hit, then disarm.
    Once,
    /// Fail the next `n` hits, then disarm.
    Times(u32),
    /// Fail every hit until cleared.
    Always,
}

#[derive(Debug, Default)]
pub struct FailpointRegistry {
    armed: Mutex<HashMap<&'static str, FailMode>>,
}

impl FailpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a failpoint. Tests only; production never calls this.
    pub fn arm(&self, name: &'static str, mode: FailMode) {
        self.armed.lock().unwrap().insert(name, mode);
    }

    pub fn clear(&self, name: &'static str) {
        self.armed.lock().unwrap().remove(name);
    }

    pub fn clear_all(&self) {
        self.armed.lock().unwrap().clear();
    }

    /// Hit a failpoint: no-op unless armed.
    pub fn hit(&self, name: &'static str) -> StoreResult<()> {
        let mut armed = self.armed.lock().unwrap();
        match armed.get(name).copied() {
            None => Ok(()),
            Some(FailMode::Once) => {
                armed.remove(name);
                Err(StoreError::Failpoint(name))
            }
            Some(FailMode::Times(n)) => {
                if n <= 1 {
                    armed.remove(name);
                } else {
                    armed.insert(name, FailMode::Times(n - 1));
                }
                Err(StoreError::Failpoint(name))
            }
            Some(FailMode::Always) => Err(StoreError::Failpoint(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unarmed_hits_are_noops() {
        let registry = FailpointRegistry::new();
        assert!(registry.hit(names::LEDGER_AFTER_INSERT).is_ok());
    }

    #[test]
    fn once_fails_a_single_hit() {
        let registry = FailpointRegistry::new();
        registry.arm(names::LEDGER_AFTER_INSERT, FailMode::Once);
        assert!(registry.hit(names::LEDGER_AFTER_INSERT).is_err());
        assert!(registry.hit(names::LEDGER_AFTER_INSERT).is_ok());
    }

    #[test]
    fn times_counts_down() {
        let registry = FailpointRegistry::new();
        registry.arm(names::MONTH_CLOSE_AFTER_PAYOUTS, FailMode::Times(2));
        assert!(registry.hit(names::MONTH_CLOSE_AFTER_PAYOUTS).is_err());
        assert!(registry.hit(names::MONTH_CLOSE_AFTER_PAYOUTS).is_err());
        assert!(registry.hit(names::MONTH_CLOSE_AFTER_PAYOUTS).is_ok());
    }

    #[test]
    fn always_fails_until_cleared() {
        let registry = FailpointRegistry::new();
        registry.arm(names::FINANCE_PACK_AFTER_ZIP, FailMode::Always);
        assert!(registry.hit(names::FINANCE_PACK_AFTER_ZIP).is_err());
        assert!(registry.hit(names::FINANCE_PACK_AFTER_ZIP).is_err());
        registry.clear(names::FINANCE_PACK_AFTER_ZIP);
        assert!(registry.hit(names::FINANCE_PACK_AFTER_ZIP).is_ok());
    }
}
