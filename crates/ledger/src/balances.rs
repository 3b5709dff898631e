//! Process-local mirror of ledger balances.
//!
//! The database is canonical; this projection exists for fast reads inside a
//! single process and is rebuilt from scratch on restart. Application is
//! idempotent by entry id, matching the exactly-once semantics of the
//! ledger-apply pipeline.

use std::collections::{HashMap, HashSet};

use settleproxy_core::TenantId;

use crate::entry::JournalEntry;

/// Per-tenant account balances, entry application tracked by id.
#[derive(Debug, Default)]
pub struct BalancesProjection {
    applied: HashSet<(TenantId, String)>,
    balances: HashMap<(TenantId, String), i128>,
}

impl BalancesProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an entry. Returns false (and changes nothing) when the entry
    /// was already applied for this tenant.
    pub fn apply_entry(&mut self, tenant_id: &TenantId, entry: &JournalEntry) -> bool {
        let key = (tenant_id.clone(), entry.entry_id.clone());
        if !self.applied.insert(key) {
            return false;
        }
        for posting in &entry.postings {
            *self
                .balances
                .entry((tenant_id.clone(), posting.account_id.clone()))
                .or_insert(0) += posting.amount_cents as i128;
        }
        true
    }

    pub fn balance(&self, tenant_id: &TenantId, account_id: &str) -> i128 {
        self.balances
            .get(&(tenant_id.clone(), account_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_applied(&self, tenant_id: &TenantId, entry_id: &str) -> bool {
        self.applied
            .contains(&(tenant_id.clone(), entry_id.to_string()))
    }

    /// Drop everything for one tenant (rebuild support).
    pub fn clear_tenant(&mut self, tenant_id: &TenantId) {
        self.applied.retain(|(t, _)| t != tenant_id);
        self.balances.retain(|(t, _), _| t != tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Posting;
    use chrono::{TimeZone, Utc};
    use settleproxy_core::CurrencyCode;

    fn entry(id: &str, amount: i64) -> JournalEntry {
        JournalEntry {
            entry_id: id.to_string(),
            at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            memo: None,
            postings: vec![
                Posting {
                    id: "p1".to_string(),
                    account_id: "acctA".to_string(),
                    amount_cents: amount,
                    currency: CurrencyCode::usd(),
                },
                Posting {
                    id: "p2".to_string(),
                    account_id: "acctB".to_string(),
                    amount_cents: -amount,
                    currency: CurrencyCode::usd(),
                },
            ],
        }
    }

    #[test]
    fn reapplying_an_entry_does_not_double_balances() {
        let tenant = TenantId::default_tenant();
        let mut mirror = BalancesProjection::new();
        assert!(mirror.apply_entry(&tenant, &entry("L1", 100)));
        assert!(!mirror.apply_entry(&tenant, &entry("L1", 100)));
        assert_eq!(mirror.balance(&tenant, "acctA"), 100);
        assert_eq!(mirror.balance(&tenant, "acctB"), -100);
    }

    #[test]
    fn tenants_are_isolated() {
        let t1 = TenantId::new("t1");
        let t2 = TenantId::new("t2");
        let mut mirror = BalancesProjection::new();
        mirror.apply_entry(&t1, &entry("L1", 100));
        assert_eq!(mirror.balance(&t2, "acctA"), 0);
        mirror.clear_tenant(&t1);
        assert_eq!(mirror.balance(&t1, "acctA"), 0);
        assert!(!mirror.is_applied(&t1, "L1"));
    }
}
