//! Ledger tables: journal entries, materialized balances, allocations.
//!
//! All inserts are keyed by natural ids with insert-if-absent semantics, so
//! the ledger-apply pipeline can be re-run from any crash point without
//! doubling balances or duplicating allocations.

use chrono::{DateTime, Utc};

use settleproxy_core::{AggregateId, TenantId};
use settleproxy_ledger::{Allocation, JournalEntry, validate_entry};

use crate::error::StoreResult;
use crate::state::{LedgerEntryRow, StoreState};

/// Insert a journal entry and fold its postings into balances.
///
/// Returns `true` when the entry row was new; balances are only touched in
/// that case (re-applying a seen entry is a no-op).
pub fn apply_entry_rows(
    state: &mut StoreState,
    tenant_id: &TenantId,
    entry: &JournalEntry,
    job_id: Option<&AggregateId>,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    validate_entry(entry)?;

    let entry_key = (tenant_id.clone(), entry.entry_id.clone());
    if state.ledger_entries.contains_key(&entry_key) {
        return Ok(false);
    }

    state.ledger_entries.insert(
        entry_key,
        LedgerEntryRow {
            entry: entry.clone(),
            job_id: job_id.cloned(),
            applied_at: now,
        },
    );
    for posting in &entry.postings {
        *state
            .ledger_balances
            .entry((tenant_id.clone(), posting.account_id.clone()))
            .or_insert(0) += posting.amount_cents as i128;
    }
    Ok(true)
}

/// Insert allocation rows, skipping ones already present. Returns the number
/// of rows actually inserted.
pub fn insert_allocations(
    state: &mut StoreState,
    tenant_id: &TenantId,
    allocations: &[Allocation],
) -> usize {
    let mut inserted = 0;
    for allocation in allocations {
        let key = (
            tenant_id.clone(),
            allocation.entry_id.clone(),
            allocation.posting_id.clone(),
            allocation.party_id.clone(),
        );
        if state.ledger_allocations.contains_key(&key) {
            continue;
        }
        state.ledger_allocations.insert(key, allocation.clone());
        inserted += 1;
    }
    inserted
}

pub fn balance(state: &StoreState, tenant_id: &TenantId, account_id: &str) -> i128 {
    state
        .ledger_balances
        .get(&(tenant_id.clone(), account_id.to_string()))
        .copied()
        .unwrap_or(0)
}

/// Allocations of one entry, in `(posting_id, party_id)` order.
pub fn allocations_for_entry(
    state: &StoreState,
    tenant_id: &TenantId,
    entry_id: &str,
) -> Vec<Allocation> {
    state
        .ledger_allocations
        .iter()
        .filter(|((t, e, _, _), _)| t == tenant_id && e == entry_id)
        .map(|(_, a)| a.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use settleproxy_core::{CurrencyCode, PartyId};
    use settleproxy_ledger::Posting;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
    }

    fn entry(id: &str, amount: i64) -> JournalEntry {
        JournalEntry {
            entry_id: id.to_string(),
            at: now(),
            memo: None,
            postings: vec![
                Posting {
                    id: format!("{id}-d"),
                    account_id: "acctA".to_string(),
                    amount_cents: amount,
                    currency: CurrencyCode::usd(),
                },
                Posting {
                    id: format!("{id}-c"),
                    account_id: "acctB".to_string(),
                    amount_cents: -amount,
                    currency: CurrencyCode::usd(),
                },
            ],
        }
    }

    #[test]
    fn reapplying_entry_does_not_double_balances() {
        let mut state = StoreState::new();
        let tenant = TenantId::default_tenant();
        assert!(apply_entry_rows(&mut state, &tenant, &entry("L1", 100), None, now()).unwrap());
        assert!(!apply_entry_rows(&mut state, &tenant, &entry("L1", 100), None, now()).unwrap());
        assert_eq!(balance(&state, &tenant, "acctA"), 100);
        assert_eq!(balance(&state, &tenant, "acctB"), -100);
    }

    #[test]
    fn unbalanced_entries_are_rejected_before_any_write() {
        let mut state = StoreState::new();
        let tenant = TenantId::default_tenant();
        let mut bad = entry("L1", 100);
        bad.postings[1].amount_cents = -90;
        assert!(apply_entry_rows(&mut state, &tenant, &bad, None, now()).is_err());
        assert!(state.ledger_entries.is_empty());
        assert_eq!(balance(&state, &tenant, "acctA"), 0);
    }

    #[test]
    fn allocation_inserts_are_idempotent_by_key() {
        let mut state = StoreState::new();
        let tenant = TenantId::default_tenant();
        let rows = vec![
            Allocation {
                entry_id: "L1".to_string(),
                posting_id: "L1-d".to_string(),
                party_id: PartyId::new("P1"),
                party_role: "payee".to_string(),
                amount_cents: 100,
            },
            Allocation {
                entry_id: "L1".to_string(),
                posting_id: "L1-c".to_string(),
                party_id: PartyId::new("P1"),
                party_role: "payee".to_string(),
                amount_cents: -100,
            },
        ];
        assert_eq!(insert_allocations(&mut state, &tenant, &rows), 2);
        assert_eq!(insert_allocations(&mut state, &tenant, &rows), 0);
        assert_eq!(allocations_for_entry(&state, &tenant, "L1").len(), 2);
    }
}
