//! Ledger application pipeline (`LEDGER_ENTRY_APPLY`).
//!
//! Applies a journal entry exactly once: the entry insert and balance
//! upserts run in one transaction keyed by the natural entry id, the
//! allocation rows in a second. Failpoints sit between the transactions, so
//! a crash at any of them leaves a state the rerun repairs without doubling
//! balances or duplicating allocations.

use serde::Deserialize;

use settleproxy_core::AggregateId;
use settleproxy_ledger::{
    AllocationProfile, JournalEntry, OperatorCommission, PartyShare, compute_allocations,
};
use settleproxy_store::{
    JobSnapshot, OutboxMessage, StreamKey, failpoint_names, ledger_rows,
};

use crate::error::PipelineError;
use crate::runtime::Runtime;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerApplyPayload {
    entry: JournalEntry,
    #[serde(default)]
    job_id: Option<String>,
}

pub fn run(runtime: &Runtime, message: &OutboxMessage) -> Result<Option<String>, PipelineError> {
    let payload: LedgerApplyPayload = serde_json::from_value(message.payload.clone())
        .map_err(|e| PipelineError::Payload(e.to_string()))?;
    let store = runtime.store();
    let tenant_id = &message.tenant_id;

    // Transaction A: entry row + balances, insert-if-absent by entry id.
    let entry = payload.entry;
    let job_id = payload.job_id.clone().map(AggregateId::new);
    let was_new = store.transact(|state| {
        ledger_rows::apply_entry_rows(
            state,
            tenant_id,
            &entry,
            job_id.as_ref(),
            chrono::Utc::now(),
        )
    })?;
    if was_new {
        store.mirror_ledger_entry(tenant_id, &entry);
    }

    store.failpoints().hit(failpoint_names::LEDGER_AFTER_INSERT)?;
    store.failpoints().hit(failpoint_names::LEDGER_AFTER_POSTINGS)?;

    // Transaction B: allocations derived from the job's snapshot (and its
    // operator contract, when present).
    if let Some(job_id) = &job_id {
        let profile = allocation_profile(runtime, message, job_id)?;
        if let Some(profile) = profile {
            let allocations = compute_allocations(&entry, &profile);
            if !allocations.is_empty() {
                store.transact(|state| {
                    ledger_rows::insert_allocations(state, tenant_id, &allocations);
                    Ok(())
                })?;
            }
        }
    }

    store
        .failpoints()
        .hit(failpoint_names::LEDGER_AFTER_ALLOCATIONS)?;

    Ok(None)
}

/// Build the allocation profile from the job snapshot. A message naming a
/// job the store has never seen yields no allocations (the entry itself
/// still applies).
fn allocation_profile(
    runtime: &Runtime,
    message: &OutboxMessage,
    job_id: &AggregateId,
) -> Result<Option<AllocationProfile>, PipelineError> {
    let store = runtime.store();
    let key = StreamKey::new(message.tenant_id.clone(), "job", job_id.clone());
    let Some(row) = store.snapshot(&key)? else {
        return Ok(None);
    };
    let snapshot: JobSnapshot = serde_json::from_value(row.snapshot_json)
        .map_err(|e| PipelineError::Payload(format!("job snapshot: {e}")))?;

    let Some(payee) = snapshot.payee_party_id.clone() else {
        return Ok(None);
    };

    let shares: Vec<PartyShare> = snapshot
        .effective_allocations()
        .into_iter()
        .map(|line| PartyShare {
            party_id: line.party_id,
            party_role: line.party_role,
            amount_cents: line.amount_cents,
        })
        .collect();

    let operator_commission = match &snapshot.contract_hash {
        Some(contract_hash) => store
            .read(|state| {
                state
                    .contracts
                    .get(&(message.tenant_id.clone(), contract_hash.clone()))
                    .cloned()
            })?
            .map(|contract| OperatorCommission {
                party_id: contract.operator_party_id,
                commission_bps: contract.commission_bps,
            }),
        None => None,
    };

    Ok(Some(AllocationProfile {
        payee,
        shares,
        operator_commission,
    }))
}
