//! Deterministic per-party allocation of postings.
//!
//! Each posting of an applied entry is split across the parties of the job
//! that produced it. The split must be exact (allocation amounts sum to the
//! posting amount) and deterministic regardless of input ordering, because
//! allocation rows are inserted with ON CONFLICT DO NOTHING and re-running
//! the pipeline must produce byte-identical rows.

use serde::{Deserialize, Serialize};

use settleproxy_core::PartyId;

use crate::entry::JournalEntry;

/// A party's weight in the split, taken from the job snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyShare {
    pub party_id: PartyId,
    pub party_role: String,
    /// Non-negative weight in cents (the job-level allocation amount).
    pub amount_cents: i64,
}

/// Optional operator carve-out from a content-addressed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCommission {
    pub party_id: PartyId,
    /// Basis points of each posting carved out before the share split.
    pub commission_bps: u32,
}

/// Everything the split needs, derived from a job snapshot plus contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationProfile {
    pub payee: PartyId,
    pub shares: Vec<PartyShare>,
    pub operator_commission: Option<OperatorCommission>,
}

/// One allocation row: a party's slice of one posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub entry_id: String,
    pub posting_id: String,
    pub party_id: PartyId,
    pub party_role: String,
    pub amount_cents: i64,
}

/// Split every posting of `entry` across the profile's parties.
///
/// Rules:
/// - the operator commission (if any) is carved out first, truncated toward
///   zero
/// - the remainder is split across shares proportionally to their weights,
///   floor division, parties visited in `party_id` order
/// - leftover cents go to the payee (falling back to the largest-weight
///   party when the payee holds no share)
/// - a profile with zero total weight allocates nothing
///
/// For every posting, the returned amounts sum exactly to the posting
/// amount (or to zero when no allocation applies).
pub fn compute_allocations(entry: &JournalEntry, profile: &AllocationProfile) -> Vec<Allocation> {
    let mut shares: Vec<&PartyShare> = profile
        .shares
        .iter()
        .filter(|s| s.amount_cents > 0)
        .collect();
    shares.sort_by(|a, b| a.party_id.cmp(&b.party_id));

    let total_weight: i128 = shares.iter().map(|s| s.amount_cents as i128).sum();
    if total_weight == 0 && profile.operator_commission.is_none() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for posting in &entry.postings {
        let amount = posting.amount_cents as i128;

        let commission = match &profile.operator_commission {
            Some(c) => amount * c.commission_bps as i128 / 10_000,
            None => 0,
        };
        let remainder_pool = amount - commission;

        let mut allocated: i128 = 0;
        let mut rows: Vec<Allocation> = Vec::with_capacity(shares.len() + 1);

        if total_weight > 0 {
            for share in &shares {
                let slice = remainder_pool * share.amount_cents as i128 / total_weight;
                allocated += slice;
                rows.push(Allocation {
                    entry_id: entry.entry_id.clone(),
                    posting_id: posting.id.clone(),
                    party_id: share.party_id.clone(),
                    party_role: share.party_role.clone(),
                    amount_cents: slice as i64,
                });
            }
            // Floor-division dust goes to the payee so the posting sum is exact.
            let dust = remainder_pool - allocated;
            if dust != 0 {
                let target_idx = rows
                    .iter()
                    .position(|r| r.party_id == profile.payee)
                    .or_else(|| {
                        rows.iter()
                            .enumerate()
                            .max_by_key(|(_, r)| r.amount_cents)
                            .map(|(i, _)| i)
                    });
                if let Some(idx) = target_idx {
                    rows[idx].amount_cents += dust as i64;
                }
            }
        } else {
            // No shares but a contract exists: everything after the
            // carve-out belongs to the payee.
            rows.push(Allocation {
                entry_id: entry.entry_id.clone(),
                posting_id: posting.id.clone(),
                party_id: profile.payee.clone(),
                party_role: "payee".to_string(),
                amount_cents: remainder_pool as i64,
            });
        }

        if commission != 0 {
            if let Some(c) = &profile.operator_commission {
                rows.push(Allocation {
                    entry_id: entry.entry_id.clone(),
                    posting_id: posting.id.clone(),
                    party_id: c.party_id.clone(),
                    party_role: "operator".to_string(),
                    amount_cents: commission as i64,
                });
            }
        }

        out.extend(rows.into_iter().filter(|r| r.amount_cents != 0));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Posting;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use settleproxy_core::CurrencyCode;

    fn entry(amounts: &[i64]) -> JournalEntry {
        JournalEntry {
            entry_id: "L1".to_string(),
            at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            memo: None,
            postings: amounts
                .iter()
                .enumerate()
                .map(|(i, a)| Posting {
                    id: format!("p{i}"),
                    account_id: format!("acct{i}"),
                    amount_cents: *a,
                    currency: CurrencyCode::usd(),
                })
                .collect(),
        }
    }

    fn share(party: &str, role: &str, cents: i64) -> PartyShare {
        PartyShare {
            party_id: PartyId::new(party),
            party_role: role.to_string(),
            amount_cents: cents,
        }
    }

    fn posting_sums(entry: &JournalEntry, allocations: &[Allocation]) -> Vec<(String, i128)> {
        entry
            .postings
            .iter()
            .map(|p| {
                let sum: i128 = allocations
                    .iter()
                    .filter(|a| a.posting_id == p.id)
                    .map(|a| a.amount_cents as i128)
                    .sum();
                (p.id.clone(), sum)
            })
            .collect()
    }

    #[test]
    fn allocations_conserve_posting_amounts() {
        let e = entry(&[1001, -1001]);
        let profile = AllocationProfile {
            payee: PartyId::new("P1"),
            shares: vec![share("P1", "payee", 70), share("P2", "partner", 30)],
            operator_commission: None,
        };
        let allocations = compute_allocations(&e, &profile);
        for (posting_id, sum) in posting_sums(&e, &allocations) {
            let amount = e
                .postings
                .iter()
                .find(|p| p.id == posting_id)
                .unwrap()
                .amount_cents as i128;
            assert_eq!(sum, amount, "posting {posting_id}");
        }
    }

    #[test]
    fn zero_weight_profile_allocates_nothing() {
        let e = entry(&[100, -100]);
        let profile = AllocationProfile {
            payee: PartyId::new("P1"),
            shares: vec![],
            operator_commission: None,
        };
        assert!(compute_allocations(&e, &profile).is_empty());
    }

    #[test]
    fn operator_commission_is_carved_out_first() {
        let e = entry(&[10_000]);
        let profile = AllocationProfile {
            payee: PartyId::new("P1"),
            shares: vec![share("P1", "payee", 1)],
            operator_commission: Some(OperatorCommission {
                party_id: PartyId::new("OP"),
                commission_bps: 250,
            }),
        };
        let allocations = compute_allocations(&e, &profile);
        let op: i64 = allocations
            .iter()
            .filter(|a| a.party_id.as_str() == "OP")
            .map(|a| a.amount_cents)
            .sum();
        assert_eq!(op, 250);
        let total: i64 = allocations.iter().map(|a| a.amount_cents).sum();
        assert_eq!(total, 10_000);
    }

    #[test]
    fn result_is_invariant_to_share_order() {
        let e = entry(&[997, -997]);
        let mut profile = AllocationProfile {
            payee: PartyId::new("P2"),
            shares: vec![
                share("P3", "partner", 10),
                share("P1", "partner", 20),
                share("P2", "payee", 70),
            ],
            operator_commission: None,
        };
        let a = compute_allocations(&e, &profile);
        profile.shares.reverse();
        let b = compute_allocations(&e, &profile);
        assert_eq!(a, b);
    }

    proptest! {
        /// Conservation: for random amounts and weights, allocation sums
        /// equal posting amounts exactly.
        #[test]
        fn conservation_holds(
            amount in -1_000_000i64..1_000_000,
            w1 in 0i64..1000,
            w2 in 0i64..1000,
            w3 in 0i64..1000,
            bps in prop::option::of(0u32..2000),
        ) {
            prop_assume!(amount != 0);
            let e = entry(&[amount]);
            let profile = AllocationProfile {
                payee: PartyId::new("P1"),
                shares: vec![
                    share("P1", "payee", w1),
                    share("P2", "partner", w2),
                    share("P3", "partner", w3),
                ],
                operator_commission: bps.map(|b| OperatorCommission {
                    party_id: PartyId::new("OP"),
                    commission_bps: b,
                }),
            };
            let allocations = compute_allocations(&e, &profile);
            let sum: i128 = allocations.iter().map(|a| a.amount_cents as i128).sum();
            if w1 + w2 + w3 == 0 && profile.operator_commission.is_none() {
                prop_assert_eq!(sum, 0);
            } else if w1 + w2 + w3 == 0 {
                // Carve-out plus payee remainder still conserves.
                prop_assert_eq!(sum, amount as i128);
            } else {
                prop_assert_eq!(sum, amount as i128);
            }
        }
    }
}
