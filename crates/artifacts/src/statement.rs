//! Month-close statement math.
//!
//! Everything here is a pure function of (period, generatedAt, settled jobs)
//! with jobs pre-sorted by job id, so artifact hashes are invariant across
//! reruns and across database row orderings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use settleproxy_canon::CanonError;
use settleproxy_canon::hash::canonical_timestamp;
use settleproxy_core::{CurrencyCode, PartyId};

use crate::artifact::{Artifact, types};

/// The slice of a job snapshot that the close math consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledJob {
    pub job_id: String,
    pub settled_at: DateTime<Utc>,
    pub amount_cents: i64,
    pub currency: CurrencyCode,
    pub payee_party_id: PartyId,
    /// Per-party split of the job amount. Jobs without an explicit split
    /// carry a single payee line for the full amount.
    pub allocations: Vec<PartyLine>,
}

/// One party's slice of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyLine {
    pub party_id: PartyId,
    pub party_role: String,
    pub amount_cents: i64,
}

/// Deterministic artifact id for a period-scoped document.
fn period_artifact_id(prefix: &str, period: &str) -> String {
    format!("{prefix}-{period}")
}

/// `MonthlyStatement.v1` over the period's settled jobs.
pub fn build_monthly_statement(
    period: &str,
    generated_at: DateTime<Utc>,
    jobs: &[SettledJob],
) -> Result<Artifact, CanonError> {
    let mut by_currency: BTreeMap<&str, i128> = BTreeMap::new();
    for job in jobs {
        *by_currency.entry(job.currency.as_str()).or_insert(0) += job.amount_cents as i128;
    }
    let body = json!({
        "schema": types::MONTHLY_STATEMENT,
        "period": period,
        "generatedAt": canonical_timestamp(generated_at),
        "jobs": jobs.iter().map(|j| json!({
            "jobId": j.job_id,
            "settledAt": canonical_timestamp(j.settled_at),
            "amountCents": j.amount_cents,
            "currency": j.currency.as_str(),
            "payeePartyId": j.payee_party_id.as_str(),
        })).collect::<Vec<_>>(),
        "totals": {
            "jobCount": jobs.len(),
            "grossCents": jobs.iter().map(|j| j.amount_cents as i128).sum::<i128>() as i64,
            "byCurrency": by_currency.iter()
                .map(|(c, sum)| (c.to_string(), json!(*sum as i64)))
                .collect::<serde_json::Map<String, Value>>(),
        },
    });
    Artifact::build(period_artifact_id("ms", period), types::MONTHLY_STATEMENT, body)
}

/// Sum the per-party lines across jobs, keyed `(party_id, party_role)`,
/// ordered by party id then role.
pub fn party_totals(jobs: &[SettledJob]) -> BTreeMap<(PartyId, String), i128> {
    let mut totals: BTreeMap<(PartyId, String), i128> = BTreeMap::new();
    for job in jobs {
        for line in &job.allocations {
            *totals
                .entry((line.party_id.clone(), line.party_role.clone()))
                .or_insert(0) += line.amount_cents as i128;
        }
    }
    totals
}

/// One `PartyStatement.v1` per party with a nonzero allocation.
pub fn build_party_statements(
    period: &str,
    generated_at: DateTime<Utc>,
    jobs: &[SettledJob],
) -> Result<Vec<Artifact>, CanonError> {
    let mut parties: Vec<PartyId> = party_totals(jobs)
        .into_iter()
        .filter(|(_, total)| *total != 0)
        .map(|((party, _), _)| party)
        .collect();
    parties.dedup();

    let mut out = Vec::with_capacity(parties.len());
    for party in parties {
        let lines: Vec<Value> = jobs
            .iter()
            .flat_map(|j| {
                j.allocations
                    .iter()
                    .filter(|l| l.party_id == party && l.amount_cents != 0)
                    .map(move |l| {
                        json!({
                            "jobId": j.job_id,
                            "partyRole": l.party_role,
                            "amountCents": l.amount_cents,
                        })
                    })
            })
            .collect();
        let total: i128 = jobs
            .iter()
            .flat_map(|j| &j.allocations)
            .filter(|l| l.party_id == party)
            .map(|l| l.amount_cents as i128)
            .sum();
        let body = json!({
            "schema": types::PARTY_STATEMENT,
            "period": period,
            "generatedAt": canonical_timestamp(generated_at),
            "partyId": party.as_str(),
            "lines": lines,
            "totalCents": total as i64,
        });
        out.push(Artifact::build(
            format!("ps-{period}-{}", party.as_str()),
            types::PARTY_STATEMENT,
            body,
        )?);
    }
    Ok(out)
}

/// One `PayoutInstruction.v1` per payee with a positive payee-role total.
pub fn build_payout_instructions(
    period: &str,
    generated_at: DateTime<Utc>,
    jobs: &[SettledJob],
) -> Result<Vec<Artifact>, CanonError> {
    // Payout amounts come from payee-role allocation lines, grouped by
    // (party, currency of the contributing jobs).
    let mut totals: BTreeMap<(PartyId, String), i128> = BTreeMap::new();
    for job in jobs {
        for line in &job.allocations {
            if line.party_role == "payee" {
                *totals
                    .entry((line.party_id.clone(), job.currency.as_str().to_string()))
                    .or_insert(0) += line.amount_cents as i128;
            }
        }
    }

    let mut out = Vec::new();
    for ((party, currency), total) in totals {
        if total <= 0 {
            continue;
        }
        let body = json!({
            "schema": types::PAYOUT_INSTRUCTION,
            "period": period,
            "generatedAt": canonical_timestamp(generated_at),
            "payeePartyId": party.as_str(),
            "currency": currency,
            "amountCents": total as i64,
        });
        out.push(Artifact::build(
            format!("payout-{period}-{}", party.as_str()),
            types::PAYOUT_INSTRUCTION,
            body,
        )?);
    }
    Ok(out)
}
