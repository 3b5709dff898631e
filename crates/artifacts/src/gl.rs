//! GL batch and journal CSV rendering.
//!
//! Settlement postings use two internal accounts: a clearing account debited
//! for the gross and a payable account credited for the same amount. GL
//! codes come from the tenant's finance account map; the journal CSV is
//! gated on every internal account resolving to a GL code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use settleproxy_canon::CanonError;
use settleproxy_canon::hash::canonical_timestamp;

use crate::artifact::{Artifact, types};
use crate::statement::SettledJob;

pub const ACCOUNT_CLEARING: &str = "settlement.clearing";
pub const ACCOUNT_PAYABLE: &str = "settlement.payable";

/// Tenant finance account map: internal account id -> GL code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlAccountMap {
    mappings: BTreeMap<String, String>,
}

impl GlAccountMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account_id: impl Into<String>, gl_code: impl Into<String>) {
        self.mappings.insert(account_id.into(), gl_code.into());
    }

    pub fn resolve(&self, account_id: &str) -> Option<&str> {
        self.mappings.get(account_id).map(String::as_str)
    }
}

/// `GLBatch.v1`: per-currency settlement totals as balanced GL lines.
///
/// Unmapped accounts fall back to the internal account id; the batch always
/// emits (the CSV gate is stricter).
pub fn build_gl_batch(
    period: &str,
    generated_at: DateTime<Utc>,
    jobs: &[SettledJob],
    map: &GlAccountMap,
) -> Result<Artifact, CanonError> {
    let mut by_currency: BTreeMap<&str, i128> = BTreeMap::new();
    for job in jobs {
        *by_currency.entry(job.currency.as_str()).or_insert(0) += job.amount_cents as i128;
    }

    let mut lines = Vec::new();
    for (currency, gross) in &by_currency {
        let debit_code = map.resolve(ACCOUNT_CLEARING).unwrap_or(ACCOUNT_CLEARING);
        let credit_code = map.resolve(ACCOUNT_PAYABLE).unwrap_or(ACCOUNT_PAYABLE);
        lines.push(json!({
            "glCode": debit_code,
            "accountId": ACCOUNT_CLEARING,
            "currency": currency,
            "amountCents": *gross as i64,
        }));
        lines.push(json!({
            "glCode": credit_code,
            "accountId": ACCOUNT_PAYABLE,
            "currency": currency,
            "amountCents": -(*gross as i64),
        }));
    }

    let body = json!({
        "schema": types::GL_BATCH,
        "period": period,
        "generatedAt": canonical_timestamp(generated_at),
        "lines": lines,
    });
    Artifact::build(format!("gl-{period}"), types::GL_BATCH, body)
}

/// Render the period's journal as CSV.
///
/// Returns the CSV text plus the sorted list of internal accounts with no GL
/// mapping; the caller's gate mode decides whether unmapped accounts skip
/// the artifact or fail the close.
pub fn render_journal_csv(jobs: &[SettledJob], map: &GlAccountMap) -> (String, Vec<String>) {
    let mut unmapped: Vec<String> = Vec::new();
    let mut resolve = |account: &str, unmapped: &mut Vec<String>| -> String {
        match map.resolve(account) {
            Some(code) => code.to_string(),
            None => {
                if !unmapped.iter().any(|a| a == account) {
                    unmapped.push(account.to_string());
                }
                account.to_string()
            }
        }
    };

    let mut csv = String::from("entryId,postingId,accountId,glCode,amountCents,currency,jobId\n");
    for job in jobs {
        let entry_id = format!("je-{}", job.job_id);
        let debit_code = resolve(ACCOUNT_CLEARING, &mut unmapped);
        let credit_code = resolve(ACCOUNT_PAYABLE, &mut unmapped);
        csv.push_str(&format!(
            "{entry_id},{entry_id}-d,{ACCOUNT_CLEARING},{debit_code},{},{},{}\n",
            job.amount_cents,
            job.currency.as_str(),
            job.job_id,
        ));
        csv.push_str(&format!(
            "{entry_id},{entry_id}-c,{ACCOUNT_PAYABLE},{credit_code},{},{},{}\n",
            -job.amount_cents,
            job.currency.as_str(),
            job.job_id,
        ));
    }
    unmapped.sort();
    (csv, unmapped)
}

/// Wrap rendered CSV into a `JournalCsv.v1` artifact.
pub fn build_journal_csv_artifact(
    period: &str,
    generated_at: DateTime<Utc>,
    csv: &str,
) -> Result<Artifact, CanonError> {
    let row_count = csv.lines().count().saturating_sub(1);
    let body = json!({
        "schema": types::JOURNAL_CSV,
        "period": period,
        "generatedAt": canonical_timestamp(generated_at),
        "csv": csv,
        "rowCount": row_count,
    });
    Artifact::build(format!("jcsv-{period}"), types::JOURNAL_CSV, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::tests::job;
    use chrono::TimeZone;

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn full_map() -> GlAccountMap {
        let mut map = GlAccountMap::new();
        map.insert(ACCOUNT_CLEARING, "1000");
        map.insert(ACCOUNT_PAYABLE, "2000");
        map
    }

    #[test]
    fn gl_batch_balances_per_currency() {
        let jobs = vec![job("J1", "P1", 5000), job("J2", "P2", 7000)];
        let batch = build_gl_batch("2026-02", generated_at(), &jobs, &full_map()).unwrap();
        let lines = batch.body["lines"].as_array().unwrap();
        let sum: i64 = lines
            .iter()
            .map(|l| l["amountCents"].as_i64().unwrap())
            .sum();
        assert_eq!(sum, 0);
        assert_eq!(lines[0]["glCode"], "1000");
    }

    #[test]
    fn csv_reports_unmapped_accounts() {
        let jobs = vec![job("J1", "P1", 5000)];
        let (csv, unmapped) = render_journal_csv(&jobs, &GlAccountMap::new());
        assert_eq!(
            unmapped,
            vec![ACCOUNT_CLEARING.to_string(), ACCOUNT_PAYABLE.to_string()]
        );
        assert!(csv.starts_with("entryId,"));
        assert_eq!(csv.lines().count(), 3);

        let (_, unmapped) = render_journal_csv(&jobs, &full_map());
        assert!(unmapped.is_empty());
    }

    #[test]
    fn csv_artifact_counts_rows() {
        let jobs = vec![job("J1", "P1", 5000), job("J2", "P2", 7000)];
        let (csv, _) = render_journal_csv(&jobs, &full_map());
        let artifact = build_journal_csv_artifact("2026-02", generated_at(), &csv).unwrap();
        assert_eq!(artifact.body["rowCount"], 4);
    }
}
