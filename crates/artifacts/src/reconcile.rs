//! Reconciliation of a month's artifact fan-out before bundling.
//!
//! The finance-pack assembler refuses to bundle a period whose documents
//! disagree with each other. Checks are pure; a non-empty finding list is a
//! retriable failure upstream.

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;

/// One reconciliation discrepancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileFinding {
    pub check: String,
    pub detail: String,
}

impl ReconcileFinding {
    fn new(check: &str, detail: String) -> Self {
        Self {
            check: check.to_string(),
            detail,
        }
    }
}

fn i64_at<'a>(artifact: &'a Artifact, pointer: &str) -> Option<i64> {
    artifact.body.pointer(pointer).and_then(|v| v.as_i64())
}

/// Cross-check the monthly statement against party statements, payout
/// instructions, and the GL batch. Empty result means the pack reconciles.
pub fn reconcile_finance_pack(
    statement: &Artifact,
    party_statements: &[Artifact],
    payouts: &[Artifact],
    gl_batch: &Artifact,
) -> Vec<ReconcileFinding> {
    let mut findings = Vec::new();

    let gross = i64_at(statement, "/totals/grossCents").unwrap_or(0);

    // Party statements must add back up to the statement gross.
    let party_total: i64 = party_statements
        .iter()
        .filter_map(|a| i64_at(a, "/totalCents"))
        .sum();
    if party_total != gross {
        findings.push(ReconcileFinding::new(
            "party_totals_match_gross",
            format!("party statements total {party_total}, statement gross {gross}"),
        ));
    }

    // Payouts never exceed the gross and are all positive.
    let payout_total: i64 = payouts.iter().filter_map(|a| i64_at(a, "/amountCents")).sum();
    if payout_total > gross {
        findings.push(ReconcileFinding::new(
            "payouts_within_gross",
            format!("payout total {payout_total} exceeds gross {gross}"),
        ));
    }
    for payout in payouts {
        if i64_at(payout, "/amountCents").is_none_or(|v| v <= 0) {
            findings.push(ReconcileFinding::new(
                "payouts_positive",
                format!("payout {} has non-positive amount", payout.artifact_id),
            ));
        }
    }

    // GL batch balances to zero and its clearing debits equal the gross.
    let mut gl_sum: i64 = 0;
    let mut clearing_debits: i64 = 0;
    if let Some(lines) = gl_batch.body.get("lines").and_then(|v| v.as_array()) {
        for line in lines {
            let amount = line.get("amountCents").and_then(|v| v.as_i64()).unwrap_or(0);
            gl_sum += amount;
            if line.get("accountId").and_then(|v| v.as_str()) == Some(crate::gl::ACCOUNT_CLEARING)
            {
                clearing_debits += amount;
            }
        }
    }
    if gl_sum != 0 {
        findings.push(ReconcileFinding::new(
            "gl_batch_balances",
            format!("GL batch lines sum to {gl_sum}"),
        ));
    }
    if clearing_debits != gross {
        findings.push(ReconcileFinding::new(
            "gl_clearing_matches_gross",
            format!("GL clearing debits {clearing_debits}, statement gross {gross}"),
        ));
    }

    findings
}
