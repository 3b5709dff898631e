//! Journal entries and postings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use settleproxy_core::{CurrencyCode, DomainError, DomainResult};

/// One signed leg of a journal entry.
///
/// Amounts are signed cents; debits positive, credits negative. The entry is
/// balanced when the legs of each currency sum to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Posting {
    pub id: String,
    pub account_id: String,
    pub amount_cents: i64,
    pub currency: CurrencyCode,
}

/// A double-entry journal entry, applied to the ledger exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub entry_id: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub postings: Vec<Posting>,
}

/// Validate the double-entry invariant.
///
/// - at least one posting
/// - posting ids unique within the entry
/// - for each currency, posting amounts sum to zero
pub fn validate_entry(entry: &JournalEntry) -> DomainResult<()> {
    if entry.entry_id.is_empty() {
        return Err(DomainError::validation("journal entry id must not be empty"));
    }
    if entry.postings.is_empty() {
        return Err(DomainError::validation("journal entry must have postings"));
    }

    let mut seen_ids = HashMap::new();
    let mut sums: HashMap<&CurrencyCode, i128> = HashMap::new();
    for posting in &entry.postings {
        if posting.id.is_empty() {
            return Err(DomainError::validation("posting id must not be empty"));
        }
        if seen_ids.insert(posting.id.as_str(), ()).is_some() {
            return Err(DomainError::validation(format!(
                "duplicate posting id '{}'",
                posting.id
            )));
        }
        *sums.entry(&posting.currency).or_insert(0) += posting.amount_cents as i128;
    }

    for (currency, sum) in sums {
        if sum != 0 {
            return Err(DomainError::invariant(format!(
                "postings must sum to zero per currency ({currency}: {sum})"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
    }

    fn posting(id: &str, account: &str, cents: i64) -> Posting {
        Posting {
            id: id.to_string(),
            account_id: account.to_string(),
            amount_cents: cents,
            currency: CurrencyCode::usd(),
        }
    }

    fn entry(postings: Vec<Posting>) -> JournalEntry {
        JournalEntry {
            entry_id: "L1".to_string(),
            at: at(),
            memo: None,
            postings,
        }
    }

    #[test]
    fn balanced_entry_validates() {
        let e = entry(vec![posting("p1", "acctA", 100), posting("p2", "acctB", -100)]);
        assert!(validate_entry(&e).is_ok());
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let e = entry(vec![posting("p1", "acctA", 100), posting("p2", "acctB", -90)]);
        assert!(matches!(
            validate_entry(&e),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn duplicate_posting_ids_are_rejected() {
        let e = entry(vec![posting("p1", "acctA", 100), posting("p1", "acctB", -100)]);
        assert!(matches!(validate_entry(&e), Err(DomainError::Validation(_))));
    }

    #[test]
    fn empty_postings_are_rejected() {
        let e = entry(vec![]);
        assert!(validate_entry(&e).is_err());
    }

    #[test]
    fn per_currency_sums_are_independent() {
        let eur = CurrencyCode::new("EUR").unwrap();
        let mut p3 = posting("p3", "acctC", 50);
        p3.currency = eur.clone();
        let mut p4 = posting("p4", "acctD", -50);
        p4.currency = eur;
        let e = entry(vec![
            posting("p1", "acctA", 100),
            posting("p2", "acctB", -100),
            p3,
            p4,
        ]);
        assert!(validate_entry(&e).is_ok());
    }

    proptest! {
        /// Any entry built from mirrored debit/credit pairs validates.
        #[test]
        fn mirrored_pairs_always_balance(
            amounts in prop::collection::vec(1i64..1_000_000, 1..8)
        ) {
            let mut postings = Vec::new();
            for (i, a) in amounts.iter().enumerate() {
                postings.push(posting(&format!("d{i}"), "acctA", *a));
                postings.push(posting(&format!("c{i}"), "acctB", -*a));
            }
            prop_assert!(validate_entry(&entry(postings)).is_ok());
        }
    }
}
