//! Correlation keys: external site keys mapped to jobs.

use chrono::{DateTime, Utc};

use settleproxy_core::{AggregateId, TenantId};

use crate::error::{StoreError, StoreResult};
use crate::state::{CorrelationRow, StoreState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationOutcome {
    Inserted,
    /// Same job id: expiry refreshed.
    Refreshed,
    /// Different job id replaced under `force`.
    Overwritten,
}

/// Upsert a correlation.
///
/// - no row: insert
/// - same job id: refresh `expires_at`
/// - different job id: `CorrelationConflict` unless `force`
pub fn upsert_correlation(
    state: &mut StoreState,
    tenant_id: &TenantId,
    site_id: &str,
    correlation_key: &str,
    job_id: &AggregateId,
    expires_at: DateTime<Utc>,
    force: bool,
    now: DateTime<Utc>,
) -> StoreResult<CorrelationOutcome> {
    let table_key = (
        tenant_id.clone(),
        site_id.to_string(),
        correlation_key.to_string(),
    );

    if let Some(existing) = state.correlations.get_mut(&table_key) {
        if existing.job_id == *job_id {
            existing.expires_at = expires_at;
            existing.updated_at = now;
            return Ok(CorrelationOutcome::Refreshed);
        }
        if !force {
            return Err(StoreError::CorrelationConflict {
                existing_job_id: existing.job_id.as_str().to_string(),
            });
        }
        existing.job_id = job_id.clone();
        existing.expires_at = expires_at;
        existing.updated_at = now;
        return Ok(CorrelationOutcome::Overwritten);
    }

    state.correlations.insert(
        table_key,
        CorrelationRow {
            site_id: site_id.to_string(),
            correlation_key: correlation_key.to_string(),
            job_id: job_id.clone(),
            expires_at,
            updated_at: now,
        },
    );
    Ok(CorrelationOutcome::Inserted)
}

pub fn get_correlation(
    state: &StoreState,
    tenant_id: &TenantId,
    site_id: &str,
    correlation_key: &str,
) -> Option<CorrelationRow> {
    state
        .correlations
        .get(&(
            tenant_id.clone(),
            site_id.to_string(),
            correlation_key.to_string(),
        ))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn conflict_unless_forced() {
        let mut state = StoreState::new();
        let tenant = TenantId::default_tenant();
        let j1 = AggregateId::new("J1");
        let j2 = AggregateId::new("J2");

        assert_eq!(
            upsert_correlation(&mut state, &tenant, "siteS", "keyK", &j1, at(28), false, at(1))
                .unwrap(),
            CorrelationOutcome::Inserted
        );

        // Same job refreshes.
        assert_eq!(
            upsert_correlation(&mut state, &tenant, "siteS", "keyK", &j1, at(27), false, at(2))
                .unwrap(),
            CorrelationOutcome::Refreshed
        );
        assert_eq!(
            get_correlation(&state, &tenant, "siteS", "keyK")
                .unwrap()
                .expires_at,
            at(27)
        );

        // Different job conflicts and reports the holder.
        match upsert_correlation(&mut state, &tenant, "siteS", "keyK", &j2, at(28), false, at(3)) {
            Err(StoreError::CorrelationConflict { existing_job_id }) => {
                assert_eq!(existing_job_id, "J1");
            }
            other => panic!("expected correlation conflict, got {other:?}"),
        }

        // Force overwrites.
        assert_eq!(
            upsert_correlation(&mut state, &tenant, "siteS", "keyK", &j2, at(28), true, at(4))
                .unwrap(),
            CorrelationOutcome::Overwritten
        );
        assert_eq!(
            get_correlation(&state, &tenant, "siteS", "keyK").unwrap().job_id,
            j2
        );
    }
}
