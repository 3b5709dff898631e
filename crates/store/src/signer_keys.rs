//! Per-tenant signer-key lifecycle.
//!
//! Keys move `active -> rotated -> revoked`. Lifecycle timestamps are
//! write-once: setting a status again keeps the first `rotated_at` /
//! `revoked_at` (COALESCE semantics).

use chrono::{DateTime, Utc};

use settleproxy_core::TenantId;

use crate::error::{StoreError, StoreResult};
use crate::state::{SignerKeyRow, SignerKeyStatus, StoreState};

/// Upsert a signer key. A fresh key starts `active`; re-putting an existing
/// key refreshes its public key and purpose but keeps lifecycle state.
pub fn put_signer_key(
    state: &mut StoreState,
    tenant_id: &TenantId,
    key_id: &str,
    public_key: &str,
    purpose: &str,
    now: DateTime<Utc>,
) -> SignerKeyRow {
    let table_key = (tenant_id.clone(), key_id.to_string());
    let row = state
        .signer_keys
        .entry(table_key)
        .and_modify(|row| {
            row.public_key = public_key.to_string();
            row.purpose = purpose.to_string();
            row.updated_at = now;
        })
        .or_insert_with(|| SignerKeyRow {
            key_id: key_id.to_string(),
            public_key: public_key.to_string(),
            purpose: purpose.to_string(),
            status: SignerKeyStatus::Active,
            created_at: now,
            rotated_at: None,
            revoked_at: None,
            updated_at: now,
        });
    row.clone()
}

/// Update a key's status, preserving first lifecycle timestamps.
pub fn set_signer_key_status(
    state: &mut StoreState,
    tenant_id: &TenantId,
    key_id: &str,
    status: SignerKeyStatus,
    at: DateTime<Utc>,
) -> StoreResult<SignerKeyRow> {
    let row = state
        .signer_keys
        .get_mut(&(tenant_id.clone(), key_id.to_string()))
        .ok_or_else(|| StoreError::SignerKeyUnknown(key_id.to_string()))?;

    row.status = status;
    row.updated_at = at;
    match status {
        SignerKeyStatus::Rotated => {
            row.rotated_at = row.rotated_at.or(Some(at));
        }
        SignerKeyStatus::Revoked => {
            row.revoked_at = row.revoked_at.or(Some(at));
        }
        SignerKeyStatus::Active => {}
    }
    Ok(row.clone())
}

/// Normalized read of a key.
pub fn get_signer_key(
    state: &StoreState,
    tenant_id: &TenantId,
    key_id: &str,
) -> Option<SignerKeyRow> {
    state
        .signer_keys
        .get(&(tenant_id.clone(), key_id.to_string()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn lifecycle_keeps_first_timestamps() {
        let mut state = StoreState::new();
        let tenant = TenantId::default_tenant();
        put_signer_key(&mut state, &tenant, "k1", "pk", "robot", at(0));

        let row =
            set_signer_key_status(&mut state, &tenant, "k1", SignerKeyStatus::Rotated, at(1))
                .unwrap();
        assert_eq!(row.rotated_at, Some(at(1)));

        // A later redundant rotate keeps the original timestamp.
        let row =
            set_signer_key_status(&mut state, &tenant, "k1", SignerKeyStatus::Rotated, at(2))
                .unwrap();
        assert_eq!(row.rotated_at, Some(at(1)));

        let row =
            set_signer_key_status(&mut state, &tenant, "k1", SignerKeyStatus::Revoked, at(3))
                .unwrap();
        assert_eq!(row.revoked_at, Some(at(3)));
        assert_eq!(row.rotated_at, Some(at(1)));
    }

    #[test]
    fn reput_refreshes_material_but_not_lifecycle() {
        let mut state = StoreState::new();
        let tenant = TenantId::default_tenant();
        put_signer_key(&mut state, &tenant, "k1", "pk1", "robot", at(0));
        set_signer_key_status(&mut state, &tenant, "k1", SignerKeyStatus::Rotated, at(1)).unwrap();

        let row = put_signer_key(&mut state, &tenant, "k1", "pk2", "operator", at(2));
        assert_eq!(row.public_key, "pk2");
        assert_eq!(row.purpose, "operator");
        assert_eq!(row.status, SignerKeyStatus::Rotated);
        assert_eq!(row.created_at, at(0));
    }

    #[test]
    fn unknown_key_status_update_fails() {
        let mut state = StoreState::new();
        let tenant = TenantId::default_tenant();
        assert!(matches!(
            set_signer_key_status(&mut state, &tenant, "nope", SignerKeyStatus::Revoked, at(0)),
            Err(StoreError::SignerKeyUnknown(_))
        ));
    }
}
