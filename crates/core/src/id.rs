//! Strongly-typed identifiers used across the domain.
//!
//! Identifiers are opaque strings: external systems mint job ids, party ids
//! and month periods, so nothing here assumes a UUID shape. Generated ids
//! (event ids) use UUIDv7 so they sort by creation time.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! impl_str_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, ": empty")));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Identifier of a tenant (multi-tenant boundary).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// The implicit tenant used when a caller supplies none.
    pub fn default_tenant() -> Self {
        Self("default".to_string())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::default_tenant()
    }
}

/// Identifier of an aggregate stream within a tenant (job id, month period, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(String);

/// Identifier of a party (payee, operator, counterparty).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(String);

/// Identifier of a delivery destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(String);

/// Identifier of a signer key within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerKeyId(String);

impl_str_newtype!(TenantId, "TenantId");
impl_str_newtype!(AggregateId, "AggregateId");
impl_str_newtype!(PartyId, "PartyId");
impl_str_newtype!(DestinationId, "DestinationId");
impl_str_newtype!(SignerKeyId, "SignerKeyId");

/// Identifier of a single event.
///
/// Events the substrate mints itself use UUIDv7 (time-ordered); externally
/// supplied ids pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl_str_newtype!(EventId, "EventId");
