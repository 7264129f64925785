//! Strongly-typed identifiers used across the domain.
//!
//! All marketplace identifiers are positive 64-bit integers assigned by the
//! store (category ids come from supplier price lists).

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

macro_rules! int_id {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(i64);

        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = i64::from_str(s.trim())
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                if value <= 0 {
                    return Err(DomainError::invalid_id(format!(
                        "{}: must be positive, got {}",
                        $name, value
                    )));
                }
                Ok(Self(value))
            }
        }
    };
}

int_id!(
    /// Identifier of a user (actor identity, issued by the auth collaborator).
    UserId,
    "UserId"
);
int_id!(
    /// Identifier of a supplier shop.
    ShopId,
    "ShopId"
);
int_id!(CategoryId, "CategoryId");
int_id!(ProductId, "ProductId");
int_id!(ParameterId, "ParameterId");
int_id!(OrderId, "OrderId");
int_id!(OrderItemId, "OrderItemId");
int_id!(ContactId, "ContactId");
