use serde::{Deserialize, Serialize};

use procura_core::UserId;

use crate::Role;

/// Account type of a marketplace user.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    /// Supplier account owning exactly one shop.
    Shop,
    Buyer,
}

impl UserKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UserKind::Shop => "shop",
            UserKind::Buyer => "buyer",
        }
    }
}

impl core::fmt::Display for UserKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified caller, resolved from token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: UserId,
    pub email: String,
    pub kind: UserKind,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn is_shop(&self) -> bool {
        self.kind == UserKind::Shop
    }
}
