use serde::{Deserialize, Serialize};

use procura_core::{CategoryId, DomainError, DomainResult, ShopId, UserId};

/// A supplier's storefront. Exactly one per supplier user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shop {
    pub id: ShopId,
    pub name: String,
    /// Where the last ingested price list was fetched from.
    pub url: Option<String>,
    pub owner: UserId,
    /// Whether buyers may currently order this shop's products.
    pub accepting_orders: bool,
}

/// A product category. Ids come from supplier price lists and are shared
/// between shops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

/// Parse a human-entered on/off flag ("true", "yes", "1", "off", ...).
pub fn parse_state_flag(raw: &str) -> DomainResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        other => Err(DomainError::validation(format!("invalid state value '{other}'"))),
    }
}
