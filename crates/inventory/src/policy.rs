use core::str::FromStr;

use serde::{Deserialize, Serialize};

use procura_core::DomainError;

/// When (if ever) stock is taken out of quantity-on-hand.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockPolicy {
    /// Point-in-time check only; quantity-on-hand changes only through price
    /// list ingestion. Concurrent buyers can collectively oversell.
    #[default]
    Advisory,
    /// Finalizing an order decrements quantity-on-hand with a conditional
    /// update; canceling a committed order puts the stock back.
    DecrementOnFinalize,
}

impl StockPolicy {
    pub fn commits_on_finalize(self) -> bool {
        matches!(self, StockPolicy::DecrementOnFinalize)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StockPolicy::Advisory => "advisory",
            StockPolicy::DecrementOnFinalize => "decrement_on_finalize",
        }
    }
}

impl FromStr for StockPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(StockPolicy::Advisory),
            "decrement_on_finalize" => Ok(StockPolicy::DecrementOnFinalize),
            other => Err(DomainError::validation(format!(
                "unknown stock policy '{other}' (expected advisory or decrement_on_finalize)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_advisory() {
        assert_eq!(StockPolicy::default(), StockPolicy::Advisory);
        assert!(!StockPolicy::Advisory.commits_on_finalize());
    }

    #[test]
    fn parses_round_trip_names() {
        for p in [StockPolicy::Advisory, StockPolicy::DecrementOnFinalize] {
            assert_eq!(p.as_str().parse::<StockPolicy>(), Ok(p));
        }
        assert!("reserve".parse::<StockPolicy>().is_err());
    }
}
