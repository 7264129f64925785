use core::str::FromStr;

use serde::{Deserialize, Serialize};

use procura_core::DomainError;

/// Order lifecycle.
///
/// `basket → new → confirmed → assembled → sent → delivered`, with `canceled`
/// reachable from every non-terminal state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Basket,
    New,
    Confirmed,
    Assembled,
    Sent,
    Delivered,
    Canceled,
}

impl OrderState {
    pub const ALL: [OrderState; 7] = [
        OrderState::Basket,
        OrderState::New,
        OrderState::Confirmed,
        OrderState::Assembled,
        OrderState::Sent,
        OrderState::Delivered,
        OrderState::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderState::Basket => "basket",
            OrderState::New => "new",
            OrderState::Confirmed => "confirmed",
            OrderState::Assembled => "assembled",
            OrderState::Sent => "sent",
            OrderState::Delivered => "delivered",
            OrderState::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Delivered | OrderState::Canceled)
    }

    /// Next step of the happy path.
    pub fn successor(self) -> Option<OrderState> {
        match self {
            OrderState::Basket => Some(OrderState::New),
            OrderState::New => Some(OrderState::Confirmed),
            OrderState::Confirmed => Some(OrderState::Assembled),
            OrderState::Assembled => Some(OrderState::Sent),
            OrderState::Sent => Some(OrderState::Delivered),
            OrderState::Delivered | OrderState::Canceled => None,
        }
    }

    /// Whether a shop/ops actor may set `target` directly.
    ///
    /// `basket → new` is excluded: only finalizing a basket places an order.
    pub fn allows_transition_to(self, target: OrderState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if target == OrderState::Canceled {
            return true;
        }
        self != OrderState::Basket && self.successor() == Some(target)
    }
}

impl core::fmt::Display for OrderState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        OrderState::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| DomainError::validation(format!("unknown order state '{}'", s.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_linear() {
        let mut state = OrderState::New;
        let mut path = vec![state];
        while let Some(next) = state.successor() {
            assert!(state.allows_transition_to(next));
            state = next;
            path.push(state);
        }
        assert_eq!(
            path,
            vec![
                OrderState::New,
                OrderState::Confirmed,
                OrderState::Assembled,
                OrderState::Sent,
                OrderState::Delivered
            ]
        );
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for from in [OrderState::Delivered, OrderState::Canceled] {
            for to in OrderState::ALL {
                assert!(!from.allows_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn basket_can_only_be_canceled_directly() {
        for to in OrderState::ALL {
            assert_eq!(
                OrderState::Basket.allows_transition_to(to),
                to == OrderState::Canceled,
                "basket -> {to}"
            );
        }
    }

    #[test]
    fn no_skipping_or_going_back() {
        assert!(!OrderState::New.allows_transition_to(OrderState::Sent));
        assert!(!OrderState::Sent.allows_transition_to(OrderState::Confirmed));
        assert!(!OrderState::New.allows_transition_to(OrderState::New));
    }

    #[test]
    fn parses_names() {
        assert_eq!(" Confirmed ".parse::<OrderState>(), Ok(OrderState::Confirmed));
        assert!("cancelled".parse::<OrderState>().is_err());
        assert_eq!(serde_json::to_string(&OrderState::Sent).unwrap(), "\"sent\"");
    }
}
