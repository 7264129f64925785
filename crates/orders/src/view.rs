use chrono::{DateTime, Utc};
use serde::Serialize;

use procura_core::{OrderId, OrderItemId, ProductId, ShopId, UserId};

use crate::contact::Contact;
use crate::state::OrderState;

/// Product summary embedded in an order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderedProduct {
    pub id: ProductId,
    pub name: String,
    pub model: String,
    pub shop_id: ShopId,
    pub price_rrc: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItemView {
    pub id: OrderItemId,
    pub product: OrderedProduct,
    pub quantity: u32,
}

/// Read model returned for baskets and orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderView {
    pub id: OrderId,
    pub user_id: UserId,
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
    pub contact: Option<Contact>,
    pub items: Vec<OrderItemView>,
    /// Sum of `quantity × price_rrc` over the items.
    pub total: u64,
    pub version: u64,
}

/// Σ quantity × price_rrc, saturating instead of wrapping.
pub fn order_total<I>(lines: I) -> u64
where
    I: IntoIterator<Item = (u32, u64)>,
{
    lines.into_iter().fold(0u64, |acc, (quantity, price_rrc)| {
        acc.saturating_add(u64::from(quantity).saturating_mul(price_rrc))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, quantity: u32, price_rrc: u64) -> OrderItemView {
        OrderItemView {
            id: OrderItemId::new(id),
            product: OrderedProduct {
                id: ProductId::new(id),
                name: format!("product {id}"),
                model: String::new(),
                shop_id: ShopId::new(1),
                price_rrc,
            },
            quantity,
        }
    }

    #[test]
    fn total_sums_quantity_times_rrc() {
        assert_eq!(order_total([(2, 100), (1, 50)]), 250);
        assert_eq!(order_total(std::iter::empty()), 0);
    }

    #[test]
    fn total_saturates() {
        assert_eq!(order_total([(u32::MAX, u64::MAX)]), u64::MAX);
    }

    #[test]
    fn view_serializes_state_and_total() {
        let items = vec![item(1, 2, 100), item(2, 1, 50)];
        let view = OrderView {
            id: OrderId::new(3),
            user_id: UserId::new(9),
            state: OrderState::Basket,
            created_at: Utc::now(),
            contact: None,
            total: order_total(items.iter().map(|i| (i.quantity, i.product.price_rrc))),
            items,
            version: 2,
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "basket");
        assert_eq!(json["total"], 250);
        assert_eq!(json["items"][0]["product"]["price_rrc"], 100);
    }
}
