//! Messages emitted when an order is placed.

use serde::{Deserialize, Serialize};

use procura_core::OrderId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Buyer,
    Operations,
}

impl Audience {
    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Buyer => "buyer",
            Audience::Operations => "operations",
        }
    }
}

/// One outbox entry. An empty recipient list is valid and means nobody to tell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub order_id: OrderId,
    pub audience: Audience,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Buyer confirmation plus the operations alert for a newly placed order.
pub fn order_placed_messages(
    order_id: OrderId,
    buyer_email: &str,
    ops_recipients: &[String],
) -> Vec<OutboundMessage> {
    vec![
        OutboundMessage {
            order_id,
            audience: Audience::Buyer,
            recipients: vec![buyer_email.to_string()],
            subject: format!("Order #{order_id} placed"),
            body: format!("Your order #{order_id} has been received and is awaiting confirmation."),
        },
        OutboundMessage {
            order_id,
            audience: Audience::Operations,
            recipients: ops_recipients.to_vec(),
            subject: format!("New order #{order_id}"),
            body: format!("Order #{order_id} was placed by {buyer_email}."),
        },
    ]
}
