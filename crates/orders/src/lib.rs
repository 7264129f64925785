//! Orders domain module.
//!
//! The basket/order state machine, order read models and totals, buyer
//! contacts, and the notification messages produced when an order is placed.
//! Deterministic domain logic only (no IO, no HTTP, no storage).

pub mod contact;
pub mod notification;
pub mod order;
pub mod state;
pub mod view;

pub use contact::{Contact, ContactDetails, ContactDraft};
pub use notification::{Audience, OutboundMessage, order_placed_messages};
pub use order::{
    AddItems, Finalize, ItemsAdded, ItemsRemoved, Order, OrderCommand, OrderEvent, OrderLine,
    OrderPlaced, OrderRecord, QuantitiesUpdated, RemoveItems, StateChanged, Transition,
    UpdateQuantities,
};
pub use state::OrderState;
pub use view::{OrderItemView, OrderView, OrderedProduct, order_total};
