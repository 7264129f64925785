//! Storage contracts for the marketplace.
//!
//! Every mutating operation is atomic: it either applies completely or leaves
//! the store untouched. Domain rules are decided by the pure aggregates in
//! `procura-orders` / `procura-catalog`; stores load state, run the aggregate
//! and persist the resulting events together with their side effects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use procura_catalog::{
    CatalogReplacement, Category, ProductFilter, ProductListing, ReplacementReport, Shop,
};
use procura_core::{
    ContactId, DomainError, ExpectedVersion, OrderId, OrderItemId, ProductId, ShopId, UserId,
};
use procura_inventory::{StockPolicy, StockRequest, StockSnapshot};
use procura_orders::{Contact, ContactDetails, OrderState, OrderView, OutboundMessage};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryMarketStore;
pub use postgres::PostgresMarketStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Lost an optimistic concurrency race (version or unique constraint).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Settings that change how orders are placed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketSettings {
    pub stock_policy: StockPolicy,
    /// Addresses alerted about every new order.
    pub ops_recipients: Vec<String>,
}

/// Who is moving an order through its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransitionActor {
    /// A supplier; limited to orders that contain its products.
    Shop(UserId),
    /// Operations staff; may transition any order.
    Operator,
}

/// Result of deleting a shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShopRemoval {
    pub shop_id: ShopId,
    pub products_removed: usize,
    pub order_items_removed: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// Stored outbox message with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub message: OutboundMessage,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Pending messages are not handed out before this instant.
    pub next_attempt_at: DateTime<Utc>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Active products, with shop, category and parameters resolved.
    async fn list_products(&self, filter: ProductFilter) -> StoreResult<Vec<ProductListing>>;

    async fn list_shops(&self, open_only: bool) -> StoreResult<Vec<Shop>>;

    /// All categories, or only those a shop offers.
    async fn list_categories(&self, shop_id: Option<ShopId>) -> StoreResult<Vec<Category>>;

    /// Current quantity-on-hand and orderability of a product.
    async fn product_stock(&self, product_id: ProductId) -> StoreResult<Option<StockSnapshot>>;

    async fn shop_for_owner(&self, owner: UserId) -> StoreResult<Option<Shop>>;

    /// Open or close the owner's shop for orders. Not-found if the user has no shop.
    async fn set_shop_state(&self, owner: UserId, accepting_orders: bool) -> StoreResult<Shop>;

    /// Apply a planned catalog replacement in one transaction.
    async fn replace_catalog(&self, replacement: CatalogReplacement)
    -> StoreResult<ReplacementReport>;

    /// Delete a shop with its products, their parameters and order items.
    async fn delete_shop(&self, shop_id: ShopId) -> StoreResult<ShopRemoval>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// The user's basket, if one has been started.
    async fn basket_for(&self, user: UserId) -> StoreResult<Option<OrderView>>;

    /// Upsert items into the basket, creating the basket on first use.
    async fn add_to_basket(&self, user: UserId, items: Vec<StockRequest>) -> StoreResult<OrderView>;

    async fn update_basket(&self, user: UserId, items: Vec<StockRequest>) -> StoreResult<OrderView>;

    /// Remove basket items by id. Ids not in the user's basket are skipped.
    async fn remove_from_basket(&self, user: UserId, item_ids: Vec<OrderItemId>)
    -> StoreResult<usize>;

    /// Place the basket as a new order and queue its notifications.
    async fn finalize(
        &self,
        user: UserId,
        order_id: OrderId,
        contact_id: ContactId,
        buyer_email: &str,
    ) -> StoreResult<OrderView>;

    /// The user's placed orders, newest first.
    async fn orders_for(&self, user: UserId) -> StoreResult<Vec<OrderView>>;

    /// Placed orders containing at least one product of the owner's shop.
    async fn orders_for_shop(&self, owner: UserId) -> StoreResult<Vec<OrderView>>;

    async fn transition(
        &self,
        actor: TransitionActor,
        order_id: OrderId,
        target: OrderState,
        expected: ExpectedVersion,
    ) -> StoreResult<OrderView>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn contacts_for(&self, user: UserId) -> StoreResult<Vec<Contact>>;

    async fn add_contact(&self, user: UserId, details: ContactDetails) -> StoreResult<Contact>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Pending messages due by `due_by`, oldest first.
    async fn pending_messages(
        &self,
        limit: usize,
        due_by: DateTime<Utc>,
    ) -> StoreResult<Vec<OutboxEntry>>;

    async fn mark_delivered(&self, id: i64) -> StoreResult<()>;

    /// Record a failed delivery; the message turns `failed` once
    /// `max_attempts` is reached, otherwise it waits until `retry_at`.
    async fn mark_attempt_failed(
        &self,
        id: i64,
        error: &str,
        max_attempts: u32,
        retry_at: DateTime<Utc>,
    ) -> StoreResult<DeliveryStatus>;

    async fn messages_for_order(&self, order_id: OrderId) -> StoreResult<Vec<OutboxEntry>>;
}

/// Everything the HTTP layer and background workers need.
pub trait MarketStore: CatalogStore + OrderStore + ContactStore + OutboxStore {}

impl<T> MarketStore for T where T: CatalogStore + OrderStore + ContactStore + OutboxStore {}
