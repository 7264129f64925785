//! In-memory marketplace store for tests and local runs.
//!
//! All state lives behind one `RwLock`; every operation takes the lock once,
//! so each call is atomic and concurrent calls are serialized.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use procura_catalog::{
    CatalogReplacement, Category, CategoryRef, ListedParameter, Parameter, Product, ProductFilter,
    ProductListing, ReplacementReport, Shop, ShopRef,
};
use procura_core::{
    Aggregate, AggregateRoot, CategoryId, ContactId, DomainError, ExpectedVersion, OrderId,
    OrderItemId, ParameterId, ProductId, ShopId, UserId,
};
use procura_inventory::{StockAdjustment, StockRequest, StockSnapshot};
use procura_orders::{
    AddItems, Contact, ContactDetails, Finalize, Order, OrderCommand, OrderEvent, OrderItemView,
    OrderRecord, OrderState, OrderView, OrderedProduct, RemoveItems, Transition, UpdateQuantities,
    order_placed_messages, order_total,
};

use super::{
    CatalogStore, ContactStore, DeliveryStatus, MarketSettings, OrderStore, OutboxEntry,
    OutboxStore, ShopRemoval, StoreError, StoreResult, TransitionActor,
};

#[derive(Debug, Default)]
struct Sequences {
    shop: i64,
    product: i64,
    parameter: i64,
    order: i64,
    order_item: i64,
    contact: i64,
    message: i64,
}

fn next(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[derive(Debug, Default)]
struct State {
    shops: BTreeMap<ShopId, Shop>,
    categories: BTreeMap<CategoryId, Category>,
    shop_categories: BTreeSet<(ShopId, CategoryId)>,
    products: BTreeMap<ProductId, Product>,
    parameters: BTreeMap<ParameterId, Parameter>,
    product_parameters: BTreeMap<(ProductId, ParameterId), String>,
    orders: BTreeMap<OrderId, OrderRecord>,
    order_items: BTreeMap<(OrderId, ProductId), OrderItemId>,
    contacts: BTreeMap<ContactId, Contact>,
    outbox: BTreeMap<i64, OutboxEntry>,
    seq: Sequences,
}

impl State {
    fn shop_of(&self, owner: UserId) -> Option<&Shop> {
        self.shops.values().find(|s| s.owner == owner)
    }

    fn basket_of(&self, user: UserId) -> Option<&OrderRecord> {
        self.orders
            .values()
            .find(|o| o.user_id == user && o.state == OrderState::Basket)
    }

    fn snapshot(&self, product_id: ProductId) -> Option<StockSnapshot> {
        let product = self.products.get(&product_id)?;
        let orderable = self
            .shops
            .get(&product.shop_id)
            .is_some_and(|shop| product.is_orderable(shop));
        Some(StockSnapshot {
            product_id,
            on_hand: product.quantity,
            orderable,
        })
    }

    fn snapshots(&self, product_ids: impl IntoIterator<Item = ProductId>) -> Vec<StockSnapshot> {
        product_ids
            .into_iter()
            .filter_map(|id| self.snapshot(id))
            .collect()
    }

    fn view(&self, record: &OrderRecord) -> OrderView {
        let items: Vec<OrderItemView> = record
            .lines
            .iter()
            .filter_map(|line| {
                let product = self.products.get(&line.product_id)?;
                let id = self.order_items.get(&(record.id, line.product_id))?;
                Some(OrderItemView {
                    id: *id,
                    product: OrderedProduct {
                        id: product.id,
                        name: product.name.clone(),
                        model: product.model.clone(),
                        shop_id: product.shop_id,
                        price_rrc: product.price_rrc,
                    },
                    quantity: line.quantity,
                })
            })
            .collect();

        OrderView {
            id: record.id,
            user_id: record.user_id,
            state: record.state,
            created_at: record.created_at,
            contact: record
                .contact_id
                .and_then(|id| self.contacts.get(&id))
                .cloned(),
            total: order_total(items.iter().map(|i| (i.quantity, i.product.price_rrc))),
            items,
            version: record.version,
        }
    }

    /// New quantities for every adjusted product. Restores aimed at products
    /// that no longer exist are dropped.
    fn plan_stock(&self, adjustments: &[StockAdjustment]) -> StoreResult<Vec<(ProductId, u32)>> {
        let mut planned = Vec::with_capacity(adjustments.len());
        for adjustment in adjustments {
            match self.products.get(&adjustment.product_id) {
                Some(product) => {
                    planned.push((product.id, adjustment.apply_to(product.quantity)?));
                }
                None if adjustment.delta > 0 => {}
                None => {
                    return Err(DomainError::not_found(format!("product {}", adjustment.product_id)).into());
                }
            }
        }
        Ok(planned)
    }

    /// Persist an order after `events` were applied to it, with their stock moves.
    fn save_order(&mut self, order: &Order, events: &[OrderEvent]) -> StoreResult<()> {
        let adjustments: Vec<StockAdjustment> = events
            .iter()
            .flat_map(|e| e.stock_adjustments().iter().copied())
            .collect();
        let quantities = self.plan_stock(&adjustments)?;

        for (product_id, quantity) in quantities {
            if let Some(product) = self.products.get_mut(&product_id) {
                product.quantity = quantity;
            }
        }

        let record = order.to_record();
        let order_id = record.id;
        self.order_items
            .retain(|(o, p), _| *o != order_id || record.lines.iter().any(|l| l.product_id == *p));
        for line in &record.lines {
            if !self.order_items.contains_key(&(order_id, line.product_id)) {
                let item_id = OrderItemId::new(next(&mut self.seq.order_item));
                self.order_items.insert((order_id, line.product_id), item_id);
            }
        }
        self.orders.insert(order_id, record);
        Ok(())
    }

    /// Delete products with their parameters and the order items that reference them.
    /// Returns the number of order items removed.
    fn remove_products(&mut self, ids: &BTreeSet<ProductId>) -> usize {
        self.products.retain(|id, _| !ids.contains(id));
        self.product_parameters.retain(|(p, _), _| !ids.contains(p));

        let before = self.order_items.len();
        self.order_items.retain(|(_, p), _| !ids.contains(p));
        for record in self.orders.values_mut() {
            record.lines.retain(|l| !ids.contains(&l.product_id));
        }
        before - self.order_items.len()
    }

    fn parameter_id(&mut self, name: &str) -> ParameterId {
        if let Some(existing) = self.parameters.values().find(|p| p.name == name) {
            return existing.id;
        }
        let id = ParameterId::new(next(&mut self.seq.parameter));
        self.parameters.insert(id, Parameter { id, name: name.to_string() });
        id
    }

    fn load_basket(&self, user: UserId) -> StoreResult<Order> {
        self.basket_of(user)
            .cloned()
            .map(Order::from_record)
            .ok_or_else(|| DomainError::not_found("basket").into())
    }
}

/// Marketplace store kept entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMarketStore {
    state: RwLock<State>,
    settings: MarketSettings,
}

impl InMemoryMarketStore {
    pub fn new(settings: MarketSettings) -> Self {
        Self {
            state: RwLock::new(State::default()),
            settings,
        }
    }

    pub fn settings(&self) -> &MarketSettings {
        &self.settings
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Storage("market store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Storage("market store lock poisoned".into()))
    }
}

#[async_trait]
impl CatalogStore for InMemoryMarketStore {
    async fn list_products(&self, filter: ProductFilter) -> StoreResult<Vec<ProductListing>> {
        let state = self.read()?;
        let listings = state
            .products
            .values()
            .filter(|p| filter.matches(p))
            .filter_map(|p| {
                let shop = state.shops.get(&p.shop_id)?;
                let category = state.categories.get(&p.category_id)?;
                let mut parameters: Vec<ListedParameter> = state
                    .product_parameters
                    .range((p.id, ParameterId::new(i64::MIN))..=(p.id, ParameterId::new(i64::MAX)))
                    .filter_map(|((_, parameter_id), value)| {
                        state.parameters.get(parameter_id).map(|param| ListedParameter {
                            name: param.name.clone(),
                            value: value.clone(),
                        })
                    })
                    .collect();
                parameters.sort_by(|a, b| a.name.cmp(&b.name));

                Some(ProductListing {
                    id: p.id,
                    name: p.name.clone(),
                    model: p.model.clone(),
                    shop: ShopRef { id: shop.id, name: shop.name.clone() },
                    category: CategoryRef { id: category.id, name: category.name.clone() },
                    price: p.price,
                    price_rrc: p.price_rrc,
                    quantity: p.quantity,
                    parameters,
                })
            })
            .collect();
        Ok(listings)
    }

    async fn list_shops(&self, open_only: bool) -> StoreResult<Vec<Shop>> {
        let state = self.read()?;
        Ok(state
            .shops
            .values()
            .filter(|s| !open_only || s.accepting_orders)
            .cloned()
            .collect())
    }

    async fn list_categories(&self, shop_id: Option<ShopId>) -> StoreResult<Vec<Category>> {
        let state = self.read()?;
        Ok(state
            .categories
            .values()
            .filter(|c| shop_id.is_none_or(|s| state.shop_categories.contains(&(s, c.id))))
            .cloned()
            .collect())
    }

    async fn product_stock(&self, product_id: ProductId) -> StoreResult<Option<StockSnapshot>> {
        Ok(self.read()?.snapshot(product_id))
    }

    async fn shop_for_owner(&self, owner: UserId) -> StoreResult<Option<Shop>> {
        Ok(self.read()?.shop_of(owner).cloned())
    }

    async fn set_shop_state(&self, owner: UserId, accepting_orders: bool) -> StoreResult<Shop> {
        let mut state = self.write()?;
        let shop = state
            .shops
            .values_mut()
            .find(|s| s.owner == owner)
            .ok_or_else(|| DomainError::not_found(format!("shop of user {owner}")))?;
        shop.accepting_orders = accepting_orders;
        Ok(shop.clone())
    }

    async fn replace_catalog(
        &self,
        replacement: CatalogReplacement,
    ) -> StoreResult<ReplacementReport> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let CatalogReplacement { shop, categories, products } = replacement;

        let existing = state.shop_of(shop.owner).map(|s| s.id);
        let shop_id = match existing.and_then(|id| state.shops.get_mut(&id)) {
            Some(existing) => {
                existing.name = shop.name;
                existing.url = Some(shop.url);
                existing.id
            }
            None => {
                let id = ShopId::new(next(&mut state.seq.shop));
                state.shops.insert(
                    id,
                    Shop {
                        id,
                        name: shop.name,
                        url: Some(shop.url),
                        owner: shop.owner,
                        accepting_orders: true,
                    },
                );
                id
            }
        };

        let categories_upserted = categories.len();
        for category in categories {
            state.shop_categories.insert((shop_id, category.id));
            state.categories.insert(category.id, category);
        }

        let stale: BTreeSet<ProductId> = state
            .products
            .values()
            .filter(|p| p.shop_id == shop_id)
            .map(|p| p.id)
            .collect();
        let order_items_removed = state.remove_products(&stale);
        if order_items_removed > 0 {
            warn!(
                shop_id = %shop_id,
                products_removed = stale.len(),
                order_items_removed,
                "catalog replacement removed order items of deleted products"
            );
        }

        let products_created = products.len();
        let mut parameters_written = 0;
        for new in products {
            let product_id = ProductId::new(next(&mut state.seq.product));
            state.products.insert(
                product_id,
                Product {
                    id: product_id,
                    shop_id,
                    category_id: new.category_id,
                    name: new.name,
                    model: new.model,
                    price: new.price,
                    price_rrc: new.price_rrc,
                    quantity: new.quantity,
                    is_active: true,
                },
            );
            for (name, value) in new.parameters {
                let parameter_id = state.parameter_id(&name);
                state.product_parameters.insert((product_id, parameter_id), value);
                parameters_written += 1;
            }
        }

        Ok(ReplacementReport {
            shop_id,
            categories_upserted,
            products_removed: stale.len(),
            products_created,
            parameters_written,
            order_items_removed,
        })
    }

    async fn delete_shop(&self, shop_id: ShopId) -> StoreResult<ShopRemoval> {
        let mut state = self.write()?;
        if state.shops.remove(&shop_id).is_none() {
            return Err(DomainError::not_found(format!("shop {shop_id}")).into());
        }
        state.shop_categories.retain(|(s, _)| *s != shop_id);

        let products: BTreeSet<ProductId> = state
            .products
            .values()
            .filter(|p| p.shop_id == shop_id)
            .map(|p| p.id)
            .collect();
        let order_items_removed = state.remove_products(&products);
        if order_items_removed > 0 {
            warn!(shop_id = %shop_id, order_items_removed, "shop deletion removed order items");
        }

        Ok(ShopRemoval {
            shop_id,
            products_removed: products.len(),
            order_items_removed,
        })
    }
}

#[async_trait]
impl OrderStore for InMemoryMarketStore {
    async fn basket_for(&self, user: UserId) -> StoreResult<Option<OrderView>> {
        let state = self.read()?;
        Ok(state.basket_of(user).map(|record| state.view(record)))
    }

    async fn add_to_basket(&self, user: UserId, items: Vec<StockRequest>) -> StoreResult<OrderView> {
        let mut state = self.write()?;

        let mut order = match state.basket_of(user) {
            Some(record) => Order::from_record(record.clone()),
            None => Order::basket(OrderId::new(state.seq.order + 1), user, Utc::now()),
        };
        let stock = state.snapshots(items.iter().map(|i| i.product_id));
        let events = order.execute(&OrderCommand::AddItems(AddItems { items, stock }))?;

        if order.id().get() > state.seq.order {
            state.seq.order = order.id().get();
        }
        state.save_order(&order, &events)?;
        Ok(state.view(&order.to_record()))
    }

    async fn update_basket(&self, user: UserId, items: Vec<StockRequest>) -> StoreResult<OrderView> {
        let mut state = self.write()?;

        let mut order = state.load_basket(user)?;
        let stock = state.snapshots(items.iter().map(|i| i.product_id));
        let events = order.execute(&OrderCommand::UpdateQuantities(UpdateQuantities { items, stock }))?;

        state.save_order(&order, &events)?;
        Ok(state.view(&order.to_record()))
    }

    async fn remove_from_basket(
        &self,
        user: UserId,
        item_ids: Vec<OrderItemId>,
    ) -> StoreResult<usize> {
        let mut state = self.write()?;
        let Some(record) = state.basket_of(user).cloned() else {
            return Ok(0);
        };

        let product_ids: Vec<ProductId> = state
            .order_items
            .iter()
            .filter(|((order_id, _), item_id)| *order_id == record.id && item_ids.contains(item_id))
            .map(|((_, product_id), _)| *product_id)
            .collect();

        let mut order = Order::from_record(record);
        let events = order.execute(&OrderCommand::RemoveItems(RemoveItems { product_ids }))?;
        let removed = events
            .iter()
            .map(|e| match e {
                OrderEvent::ItemsRemoved(e) => e.product_ids.len(),
                _ => 0,
            })
            .sum();

        state.save_order(&order, &events)?;
        Ok(removed)
    }

    async fn finalize(
        &self,
        user: UserId,
        order_id: OrderId,
        contact_id: ContactId,
        buyer_email: &str,
    ) -> StoreResult<OrderView> {
        let mut state = self.write()?;

        let record = state
            .orders
            .get(&order_id)
            .filter(|o| o.user_id == user)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")))?;
        if !state.contacts.get(&contact_id).is_some_and(|c| c.user_id == user) {
            return Err(DomainError::not_found(format!("contact {contact_id}")).into());
        }

        let mut order = Order::from_record(record);
        let stock = state.snapshots(order.lines().iter().map(|l| l.product_id));
        let events = order.execute(&OrderCommand::Finalize(Finalize {
            contact_id,
            stock_policy: self.settings.stock_policy,
            stock,
        }))?;
        state.save_order(&order, &events)?;

        let now = Utc::now();
        for message in order_placed_messages(order_id, buyer_email, &self.settings.ops_recipients) {
            let id = next(&mut state.seq.message);
            let status = if message.recipients.is_empty() {
                DeliveryStatus::Delivered
            } else {
                DeliveryStatus::Pending
            };
            state.outbox.insert(
                id,
                OutboxEntry {
                    id,
                    message,
                    status,
                    attempts: 0,
                    last_error: None,
                    created_at: now,
                    next_attempt_at: now,
                },
            );
        }

        Ok(state.view(&order.to_record()))
    }

    async fn orders_for(&self, user: UserId) -> StoreResult<Vec<OrderView>> {
        let state = self.read()?;
        Ok(state
            .orders
            .values()
            .rev()
            .filter(|o| o.user_id == user && o.state != OrderState::Basket)
            .map(|o| state.view(o))
            .collect())
    }

    async fn orders_for_shop(&self, owner: UserId) -> StoreResult<Vec<OrderView>> {
        let state = self.read()?;
        let Some(shop) = state.shop_of(owner) else {
            return Ok(Vec::new());
        };

        Ok(state
            .orders
            .values()
            .rev()
            .filter(|o| o.state != OrderState::Basket)
            .filter(|o| {
                o.lines.iter().any(|l| {
                    state
                        .products
                        .get(&l.product_id)
                        .is_some_and(|p| p.shop_id == shop.id)
                })
            })
            .map(|o| state.view(o))
            .collect())
    }

    async fn transition(
        &self,
        actor: TransitionActor,
        order_id: OrderId,
        target: OrderState,
        expected: ExpectedVersion,
    ) -> StoreResult<OrderView> {
        let mut state = self.write()?;

        let record = state
            .orders
            .get(&order_id)
            .filter(|o| o.state != OrderState::Basket)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")))?;

        if let TransitionActor::Shop(owner) = actor {
            let shop_id = state.shop_of(owner).map(|s| s.id);
            let touches_shop = record.lines.iter().any(|l| {
                state
                    .products
                    .get(&l.product_id)
                    .is_some_and(|p| Some(p.shop_id) == shop_id)
            });
            if !touches_shop {
                return Err(DomainError::forbidden(format!(
                    "order {order_id} contains no products of your shop"
                ))
                .into());
            }
        }

        expected
            .check(record.version)
            .map_err(|e| StoreError::Concurrency(e.to_string()))?;

        let mut order = Order::from_record(record);
        let events = order.execute(&OrderCommand::Transition(Transition { target }))?;
        state.save_order(&order, &events)?;
        Ok(state.view(&order.to_record()))
    }
}

#[async_trait]
impl ContactStore for InMemoryMarketStore {
    async fn contacts_for(&self, user: UserId) -> StoreResult<Vec<Contact>> {
        let state = self.read()?;
        Ok(state
            .contacts
            .values()
            .filter(|c| c.user_id == user)
            .cloned()
            .collect())
    }

    async fn add_contact(&self, user: UserId, details: ContactDetails) -> StoreResult<Contact> {
        let mut state = self.write()?;
        let id = ContactId::new(next(&mut state.seq.contact));
        let contact = Contact { id, user_id: user, details };
        state.contacts.insert(id, contact.clone());
        Ok(contact)
    }
}

#[async_trait]
impl OutboxStore for InMemoryMarketStore {
    async fn pending_messages(
        &self,
        limit: usize,
        due_by: DateTime<Utc>,
    ) -> StoreResult<Vec<OutboxEntry>> {
        let state = self.read()?;
        Ok(state
            .outbox
            .values()
            .filter(|m| m.status == DeliveryStatus::Pending && m.next_attempt_at <= due_by)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_delivered(&self, id: i64) -> StoreResult<()> {
        let mut state = self.write()?;
        let entry = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("outbox message {id}")))?;
        entry.attempts += 1;
        entry.status = DeliveryStatus::Delivered;
        Ok(())
    }

    async fn mark_attempt_failed(
        &self,
        id: i64,
        error: &str,
        max_attempts: u32,
        retry_at: DateTime<Utc>,
    ) -> StoreResult<DeliveryStatus> {
        let mut state = self.write()?;
        let entry = state
            .outbox
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("outbox message {id}")))?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        if entry.attempts >= max_attempts {
            entry.status = DeliveryStatus::Failed;
        } else {
            entry.next_attempt_at = retry_at;
        }
        Ok(entry.status)
    }

    async fn messages_for_order(&self, order_id: OrderId) -> StoreResult<Vec<OutboxEntry>> {
        let state = self.read()?;
        Ok(state
            .outbox
            .values()
            .filter(|m| m.message.order_id == order_id)
            .cloned()
            .collect())
    }
}
