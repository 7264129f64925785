//! Postgres-backed marketplace store.
//!
//! Uniqueness and cascades are enforced by the schema in `migrations/`;
//! every mutating operation runs in a single transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Two writers created the same row (e.g. a second basket) |
//! | Database (other) | Any other | `Storage` | Constraint or server errors |
//! | PoolClosed / Io / other | N/A | `Storage` | Connection failures |
//!
//! Version mismatches on `orders.version` are reported as `Concurrency` too.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection, Postgres, Transaction};
use tracing::{instrument, warn};

use procura_catalog::{
    CatalogReplacement, Category, CategoryRef, ListedParameter, ProductFilter, ProductListing,
    ReplacementReport, Shop, ShopRef,
};
use procura_core::{
    Aggregate, AggregateRoot, CategoryId, ContactId, DomainError, ExpectedVersion, OrderId,
    OrderItemId, ProductId, ShopId, UserId,
};
use procura_inventory::{StockAdjustment, StockRequest, StockSnapshot};
use procura_orders::{
    AddItems, Audience, Contact, ContactDetails, Finalize, Order, OrderCommand, OrderEvent,
    OrderItemView, OrderLine, OrderRecord, OrderState, OrderView, OrderedProduct, OutboundMessage,
    RemoveItems, Transition, UpdateQuantities, order_placed_messages, order_total,
};

use super::{
    CatalogStore, ContactStore, DeliveryStatus, MarketSettings, OrderStore, OutboxEntry,
    OutboxStore, ShopRemoval, StoreError, StoreResult, TransitionActor,
};

/// Postgres-backed marketplace store.
#[derive(Debug, Clone)]
pub struct PostgresMarketStore {
    pool: PgPool,
    settings: MarketSettings,
}

impl PostgresMarketStore {
    pub fn new(pool: PgPool, settings: MarketSettings) -> Self {
        Self { pool, settings }
    }

    /// Open a connection pool to `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        settings: MarketSettings,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, settings))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("migration failed: {e}")))
    }

    async fn begin(&self, operation: &str) -> StoreResult<Transaction<'_, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    async fn commit(tx: Transaction<'_, Postgres>, operation: &str) -> StoreResult<()> {
        tx.commit().await.map_err(|e| map_sqlx_error(operation, e))
    }

    async fn connection(
        &self,
        operation: &str,
    ) -> StoreResult<sqlx::pool::PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct ShopRow {
    id: i64,
    name: String,
    url: Option<String>,
    owner_id: i64,
    accepting_orders: bool,
}

impl From<ShopRow> for Shop {
    fn from(row: ShopRow) -> Self {
        Shop {
            id: ShopId::new(row.id),
            name: row.name,
            url: row.url,
            owner: UserId::new(row.owner_id),
            accepting_orders: row.accepting_orders,
        }
    }
}

#[derive(Debug, FromRow)]
struct CategoryRow {
    id: i64,
    name: String,
}

#[derive(Debug, FromRow)]
struct ListingRow {
    id: i64,
    name: String,
    model: String,
    price: i64,
    price_rrc: i64,
    quantity: i32,
    shop_id: i64,
    shop_name: String,
    category_id: i64,
    category_name: String,
}

#[derive(Debug, FromRow)]
struct ParameterValueRow {
    product_id: i64,
    name: String,
    value: String,
}

#[derive(Debug, FromRow)]
struct StockRow {
    id: i64,
    quantity: i32,
    is_active: bool,
    accepting_orders: bool,
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    created_at: DateTime<Utc>,
    state: String,
    contact_id: Option<i64>,
    stock_committed: bool,
    version: i64,
}

#[derive(Debug, FromRow)]
struct LineRow {
    product_id: i64,
    quantity: i32,
}

#[derive(Debug, FromRow)]
struct ItemRow {
    id: i64,
    order_id: i64,
    product_id: i64,
    quantity: i32,
    name: String,
    model: String,
    shop_id: i64,
    price_rrc: i64,
}

#[derive(Debug, FromRow)]
struct ContactRow {
    id: i64,
    user_id: i64,
    city: String,
    street: String,
    house: Option<String>,
    structure: Option<String>,
    building: Option<String>,
    apartment: Option<String>,
    phone: String,
}

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Contact {
            id: ContactId::new(row.id),
            user_id: UserId::new(row.user_id),
            details: ContactDetails {
                city: row.city,
                street: row.street,
                house: row.house,
                structure: row.structure,
                building: row.building,
                apartment: row.apartment,
                phone: row.phone,
            },
        }
    }
}

#[derive(Debug, FromRow)]
struct OutboxRow {
    id: i64,
    order_id: i64,
    audience: String,
    recipients: Vec<String>,
    subject: String,
    body: String,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    next_attempt_at: DateTime<Utc>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> StoreResult<Self> {
        let audience = match row.audience.as_str() {
            "buyer" => Audience::Buyer,
            "operations" => Audience::Operations,
            other => return Err(StoreError::Storage(format!("unknown audience '{other}'"))),
        };
        Ok(OutboxEntry {
            id: row.id,
            message: OutboundMessage {
                order_id: OrderId::new(row.order_id),
                audience,
                recipients: row.recipients,
                subject: row.subject,
                body: row.body,
            },
            status: parse_delivery_status(&row.status)?,
            attempts: to_u32(row.attempts, "attempts")?,
            last_error: row.last_error,
            created_at: row.created_at,
            next_attempt_at: row.next_attempt_at,
        })
    }
}

fn parse_delivery_status(raw: &str) -> StoreResult<DeliveryStatus> {
    match raw {
        "pending" => Ok(DeliveryStatus::Pending),
        "delivered" => Ok(DeliveryStatus::Delivered),
        "failed" => Ok(DeliveryStatus::Failed),
        other => Err(StoreError::Storage(format!("unknown delivery status '{other}'"))),
    }
}

fn to_u32(value: i32, column: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Storage(format!("negative {column}: {value}")))
}

fn to_u64(value: i64, column: &str) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Storage(format!("negative {column}: {value}")))
}

fn to_i32(value: u32, field: &str) -> StoreResult<i32> {
    i32::try_from(value)
        .map_err(|_| DomainError::validation(format!("{field} {value} is out of range")).into())
}

fn to_i64(value: u64, field: &str) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| DomainError::validation(format!("{field} {value} is out of range")).into())
}

fn ids<T: Copy + Into<i64>>(values: impl IntoIterator<Item = T>) -> Vec<i64> {
    values.into_iter().map(Into::into).collect()
}

// ---------------------------------------------------------------------------
// Shared queries
// ---------------------------------------------------------------------------

async fn shop_by_owner(conn: &mut PgConnection, owner: UserId) -> StoreResult<Option<Shop>> {
    let row = sqlx::query_as::<_, ShopRow>(
        r#"
        SELECT id, name, url, owner_id, accepting_orders
        FROM shops
        WHERE owner_id = $1
        "#,
    )
    .bind(owner.get())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("shop_by_owner", e))?;
    Ok(row.map(Shop::from))
}

async fn stock_snapshots(
    conn: &mut PgConnection,
    product_ids: &[i64],
) -> StoreResult<Vec<StockSnapshot>> {
    let rows = sqlx::query_as::<_, StockRow>(
        r#"
        SELECT p.id, p.quantity, p.is_active, s.accepting_orders
        FROM products p
        JOIN shops s ON s.id = p.shop_id
        WHERE p.id = ANY($1)
        "#,
    )
    .bind(product_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("stock_snapshots", e))?;

    rows.into_iter()
        .map(|row| {
            Ok(StockSnapshot {
                product_id: ProductId::new(row.id),
                on_hand: to_u32(row.quantity, "quantity")?,
                orderable: row.is_active && row.accepting_orders,
            })
        })
        .collect()
}

/// Load an order and lock its row for the rest of the transaction.
async fn lock_order(conn: &mut PgConnection, order_id: OrderId) -> StoreResult<Option<Order>> {
    let Some(row) = sqlx::query_as::<_, OrderRow>(
        r#"
        SELECT id, user_id, created_at, state, contact_id, stock_committed, version
        FROM orders
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(order_id.get())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("lock_order", e))?
    else {
        return Ok(None);
    };

    let lines = sqlx::query_as::<_, LineRow>(
        r#"
        SELECT product_id, quantity
        FROM order_items
        WHERE order_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(order_id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("lock_order", e))?;

    let lines = lines
        .into_iter()
        .map(|l| {
            Ok(OrderLine {
                product_id: ProductId::new(l.product_id),
                quantity: to_u32(l.quantity, "quantity")?,
            })
        })
        .collect::<StoreResult<Vec<_>>>()?;

    Ok(Some(Order::from_record(OrderRecord {
        id: OrderId::new(row.id),
        user_id: UserId::new(row.user_id),
        created_at: row.created_at,
        state: parse_state(&row.state)?,
        contact_id: row.contact_id.map(ContactId::new),
        lines,
        stock_committed: row.stock_committed,
        version: to_u64(row.version, "version")?,
    })))
}

fn parse_state(raw: &str) -> StoreResult<OrderState> {
    raw.parse()
        .map_err(|_| StoreError::Storage(format!("unknown order state '{raw}'")))
}

async fn basket_id(conn: &mut PgConnection, user: UserId) -> StoreResult<Option<OrderId>> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM orders WHERE user_id = $1 AND state = 'basket'
        "#,
    )
    .bind(user.get())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("basket_id", e))?;
    Ok(id.map(OrderId::new))
}

/// The user's basket id, creating the basket row if there is none yet.
async fn ensure_basket(conn: &mut PgConnection, user: UserId) -> StoreResult<OrderId> {
    sqlx::query(
        r#"
        INSERT INTO orders (user_id, state)
        VALUES ($1, 'basket')
        ON CONFLICT (user_id) WHERE state = 'basket' DO NOTHING
        "#,
    )
    .bind(user.get())
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("ensure_basket", e))?;

    basket_id(conn, user)
        .await?
        .ok_or_else(|| StoreError::Storage("basket vanished after insert".into()))
}

async fn apply_stock(conn: &mut PgConnection, adjustment: &StockAdjustment) -> StoreResult<()> {
    let product_id = adjustment.product_id.get();

    if adjustment.delta > 0 {
        // Restores to products deleted meanwhile are dropped.
        sqlx::query("UPDATE products SET quantity = quantity + $2 WHERE id = $1")
            .bind(product_id)
            .bind(adjustment.delta)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("apply_stock", e))?;
        return Ok(());
    }

    // Conditional decrement: never lets quantity-on-hand go negative.
    let updated = sqlx::query(
        r#"
        UPDATE products
        SET quantity = quantity + $2
        WHERE id = $1 AND quantity + $2 >= 0
        "#,
    )
    .bind(product_id)
    .bind(adjustment.delta)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("apply_stock", e))?
    .rows_affected();

    if updated == 0 {
        let available: Option<i32> =
            sqlx::query_scalar("SELECT quantity FROM products WHERE id = $1")
                .bind(product_id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("apply_stock", e))?;
        let requested = u32::try_from(-adjustment.delta).unwrap_or(u32::MAX);
        return Err(match available {
            Some(available) => DomainError::insufficient_stock(
                adjustment.product_id,
                requested,
                to_u32(available, "quantity")?,
            ),
            None => DomainError::not_found(format!("product {}", adjustment.product_id)),
        }
        .into());
    }
    Ok(())
}

/// Persist an order after `events` were applied to it: stock moves, the order
/// row (compare-and-swap on version) and its item rows.
async fn save_order(conn: &mut PgConnection, order: &Order, events: &[OrderEvent]) -> StoreResult<()> {
    if events.is_empty() {
        return Ok(());
    }

    for event in events {
        for adjustment in event.stock_adjustments() {
            apply_stock(conn, adjustment).await?;
        }
    }

    let previous_version = order.version() - events.len() as u64;
    let updated = sqlx::query(
        r#"
        UPDATE orders
        SET state = $2, contact_id = $3, stock_committed = $4, version = $5
        WHERE id = $1 AND version = $6
        "#,
    )
    .bind(order.id().get())
    .bind(order.state().as_str())
    .bind(order.contact_id().map(ContactId::get))
    .bind(order.stock_committed())
    .bind(to_i64(order.version(), "version")?)
    .bind(to_i64(previous_version, "version")?)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("save_order", e))?
    .rows_affected();

    if updated == 0 {
        return Err(StoreError::Concurrency(format!(
            "order {} was modified concurrently",
            order.id()
        )));
    }

    let kept = ids(order.lines().iter().map(|l| l.product_id));
    sqlx::query("DELETE FROM order_items WHERE order_id = $1 AND NOT (product_id = ANY($2))")
        .bind(order.id().get())
        .bind(&kept)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("save_order", e))?;

    for line in order.lines() {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (order_id, product_id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(order.id().get())
        .bind(line.product_id.get())
        .bind(to_i32(line.quantity, "quantity")?)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("save_order", e))?;
    }

    Ok(())
}

/// Resolve order rows into views with items, product detail and contacts.
async fn order_views(conn: &mut PgConnection, rows: Vec<OrderRow>) -> StoreResult<Vec<OrderView>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let order_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let contact_ids: Vec<i64> = rows.iter().filter_map(|r| r.contact_id).collect();

    let items = sqlx::query_as::<_, ItemRow>(
        r#"
        SELECT oi.id, oi.order_id, oi.product_id, oi.quantity,
               p.name, p.model, p.shop_id, p.price_rrc
        FROM order_items oi
        JOIN products p ON p.id = oi.product_id
        WHERE oi.order_id = ANY($1)
        ORDER BY oi.id ASC
        "#,
    )
    .bind(&order_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("order_views", e))?;

    let contacts = sqlx::query_as::<_, ContactRow>(
        r#"
        SELECT id, user_id, city, street, house, structure, building, apartment, phone
        FROM contacts
        WHERE id = ANY($1)
        "#,
    )
    .bind(&contact_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("order_views", e))?;

    let contacts: HashMap<i64, Contact> =
        contacts.into_iter().map(|c| (c.id, Contact::from(c))).collect();

    let mut by_order: HashMap<i64, Vec<OrderItemView>> = HashMap::new();
    for item in items {
        by_order.entry(item.order_id).or_default().push(OrderItemView {
            id: OrderItemId::new(item.id),
            product: OrderedProduct {
                id: ProductId::new(item.product_id),
                name: item.name,
                model: item.model,
                shop_id: ShopId::new(item.shop_id),
                price_rrc: to_u64(item.price_rrc, "price_rrc")?,
            },
            quantity: to_u32(item.quantity, "quantity")?,
        });
    }

    rows.into_iter()
        .map(|row| {
            let items = by_order.remove(&row.id).unwrap_or_default();
            Ok(OrderView {
                id: OrderId::new(row.id),
                user_id: UserId::new(row.user_id),
                state: parse_state(&row.state)?,
                created_at: row.created_at,
                contact: row.contact_id.and_then(|id| contacts.get(&id).cloned()),
                total: order_total(items.iter().map(|i| (i.quantity, i.product.price_rrc))),
                items,
                version: to_u64(row.version, "version")?,
            })
        })
        .collect()
}

async fn view_of(conn: &mut PgConnection, order_id: OrderId) -> StoreResult<OrderView> {
    let rows = sqlx::query_as::<_, OrderRow>(
        r#"
        SELECT id, user_id, created_at, state, contact_id, stock_committed, version
        FROM orders
        WHERE id = $1
        "#,
    )
    .bind(order_id.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("view_of", e))?;

    order_views(conn, rows)
        .await?
        .pop()
        .ok_or_else(|| DomainError::not_found(format!("order {order_id}")).into())
}

/// Number of order items that reference products of `shop_id`.
async fn shop_order_items(conn: &mut PgConnection, shop_id: i64) -> StoreResult<usize> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM order_items oi
        JOIN products p ON p.id = oi.product_id
        WHERE p.shop_id = $1
        "#,
    )
    .bind(shop_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("shop_order_items", e))?;
    Ok(usize::try_from(count).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl CatalogStore for PostgresMarketStore {
    #[instrument(skip(self), err)]
    async fn list_products(&self, filter: ProductFilter) -> StoreResult<Vec<ProductListing>> {
        let mut conn = self.connection("list_products").await?;

        let rows = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT p.id, p.name, p.model, p.price, p.price_rrc, p.quantity,
                   s.id AS shop_id, s.name AS shop_name,
                   c.id AS category_id, c.name AS category_name
            FROM products p
            JOIN shops s ON s.id = p.shop_id
            JOIN categories c ON c.id = p.category_id
            WHERE p.is_active
              AND ($1::BIGINT IS NULL OR p.shop_id = $1)
              AND ($2::BIGINT IS NULL OR p.category_id = $2)
            ORDER BY p.id ASC
            "#,
        )
        .bind(filter.shop_id.map(ShopId::get))
        .bind(filter.category_id.map(CategoryId::get))
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;

        let product_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let parameters = sqlx::query_as::<_, ParameterValueRow>(
            r#"
            SELECT pp.product_id, pa.name, pp.value
            FROM product_parameters pp
            JOIN parameters pa ON pa.id = pp.parameter_id
            WHERE pp.product_id = ANY($1)
            ORDER BY pa.name ASC
            "#,
        )
        .bind(&product_ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;

        let mut by_product: HashMap<i64, Vec<ListedParameter>> = HashMap::new();
        for p in parameters {
            by_product
                .entry(p.product_id)
                .or_default()
                .push(ListedParameter { name: p.name, value: p.value });
        }

        rows.into_iter()
            .map(|row| {
                Ok(ProductListing {
                    id: ProductId::new(row.id),
                    parameters: by_product.remove(&row.id).unwrap_or_default(),
                    name: row.name,
                    model: row.model,
                    shop: ShopRef { id: ShopId::new(row.shop_id), name: row.shop_name },
                    category: CategoryRef {
                        id: CategoryId::new(row.category_id),
                        name: row.category_name,
                    },
                    price: to_u64(row.price, "price")?,
                    price_rrc: to_u64(row.price_rrc, "price_rrc")?,
                    quantity: to_u32(row.quantity, "quantity")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn list_shops(&self, open_only: bool) -> StoreResult<Vec<Shop>> {
        let rows = sqlx::query_as::<_, ShopRow>(
            r#"
            SELECT id, name, url, owner_id, accepting_orders
            FROM shops
            WHERE accepting_orders OR NOT $1
            ORDER BY id ASC
            "#,
        )
        .bind(open_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_shops", e))?;
        Ok(rows.into_iter().map(Shop::from).collect())
    }

    #[instrument(skip(self), err)]
    async fn list_categories(&self, shop_id: Option<ShopId>) -> StoreResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT c.id, c.name
            FROM categories c
            WHERE $1::BIGINT IS NULL
               OR EXISTS (
                   SELECT 1 FROM shop_categories sc
                   WHERE sc.category_id = c.id AND sc.shop_id = $1
               )
            ORDER BY c.id ASC
            "#,
        )
        .bind(shop_id.map(ShopId::get))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_categories", e))?;
        Ok(rows
            .into_iter()
            .map(|r| Category { id: CategoryId::new(r.id), name: r.name })
            .collect())
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn product_stock(&self, product_id: ProductId) -> StoreResult<Option<StockSnapshot>> {
        let mut conn = self.connection("product_stock").await?;
        Ok(stock_snapshots(&mut conn, &[product_id.get()]).await?.pop())
    }

    #[instrument(skip(self), fields(owner = %owner), err)]
    async fn shop_for_owner(&self, owner: UserId) -> StoreResult<Option<Shop>> {
        let mut conn = self.connection("shop_for_owner").await?;
        shop_by_owner(&mut conn, owner).await
    }

    #[instrument(skip(self), fields(owner = %owner), err)]
    async fn set_shop_state(&self, owner: UserId, accepting_orders: bool) -> StoreResult<Shop> {
        let row = sqlx::query_as::<_, ShopRow>(
            r#"
            UPDATE shops SET accepting_orders = $2
            WHERE owner_id = $1
            RETURNING id, name, url, owner_id, accepting_orders
            "#,
        )
        .bind(owner.get())
        .bind(accepting_orders)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_shop_state", e))?;

        row.map(Shop::from)
            .ok_or_else(|| DomainError::not_found(format!("shop of user {owner}")).into())
    }

    #[instrument(
        skip(self, replacement),
        fields(owner = %replacement.shop.owner, products = replacement.products.len()),
        err
    )]
    async fn replace_catalog(
        &self,
        replacement: CatalogReplacement,
    ) -> StoreResult<ReplacementReport> {
        let mut tx = self.begin("replace_catalog").await?;
        let CatalogReplacement { shop, categories, products } = replacement;

        let shop_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO shops (name, url, owner_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (owner_id) DO UPDATE SET name = EXCLUDED.name, url = EXCLUDED.url
            RETURNING id
            "#,
        )
        .bind(&shop.name)
        .bind(&shop.url)
        .bind(shop.owner.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("replace_catalog", e))?;

        for category in &categories {
            sqlx::query(
                r#"
                INSERT INTO categories (id, name) VALUES ($1, $2)
                ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
                "#,
            )
            .bind(category.id.get())
            .bind(&category.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_catalog", e))?;

            sqlx::query(
                r#"
                INSERT INTO shop_categories (shop_id, category_id) VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(shop_id)
            .bind(category.id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_catalog", e))?;
        }

        let order_items_removed = shop_order_items(&mut tx, shop_id).await?;
        let products_removed = sqlx::query("DELETE FROM products WHERE shop_id = $1")
            .bind(shop_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_catalog", e))?
            .rows_affected() as usize;

        let products_created = products.len();
        let mut parameters_written = 0;
        for product in products {
            let product_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO products (shop_id, category_id, name, model, price, price_rrc, quantity, is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
                RETURNING id
                "#,
            )
            .bind(shop_id)
            .bind(product.category_id.get())
            .bind(&product.name)
            .bind(&product.model)
            .bind(to_i64(product.price, "price")?)
            .bind(to_i64(product.price_rrc, "price_rrc")?)
            .bind(to_i32(product.quantity, "quantity")?)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_catalog", e))?;

            for (name, value) in &product.parameters {
                let parameter_id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO parameters (name) VALUES ($1)
                    ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
                    RETURNING id
                    "#,
                )
                .bind(name)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("replace_catalog", e))?;

                sqlx::query(
                    r#"
                    INSERT INTO product_parameters (product_id, parameter_id, value)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (product_id, parameter_id) DO UPDATE SET value = EXCLUDED.value
                    "#,
                )
                .bind(product_id)
                .bind(parameter_id)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("replace_catalog", e))?;
                parameters_written += 1;
            }
        }

        Self::commit(tx, "replace_catalog").await?;

        if order_items_removed > 0 {
            warn!(
                shop_id,
                products_removed,
                order_items_removed,
                "catalog replacement removed order items of deleted products"
            );
        }

        Ok(ReplacementReport {
            shop_id: ShopId::new(shop_id),
            categories_upserted: categories.len(),
            products_removed,
            products_created,
            parameters_written,
            order_items_removed,
        })
    }

    #[instrument(skip(self), fields(shop_id = %shop_id), err)]
    async fn delete_shop(&self, shop_id: ShopId) -> StoreResult<ShopRemoval> {
        let mut tx = self.begin("delete_shop").await?;

        let order_items_removed = shop_order_items(&mut tx, shop_id.get()).await?;
        let products_removed = sqlx::query("DELETE FROM products WHERE shop_id = $1")
            .bind(shop_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_shop", e))?
            .rows_affected() as usize;

        let deleted = sqlx::query("DELETE FROM shops WHERE id = $1")
            .bind(shop_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_shop", e))?
            .rows_affected();
        if deleted == 0 {
            return Err(DomainError::not_found(format!("shop {shop_id}")).into());
        }

        Self::commit(tx, "delete_shop").await?;

        if order_items_removed > 0 {
            warn!(shop_id = %shop_id, order_items_removed, "shop deletion removed order items");
        }

        Ok(ShopRemoval { shop_id, products_removed, order_items_removed })
    }
}

#[async_trait]
impl OrderStore for PostgresMarketStore {
    #[instrument(skip(self), fields(user = %user), err)]
    async fn basket_for(&self, user: UserId) -> StoreResult<Option<OrderView>> {
        let mut conn = self.connection("basket_for").await?;
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, user_id, created_at, state, contact_id, stock_committed, version
            FROM orders
            WHERE user_id = $1 AND state = 'basket'
            "#,
        )
        .bind(user.get())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("basket_for", e))?;

        Ok(order_views(&mut conn, rows).await?.pop())
    }

    #[instrument(skip(self, items), fields(user = %user, items = items.len()), err)]
    async fn add_to_basket(&self, user: UserId, items: Vec<StockRequest>) -> StoreResult<OrderView> {
        let mut tx = self.begin("add_to_basket").await?;

        let order_id = ensure_basket(&mut tx, user).await?;
        let mut order = lock_order(&mut tx, order_id)
            .await?
            .ok_or_else(|| StoreError::Storage(format!("basket {order_id} vanished")))?;

        let stock = stock_snapshots(&mut tx, &ids(items.iter().map(|i| i.product_id))).await?;
        let events = order.execute(&OrderCommand::AddItems(AddItems { items, stock }))?;
        save_order(&mut tx, &order, &events).await?;

        let view = view_of(&mut tx, order_id).await?;
        Self::commit(tx, "add_to_basket").await?;
        Ok(view)
    }

    #[instrument(skip(self, items), fields(user = %user, items = items.len()), err)]
    async fn update_basket(&self, user: UserId, items: Vec<StockRequest>) -> StoreResult<OrderView> {
        let mut tx = self.begin("update_basket").await?;

        let order_id = basket_id(&mut tx, user)
            .await?
            .ok_or_else(|| DomainError::not_found("basket"))?;
        let mut order = lock_order(&mut tx, order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("basket"))?;

        let stock = stock_snapshots(&mut tx, &ids(items.iter().map(|i| i.product_id))).await?;
        let events =
            order.execute(&OrderCommand::UpdateQuantities(UpdateQuantities { items, stock }))?;
        save_order(&mut tx, &order, &events).await?;

        let view = view_of(&mut tx, order_id).await?;
        Self::commit(tx, "update_basket").await?;
        Ok(view)
    }

    #[instrument(skip(self, item_ids), fields(user = %user), err)]
    async fn remove_from_basket(
        &self,
        user: UserId,
        item_ids: Vec<OrderItemId>,
    ) -> StoreResult<usize> {
        let mut tx = self.begin("remove_from_basket").await?;

        let Some(order_id) = basket_id(&mut tx, user).await? else {
            return Ok(0);
        };
        let mut order = lock_order(&mut tx, order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("basket"))?;

        let product_ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT product_id FROM order_items
            WHERE order_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(order_id.get())
        .bind(ids(item_ids))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("remove_from_basket", e))?;

        let events = order.execute(&OrderCommand::RemoveItems(RemoveItems {
            product_ids: product_ids.into_iter().map(ProductId::new).collect(),
        }))?;
        let removed = events
            .iter()
            .map(|e| match e {
                OrderEvent::ItemsRemoved(e) => e.product_ids.len(),
                _ => 0,
            })
            .sum();
        save_order(&mut tx, &order, &events).await?;

        Self::commit(tx, "remove_from_basket").await?;
        Ok(removed)
    }

    #[instrument(skip(self, buyer_email), fields(user = %user, order_id = %order_id), err)]
    async fn finalize(
        &self,
        user: UserId,
        order_id: OrderId,
        contact_id: ContactId,
        buyer_email: &str,
    ) -> StoreResult<OrderView> {
        let mut tx = self.begin("finalize").await?;

        let mut order = lock_order(&mut tx, order_id)
            .await?
            .filter(|o| o.user_id() == user)
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")))?;

        let owns_contact: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM contacts WHERE id = $1 AND user_id = $2)",
        )
        .bind(contact_id.get())
        .bind(user.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("finalize", e))?;
        if !owns_contact {
            return Err(DomainError::not_found(format!("contact {contact_id}")).into());
        }

        let stock = stock_snapshots(&mut tx, &ids(order.lines().iter().map(|l| l.product_id))).await?;
        let events = order.execute(&OrderCommand::Finalize(Finalize {
            contact_id,
            stock_policy: self.settings.stock_policy,
            stock,
        }))?;
        save_order(&mut tx, &order, &events).await?;

        for message in order_placed_messages(order_id, buyer_email, &self.settings.ops_recipients) {
            let status = if message.recipients.is_empty() {
                DeliveryStatus::Delivered
            } else {
                DeliveryStatus::Pending
            };
            sqlx::query(
                r#"
                INSERT INTO outbox_messages (order_id, audience, recipients, subject, body, status)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order_id.get())
            .bind(message.audience.as_str())
            .bind(&message.recipients)
            .bind(&message.subject)
            .bind(&message.body)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("finalize", e))?;
        }

        let view = view_of(&mut tx, order_id).await?;
        Self::commit(tx, "finalize").await?;
        Ok(view)
    }

    #[instrument(skip(self), fields(user = %user), err)]
    async fn orders_for(&self, user: UserId) -> StoreResult<Vec<OrderView>> {
        let mut conn = self.connection("orders_for").await?;
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, user_id, created_at, state, contact_id, stock_committed, version
            FROM orders
            WHERE user_id = $1 AND state <> 'basket'
            ORDER BY id DESC
            "#,
        )
        .bind(user.get())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("orders_for", e))?;

        order_views(&mut conn, rows).await
    }

    #[instrument(skip(self), fields(owner = %owner), err)]
    async fn orders_for_shop(&self, owner: UserId) -> StoreResult<Vec<OrderView>> {
        let mut conn = self.connection("orders_for_shop").await?;
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT o.id, o.user_id, o.created_at, o.state, o.contact_id, o.stock_committed, o.version
            FROM orders o
            WHERE o.state <> 'basket'
              AND EXISTS (
                  SELECT 1
                  FROM order_items oi
                  JOIN products p ON p.id = oi.product_id
                  JOIN shops s ON s.id = p.shop_id
                  WHERE oi.order_id = o.id AND s.owner_id = $1
              )
            ORDER BY o.id DESC
            "#,
        )
        .bind(owner.get())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("orders_for_shop", e))?;

        order_views(&mut conn, rows).await
    }

    #[instrument(skip(self), fields(order_id = %order_id, target = %target), err)]
    async fn transition(
        &self,
        actor: TransitionActor,
        order_id: OrderId,
        target: OrderState,
        expected: ExpectedVersion,
    ) -> StoreResult<OrderView> {
        let mut tx = self.begin("transition").await?;

        let mut order = lock_order(&mut tx, order_id)
            .await?
            .filter(|o| o.state() != OrderState::Basket)
            .ok_or_else(|| DomainError::not_found(format!("order {order_id}")))?;

        if let TransitionActor::Shop(owner) = actor {
            let touches_shop: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1
                    FROM order_items oi
                    JOIN products p ON p.id = oi.product_id
                    JOIN shops s ON s.id = p.shop_id
                    WHERE oi.order_id = $1 AND s.owner_id = $2
                )
                "#,
            )
            .bind(order_id.get())
            .bind(owner.get())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("transition", e))?;
            if !touches_shop {
                return Err(DomainError::forbidden(format!(
                    "order {order_id} contains no products of your shop"
                ))
                .into());
            }
        }

        expected
            .check(order.version())
            .map_err(|e| StoreError::Concurrency(e.to_string()))?;

        let events = order.execute(&OrderCommand::Transition(Transition { target }))?;
        save_order(&mut tx, &order, &events).await?;

        let view = view_of(&mut tx, order_id).await?;
        Self::commit(tx, "transition").await?;
        Ok(view)
    }
}

#[async_trait]
impl ContactStore for PostgresMarketStore {
    #[instrument(skip(self), fields(user = %user), err)]
    async fn contacts_for(&self, user: UserId) -> StoreResult<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT id, user_id, city, street, house, structure, building, apartment, phone
            FROM contacts
            WHERE user_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(user.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("contacts_for", e))?;
        Ok(rows.into_iter().map(Contact::from).collect())
    }

    #[instrument(skip(self, details), fields(user = %user), err)]
    async fn add_contact(&self, user: UserId, details: ContactDetails) -> StoreResult<Contact> {
        let row = sqlx::query_as::<_, ContactRow>(
            r#"
            INSERT INTO contacts (user_id, city, street, house, structure, building, apartment, phone)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, user_id, city, street, house, structure, building, apartment, phone
            "#,
        )
        .bind(user.get())
        .bind(&details.city)
        .bind(&details.street)
        .bind(&details.house)
        .bind(&details.structure)
        .bind(&details.building)
        .bind(&details.apartment)
        .bind(&details.phone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_contact", e))?;
        Ok(row.into())
    }
}

#[async_trait]
impl OutboxStore for PostgresMarketStore {
    #[instrument(skip(self), err)]
    async fn pending_messages(
        &self,
        limit: usize,
        due_by: DateTime<Utc>,
    ) -> StoreResult<Vec<OutboxEntry>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, order_id, audience, recipients, subject, body, status, attempts, last_error,
                   created_at, next_attempt_at
            FROM outbox_messages
            WHERE status = 'pending' AND next_attempt_at <= $2
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(due_by)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_messages", e))?;
        rows.into_iter().map(OutboxEntry::try_from).collect()
    }

    #[instrument(skip(self), err)]
    async fn mark_delivered(&self, id: i64) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'delivered', attempts = attempts + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_delivered", e))?
        .rows_affected();
        if updated == 0 {
            return Err(DomainError::not_found(format!("outbox message {id}")).into());
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn mark_attempt_failed(
        &self,
        id: i64,
        error: &str,
        max_attempts: u32,
        retry_at: DateTime<Utc>,
    ) -> StoreResult<DeliveryStatus> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE outbox_messages
            SET attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN attempts + 1 >= $3 THEN 'failed' ELSE status END,
                next_attempt_at = CASE WHEN attempts + 1 >= $3 THEN next_attempt_at ELSE $4 END
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(i64::from(max_attempts))
        .bind(retry_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_attempt_failed", e))?;

        match status {
            Some(status) => parse_delivery_status(&status),
            None => Err(DomainError::not_found(format!("outbox message {id}")).into()),
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn messages_for_order(&self, order_id: OrderId) -> StoreResult<Vec<OutboxEntry>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, order_id, audience, recipients, subject, body, status, attempts, last_error,
                   created_at, next_attempt_at
            FROM outbox_messages
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("messages_for_order", e))?;
        rows.into_iter().map(OutboxEntry::try_from).collect()
    }
}

/// Map sqlx errors into `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation
                Some("23505") => StoreError::Concurrency(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed during {}", operation))
        }
        other => StoreError::Storage(format!("{} failed: {}", operation, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_catalog::{NewProduct, ShopUpsert};

    /// Connects to `DATABASE_URL`; tests return early when it is unset.
    async fn store() -> Option<PostgresMarketStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PostgresMarketStore::connect(&url, 2, MarketSettings::default())
            .await
            .expect("connect to DATABASE_URL");
        store.migrate().await.expect("migrations");
        Some(store)
    }

    fn unique_user() -> UserId {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        UserId::new(nanos.rem_euclid(i64::MAX - 1) + 1)
    }

    fn replacement(owner: UserId, names: &[&str]) -> CatalogReplacement {
        CatalogReplacement {
            shop: ShopUpsert { owner, name: "PG shop".into(), url: "https://example.com/pg.yaml".into() },
            categories: vec![Category { id: CategoryId::new(9001), name: "Phones".into() }],
            products: names
                .iter()
                .map(|name| NewProduct {
                    category_id: CategoryId::new(9001),
                    name: name.to_string(),
                    model: String::new(),
                    price: 100,
                    price_rrc: 120,
                    quantity: 5,
                    parameters: vec![("color".into(), "black".into()), ("color".into(), "white".into())],
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn replacement_is_full_and_parameters_are_unique() {
        let Some(store) = store().await else { return };
        let owner = unique_user();

        let first = store.replace_catalog(replacement(owner, &["a", "b"])).await.unwrap();
        let second = store.replace_catalog(replacement(owner, &["c"])).await.unwrap();

        assert_eq!(first.shop_id, second.shop_id);
        assert_eq!(second.products_removed, 2);

        let listed = store
            .list_products(ProductFilter { shop_id: Some(second.shop_id), category_id: None })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "c");
        assert_eq!(listed[0].parameters.len(), 1);
        assert_eq!(listed[0].parameters[0].value, "white");

        store.delete_shop(second.shop_id).await.unwrap();
    }

    #[tokio::test]
    async fn version_mismatch_is_a_concurrency_error() {
        let Some(store) = store().await else { return };
        let owner = unique_user();
        let buyer = UserId::new(owner.get() / 2 + 1);

        let report = store.replace_catalog(replacement(owner, &["x"])).await.unwrap();
        let product = store
            .list_products(ProductFilter { shop_id: Some(report.shop_id), category_id: None })
            .await
            .unwrap()[0]
            .id;

        let basket = store.add_to_basket(buyer, vec![StockRequest::new(product, 1)]).await.unwrap();
        let contact = store
            .add_contact(buyer, ContactDetails {
                city: "Almaty".into(),
                street: "Abay".into(),
                house: None,
                structure: None,
                building: None,
                apartment: None,
                phone: "+7".into(),
            })
            .await
            .unwrap();
        let placed = store.finalize(buyer, basket.id, contact.id, "b@example.com").await.unwrap();

        let err = store
            .transition(
                TransitionActor::Operator,
                placed.id,
                OrderState::Confirmed,
                ExpectedVersion::Exact(placed.version + 1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        store.delete_shop(report.shop_id).await.unwrap();
    }
}
