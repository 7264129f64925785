use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use procura_catalog::{ProductFilter, parse_state_flag};
use procura_core::{
    CategoryId, ContactId, DomainError, DomainResult, ExpectedVersion, OrderId, OrderItemId,
    ProductId, ShopId,
};
use procura_infra::jobs::{Job, JobAttemptRecord, JobId, JobStatus};
use procura_inventory::StockRequest;
use procura_orders::OrderState;

// -------------------------
// Request DTOs
// -------------------------

/// An id sent either as a JSON number or as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdField {
    Number(i64),
    Text(String),
}

fn required_id<T>(field: Option<IdField>, name: &str) -> DomainResult<T>
where
    T: FromStr<Err = DomainError>,
{
    match field {
        None => Err(DomainError::validation(format!("{name} is required"))),
        Some(IdField::Number(n)) => n.to_string().parse(),
        Some(IdField::Text(s)) if s.trim().is_empty() => {
            Err(DomainError::validation(format!("{name} is required")))
        }
        Some(IdField::Text(s)) => s.parse(),
    }
}

fn optional_id<T>(raw: Option<&str>) -> DomainResult<Option<T>>
where
    T: FromStr<Err = DomainError>,
{
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasketItem {
    pub product: i64,
    pub quantity: i64,
}

impl BasketItem {
    fn into_request(self) -> DomainResult<StockRequest> {
        let product_id: ProductId = self.product.to_string().parse()?;
        let quantity = u32::try_from(self.quantity).map_err(|_| {
            DomainError::validation(format!(
                "quantity for product {product_id} must be a positive number, got {}",
                self.quantity
            ))
        })?;
        Ok(StockRequest::new(product_id, quantity))
    }
}

/// `items` as a JSON-encoded string or as a plain list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BasketItemsField {
    Encoded(String),
    List(Vec<BasketItem>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasketItemsRequest {
    pub items: Option<BasketItemsField>,
}

impl BasketItemsRequest {
    pub fn into_requests(self) -> DomainResult<Vec<StockRequest>> {
        let items = match self.items {
            None => return Err(DomainError::validation("items is required")),
            Some(BasketItemsField::List(items)) => items,
            Some(BasketItemsField::Encoded(raw)) => serde_json::from_str::<Vec<BasketItem>>(&raw)
                .map_err(|e| DomainError::validation(format!("items: {e}")))?,
        };
        items.into_iter().map(BasketItem::into_request).collect()
    }
}

/// `items` as a comma-separated string or a list of ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ItemIdsField {
    Encoded(String),
    List(Vec<i64>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveItemsRequest {
    pub items: Option<ItemIdsField>,
}

impl RemoveItemsRequest {
    pub fn into_ids(self) -> DomainResult<Vec<OrderItemId>> {
        let ids: Vec<OrderItemId> = match self.items {
            None => Vec::new(),
            Some(ItemIdsField::Encoded(raw)) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect::<DomainResult<_>>()?,
            Some(ItemIdsField::List(ids)) => ids
                .into_iter()
                .map(|id| id.to_string().parse())
                .collect::<DomainResult<_>>()?,
        };
        if ids.is_empty() {
            return Err(DomainError::validation("items is required"));
        }
        Ok(ids)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinalizeOrderRequest {
    pub id: Option<IdField>,
    pub contact: Option<IdField>,
}

impl FinalizeOrderRequest {
    pub fn parse(self) -> DomainResult<(OrderId, ContactId)> {
        Ok((required_id(self.id, "id")?, required_id(self.contact, "contact")?))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartnerUpdateRequest {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StateFlag {
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopStateRequest {
    pub state: Option<StateFlag>,
}

impl ShopStateRequest {
    pub fn accepting_orders(self) -> DomainResult<bool> {
        match self.state {
            None => Err(DomainError::validation("state is required")),
            Some(StateFlag::Bool(b)) => Ok(b),
            Some(StateFlag::Text(raw)) => parse_state_flag(&raw),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionRequest {
    pub state: Option<String>,
    /// Expected current order version
    pub version: Option<u64>,
}

impl TransitionRequest {
    pub fn parse(self) -> DomainResult<(OrderState, ExpectedVersion)> {
        let target = self
            .state
            .ok_or_else(|| DomainError::validation("state is required"))?
            .parse()?;
        Ok((target, ExpectedVersion::from(self.version)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductQuery {
    pub shop_id: Option<String>,
    pub category_id: Option<String>,
}

impl ProductQuery {
    pub fn into_filter(self) -> DomainResult<ProductFilter> {
        Ok(ProductFilter {
            shop_id: optional_id::<ShopId>(self.shop_id.as_deref())?,
            category_id: optional_id::<CategoryId>(self.category_id.as_deref())?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryQuery {
    pub shop_id: Option<String>,
}

impl CategoryQuery {
    pub fn shop_id(&self) -> DomainResult<Option<ShopId>> {
        optional_id(self.shop_id.as_deref())
    }
}

// -------------------------
// Response DTOs
// -------------------------

/// Ingestion job as seen by the supplier who enqueued it.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub kind: &'static str,
    pub url: Option<String>,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub history: Vec<JobAttemptRecord>,
    /// Replacement report once the job completed
    pub result: Option<serde_json::Value>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        let next_attempt_at = match job.status {
            JobStatus::Failed { .. } => job.scheduled_at,
            _ => None,
        };
        Self {
            id: job.id,
            kind: job.kind.type_name(),
            url: job.payload.get("url").and_then(|v| v.as_str()).map(String::from),
            status: job.status.clone(),
            attempt: job.attempt,
            max_attempts: job.retry_policy.max_attempts,
            created_at: job.created_at,
            updated_at: job.updated_at,
            next_attempt_at,
            history: job.history.clone(),
            result: job.result.clone(),
        }
    }
}
