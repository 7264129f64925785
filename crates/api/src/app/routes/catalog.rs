//! Public catalog browsing.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    response::IntoResponse,
    Json,
};

use procura_infra::CatalogStore;

use crate::app::dto::{CategoryQuery, ProductQuery};
use crate::app::errors;
use crate::app::services::AppServices;

/// Active products, optionally narrowed to one shop and/or category.
pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ProductQuery>,
) -> axum::response::Response {
    let filter = match query.into_filter() {
        Ok(f) => f,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.store.list_products(filter).await {
        Ok(products) => Json(products).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Shops currently accepting orders.
pub async fn list_shops(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.store.list_shops(true).await {
        Ok(shops) => Json(shops).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_categories(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<CategoryQuery>,
) -> axum::response::Response {
    let shop_id = match query.shop_id() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.store.list_categories(shop_id).await {
        Ok(categories) => Json(categories).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
