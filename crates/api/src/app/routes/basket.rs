use std::sync::Arc;

use axum::{
    extract::Extension,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use procura_auth::Permission;
use procura_infra::OrderStore;

use crate::app::dto::{BasketItemsRequest, RemoveItemsRequest};
use crate::app::errors;
use crate::app::extract::{payload, Payload};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

/// The caller's basket as a list (empty when none has been started).
pub async fn get_basket(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &[Permission::BASKET_WRITE]) {
        return resp;
    }

    match services.store.basket_for(principal.user_id()).await {
        Ok(basket) => Json(basket.into_iter().collect::<Vec<_>>()).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn add_items(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Payload<BasketItemsRequest>, axum::response::Response>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &[Permission::BASKET_WRITE]) {
        return resp;
    }
    let items = match payload(body).map(BasketItemsRequest::into_requests) {
        Ok(Ok(items)) => items,
        Ok(Err(e)) => return errors::domain_error_to_response(e),
        Err(resp) => return resp,
    };

    match services.store.add_to_basket(principal.user_id(), items).await {
        Ok(basket) => Json(basket).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn update_items(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Payload<BasketItemsRequest>, axum::response::Response>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &[Permission::BASKET_WRITE]) {
        return resp;
    }
    let items = match payload(body).map(BasketItemsRequest::into_requests) {
        Ok(Ok(items)) => items,
        Ok(Err(e)) => return errors::domain_error_to_response(e),
        Err(resp) => return resp,
    };

    match services.store.update_basket(principal.user_id(), items).await {
        Ok(basket) => Json(basket).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn remove_items(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Payload<RemoveItemsRequest>, axum::response::Response>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &[Permission::BASKET_WRITE]) {
        return resp;
    }
    let ids = match payload(body).map(RemoveItemsRequest::into_ids) {
        Ok(Ok(ids)) => ids,
        Ok(Err(e)) => return errors::domain_error_to_response(e),
        Err(resp) => return resp,
    };

    match services.store.remove_from_basket(principal.user_id(), ids).await {
        Ok(removed) => Json(json!({ "removed": removed })).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
