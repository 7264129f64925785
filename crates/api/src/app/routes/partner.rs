//! Supplier-facing endpoints: price-list updates, shop state and incoming
//! orders.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{error, info};

use procura_auth::Permission;
use procura_core::{DomainError, OrderId};
use procura_infra::jobs::{JobId, JobStoreError};
use procura_infra::{CatalogStore, OrderStore, TransitionActor, validate_price_list_url};

use crate::app::dto::{JobView, PartnerUpdateRequest, ShopStateRequest, TransitionRequest};
use crate::app::errors;
use crate::app::extract::{payload, Payload};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/update", post(request_update).get(list_updates))
        .route("/update/:job_id", get(get_update))
        .route("/state", get(get_state).post(set_state))
        .route("/orders", get(list_orders))
        .route("/orders/:id/state", post(transition_order))
}

fn job_store_error(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(_) | JobStoreError::NotOwner(_) => {
            errors::json_error(StatusCode::NOT_FOUND, "job_not_found", "no such ingestion job")
        }
        other => {
            error!(error = %other, "job store failure");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", "internal storage error")
        }
    }
}

/// Queue a price-list ingestion for the caller's shop.
///
/// The URL is validated up front; fetching and applying happen on the job
/// executor, so the answer is `202` with the job id to poll.
pub async fn request_update(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Payload<PartnerUpdateRequest>, axum::response::Response>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_shop(&principal, &[Permission::PARTNER_CATALOG_UPDATE]) {
        return resp;
    }
    let raw = match payload(body) {
        Ok(PartnerUpdateRequest { url: Some(url) }) if !url.trim().is_empty() => url,
        Ok(_) => return errors::domain_error_to_response(DomainError::validation("url is required")),
        Err(resp) => return resp,
    };
    let url = match validate_price_list_url(&raw) {
        Ok(url) => url,
        Err(e) => return errors::ingestion_error_to_response(e),
    };

    match services.enqueue_ingestion(principal.user_id(), &url) {
        Ok(job_id) => {
            info!(job_id = %job_id, user_id = %principal.user_id(), url = %url, "price list update queued");
            (StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response()
        }
        Err(e) => job_store_error(e),
    }
}

pub async fn list_updates(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_shop(&principal, &[Permission::PARTNER_CATALOG_UPDATE]) {
        return resp;
    }

    match services.ingestion_jobs(principal.user_id()) {
        Ok(jobs) => Json(jobs.iter().map(JobView::from).collect::<Vec<_>>()).into_response(),
        Err(e) => job_store_error(e),
    }
}

pub async fn get_update(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_shop(&principal, &[Permission::PARTNER_CATALOG_UPDATE]) {
        return resp;
    }
    let Ok(job_id) = job_id.parse::<JobId>() else {
        return errors::json_error(StatusCode::NOT_FOUND, "job_not_found", "no such ingestion job");
    };

    match services.ingestion_job(principal.user_id(), job_id) {
        Ok(Some(job)) => Json(JobView::from(&job)).into_response(),
        Ok(None) => job_store_error(JobStoreError::NotFound(job_id)),
        Err(e) => job_store_error(e),
    }
}

pub async fn get_state(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_shop(&principal, &[Permission::PARTNER_STATE]) {
        return resp;
    }

    match services.store.shop_for_owner(principal.user_id()).await {
        Ok(Some(shop)) => Json(json!({
            "shop_id": shop.id,
            "name": shop.name,
            "accepting_orders": shop.accepting_orders,
        }))
        .into_response(),
        Ok(None) => errors::domain_error_to_response(DomainError::not_found(
            "no shop yet; upload a price list first",
        )),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn set_state(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Payload<ShopStateRequest>, axum::response::Response>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_shop(&principal, &[Permission::PARTNER_STATE]) {
        return resp;
    }
    let accepting_orders = match payload(body).map(ShopStateRequest::accepting_orders) {
        Ok(Ok(flag)) => flag,
        Ok(Err(e)) => return errors::domain_error_to_response(e),
        Err(resp) => return resp,
    };

    match services
        .store
        .set_shop_state(principal.user_id(), accepting_orders)
        .await
    {
        Ok(shop) => {
            info!(shop_id = %shop.id, accepting_orders, "shop state changed");
            Json(json!({
                "shop_id": shop.id,
                "name": shop.name,
                "accepting_orders": shop.accepting_orders,
            }))
            .into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Placed orders that contain at least one of the caller's products.
pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require_shop(&principal, &[Permission::PARTNER_ORDERS_READ]) {
        return resp;
    }

    match services.store.orders_for_shop(principal.user_id()).await {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Move an order one step along its lifecycle (or cancel it).
///
/// Holders of `orders.transition.any` act as operators; everyone else must
/// be a shop whose products are in the order.
pub async fn transition_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Payload<TransitionRequest>, axum::response::Response>,
) -> axum::response::Response {
    let actor = if authz::authorize_action(&principal, &[Permission::ORDERS_TRANSITION_ANY]).is_ok() {
        TransitionActor::Operator
    } else if let Err(resp) = authz::require_shop(&principal, &[Permission::PARTNER_ORDERS_TRANSITION]) {
        return resp;
    } else {
        TransitionActor::Shop(principal.user_id())
    };

    let order_id: OrderId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let (target, expected) = match payload(body).map(TransitionRequest::parse) {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(e)) => return errors::domain_error_to_response(e),
        Err(resp) => return resp,
    };

    match services.store.transition(actor, order_id, target, expected).await {
        Ok(order) => {
            info!(order_id = %order.id, state = %order.state, version = order.version, "order transitioned");
            Json(order).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
