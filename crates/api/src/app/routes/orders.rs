use std::sync::Arc;

use axum::{
    extract::Extension,
    response::IntoResponse,
    Json,
};
use tracing::info;

use procura_auth::Permission;
use procura_infra::OrderStore;

use crate::app::dto::FinalizeOrderRequest;
use crate::app::errors;
use crate::app::extract::{payload, Payload};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

/// Placed orders, newest first.
pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &[Permission::ORDERS_READ]) {
        return resp;
    }

    match services.store.orders_for(principal.user_id()).await {
        Ok(orders) => Json(orders).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Place the basket: `basket -> new`, with the contact attached and both
/// notifications queued.
pub async fn finalize_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Payload<FinalizeOrderRequest>, axum::response::Response>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &[Permission::ORDERS_PLACE]) {
        return resp;
    }
    let (order_id, contact_id) = match payload(body).map(FinalizeOrderRequest::parse) {
        Ok(Ok(ids)) => ids,
        Ok(Err(e)) => return errors::domain_error_to_response(e),
        Err(resp) => return resp,
    };

    match services
        .store
        .finalize(principal.user_id(), order_id, contact_id, principal.email())
        .await
    {
        Ok(order) => {
            info!(order_id = %order.id, user_id = %principal.user_id(), total = order.total, "order placed");
            Json(order).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
