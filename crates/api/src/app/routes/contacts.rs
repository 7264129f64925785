use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use procura_auth::Permission;
use procura_infra::ContactStore;
use procura_orders::ContactDraft;

use crate::app::errors;
use crate::app::extract::{payload, Payload};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

pub async fn list_contacts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.store.contacts_for(principal.user_id()).await {
        Ok(contacts) => Json(contacts).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn add_contact(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Payload<ContactDraft>, axum::response::Response>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &[Permission::CONTACTS_WRITE]) {
        return resp;
    }
    let details = match payload(body).map(ContactDraft::into_details) {
        Ok(Ok(details)) => details,
        Ok(Err(e)) => return errors::domain_error_to_response(e),
        Err(resp) => return resp,
    };

    match services.store.add_contact(principal.user_id(), details).await {
        Ok(contact) => (StatusCode::CREATED, Json(contact)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
