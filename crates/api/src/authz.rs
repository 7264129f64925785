//! API-side authorization guard.
//!
//! Checks run before any domain state is read or written.

use axum::http::StatusCode;
use axum::response::Response;

use procura_auth::{AuthzError, Permission, authorize};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

/// Check that the caller holds every permission in `required`.
pub fn authorize_action(principal: &PrincipalContext, required: &[Permission]) -> Result<(), AuthzError> {
    for perm in required {
        authorize(principal.principal(), perm)?;
    }
    Ok(())
}

/// [`authorize_action`] mapped to a `403` response.
pub fn require(principal: &PrincipalContext, required: &[Permission]) -> Result<(), Response> {
    authorize_action(principal, required)
        .map_err(|e| json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()))
}

/// Partner endpoints are reserved for shop accounts.
pub fn require_shop(principal: &PrincipalContext, required: &[Permission]) -> Result<(), Response> {
    if !principal.principal().is_shop() {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "only shop accounts may use partner endpoints",
        ));
    }
    require(principal, required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_auth::{Principal, Role, UserKind};
    use procura_core::UserId;

    fn ctx(kind: UserKind, roles: Vec<Role>) -> PrincipalContext {
        PrincipalContext::new(Principal {
            user_id: UserId::new(5),
            email: "u@example.com".into(),
            kind,
            roles,
        })
    }

    #[test]
    fn buyers_may_shop_but_not_manage_shops() {
        let buyer = ctx(UserKind::Buyer, vec![]);
        assert!(authorize_action(&buyer, &[Permission::BASKET_WRITE, Permission::ORDERS_PLACE]).is_ok());
        assert!(authorize_action(&buyer, &[Permission::PARTNER_CATALOG_UPDATE]).is_err());
        assert!(require_shop(&buyer, &[]).is_err());
    }

    #[test]
    fn shops_pass_partner_checks() {
        let shop = ctx(UserKind::Shop, vec![]);
        assert!(require_shop(&shop, &[Permission::PARTNER_CATALOG_UPDATE, Permission::PARTNER_STATE]).is_ok());
        assert!(authorize_action(&shop, &[Permission::ORDERS_TRANSITION_ANY]).is_err());
    }

    #[test]
    fn admin_role_is_a_wildcard_but_not_a_shop() {
        let admin = ctx(UserKind::Buyer, vec![Role::ADMIN]);
        assert!(authorize_action(&admin, &[Permission::ORDERS_TRANSITION_ANY]).is_ok());
        assert!(require_shop(&admin, &[]).is_err());
    }
}
