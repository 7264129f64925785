use std::collections::HashSet;

use thiserror::Error;

use crate::{Permission, Principal, Role, UserKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Effective permissions for a user kind plus token roles.
///
/// Every authenticated user may shop. Shop users additionally manage their own
/// shop; the `ops` role moves any order; `admin` gets the wildcard.
pub fn permissions_for(kind: UserKind, roles: &[Role]) -> Vec<Permission> {
    let mut perms = vec![
        Permission::BASKET_WRITE,
        Permission::ORDERS_PLACE,
        Permission::ORDERS_READ,
        Permission::CONTACTS_WRITE,
    ];

    if kind == UserKind::Shop {
        perms.extend([
            Permission::PARTNER_CATALOG_UPDATE,
            Permission::PARTNER_STATE,
            Permission::PARTNER_ORDERS_READ,
            Permission::PARTNER_ORDERS_TRANSITION,
        ]);
    }

    for role in roles {
        if *role == Role::OPS {
            perms.push(Permission::ORDERS_TRANSITION_ANY);
        } else if *role == Role::ADMIN {
            perms.push(Permission::WILDCARD);
        }
    }

    perms
}

/// Authorize a principal for a single permission.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let granted = permissions_for(principal.kind, &principal.roles);
    let perms: HashSet<&str> = granted.iter().map(|p| p.as_str()).collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_core::UserId;

    fn principal(kind: UserKind, roles: Vec<Role>) -> Principal {
        Principal {
            user_id: UserId::new(10),
            email: "someone@example.com".to_string(),
            kind,
            roles,
        }
    }

    #[test]
    fn buyer_can_shop_but_not_manage_a_shop() {
        let buyer = principal(UserKind::Buyer, vec![]);
        assert!(authorize(&buyer, &Permission::BASKET_WRITE).is_ok());
        assert!(authorize(&buyer, &Permission::ORDERS_PLACE).is_ok());
        assert_eq!(
            authorize(&buyer, &Permission::PARTNER_CATALOG_UPDATE),
            Err(AuthzError::Forbidden("partner.catalog.update".to_string()))
        );
    }

    #[test]
    fn shop_gets_partner_permissions() {
        let shop = principal(UserKind::Shop, vec![]);
        assert!(authorize(&shop, &Permission::PARTNER_CATALOG_UPDATE).is_ok());
        assert!(authorize(&shop, &Permission::PARTNER_ORDERS_TRANSITION).is_ok());
        assert!(authorize(&shop, &Permission::ORDERS_TRANSITION_ANY).is_err());
    }

    #[test]
    fn ops_and_admin_roles() {
        let ops = principal(UserKind::Buyer, vec![Role::OPS]);
        assert!(authorize(&ops, &Permission::ORDERS_TRANSITION_ANY).is_ok());
        assert!(authorize(&ops, &Permission::PARTNER_STATE).is_err());

        let admin = principal(UserKind::Buyer, vec![Role::new("admin")]);
        assert!(authorize(&admin, &Permission::PARTNER_STATE).is_ok());
    }
}
