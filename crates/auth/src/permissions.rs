use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are modeled as opaque strings (e.g. "basket.write").
/// The wildcard permission `"*"` allows everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const BASKET_WRITE: Permission = Permission::from_static("basket.write");
    pub const ORDERS_PLACE: Permission = Permission::from_static("orders.place");
    pub const ORDERS_READ: Permission = Permission::from_static("orders.read");
    pub const CONTACTS_WRITE: Permission = Permission::from_static("contacts.write");
    pub const PARTNER_CATALOG_UPDATE: Permission = Permission::from_static("partner.catalog.update");
    pub const PARTNER_STATE: Permission = Permission::from_static("partner.state");
    pub const PARTNER_ORDERS_READ: Permission = Permission::from_static("partner.orders.read");
    pub const PARTNER_ORDERS_TRANSITION: Permission =
        Permission::from_static("partner.orders.transition");
    pub const ORDERS_TRANSITION_ANY: Permission = Permission::from_static("orders.transition.any");
    pub const WILDCARD: Permission = Permission::from_static("*");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
