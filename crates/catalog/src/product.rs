use serde::{Deserialize, Serialize};

use procura_core::{CategoryId, ParameterId, ProductId, ShopId};

use crate::shop::Shop;

/// A product row, owned by exactly one shop.
///
/// Prices are in the smallest currency unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub shop_id: ShopId,
    pub category_id: CategoryId,
    pub name: String,
    pub model: String,
    /// Wholesale price.
    pub price: u64,
    /// Recommended retail price; order totals are computed from this.
    pub price_rrc: u64,
    /// Quantity-on-hand.
    pub quantity: u32,
    pub is_active: bool,
}

impl Product {
    /// Whether buyers may put this product in a basket at all.
    pub fn is_orderable(&self, shop: &Shop) -> bool {
        self.is_active && shop.id == self.shop_id && shop.accepting_orders
    }
}

/// Catalog-wide named attribute (e.g. "color").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ParameterId,
    pub name: String,
}

/// Value of one parameter for one product. Unique per (product, parameter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductParameter {
    pub product_id: ProductId,
    pub parameter_id: ParameterId,
    pub value: String,
}

/// Browse filter. Only active products are ever listed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ProductFilter {
    pub shop_id: Option<ShopId>,
    pub category_id: Option<CategoryId>,
}

impl ProductFilter {
    pub fn matches(&self, product: &Product) -> bool {
        product.is_active
            && self.shop_id.is_none_or(|id| id == product.shop_id)
            && self.category_id.is_none_or(|id| id == product.category_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShopRef {
    pub id: ShopId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryRef {
    pub id: CategoryId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedParameter {
    pub name: String,
    pub value: String,
}

/// Read model for catalog browsing: a product with its shop, category and
/// parameters resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductListing {
    pub id: ProductId,
    pub name: String,
    pub model: String,
    pub shop: ShopRef,
    pub category: CategoryRef,
    pub price: u64,
    pub price_rrc: u64,
    pub quantity: u32,
    pub parameters: Vec<ListedParameter>,
}
