//! Price-list ingestion as a pure function.
//!
//! `plan_replacement` validates a supplier document and turns it into the full
//! set of catalog mutations for that supplier's shop. Stores apply the plan in a
//! single transaction; nothing here touches storage.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use procura_core::{CategoryId, DomainError, DomainResult, ShopId, UserId};

use crate::price_list::PriceList;
use crate::shop::Category;

/// Shop identity for the supplier: one shop per owner, name and URL refreshed
/// on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopUpsert {
    pub owner: UserId,
    pub name: String,
    pub url: String,
}

/// A product to create under the supplier's shop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub category_id: CategoryId,
    pub name: String,
    pub model: String,
    pub price: u64,
    pub price_rrc: u64,
    pub quantity: u32,
    /// (parameter name, value), names unique within the product.
    pub parameters: Vec<(String, String)>,
}

/// Everything a store needs to replace one shop's catalog.
///
/// Applying it means: upsert the shop, upsert every category by id and attach
/// it to the shop, delete all of the shop's existing products, then create
/// `products` with their parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogReplacement {
    pub shop: ShopUpsert,
    pub categories: Vec<Category>,
    pub products: Vec<NewProduct>,
}

impl CatalogReplacement {
    pub fn parameter_count(&self) -> usize {
        self.products.iter().map(|p| p.parameters.len()).sum()
    }
}

/// Outcome of an applied replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementReport {
    pub shop_id: ShopId,
    pub categories_upserted: usize,
    pub products_removed: usize,
    pub products_created: usize,
    pub parameters_written: usize,
    /// Basket/order lines that referenced removed products and were deleted
    /// with them.
    pub order_items_removed: usize,
}

/// Validate `document` and plan the full replacement of `owner`'s catalog.
pub fn plan_replacement(
    owner: UserId,
    url: &str,
    document: &PriceList,
) -> DomainResult<CatalogReplacement> {
    let shop_name = document.shop.trim();
    if shop_name.is_empty() {
        return Err(DomainError::validation("price list: shop name is required"));
    }

    let mut categories: BTreeMap<CategoryId, String> = BTreeMap::new();
    for category in &document.categories {
        if category.id.get() <= 0 {
            return Err(DomainError::validation(format!(
                "price list: category id must be positive, got {}",
                category.id
            )));
        }
        let name = category.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation(format!(
                "price list: category {} has no name",
                category.id
            )));
        }
        match categories.get(&category.id) {
            Some(existing) if existing != name => {
                return Err(DomainError::validation(format!(
                    "price list: category {} listed as both '{}' and '{}'",
                    category.id, existing, name
                )));
            }
            Some(_) => {}
            None => {
                categories.insert(category.id, name.to_string());
            }
        }
    }

    let mut products = Vec::with_capacity(document.goods.len());
    for (index, good) in document.goods.iter().enumerate() {
        let name = good.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation(format!(
                "price list: good #{} has no name",
                index + 1
            )));
        }
        if !categories.contains_key(&good.category) {
            return Err(DomainError::validation(format!(
                "price list: good '{}' references undeclared category {}",
                name, good.category
            )));
        }

        let mut parameters: HashMap<&str, String> = HashMap::new();
        let mut ordered = Vec::with_capacity(good.parameters.len());
        for (param, value) in &good.parameters {
            let param = param.trim();
            if param.is_empty() {
                return Err(DomainError::validation(format!(
                    "price list: good '{name}' has a parameter without a name"
                )));
            }
            if parameters.insert(param, value.to_string()).is_none() {
                ordered.push(param);
            }
        }
        let parameters = ordered
            .into_iter()
            .filter_map(|p| parameters.remove(p).map(|v| (p.to_string(), v)))
            .collect();

        products.push(NewProduct {
            category_id: good.category,
            name: name.to_string(),
            model: good.model.trim().to_string(),
            price: good.price,
            price_rrc: good.price_rrc,
            quantity: good.quantity,
            parameters,
        });
    }

    Ok(CatalogReplacement {
        shop: ShopUpsert {
            owner,
            name: shop_name.to_string(),
            url: url.to_string(),
        },
        categories: categories
            .into_iter()
            .map(|(id, name)| Category { id, name })
            .collect(),
        products,
    })
}
