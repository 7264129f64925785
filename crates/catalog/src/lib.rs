//! Catalog domain module.
//!
//! Shops, categories, products and their parameters, plus the supplier
//! price-list document and the pure planning step that turns a document into a
//! full catalog replacement for one shop. No IO, no HTTP, no storage.

pub mod price_list;
pub mod product;
pub mod replacement;
pub mod shop;

pub use price_list::{ParameterValue, PriceList, PriceListCategory, PriceListGood};
pub use product::{
    CategoryRef, ListedParameter, Parameter, Product, ProductFilter, ProductListing,
    ProductParameter, ShopRef,
};
pub use replacement::{
    CatalogReplacement, NewProduct, ReplacementReport, ShopUpsert, plan_replacement,
};
pub use shop::{Category, Shop, parse_state_flag};
