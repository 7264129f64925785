use axum::{routing::get, Router};

pub mod basket;
pub mod catalog;
pub mod contacts;
pub mod orders;
pub mod partner;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route(
            "/products/basket",
            get(basket::get_basket)
                .post(basket::add_items)
                .put(basket::update_items)
                .delete(basket::remove_items),
        )
        .route("/order", get(orders::list_orders).post(orders::finalize_order))
        .route("/user/contact", get(contacts::list_contacts).post(contacts::add_contact))
        .nest("/partner", partner::router())
}

/// Catalog browsing, open to anonymous callers.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/products", get(catalog::list_products))
        .route("/shops", get(catalog::list_shops))
        .route("/categories", get(catalog::list_categories))
}
