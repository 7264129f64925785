//! Infrastructure layer: storage, price-list ingestion, background jobs and
//! the notification outbox.

pub mod ingestion;
pub mod jobs;
pub mod outbox;
pub mod store;


pub use ingestion::{
    HttpPriceListFetcher, IngestPriceList, IngestPriceListHandler, IngestionEngine,
    IngestionError, PriceListFetcher, StaticPriceListFetcher, validate_price_list_url,
};
pub use outbox::{
    DispatchReport, DispatcherConfig, DispatcherHandle, LogNotifier, NotificationDispatcher,
    Notifier, NotifyError,
};
pub use store::{
    CatalogStore, ContactStore, DeliveryStatus, InMemoryMarketStore, MarketSettings, MarketStore,
    OrderStore, OutboxEntry, OutboxStore, PostgresMarketStore, ShopRemoval, StoreError,
    StoreResult, TransitionActor,
};
