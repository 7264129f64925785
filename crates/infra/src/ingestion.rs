//! Price-list ingestion.
//!
//! Fetches a supplier's price-list document, plans the replacement with
//! [`plan_replacement`] and applies it through [`CatalogStore::replace_catalog`]
//! as one atomic step. Runs in the background as a job of kind
//! [`JobKind::IngestPriceList`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use url::Url;

use procura_catalog::{PriceList, ReplacementReport, plan_replacement};
use procura_core::{DomainError, UserId};

use crate::jobs::{Job, JobHandler, JobKind, JobResult, RetryPolicy};
use crate::store::{CatalogStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestionError {
    #[error("invalid price list url: {0}")]
    InvalidUrl(String),
    #[error("price list fetch failed: {0}")]
    Fetch(String),
    #[error("price list is not a valid document: {0}")]
    Parse(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestionError {
    /// Whether running the same ingestion again may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            IngestionError::Fetch(_)
                | IngestionError::Store(StoreError::Storage(_) | StoreError::Concurrency(_))
        )
    }
}

/// Check that `raw` is an absolute http(s) URL with a host.
pub fn validate_price_list_url(raw: &str) -> Result<Url, IngestionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(IngestionError::InvalidUrl("url is required".into()));
    }
    let url = Url::parse(raw).map_err(|e| IngestionError::InvalidUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(IngestionError::InvalidUrl(format!(
            "{raw}: unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(IngestionError::InvalidUrl(format!("{raw}: missing host")));
    }
    Ok(url)
}

/// Source of raw price-list documents.
#[async_trait]
pub trait PriceListFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, IngestionError>;
}

/// Fetches documents over HTTP with a request timeout.
#[derive(Debug, Clone)]
pub struct HttpPriceListFetcher {
    client: reqwest::Client,
}

impl HttpPriceListFetcher {
    pub fn new(timeout: Duration) -> Result<Self, IngestionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestionError::Fetch(format!("http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PriceListFetcher for HttpPriceListFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, IngestionError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| IngestionError::Fetch(format!("{url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IngestionError::Fetch(format!("{url} answered {status}")));
        }

        resp.text()
            .await
            .map_err(|e| IngestionError::Fetch(format!("{url}: {e}")))
    }
}

/// Serves documents registered in memory, keyed by URL.
#[derive(Debug, Default)]
pub struct StaticPriceListFetcher {
    documents: RwLock<HashMap<String, String>>,
}

impl StaticPriceListFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.insert(url, body);
        self
    }

    /// Register (or replace) the document served for `url`.
    pub fn insert(&self, url: impl Into<String>, body: impl Into<String>) {
        let mut documents = match self.documents.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        documents.insert(url.into(), body.into());
    }
}

#[async_trait]
impl PriceListFetcher for StaticPriceListFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, IngestionError> {
        let documents = self
            .documents
            .read()
            .map_err(|_| IngestionError::Fetch("document registry poisoned".into()))?;
        documents
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| IngestionError::Fetch(format!("{url}: not found")))
    }
}

/// Job payload of [`JobKind::IngestPriceList`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestPriceList {
    pub url: String,
}

impl IngestPriceList {
    pub fn into_job(self, owner: UserId, retry_policy: RetryPolicy) -> Job {
        let payload = serde_json::json!({ "url": self.url });
        Job::new(owner, JobKind::IngestPriceList, payload).with_retry_policy(retry_policy)
    }
}

/// Fetch, plan and apply a supplier's price list.
pub struct IngestionEngine<S: ?Sized> {
    store: Arc<S>,
    fetcher: Arc<dyn PriceListFetcher>,
}

impl<S: CatalogStore + ?Sized> IngestionEngine<S> {
    pub fn new(store: Arc<S>, fetcher: Arc<dyn PriceListFetcher>) -> Self {
        Self { store, fetcher }
    }

    /// Replace `owner`'s catalog with the document at `url`.
    ///
    /// Nothing is written unless the document was fetched, parsed and
    /// validated in full.
    #[instrument(skip(self), fields(owner = %owner), err)]
    pub async fn run(&self, owner: UserId, url: &str) -> Result<ReplacementReport, IngestionError> {
        let url = validate_price_list_url(url)?;
        let body = self.fetcher.fetch(&url).await?;
        let document =
            PriceList::from_yaml(&body).map_err(|e| IngestionError::Parse(e.to_string()))?;
        let replacement = plan_replacement(owner, url.as_str(), &document)?;
        let report = self.store.replace_catalog(replacement).await?;

        info!(
            shop_id = %report.shop_id,
            products_created = report.products_created,
            products_removed = report.products_removed,
            "price list ingested"
        );
        Ok(report)
    }
}

/// Runs [`JobKind::IngestPriceList`] jobs.
pub struct IngestPriceListHandler<S: ?Sized> {
    engine: Arc<IngestionEngine<S>>,
}

impl<S: ?Sized> IngestPriceListHandler<S> {
    pub fn new(engine: Arc<IngestionEngine<S>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<S: CatalogStore + ?Sized + 'static> JobHandler for IngestPriceListHandler<S> {
    async fn run(&self, job: &Job) -> JobResult {
        let request: IngestPriceList = match serde_json::from_value(job.payload.clone()) {
            Ok(request) => request,
            Err(e) => return JobResult::Abort(format!("invalid job payload: {e}")),
        };

        match self.engine.run(job.owner, &request.url).await {
            Ok(report) => match serde_json::to_value(&report) {
                Ok(value) => JobResult::Success(Some(value)),
                Err(e) => JobResult::Abort(format!("report serialization failed: {e}")),
            },
            Err(e) if e.is_retriable() => JobResult::Failure(e.to_string()),
            Err(e) => JobResult::Abort(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{InMemoryJobStore, JobExecutor, JobStatus, JobStore};
    use crate::store::{InMemoryMarketStore, MarketSettings};
    use procura_catalog::ProductFilter;

    const FIRST: &str = r#"
shop: Gadget Depot
categories:
  - id: 224
    name: Phones
goods:
  - id: 1
    category: 224
    model: acme/one
    name: Acme One
    price: 100
    price_rrc: 120
    quantity: 5
    parameters:
      color: black
      memory: 64
  - category: 224
    model: acme/two
    name: Acme Two
    price: 200
    price_rrc: 250
    quantity: 1
"#;

    const SECOND: &str = r#"
shop: Gadget Depot
categories:
  - id: 224
    name: Phones
goods:
  - category: 224
    model: acme/three
    name: Acme Three
    price: 300
    price_rrc: 330
    quantity: 2
    parameters:
      color: white
"#;

    fn owner() -> UserId {
        UserId::new(7)
    }

    fn engine(fetcher: StaticPriceListFetcher) -> (Arc<InMemoryMarketStore>, IngestionEngine<InMemoryMarketStore>) {
        let store = Arc::new(InMemoryMarketStore::new(MarketSettings::default()));
        let engine = IngestionEngine::new(store.clone(), Arc::new(fetcher));
        (store, engine)
    }

    #[test]
    fn url_validation() {
        assert!(validate_price_list_url("https://example.com/shop1.yaml").is_ok());
        assert!(validate_price_list_url("http://10.0.0.1:8000/list").is_ok());

        for bad in ["", "   ", "not a url", "ftp://example.com/list.yaml", "file:///etc/passwd"] {
            let err = validate_price_list_url(bad).unwrap_err();
            assert!(matches!(err, IngestionError::InvalidUrl(_)), "{bad}: {err:?}");
        }
    }

    #[test]
    fn retriable_classification() {
        assert!(IngestionError::Fetch("timeout".into()).is_retriable());
        assert!(IngestionError::Store(StoreError::Storage("down".into())).is_retriable());
        assert!(!IngestionError::Parse("bad yaml".into()).is_retriable());
        assert!(!IngestionError::InvalidUrl("x".into()).is_retriable());
        assert!(!IngestionError::Domain(DomainError::validation("x")).is_retriable());
        assert!(
            !IngestionError::Store(StoreError::Domain(DomainError::not_found("shop"))).is_retriable()
        );
    }

    #[tokio::test]
    async fn second_run_fully_replaces_the_first_catalog() {
        let fetcher = StaticPriceListFetcher::new()
            .with_document("https://example.com/a.yaml", FIRST)
            .with_document("https://example.com/b.yaml", SECOND);
        let (store, engine) = engine(fetcher);

        let first = engine.run(owner(), "https://example.com/a.yaml").await.unwrap();
        assert_eq!(first.products_created, 2);
        assert_eq!(first.parameters_written, 2);

        let second = engine.run(owner(), "https://example.com/b.yaml").await.unwrap();
        assert_eq!(second.shop_id, first.shop_id);
        assert_eq!(second.products_removed, 2);

        let listed = store.list_products(ProductFilter::default()).await.unwrap();
        let names: Vec<_> = listed.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Acme Three"]);
        assert_eq!(listed[0].parameters[0].value, "white");

        let shop = store.shop_for_owner(owner()).await.unwrap().unwrap();
        assert_eq!(shop.url.as_deref(), Some("https://example.com/b.yaml"));
    }

    #[tokio::test]
    async fn parse_failure_leaves_catalog_unchanged() {
        let fetcher = StaticPriceListFetcher::new()
            .with_document("https://example.com/a.yaml", FIRST)
            .with_document("https://example.com/broken.yaml", "shop: [unterminated");
        let (store, engine) = engine(fetcher);

        engine.run(owner(), "https://example.com/a.yaml").await.unwrap();
        let err = engine.run(owner(), "https://example.com/broken.yaml").await.unwrap_err();
        assert!(matches!(err, IngestionError::Parse(_)));

        let listed = store.list_products(ProductFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_catalog_unchanged() {
        let fetcher = StaticPriceListFetcher::new().with_document("https://example.com/a.yaml", FIRST);
        let (store, engine) = engine(fetcher);

        engine.run(owner(), "https://example.com/a.yaml").await.unwrap();
        let err = engine.run(owner(), "https://example.com/missing.yaml").await.unwrap_err();
        assert!(err.is_retriable());

        assert_eq!(store.list_products(ProductFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_document_is_rejected_before_any_write() {
        let doc = r#"
shop: Gadget Depot
categories: []
goods:
  - category: 99
    name: Orphan
    price: 1
    price_rrc: 1
    quantity: 1
"#;
        let fetcher = StaticPriceListFetcher::new().with_document("https://example.com/x.yaml", doc);
        let (store, engine) = engine(fetcher);

        let err = engine.run(owner(), "https://example.com/x.yaml").await.unwrap_err();
        assert!(matches!(err, IngestionError::Domain(DomainError::Validation(_))));
        assert!(store.shop_for_owner(owner()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_records_report_or_dead_letters() {
        let fetcher = StaticPriceListFetcher::new()
            .with_document("https://example.com/a.yaml", FIRST)
            .with_document("https://example.com/broken.yaml", "shop: [unterminated");
        let (_store, engine) = engine(fetcher);

        let jobs = InMemoryJobStore::arc();
        let mut executor = JobExecutor::new(jobs.clone());
        executor.register_handler(
            &JobKind::IngestPriceList,
            Arc::new(IngestPriceListHandler::new(Arc::new(engine))),
        );

        let ok = jobs
            .enqueue(
                IngestPriceList { url: "https://example.com/a.yaml".into() }
                    .into_job(owner(), RetryPolicy::default()),
            )
            .unwrap();
        let broken = jobs
            .enqueue(
                IngestPriceList { url: "https://example.com/broken.yaml".into() }
                    .into_job(owner(), RetryPolicy::default()),
            )
            .unwrap();

        assert_eq!(executor.drain().await.unwrap(), 2);

        let ok = jobs.get(owner(), ok).unwrap().unwrap();
        assert_eq!(ok.status, JobStatus::Completed);
        assert_eq!(ok.result.as_ref().unwrap()["products_created"], 2);

        let broken = jobs.get(owner(), broken).unwrap().unwrap();
        assert!(matches!(broken.status, JobStatus::DeadLettered { attempts: 1, .. }));
    }
}
