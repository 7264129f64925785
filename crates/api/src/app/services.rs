//! Service wiring: store, ingestion job queue and background workers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use url::Url;

use procura_core::UserId;
use procura_infra::jobs::{
    InMemoryJobStore, Job, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobId, JobKind,
    JobStore, JobStoreError, RetryPolicy,
};
use procura_infra::{
    DispatcherConfig, DispatcherHandle, HttpPriceListFetcher, InMemoryMarketStore,
    IngestPriceList, IngestPriceListHandler, IngestionEngine, LogNotifier, MarketSettings,
    MarketStore, NotificationDispatcher, Notifier, PostgresMarketStore, PriceListFetcher,
};

use crate::config::AppConfig;

/// How many of a supplier's ingestion jobs `GET /partner/update` returns.
pub const JOB_LIST_LIMIT: usize = 50;

pub struct AppServices {
    pub store: Arc<dyn MarketStore>,
    jobs: Arc<InMemoryJobStore>,
    ingestion: Arc<IngestionEngine<dyn MarketStore>>,
    notifier: Arc<dyn Notifier>,
    ingestion_retry: RetryPolicy,
    dispatcher: DispatcherConfig,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn MarketStore>,
        fetcher: Arc<dyn PriceListFetcher>,
        notifier: Arc<dyn Notifier>,
        ingestion_retry: RetryPolicy,
        dispatcher: DispatcherConfig,
    ) -> Self {
        let ingestion = Arc::new(IngestionEngine::new(store.clone(), fetcher));
        Self {
            store,
            jobs: InMemoryJobStore::arc(),
            ingestion,
            notifier,
            ingestion_retry,
            dispatcher,
        }
    }

    /// In-memory store with default retry and delivery settings.
    pub fn in_memory(settings: MarketSettings, fetcher: Arc<dyn PriceListFetcher>) -> Self {
        Self::new(
            Arc::new(InMemoryMarketStore::new(settings)),
            fetcher,
            Arc::new(LogNotifier),
            RetryPolicy::default(),
            DispatcherConfig::default(),
        )
    }

    pub fn enqueue_ingestion(&self, owner: UserId, url: &Url) -> Result<JobId, JobStoreError> {
        let job = IngestPriceList { url: url.to_string() }.into_job(owner, self.ingestion_retry.clone());
        self.jobs.enqueue(job)
    }

    pub fn ingestion_job(&self, owner: UserId, id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.jobs.get(owner, id)
    }

    pub fn ingestion_jobs(&self, owner: UserId) -> Result<Vec<Job>, JobStoreError> {
        self.jobs.list_for_owner(owner, None, JOB_LIST_LIMIT)
    }

    /// Start the ingestion executor and the notification dispatcher.
    pub fn spawn_workers(&self) -> BackgroundWorkers {
        let mut executor = JobExecutor::new(self.jobs.clone());
        executor.register_handler(
            &JobKind::IngestPriceList,
            Arc::new(IngestPriceListHandler::new(self.ingestion.clone())),
        );
        let jobs = executor.spawn(JobExecutorConfig::default().with_name("ingestion"));

        let outbox = NotificationDispatcher::new(
            self.store.clone(),
            self.notifier.clone(),
            self.dispatcher.clone(),
        )
        .spawn();

        BackgroundWorkers { jobs, outbox }
    }
}

pub struct BackgroundWorkers {
    jobs: JobExecutorHandle,
    outbox: DispatcherHandle,
}

impl BackgroundWorkers {
    pub async fn shutdown(self) {
        self.jobs.shutdown().await;
        self.outbox.shutdown().await;
    }
}

/// Wire services from configuration: Postgres when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let settings = MarketSettings {
        stock_policy: config.stock_policy,
        ops_recipients: config.ops_recipients.clone(),
    };

    let store: Arc<dyn MarketStore> = match &config.database_url {
        Some(url) => {
            let store =
                PostgresMarketStore::connect(url, config.database_max_connections, settings)
                    .await
                    .context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            info!("using postgres store");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; marketplace state is kept in memory");
            Arc::new(InMemoryMarketStore::new(settings))
        }
    };

    let fetcher = HttpPriceListFetcher::new(config.fetch_timeout).context("building http client")?;

    Ok(AppServices::new(
        store,
        Arc::new(fetcher),
        Arc::new(LogNotifier),
        RetryPolicy::exponential(
            config.ingestion_max_attempts,
            Duration::from_secs(2),
            Duration::from_secs(60),
        ),
        DispatcherConfig {
            retry: RetryPolicy::exponential(
                config.notification_max_attempts,
                Duration::from_secs(2),
                Duration::from_secs(300),
            ),
            ..DispatcherConfig::default()
        },
    ))
}
