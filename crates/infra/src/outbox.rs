//! Notification outbox dispatcher.
//!
//! Placing an order writes its notifications to the outbox in the same atomic
//! step as the state change. The dispatcher delivers them afterwards; delivery
//! failures are recorded on the message and never touch order state. A failed
//! message is retried once its backoff delay from the retry policy has passed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use procura_orders::OutboundMessage;

use crate::jobs::RetryPolicy;
use crate::store::{DeliveryStatus, OutboxStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers one message to its recipients.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), NotifyError>;
}

/// Emits each message as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &OutboundMessage) -> Result<(), NotifyError> {
        info!(
            order_id = %message.order_id,
            audience = message.audience.as_str(),
            recipients = ?message.recipients,
            subject = %message.subject,
            "notification sent"
        );
        Ok(())
    }
}

/// Counts from one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub retrying: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    /// Attempts per message and the backoff between them.
    pub retry: RetryPolicy,
    pub batch_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::exponential(5, Duration::from_secs(2), Duration::from_secs(300)),
            batch_size: 50,
        }
    }
}

/// Handle to a running dispatcher task.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "notification dispatcher ended abnormally");
        }
    }
}

pub struct NotificationDispatcher<S: ?Sized> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    config: DispatcherConfig,
}

impl<S: OutboxStore + ?Sized + 'static> NotificationDispatcher<S> {
    pub fn new(store: Arc<S>, notifier: Arc<dyn Notifier>, config: DispatcherConfig) -> Self {
        Self { store, notifier, config }
    }

    /// Try every pending message that is due once.
    pub async fn dispatch_pending(&self) -> StoreResult<DispatchReport> {
        let mut report = DispatchReport::default();
        let now = Utc::now();

        for entry in self.store.pending_messages(self.config.batch_size, now).await? {
            match self.notifier.send(&entry.message).await {
                Ok(()) => {
                    self.store.mark_delivered(entry.id).await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    let attempt = entry.attempts + 1;
                    let retry_at = self.config.retry.next_attempt_at(attempt, Utc::now());
                    let status = self
                        .store
                        .mark_attempt_failed(entry.id, &e.0, self.config.retry.max_attempts, retry_at)
                        .await?;
                    if status == DeliveryStatus::Failed {
                        error!(
                            message_id = entry.id,
                            order_id = %entry.message.order_id,
                            error = %e,
                            "notification given up"
                        );
                        report.failed += 1;
                    } else {
                        warn!(
                            message_id = entry.id,
                            order_id = %entry.message.order_id,
                            attempt,
                            %retry_at,
                            error = %e,
                            "notification failed, will retry"
                        );
                        report.retrying += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Run dispatch passes in a background task until shut down.
    pub fn spawn(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(dispatcher_loop(self, shutdown_rx));
        DispatcherHandle { shutdown: shutdown_tx, join }
    }
}

async fn dispatcher_loop<S: OutboxStore + ?Sized + 'static>(
    dispatcher: NotificationDispatcher<S>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("notification dispatcher started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match dispatcher.dispatch_pending().await {
            Ok(report) if report != DispatchReport::default() => {
                debug!(?report, "dispatch pass finished")
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "dispatch pass failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(dispatcher.config.poll_interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
    info!("notification dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::store::{
        CatalogStore, ContactStore, InMemoryMarketStore, MarketSettings, OrderStore,
    };
    use procura_catalog::{CatalogReplacement, Category, NewProduct, ProductFilter, ShopUpsert};
    use procura_core::{CategoryId, OrderId, UserId};
    use procura_inventory::StockRequest;
    use procura_orders::{ContactDetails, OrderState};

    /// Fails the first `failures` sends, then succeeds.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for Flaky {
        async fn send(&self, _message: &OutboundMessage) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(NotifyError("smtp unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    async fn placed_order(store: &InMemoryMarketStore) -> OrderId {
        let supplier = UserId::new(1);
        let buyer = UserId::new(2);
        store
            .replace_catalog(CatalogReplacement {
                shop: ShopUpsert {
                    owner: supplier,
                    name: "Depot".into(),
                    url: "https://example.com/p.yaml".into(),
                },
                categories: vec![Category { id: CategoryId::new(1), name: "Misc".into() }],
                products: vec![NewProduct {
                    category_id: CategoryId::new(1),
                    name: "Widget".into(),
                    model: "w-1".into(),
                    price: 10,
                    price_rrc: 12,
                    quantity: 3,
                    parameters: vec![],
                }],
            })
            .await
            .unwrap();
        let product = store.list_products(ProductFilter::default()).await.unwrap()[0].id;
        let basket = store.add_to_basket(buyer, vec![StockRequest::new(product, 1)]).await.unwrap();
        let contact = store
            .add_contact(
                buyer,
                ContactDetails {
                    city: "Almaty".into(),
                    street: "Abay".into(),
                    house: Some("10".into()),
                    structure: None,
                    building: None,
                    apartment: None,
                    phone: "+77000000000".into(),
                },
            )
            .await
            .unwrap();
        store.finalize(buyer, basket.id, contact.id, "buyer@example.com").await.unwrap().id
    }

    fn store() -> Arc<InMemoryMarketStore> {
        Arc::new(InMemoryMarketStore::new(MarketSettings {
            ops_recipients: vec!["ops@example.com".into()],
            ..MarketSettings::default()
        }))
    }

    fn immediate_retries(max_attempts: u32) -> DispatcherConfig {
        DispatcherConfig {
            retry: RetryPolicy::fixed(max_attempts, Duration::ZERO),
            ..DispatcherConfig::default()
        }
    }

    #[tokio::test]
    async fn delivers_both_messages() {
        let store = store();
        let order_id = placed_order(&store).await;

        let dispatcher =
            NotificationDispatcher::new(store.clone(), Arc::new(LogNotifier), DispatcherConfig::default());
        let report = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(report.delivered, 2);

        let messages = store.messages_for_order(order_id).await.unwrap();
        assert!(messages.iter().all(|m| m.status == DeliveryStatus::Delivered));
        assert_eq!(dispatcher.dispatch_pending().await.unwrap(), DispatchReport::default());
    }

    #[tokio::test]
    async fn failures_retry_then_give_up_without_touching_the_order() {
        let store = store();
        let order_id = placed_order(&store).await;

        let notifier = Arc::new(Flaky { failures: usize::MAX, calls: AtomicUsize::new(0) });
        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            notifier,
            immediate_retries(2),
        );

        let first = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(first.retrying, 2);
        let second = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(second.failed, 2);

        let messages = store.messages_for_order(order_id).await.unwrap();
        assert!(messages.iter().all(|m| m.status == DeliveryStatus::Failed && m.attempts == 2));
        assert_eq!(messages[0].last_error.as_deref(), Some("smtp unavailable"));

        let orders = store.orders_for(UserId::new(2)).await.unwrap();
        assert_eq!(orders[0].state, OrderState::New);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_on_next_pass() {
        let store = store();
        let order_id = placed_order(&store).await;

        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            Arc::new(Flaky { failures: 1, calls: AtomicUsize::new(0) }),
            immediate_retries(5),
        );

        let first = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!((first.delivered, first.retrying), (1, 1));
        let second = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(second.delivered, 1);

        let messages = store.messages_for_order(order_id).await.unwrap();
        assert!(messages.iter().all(|m| m.status == DeliveryStatus::Delivered));
    }

    #[tokio::test]
    async fn failed_message_waits_for_its_backoff() {
        let store = store();
        let order_id = placed_order(&store).await;

        let notifier = Arc::new(Flaky { failures: 1, calls: AtomicUsize::new(0) });
        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            notifier.clone(),
            DispatcherConfig {
                retry: RetryPolicy::fixed(5, Duration::from_secs(3600)),
                ..DispatcherConfig::default()
            },
        );

        let before = Utc::now();
        let first = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!((first.delivered, first.retrying), (1, 1));

        // Still pending, but not due for another hour.
        let second = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(second, DispatchReport::default());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);

        let waiting: Vec<_> = store
            .messages_for_order(order_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.status == DeliveryStatus::Pending)
            .collect();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].attempts, 1);
        assert!(waiting[0].next_attempt_at >= before + chrono::Duration::seconds(3600));

        let later = Utc::now() + chrono::Duration::seconds(7200);
        let due = store.pending_messages(10, later).await.unwrap();
        assert_eq!(due.iter().map(|m| m.id).collect::<Vec<_>>(), vec![waiting[0].id]);
    }

    #[tokio::test]
    async fn spawned_dispatcher_stops_on_shutdown() {
        let store = store();
        let order_id = placed_order(&store).await;

        let handle = NotificationDispatcher::new(
            store.clone(),
            Arc::new(LogNotifier),
            DispatcherConfig { poll_interval: Duration::from_millis(10), ..DispatcherConfig::default() },
        )
        .spawn();

        for _ in 0..100 {
            let messages = store.messages_for_order(order_id).await.unwrap();
            if messages.iter().all(|m| m.status == DeliveryStatus::Delivered) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        let messages = store.messages_for_order(order_id).await.unwrap();
        assert!(messages.iter().all(|m| m.status == DeliveryStatus::Delivered));
    }
}
