//! Concurrent settlement monitor.
//!
//! One task per order polls the broker until the order is terminal or the
//! run's shared deadline passes. Terminal observations flow over a channel
//! into a [`SettlementLedger`] owned by the collecting task, so aggregation
//! needs no locking and every order is counted at most once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::ledger::{LedgerEntry, SettlementLedger};
use super::types::{BulkSettlementResult, OrderSettlementDetail, SettlementConfig, SettlementRequest};
use crate::application::ports::{BrokerError, BrokerPort, DomainEvent, EventPublisherPort};
use crate::domain::{CorrelationId, OrderId};
use crate::error::ValidationError;
use crate::observability::metrics;

/// Watches batches of orders until they settle.
#[derive(Clone)]
pub struct SettlementMonitor {
    broker: Arc<dyn BrokerPort>,
    publisher: Arc<dyn EventPublisherPort>,
    config: SettlementConfig,
}

impl std::fmt::Debug for SettlementMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// How a run ended.
struct RunOutcome {
    result: BulkSettlementResult,
    threshold_reached: bool,
}

impl SettlementMonitor {
    /// Create a monitor.
    ///
    /// # Errors
    ///
    /// Rejects a zero poll interval, a zero deadline, and a poll interval that
    /// is not below the deadline.
    pub fn new(
        broker: Arc<dyn BrokerPort>,
        publisher: Arc<dyn EventPublisherPort>,
        config: SettlementConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            broker,
            publisher,
            config,
        })
    }

    /// Default polling cadence and deadline.
    #[must_use]
    pub const fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Watch `order_ids` with the default config and publish the result.
    pub async fn monitor(&self, order_ids: &[OrderId], correlation_id: CorrelationId) -> BulkSettlementResult {
        let request =
            SettlementRequest::with_checked_config(order_ids.iter().cloned(), correlation_id, self.config.clone());
        self.run(request).await
    }

    /// Watch the orders of `request` and publish exactly one
    /// [`DomainEvent::SettlementCompleted`].
    ///
    /// Orders not terminal by the deadline are left out of the settled set;
    /// that is a normal outcome, not an error.
    pub async fn run(&self, request: SettlementRequest) -> BulkSettlementResult {
        let correlation_id = request.correlation_id.clone();
        let result = self.settle(request, None).await.result;

        metrics::record_settlement_run(
            result.settled_order_ids.len(),
            result.timed_out_order_ids.len(),
            result.total_released,
            result.elapsed.as_secs_f64(),
        );

        if let Err(e) = self
            .publisher
            .publish(DomainEvent::SettlementCompleted(result.clone()))
            .await
        {
            tracing::warn!(
                correlation_id = %correlation_id,
                error = %e,
                "Failed to publish settlement result"
            );
        }

        result
    }

    /// Return `true` as soon as the released total reaches `target`.
    ///
    /// Polling of the remaining orders stops once the target is met. Returns
    /// `false` if the deadline passes, or every order settles, below target.
    /// No completion event is published.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a negative target.
    pub async fn wait_for_threshold(
        &self,
        target: Decimal,
        order_ids: &[OrderId],
        correlation_id: CorrelationId,
    ) -> Result<bool, ValidationError> {
        if target < Decimal::ZERO {
            return Err(ValidationError::new("target", "must not be negative"));
        }
        if target.is_zero() {
            return Ok(true);
        }

        let request =
            SettlementRequest::with_checked_config(order_ids.iter().cloned(), correlation_id, self.config.clone());
        Ok(self.settle(request, Some(target)).await.threshold_reached)
    }

    async fn settle(&self, request: SettlementRequest, threshold: Option<Decimal>) -> RunOutcome {
        let SettlementRequest {
            order_ids,
            correlation_id,
            config,
        } = request;

        let started = Instant::now();
        let deadline = started + config.max_wait;

        tracing::info!(
            correlation_id = %correlation_id,
            orders = order_ids.len(),
            max_wait_ms = u64::try_from(config.max_wait.as_millis()).unwrap_or(u64::MAX),
            "Monitoring order settlement"
        );

        let (tx, mut rx) = mpsc::channel(order_ids.len().max(1));
        let mut tasks = JoinSet::new();
        for order_id in &order_ids {
            tasks.spawn(poll_order(
                Arc::clone(&self.broker),
                order_id.clone(),
                correlation_id.clone(),
                config.poll_interval,
                deadline,
                tx.clone(),
            ));
        }
        drop(tx);

        let mut ledger = SettlementLedger::new(&order_ids);
        let mut threshold_reached = false;

        while let Some(detail) = rx.recv().await {
            let order_id = detail.order_id.clone();
            let status = detail.status;
            let value = detail.settled_value;

            match ledger.record(detail) {
                LedgerEntry::Recorded => {
                    tracing::info!(
                        correlation_id = %correlation_id,
                        order_id = %order_id,
                        status = %status,
                        settled_value = %value,
                        total_released = %ledger.total(),
                        "Order settled"
                    );
                }
                LedgerEntry::Duplicate | LedgerEntry::Unknown => {
                    tracing::debug!(order_id = %order_id, "Ignoring repeated or unknown settlement");
                }
            }

            if threshold.is_some_and(|target| ledger.total() >= target) {
                threshold_reached = true;
                break;
            }
        }

        // Abandon anything still polling (threshold met early).
        tasks.shutdown().await;

        let total_released = ledger.total();
        let (settled_order_ids, timed_out_order_ids, details) = ledger.finish();
        let elapsed = started.elapsed();

        if timed_out_order_ids.is_empty() {
            tracing::info!(
                correlation_id = %correlation_id,
                settled = settled_order_ids.len(),
                total_released = %total_released,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "Settlement complete"
            );
        } else if !threshold_reached {
            tracing::warn!(
                correlation_id = %correlation_id,
                settled = settled_order_ids.len(),
                timed_out = timed_out_order_ids.len(),
                total_released = %total_released,
                "Settlement deadline reached with unsettled orders"
            );
        }

        RunOutcome {
            result: BulkSettlementResult {
                correlation_id,
                settled_order_ids,
                timed_out_order_ids,
                total_released,
                details,
                elapsed,
                completed_at: Utc::now(),
            },
            threshold_reached,
        }
    }
}

/// Poll one order until terminal or `deadline`, then report it.
async fn poll_order(
    broker: Arc<dyn BrokerPort>,
    order_id: OrderId,
    correlation_id: CorrelationId,
    poll_interval: Duration,
    deadline: Instant,
    tx: mpsc::Sender<OrderSettlementDetail>,
) {
    let polling = async {
        let mut polls = 0u32;
        loop {
            polls += 1;
            let wait = match broker.get_order(&order_id).await {
                Ok(snapshot) => {
                    if let Some(detail) = OrderSettlementDetail::from_snapshot(&order_id, &snapshot, polls) {
                        return detail;
                    }
                    tracing::trace!(order_id = %order_id, status = %snapshot.status, polls, "Order not settled yet");
                    poll_interval
                }
                Err(BrokerError::RateLimited { retry_after }) => {
                    metrics::record_settlement_poll_error("rate_limited");
                    tracing::debug!(
                        correlation_id = %correlation_id,
                        order_id = %order_id,
                        retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                        "Order poll rate limited"
                    );
                    // The deadline cuts this short if it comes first.
                    if retry_after.is_zero() { poll_interval } else { retry_after }
                }
                Err(e) => {
                    metrics::record_settlement_poll_error(if e.is_transient() { "transient" } else { "other" });
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        order_id = %order_id,
                        error = %e,
                        polls,
                        "Order poll failed, treating as not yet settled"
                    );
                    poll_interval
                }
            };
            tokio::time::sleep(wait).await;
        }
    };

    match tokio::time::timeout_at(deadline, polling).await {
        Ok(detail) => {
            // The collector may have stopped early; nothing to do then.
            let _ = tx.send(detail).await;
        }
        Err(_) => {
            tracing::debug!(
                correlation_id = %correlation_id,
                order_id = %order_id,
                "Order not settled before deadline"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::EventPublishError;
    use crate::domain::OrderStatus;
    use crate::infrastructure::broker::mock::{MockBroker, order_snapshot};
    use async_trait::async_trait;
    use mockall::mock;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    mock! {
        Publisher {}

        #[async_trait]
        impl EventPublisherPort for Publisher {
            async fn publish(&self, event: DomainEvent) -> Result<(), EventPublishError>;
        }
    }

    fn config() -> SettlementConfig {
        SettlementConfig {
            poll_interval: Duration::from_millis(100),
            max_wait: Duration::from_secs(2),
        }
    }

    fn expect_one_event(publisher: &mut MockPublisher) {
        publisher
            .expect_publish()
            .times(1)
            .withf(|event| matches!(event, DomainEvent::SettlementCompleted(_)))
            .returning(|_| Ok(()));
    }

    fn monitor(broker: &Arc<MockBroker>, publisher: MockPublisher) -> SettlementMonitor {
        SettlementMonitor::new(
            Arc::clone(broker) as Arc<dyn BrokerPort>,
            Arc::new(publisher),
            config(),
        )
        .unwrap()
    }

    fn ids(raw: &[&str]) -> Vec<OrderId> {
        raw.iter().map(|s| OrderId::new(*s)).collect()
    }

    fn pending(id: &str) -> Result<crate::domain::OrderSnapshot, BrokerError> {
        Ok(order_snapshot(id, "AAPL", OrderStatus::Accepted, dec!(0), None))
    }

    #[test]
    fn rejects_invalid_config() {
        let broker: Arc<dyn BrokerPort> = Arc::new(MockBroker::new());
        let bad = SettlementConfig {
            poll_interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(5),
        };
        let err = SettlementMonitor::new(broker, Arc::new(MockPublisher::new()), bad).unwrap_err();
        assert_eq!(err.field, "poll_interval");
    }

    #[tokio::test(start_paused = true)]
    async fn filled_and_canceled_batch() {
        let broker = Arc::new(MockBroker::new());
        broker.script_order(
            &OrderId::new("A"),
            [
                pending("A"),
                Ok(order_snapshot("A", "AAPL", OrderStatus::Filled, dec!(10), Some(dec!(150.00)))),
            ],
        );
        broker.script_order(
            &OrderId::new("B"),
            [Ok(order_snapshot("B", "MSFT", OrderStatus::Canceled, dec!(0), None))],
        );

        let mut publisher = MockPublisher::new();
        expect_one_event(&mut publisher);
        let monitor = monitor(&broker, publisher);

        let result = monitor.monitor(&ids(&["A", "B"]), CorrelationId::new("corr-1")).await;

        assert_eq!(result.total_released, dec!(1500.00));
        assert_eq!(result.settled_order_ids, ids(&["A", "B"]));
        assert!(result.timed_out_order_ids.is_empty());
        assert!(result.is_complete());
        assert_eq!(result.correlation_id, CorrelationId::new("corr-1"));
        assert_eq!(result.detail(&OrderId::new("A")).unwrap().polls, 2);
        // Terminal orders are not polled again.
        assert_eq!(broker.order_polls(&OrderId::new("B")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_publishes_exactly_one_event() {
        let broker = Arc::new(MockBroker::new());
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .withf(|event| {
                matches!(event, DomainEvent::SettlementCompleted(r)
                    if r.settled_order_ids.is_empty() && r.total_released.is_zero())
            })
            .returning(|_| Ok(()));
        let monitor = monitor(&broker, publisher);

        let result = monitor.monitor(&[], CorrelationId::new("empty")).await;
        assert!(result.details.is_empty());
        assert_eq!(result.total_released, Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_order_times_out_without_delaying_others() {
        let broker = Arc::new(MockBroker::new());
        broker.script_order(
            &OrderId::new("FAST"),
            [Ok(order_snapshot("FAST", "AAPL", OrderStatus::Filled, dec!(1), Some(dec!(50))))],
        );
        broker.script_order(&OrderId::new("SLOW"), [pending("SLOW")]);

        let mut publisher = MockPublisher::new();
        expect_one_event(&mut publisher);
        let monitor = monitor(&broker, publisher);

        let result = monitor
            .monitor(&ids(&["FAST", "SLOW"]), CorrelationId::new("corr-2"))
            .await;

        assert_eq!(result.settled_order_ids, ids(&["FAST"]));
        assert_eq!(result.timed_out_order_ids, ids(&["SLOW"]));
        assert_eq!(result.total_released, dec!(50));
        assert_eq!(result.elapsed, Duration::from_secs(2));
        assert_eq!(broker.order_polls(&OrderId::new("FAST")), 1);
        // Polled every 100ms until the 2s deadline; the poll due exactly at
        // the deadline may or may not run.
        let slow_polls = broker.order_polls(&OrderId::new("SLOW"));
        assert!((20..=21).contains(&slow_polls), "{slow_polls} polls");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_are_not_fatal() {
        let broker = Arc::new(MockBroker::new());
        broker.script_order(
            &OrderId::new("A"),
            [
                Err(BrokerError::Connection { message: "reset".into() }),
                Err(BrokerError::Timeout { message: "slow".into() }),
                Ok(order_snapshot("A", "AAPL", OrderStatus::Filled, dec!(2), Some(dec!(10)))),
            ],
        );

        let mut publisher = MockPublisher::new();
        expect_one_event(&mut publisher);
        let monitor = monitor(&broker, publisher);

        let result = monitor.monitor(&ids(&["A"]), CorrelationId::new("c")).await;
        assert_eq!(result.settled_order_ids, ids(&["A"]));
        assert_eq!(result.total_released, dec!(20));
        assert_eq!(broker.order_polls(&OrderId::new("A")), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_poll_waits_retry_after() {
        let broker = Arc::new(MockBroker::new());
        broker.script_order(
            &OrderId::new("A"),
            [
                Err(BrokerError::RateLimited {
                    retry_after: Duration::from_millis(700),
                }),
                Ok(order_snapshot("A", "AAPL", OrderStatus::Filled, dec!(1), Some(dec!(1)))),
            ],
        );

        let mut publisher = MockPublisher::new();
        expect_one_event(&mut publisher);
        let monitor = monitor(&broker, publisher);

        let result = monitor.monitor(&ids(&["A"]), CorrelationId::new("c")).await;
        assert_eq!(result.elapsed, Duration::from_millis(700));
        assert!(result.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_ids_are_polled_once() {
        let broker = Arc::new(MockBroker::new());
        broker.script_order(
            &OrderId::new("A"),
            [Ok(order_snapshot("A", "AAPL", OrderStatus::Filled, dec!(3), Some(dec!(10))))],
        );

        let mut publisher = MockPublisher::new();
        expect_one_event(&mut publisher);
        let monitor = monitor(&broker, publisher);

        let result = monitor.monitor(&ids(&["A", "A", "A"]), CorrelationId::new("c")).await;
        assert_eq!(result.settled_order_ids, ids(&["A"]));
        assert_eq!(result.total_released, dec!(30));
        assert_eq!(broker.order_polls(&OrderId::new("A")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_uses_the_request_config_and_unique_ids() {
        let broker = Arc::new(MockBroker::new());
        broker.script_order(
            &OrderId::new("A"),
            [Ok(order_snapshot("A", "AAPL", OrderStatus::Filled, dec!(1), Some(dec!(5))))],
        );
        broker.script_order(&OrderId::new("B"), [pending("B")]);

        let mut publisher = MockPublisher::new();
        expect_one_event(&mut publisher);
        let monitor = monitor(&broker, publisher);

        let request = SettlementRequest::new(
            ids(&["A", "B", "A", "B"]),
            CorrelationId::new("req"),
            SettlementConfig {
                poll_interval: Duration::from_millis(250),
                max_wait: Duration::from_secs(1),
            },
        )
        .unwrap();
        let result = monitor.run(request).await;

        assert_eq!(result.settled_order_ids, ids(&["A"]));
        assert_eq!(result.timed_out_order_ids, ids(&["B"]));
        assert_eq!(result.total_released, dec!(5));
        assert_eq!(result.elapsed, Duration::from_secs(1));
        assert_eq!(broker.order_polls(&OrderId::new("A")), 1);
        let b_polls = broker.order_polls(&OrderId::new("B"));
        assert!((4..=5).contains(&b_polls), "{b_polls} polls");
    }

    #[test]
    fn request_cannot_carry_an_invalid_config() {
        let err = SettlementRequest::new(
            ids(&["A"]),
            CorrelationId::new("bad"),
            SettlementConfig {
                poll_interval: Duration::from_secs(5),
                max_wait: Duration::from_secs(1),
            },
        )
        .unwrap_err();
        assert_eq!(err.field, "poll_interval");
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_still_returns_result() {
        let broker = Arc::new(MockBroker::new());
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().times(1).returning(|_| {
            Err(EventPublishError::PublishFailed {
                message: "bus down".into(),
            })
        });
        let monitor = monitor(&broker, publisher);

        let result = monitor.monitor(&[], CorrelationId::new("c")).await;
        assert!(result.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_returns_before_all_orders_settle() {
        let broker = Arc::new(MockBroker::new());
        broker.script_order(
            &OrderId::new("A"),
            [
                pending("A"),
                Ok(order_snapshot("A", "AAPL", OrderStatus::Filled, dec!(10), Some(dec!(100)))),
            ],
        );
        broker.script_order(&OrderId::new("B"), [pending("B")]);

        let mut publisher = MockPublisher::new();
        publisher.expect_publish().never();
        let monitor = monitor(&broker, publisher);

        let started = Instant::now();
        let reached = monitor
            .wait_for_threshold(dec!(1000), &ids(&["A", "B"]), CorrelationId::new("c"))
            .await
            .unwrap();

        assert!(reached);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_not_reached_by_deadline() {
        let broker = Arc::new(MockBroker::new());
        broker.script_order(
            &OrderId::new("A"),
            [Ok(order_snapshot("A", "AAPL", OrderStatus::Filled, dec!(1), Some(dec!(100))))],
        );
        broker.script_order(&OrderId::new("B"), [pending("B")]);
        let monitor = monitor(&broker, MockPublisher::new());

        let reached = monitor
            .wait_for_threshold(dec!(1000), &ids(&["A", "B"]), CorrelationId::new("c"))
            .await
            .unwrap();
        assert!(!reached);
    }

    #[tokio::test]
    async fn threshold_edge_values() {
        let broker = Arc::new(MockBroker::new());
        let monitor = monitor(&broker, MockPublisher::new());

        assert!(monitor
            .wait_for_threshold(Decimal::ZERO, &ids(&["A"]), CorrelationId::new("c"))
            .await
            .unwrap());
        assert_eq!(broker.order_polls(&OrderId::new("A")), 0);

        let err = monitor
            .wait_for_threshold(dec!(-1), &ids(&["A"]), CorrelationId::new("c"))
            .await
            .unwrap_err();
        assert_eq!(err.field, "target");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn totals_match_details_and_settled_is_subset(
            orders in prop::collection::vec((0u8..4, 1u32..100, 1u32..500), 0..12),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let broker = Arc::new(MockBroker::new());
            let mut requested = Vec::new();
            for (i, (kind, qty, price)) in orders.iter().enumerate() {
                let id = format!("O{i}");
                let status = match kind {
                    0 => OrderStatus::Filled,
                    1 => OrderStatus::Canceled,
                    2 => OrderStatus::PartiallyFilled,
                    _ => OrderStatus::Accepted,
                };
                broker.script_order(
                    &OrderId::new(id.clone()),
                    [Ok(order_snapshot(&id, "AAPL", status, Decimal::from(*qty), Some(Decimal::from(*price))))],
                );
                requested.push(OrderId::new(id));
            }

            let monitor = monitor(&broker, {
                let mut publisher = MockPublisher::new();
                expect_one_event(&mut publisher);
                publisher
            });

            let result = runtime.block_on(monitor.monitor(&requested, CorrelationId::new("prop")));

            let sum: Decimal = result.details.iter().map(|d| d.settled_value).sum();
            prop_assert_eq!(sum, result.total_released);
            prop_assert!(result.settled_order_ids.iter().all(|id| requested.contains(id)));
            prop_assert_eq!(
                result.settled_order_ids.len() + result.timed_out_order_ids.len(),
                requested.len()
            );
        }
    }
}
