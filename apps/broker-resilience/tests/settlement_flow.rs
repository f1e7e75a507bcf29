//! Settlement Flow Integration Tests
//!
//! Sell-then-buy workflow through the wired container: settle the sells,
//! observe the completion event on the bus, then verify that the released
//! value shows up as buying power.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use broker_resilience::application::ports::{BrokerError, DomainEvent};
use broker_resilience::application::services::{SettlementConfig, SettlementRequest};
use broker_resilience::domain::{CorrelationId, OrderId, OrderStatus};
use broker_resilience::infrastructure::broker::MockBroker;
use broker_resilience::infrastructure::broker::mock::order_snapshot;
use broker_resilience::infrastructure::config::{Container, ResilienceConfig};
use broker_resilience::infrastructure::stream::InMemoryConnector;
use broker_resilience::resilience::CircuitState;
use rust_decimal_macros::dec;

fn container(broker: &Arc<MockBroker>) -> Container {
    let vars: HashMap<&str, &str> = [("ALPACA_KEY", "key"), ("ALPACA_SECRET", "secret")].into();
    let config = ResilienceConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()))
        .expect("config should load");
    Container::with_ports(&config, broker.clone(), Arc::new(InMemoryConnector::new()))
        .expect("container should wire")
}

#[tokio::test(start_paused = true)]
async fn sells_settle_then_buying_power_is_verified() {
    let broker = Arc::new(MockBroker::new().with_buying_power([dec!(1000), dec!(2500)]));
    let sell_a = OrderId::new("sell-a");
    let sell_b = OrderId::new("sell-b");
    broker.script_order(
        &sell_a,
        [
            Ok(order_snapshot("sell-a", "AAPL", OrderStatus::New, dec!(0), None)),
            Ok(order_snapshot("sell-a", "AAPL", OrderStatus::Accepted, dec!(0), None)),
            Ok(order_snapshot("sell-a", "AAPL", OrderStatus::Filled, dec!(10), Some(dec!(150)))),
        ],
    );
    broker.script_order(
        &sell_b,
        [Ok(order_snapshot("sell-b", "MSFT", OrderStatus::Canceled, dec!(0), None))],
    );

    let container = container(&broker);
    let mut events = container.events().subscribe();
    let correlation_id = CorrelationId::new("rebalance-1");

    let result = container
        .settlement()
        .monitor(&[sell_a.clone(), sell_b.clone()], correlation_id.clone())
        .await;

    assert!(result.is_complete());
    assert_eq!(result.settled_order_ids, vec![sell_a.clone(), sell_b.clone()]);
    assert_eq!(result.total_released, dec!(1500));
    assert_eq!(result.detail(&sell_a).unwrap().polls, 3);
    assert_eq!(result.detail(&sell_b).unwrap().settled_value, dec!(0));

    match events.recv().await.unwrap() {
        DomainEvent::SettlementCompleted(published) => assert_eq!(published, result),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(events.try_recv().is_err());

    let check = container
        .buying_power()
        .verify_default(result.total_released + dec!(500))
        .await
        .unwrap();
    assert!(check.available);
    assert_eq!(check.actual, dec!(2500));
    assert_eq!(broker.buying_power_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn broker_outage_opens_breaker_and_orders_time_out() {
    let broker = Arc::new(MockBroker::new());
    let order = OrderId::new("stuck");
    broker.script_order(
        &order,
        [Err(BrokerError::Connection {
            message: "connection reset".into(),
        })],
    );

    let container = container(&broker);
    let request = SettlementRequest::new(
        [order.clone()],
        CorrelationId::new("outage"),
        SettlementConfig {
            poll_interval: Duration::from_millis(100),
            max_wait: Duration::from_secs(2),
        },
    )
    .unwrap();

    let result = container.settlement().run(request).await;

    assert!(result.settled_order_ids.is_empty());
    assert_eq!(result.timed_out_order_ids, vec![order.clone()]);
    assert_eq!(result.total_released, dec!(0));
    assert_eq!(container.broker().breaker().state(), CircuitState::Open);
    // Five failures open the breaker; later polls never reach the broker.
    assert_eq!(broker.order_polls(&order), 5);
}

#[tokio::test(start_paused = true)]
async fn threshold_wait_does_not_publish() {
    let broker = Arc::new(MockBroker::new());
    let big = OrderId::new("big");
    let slow = OrderId::new("slow");
    broker.script_order(
        &big,
        [Ok(order_snapshot("big", "SPY", OrderStatus::Filled, dec!(10), Some(dec!(500))))],
    );
    broker.script_order(
        &slow,
        [Ok(order_snapshot("slow", "QQQ", OrderStatus::Accepted, dec!(0), None))],
    );

    let container = container(&broker);
    let events = container.events().subscribe();

    let reached = container
        .settlement()
        .wait_for_threshold(dec!(4000), &[big, slow], CorrelationId::new("threshold"))
        .await
        .unwrap();

    assert!(reached);
    assert!(events.is_empty());
}
