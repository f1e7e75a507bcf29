//! Settlement requests, per-order outcomes and bulk results.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{CorrelationId, OrderId, OrderSide, OrderSnapshot, OrderStatus, Symbol};
use crate::error::ValidationError;

/// Polling cadence and shared deadline of a settlement run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Wait between polls of one order.
    pub poll_interval: Duration,
    /// Deadline shared by every order of a run.
    pub max_wait: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl SettlementConfig {
    /// Reject zero durations and a poll interval that does not fit the deadline.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval.is_zero() {
            return Err(ValidationError::new("poll_interval", "must be greater than zero"));
        }
        if self.max_wait.is_zero() {
            return Err(ValidationError::new("max_wait", "must be greater than zero"));
        }
        if self.poll_interval >= self.max_wait {
            return Err(ValidationError::new(
                "poll_interval",
                format!(
                    "{}ms must be below max_wait {}ms",
                    self.poll_interval.as_millis(),
                    self.max_wait.as_millis()
                ),
            ));
        }
        Ok(())
    }
}

/// One settlement run: which orders to watch, and for how long.
///
/// Only [`SettlementRequest::new`] builds one, so every request carries a
/// validated config and unique order IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementRequest {
    pub(super) order_ids: Vec<OrderId>,
    pub(super) correlation_id: CorrelationId,
    pub(super) config: SettlementConfig,
}

impl SettlementRequest {
    /// Build a request, collapsing duplicate order IDs.
    pub fn new<I>(order_ids: I, correlation_id: CorrelationId, config: SettlementConfig) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = OrderId>,
    {
        config.validate()?;
        Ok(Self::with_checked_config(order_ids, correlation_id, config))
    }

    /// Build a request from a config that has already been validated.
    pub(super) fn with_checked_config<I>(order_ids: I, correlation_id: CorrelationId, config: SettlementConfig) -> Self
    where
        I: IntoIterator<Item = OrderId>,
    {
        let mut seen = HashSet::new();
        let order_ids = order_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        Self {
            order_ids,
            correlation_id,
            config,
        }
    }

    /// Orders to watch, de-duplicated in first-seen order.
    #[must_use]
    pub fn order_ids(&self) -> &[OrderId] {
        &self.order_ids
    }

    /// Workflow correlation ID.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Polling cadence and deadline.
    #[must_use]
    pub const fn config(&self) -> &SettlementConfig {
        &self.config
    }
}

/// Settlement status of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSettlementStatus {
    /// Not terminal yet.
    Pending,
    /// Completely filled.
    Filled,
    /// Done with only part of the quantity filled.
    PartiallyFilled,
    /// Canceled or expired with nothing released.
    Canceled,
    /// Rejected by the broker.
    Rejected,
    /// Last poll failed; will retry.
    Error,
    /// Deadline passed before a terminal status.
    Timeout,
}

impl OrderSettlementStatus {
    /// Map a broker order status.
    #[must_use]
    pub const fn from_order_status(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Filled => Self::Filled,
            OrderStatus::PartiallyFilled => Self::PartiallyFilled,
            OrderStatus::Canceled | OrderStatus::Expired => Self::Canceled,
            OrderStatus::Rejected => Self::Rejected,
            OrderStatus::New
            | OrderStatus::PendingNew
            | OrderStatus::Accepted
            | OrderStatus::PendingCancel => Self::Pending,
        }
    }

    /// Whether the order counts as settled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::PartiallyFilled | Self::Canceled | Self::Rejected
        )
    }

    /// Whether this status releases value.
    #[must_use]
    pub const fn releases_value(&self) -> bool {
        matches!(self, Self::Filled | Self::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderSettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Filled => "FILLED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of one settled order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSettlementDetail {
    /// Order ID.
    pub order_id: OrderId,
    /// Traded symbol.
    pub symbol: Symbol,
    /// Order side.
    pub side: OrderSide,
    /// Filled quantity.
    pub filled_qty: Decimal,
    /// Average fill price, zero without a fill.
    pub fill_price: Decimal,
    /// Value released by this order.
    pub settled_value: Decimal,
    /// Terminal status.
    pub status: OrderSettlementStatus,
    /// Polls it took to observe the terminal status.
    pub polls: u32,
    /// When the terminal status was observed.
    pub settled_at: DateTime<Utc>,
}

impl OrderSettlementDetail {
    /// Build a detail from a poll, if the snapshot is terminal.
    ///
    /// `order_id` is the requested ID, which wins over whatever the broker
    /// echoes back.
    #[must_use]
    pub fn from_snapshot(order_id: &OrderId, snapshot: &OrderSnapshot, polls: u32) -> Option<Self> {
        let status = OrderSettlementStatus::from_order_status(snapshot.status);
        if !status.is_terminal() {
            return None;
        }

        let fill_price = snapshot.filled_avg_price.unwrap_or(Decimal::ZERO);
        let settled_value = if status.releases_value() {
            snapshot.filled_qty * fill_price
        } else {
            Decimal::ZERO
        };

        Some(Self {
            order_id: order_id.clone(),
            symbol: snapshot.symbol.clone(),
            side: snapshot.side,
            filled_qty: snapshot.filled_qty,
            fill_price,
            settled_value,
            status,
            polls,
            settled_at: Utc::now(),
        })
    }
}

/// Aggregated outcome of a settlement run.
///
/// `details` holds one entry per settled order, so the sum of their
/// `settled_value` always equals `total_released`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSettlementResult {
    /// Workflow correlation ID.
    pub correlation_id: CorrelationId,
    /// Orders that reached a terminal status, in request order.
    pub settled_order_ids: Vec<OrderId>,
    /// Orders still not terminal at the deadline, in request order.
    pub timed_out_order_ids: Vec<OrderId>,
    /// Total value released by settled orders.
    pub total_released: Decimal,
    /// Per-order details of settled orders, in request order.
    pub details: Vec<OrderSettlementDetail>,
    /// Wall time of the run.
    pub elapsed: Duration,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
}

impl BulkSettlementResult {
    /// Whether every requested order settled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.timed_out_order_ids.is_empty()
    }

    /// Detail of one settled order.
    #[must_use]
    pub fn detail(&self, order_id: &OrderId) -> Option<&OrderSettlementDetail> {
        self.details.iter().find(|d| &d.order_id == order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn snapshot(status: OrderStatus, qty: Decimal, price: Option<Decimal>) -> OrderSnapshot {
        OrderSnapshot {
            order_id: OrderId::new("broker-echo"),
            symbol: Symbol::new("AAPL"),
            side: OrderSide::Sell,
            status,
            filled_qty: qty,
            filled_avg_price: price,
        }
    }

    #[test_case(SettlementConfig { poll_interval: Duration::ZERO, max_wait: Duration::from_secs(1) }, "poll_interval")]
    #[test_case(SettlementConfig { poll_interval: Duration::from_secs(1), max_wait: Duration::ZERO }, "max_wait")]
    #[test_case(SettlementConfig { poll_interval: Duration::from_secs(5), max_wait: Duration::from_secs(5) }, "poll_interval")]
    fn invalid_config(config: SettlementConfig, field: &str) {
        assert_eq!(config.validate().unwrap_err().field, field);
    }

    #[test]
    fn request_collapses_duplicates() {
        let request = SettlementRequest::new(
            ["B", "A", "B", "C", "A"].map(OrderId::new),
            CorrelationId::new("corr"),
            SettlementConfig::default(),
        )
        .unwrap();
        assert_eq!(request.order_ids(), ["B", "A", "C"].map(OrderId::new).to_vec());
    }

    #[test_case(OrderStatus::Filled, OrderSettlementStatus::Filled)]
    #[test_case(OrderStatus::PartiallyFilled, OrderSettlementStatus::PartiallyFilled)]
    #[test_case(OrderStatus::Canceled, OrderSettlementStatus::Canceled)]
    #[test_case(OrderStatus::Expired, OrderSettlementStatus::Canceled)]
    #[test_case(OrderStatus::Rejected, OrderSettlementStatus::Rejected)]
    #[test_case(OrderStatus::Accepted, OrderSettlementStatus::Pending)]
    #[test_case(OrderStatus::PendingCancel, OrderSettlementStatus::Pending)]
    fn status_mapping(status: OrderStatus, expected: OrderSettlementStatus) {
        assert_eq!(OrderSettlementStatus::from_order_status(status), expected);
    }

    #[test]
    fn filled_detail_values_fill() {
        let detail = OrderSettlementDetail::from_snapshot(
            &OrderId::new("A"),
            &snapshot(OrderStatus::Filled, dec!(10), Some(dec!(150.00))),
            3,
        )
        .unwrap();
        assert_eq!(detail.order_id, OrderId::new("A"));
        assert_eq!(detail.settled_value, dec!(1500.00));
        assert_eq!(detail.polls, 3);
    }

    #[test]
    fn canceled_detail_releases_nothing() {
        let detail = OrderSettlementDetail::from_snapshot(
            &OrderId::new("B"),
            &snapshot(OrderStatus::Canceled, dec!(4), Some(dec!(10))),
            1,
        )
        .unwrap();
        assert_eq!(detail.status, OrderSettlementStatus::Canceled);
        assert_eq!(detail.settled_value, Decimal::ZERO);
    }

    #[test]
    fn pending_snapshot_has_no_detail() {
        assert!(OrderSettlementDetail::from_snapshot(
            &OrderId::new("A"),
            &snapshot(OrderStatus::New, dec!(0), None),
            1
        )
        .is_none());
    }
}
