//! Exactly-once aggregation of settled orders.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;

use super::types::OrderSettlementDetail;
use crate::domain::OrderId;

/// Outcome of [`SettlementLedger::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEntry {
    /// First terminal observation; value added to the total.
    Recorded,
    /// Order already settled; ignored.
    Duplicate,
    /// Order not part of the request; ignored.
    Unknown,
}

/// Running total of one settlement run.
///
/// Each requested order contributes at most once, however many times it is
/// reported, and orders outside the request never contribute.
#[derive(Debug)]
pub struct SettlementLedger {
    requested: Vec<OrderId>,
    settled: HashMap<OrderId, OrderSettlementDetail>,
    total: Decimal,
}

impl SettlementLedger {
    /// Create a ledger for the given order IDs. Repeated IDs count once.
    #[must_use]
    pub fn new(requested: &[OrderId]) -> Self {
        let mut requested = requested.to_vec();
        let mut seen = HashSet::with_capacity(requested.len());
        requested.retain(|id| seen.insert(id.clone()));

        Self {
            settled: HashMap::with_capacity(requested.len()),
            requested,
            total: Decimal::ZERO,
        }
    }

    /// Record a terminal observation.
    pub fn record(&mut self, detail: OrderSettlementDetail) -> LedgerEntry {
        if !self.requested.contains(&detail.order_id) {
            return LedgerEntry::Unknown;
        }
        if self.settled.contains_key(&detail.order_id) {
            return LedgerEntry::Duplicate;
        }

        self.total += detail.settled_value;
        self.settled.insert(detail.order_id.clone(), detail);
        LedgerEntry::Recorded
    }

    /// Total released so far. Never decreases.
    #[must_use]
    pub const fn total(&self) -> Decimal {
        self.total
    }

    /// Number of settled orders.
    #[must_use]
    pub fn settled_count(&self) -> usize {
        self.settled.len()
    }

    /// Whether every requested order has settled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.settled.len() == self.requested.len()
    }

    /// Split into (settled IDs, timed-out IDs, details), all in request order.
    #[must_use]
    pub fn finish(mut self) -> (Vec<OrderId>, Vec<OrderId>, Vec<OrderSettlementDetail>) {
        let mut settled_ids = Vec::with_capacity(self.settled.len());
        let mut timed_out = Vec::new();
        let mut details = Vec::with_capacity(self.settled.len());

        for id in self.requested {
            match self.settled.remove(&id) {
                Some(detail) => {
                    settled_ids.push(id);
                    details.push(detail);
                }
                None => timed_out.push(id),
            }
        }
        (settled_ids, timed_out, details)
    }
}
