//! Bulk order settlement.
//!
//! ```text
//! PENDING ──poll──▶ FILLED | PARTIALLY_FILLED | CANCELED | REJECTED
//!    │  ▲
//!    ▼  │ (retry)
//!  ERROR
//!
//! PENDING ──deadline──▶ TIMEOUT (excluded from the settled set)
//! ```

mod ledger;
mod monitor;
mod types;

pub use ledger::{LedgerEntry, SettlementLedger};
pub use monitor::SettlementMonitor;
pub use types::{
    BulkSettlementResult, OrderSettlementDetail, OrderSettlementStatus, SettlementConfig,
    SettlementRequest,
};
