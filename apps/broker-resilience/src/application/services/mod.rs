//! Application Services
//!
//! Services that coordinate broker reads through the ports: buying-power
//! verification before sizing buys, and settlement monitoring after sells.

pub mod buying_power;
pub mod settlement;

pub use buying_power::{BuyingPowerCheck, BuyingPowerConfig, BuyingPowerVerifier, VerifyError};
pub use settlement::{
    BulkSettlementResult, OrderSettlementDetail, OrderSettlementStatus, SettlementConfig,
    SettlementMonitor, SettlementRequest,
};
