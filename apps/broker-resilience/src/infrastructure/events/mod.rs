//! Event publishing adapters.

pub mod broadcast;

pub use broadcast::BroadcastEventBus;
