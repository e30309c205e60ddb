//! Domain aggregates persisted by the engine.

pub mod customer;
pub mod order;
pub mod rate;

pub use customer::{Address, Customer};
pub use order::{GatewayCorrelation, LineItem, Order, OrderEvent, OtpChallenge};
pub use rate::{CustomerRateOverride, OverrideKind, RateAction, RateHistoryEntry, RateRecord};
