//! Core domain: enums, entities and their invariants.

pub mod enums;
pub mod models;

pub use enums::{
    CancelReason, CapStatus, Decision, Direction, FillStatus, NightSessionMode, PolicyMode,
    TimeMode, TradeStatus,
};
pub use models::{CapCheck, MarketWindow, QualityBreakdown, Settings, Signal, Stats, Trade};
