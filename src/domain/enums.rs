//! Enumerations for the MARTIN domain.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyMode {
    Base,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeMode {
    Day,
    Night,
}

/// Trade status in the lifecycle state machine.
///
/// NEW -> SEARCHING_SIGNAL -> SIGNALLED -> WAITING_CONFIRM -> WAITING_CAP -> READY
///     -> ORDER_PLACED -> SETTLED
/// CANCELLED / ERROR are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    New,
    SearchingSignal,
    Signalled,
    WaitingConfirm,
    WaitingCap,
    Ready,
    OrderPlaced,
    Settled,
    Cancelled,
    Error,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Settled | TradeStatus::Cancelled | TradeStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CapStatus {
    Pending,
    Pass,
    Fail,
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillStatus {
    Pending,
    Filled,
    Partial,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Pending,
    Ok,
    AutoOk,
    Skip,
    AutoSkip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    NoSignal,
    LowQuality,
    Skip,
    Expired,
    Late,
    CapFail,
    Paused,
    NightDisabled,
}

/// Controls overnight streak reset behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NightSessionMode {
    Off,
    Soft,
    Hard,
}
