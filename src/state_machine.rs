//! Trade lifecycle state machine.
//!
//! NEW -> SEARCHING_SIGNAL -> SIGNALLED -> WAITING_CONFIRM -> WAITING_CAP -> READY
//!     -> ORDER_PLACED -> SETTLED
//! CANCELLED / ERROR are terminal.

use crate::domain::enums::{CancelReason, Decision, FillStatus, TradeStatus};
use crate::domain::models::{CapCheck, Signal, Trade};
use crate::errors::MartinError;
use crate::logging;

fn valid_next(status: TradeStatus) -> &'static [TradeStatus] {
    use TradeStatus::*;
    match status {
        New => &[SearchingSignal, Cancelled],
        SearchingSignal => &[Signalled, Cancelled],
        Signalled => &[WaitingConfirm, Cancelled],
        WaitingConfirm => &[WaitingCap, Cancelled],
        WaitingCap => &[Ready, Cancelled],
        Ready => &[OrderPlaced, Cancelled],
        OrderPlaced => &[Settled, Error],
        Settled | Cancelled | Error => &[],
    }
}

pub fn can_transition(trade: &Trade, new_status: TradeStatus) -> bool {
    valid_next(trade.status).contains(&new_status)
}

/// Moves `trade` to `new_status`, stamping `updated_at` and logging the audit trail.
/// Returns `MartinError::Trade` if the transition is not in the legal table.
fn transition(trade: &mut Trade, new_status: TradeStatus, now: i64, reason: &str) -> Result<(), MartinError> {
    if !can_transition(trade, new_status) {
        return Err(MartinError::trade(trade.status, reason.to_string()));
    }
    trade.status = new_status;
    trade.updated_at = now;
    logging::log(
        logging::Level::Info,
        logging::Domain::Audit,
        "trade_status_changed",
        logging::obj(&[
            ("trade_id", serde_json::json!(trade.id)),
            ("old_status", serde_json::json!(format!("{:?}", trade.status))),
            ("new_status", serde_json::json!(format!("{:?}", new_status))),
            ("reason", logging::v_str(reason)),
        ]),
    );
    Ok(())
}

/// SIGNALLED -> CANCELLED(LOW_QUALITY).
pub fn on_low_quality(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    trade.cancel_reason = Some(CancelReason::LowQuality);
    trade.decision = Decision::AutoSkip;
    transition(trade, TradeStatus::Cancelled, now, "low_quality")
}

/// SIGNALLED -> WAITING_CONFIRM.
pub fn on_quality_pass(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    transition(trade, TradeStatus::WaitingConfirm, now, "quality_pass")
}

/// WAITING_CONFIRM -> WAITING_CAP.
pub fn on_confirm_reached(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    transition(trade, TradeStatus::WaitingCap, now, "confirm_reached")
}

/// WAITING_CAP -> READY.
pub fn on_cap_pass(trade: &mut Trade, _cap_check: &CapCheck, now: i64) -> Result<(), MartinError> {
    transition(trade, TradeStatus::Ready, now, "cap_pass")
}

/// WAITING_CAP -> CANCELLED(CAP_FAIL).
pub fn on_cap_fail(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    trade.cancel_reason = Some(CancelReason::CapFail);
    trade.decision = Decision::AutoSkip;
    transition(trade, TradeStatus::Cancelled, now, "cap_fail")
}

/// WAITING_CONFIRM or WAITING_CAP -> CANCELLED(LATE), when confirm_ts >= end_ts.
pub fn on_cap_late(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    trade.cancel_reason = Some(CancelReason::Late);
    trade.decision = Decision::AutoSkip;
    transition(trade, TradeStatus::Cancelled, now, "cap_late")
}

/// Day-mode user confirmation. Does not change status.
pub fn on_user_ok(trade: &mut Trade) {
    trade.decision = Decision::Ok;
    logging::log(logging::Level::Info, logging::Domain::Audit, "user_ok", logging::obj(&[("trade_id", serde_json::json!(trade.id))]));
}

/// READY -> CANCELLED(SKIP).
pub fn on_user_skip(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    trade.decision = Decision::Skip;
    trade.cancel_reason = Some(CancelReason::Skip);
    transition(trade, TradeStatus::Cancelled, now, "user_skip")
}

/// Night-mode autonomous confirmation. Does not change status.
pub fn on_auto_ok(trade: &mut Trade) {
    trade.decision = Decision::AutoOk;
    logging::log(logging::Level::Info, logging::Domain::Audit, "auto_ok", logging::obj(&[("trade_id", serde_json::json!(trade.id))]));
}

/// READY -> ORDER_PLACED.
pub fn on_order_placed(trade: &mut Trade, order_id: String, token_id: String, stake_amount: f64, now: i64) -> Result<(), MartinError> {
    trade.order_id = Some(order_id);
    trade.token_id = token_id;
    trade.stake_amount = stake_amount;
    trade.fill_status = FillStatus::Pending;
    transition(trade, TradeStatus::OrderPlaced, now, "order_placed")
}

/// Records a fill. Does not change status (ORDER_PLACED -> SETTLED happens via `on_settled`).
pub fn on_order_filled(trade: &mut Trade, fill_price: f64) {
    trade.fill_status = FillStatus::Filled;
    trade.fill_price = Some(fill_price);
    logging::log_fill(trade.id.unwrap_or(0), trade.order_id.as_deref().unwrap_or(""), fill_price);
}

/// ORDER_PLACED -> ERROR.
pub fn on_order_rejected(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    trade.fill_status = FillStatus::Rejected;
    transition(trade, TradeStatus::Error, now, "order_rejected")
}

/// ORDER_PLACED -> SETTLED.
pub fn on_settled(trade: &mut Trade, is_win: bool, pnl: f64, now: i64) -> Result<(), MartinError> {
    trade.is_win = Some(is_win);
    trade.pnl = Some(pnl);
    trade.fill_status = FillStatus::Filled;
    transition(trade, TradeStatus::Settled, now, "settled")
}

/// Any non-terminal -> CANCELLED(EXPIRED). No-op if already terminal.
pub fn on_expired(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    if trade.is_terminal() {
        return Ok(());
    }
    trade.cancel_reason = Some(CancelReason::Expired);
    if trade.decision == Decision::Pending {
        trade.decision = Decision::AutoSkip;
    }
    transition(trade, TradeStatus::Cancelled, now, "expired")
}

/// Any non-terminal -> CANCELLED(PAUSED). No-op if already terminal.
pub fn on_paused(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    if trade.is_terminal() {
        return Ok(());
    }
    trade.cancel_reason = Some(CancelReason::Paused);
    trade.decision = Decision::AutoSkip;
    transition(trade, TradeStatus::Cancelled, now, "paused")
}

/// Any non-terminal -> CANCELLED(NIGHT_DISABLED). No-op if already terminal.
pub fn on_night_disabled(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    if trade.is_terminal() {
        return Ok(());
    }
    trade.cancel_reason = Some(CancelReason::NightDisabled);
    trade.decision = Decision::AutoSkip;
    transition(trade, TradeStatus::Cancelled, now, "night_disabled")
}

/// NEW -> SEARCHING_SIGNAL.
pub fn on_start_searching(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    transition(trade, TradeStatus::SearchingSignal, now, "start_searching")
}

/// SEARCHING_SIGNAL -> SIGNALLED, once a signal clears the quality threshold.
pub fn on_qualifying_signal_found(trade: &mut Trade, signal: &Signal, now: i64) -> Result<(), MartinError> {
    trade.signal_id = signal.id;
    transition(trade, TradeStatus::Signalled, now, "qualifying_signal_found")
}

/// SEARCHING_SIGNAL -> CANCELLED(NO_SIGNAL), window ended with no qualifying signal.
pub fn on_no_qualifying_signal(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    trade.cancel_reason = Some(CancelReason::NoSignal);
    trade.decision = Decision::AutoSkip;
    transition(trade, TradeStatus::Cancelled, now, "no_qualifying_signal")
}

/// READY -> CANCELLED(SKIP), max_response_seconds elapsed with no user response.
pub fn on_user_no_response_skip(trade: &mut Trade, now: i64) -> Result<(), MartinError> {
    trade.decision = Decision::AutoSkip;
    trade.cancel_reason = Some(CancelReason::Skip);
    transition(trade, TradeStatus::Cancelled, now, "user_no_response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::enums::{PolicyMode, TimeMode};
    use crate::domain::models::QualityBreakdown;

    fn new_trade() -> Trade {
        Trade::new(1, TimeMode::Day, PolicyMode::Base, (0, 0), 1000)
    }

    fn signal() -> Signal {
        Signal {
            id: Some(5),
            window_id: 1,
            direction: crate::domain::enums::Direction::Up,
            signal_ts: 1000,
            confirm_ts: 1060,
            quality: 10.0,
            quality_breakdown: QualityBreakdown::default(),
            anchor_bar_ts: 940,
            created_at: 1000,
        }
    }

    #[test]
    fn full_happy_path_transitions() {
        let mut t = new_trade();
        on_start_searching(&mut t, 1001).unwrap();
        assert_eq!(t.status, TradeStatus::SearchingSignal);
        on_qualifying_signal_found(&mut t, &signal(), 1002).unwrap();
        assert_eq!(t.status, TradeStatus::Signalled);
        assert_eq!(t.signal_id, Some(5));
        on_quality_pass(&mut t, 1003).unwrap();
        assert_eq!(t.status, TradeStatus::WaitingConfirm);
        on_confirm_reached(&mut t, 1060).unwrap();
        assert_eq!(t.status, TradeStatus::WaitingCap);
        let cap = CapCheck::new(1, "tok".into(), 1060, 4600, 1060);
        on_cap_pass(&mut t, &cap, 1065).unwrap();
        assert_eq!(t.status, TradeStatus::Ready);
        on_auto_ok(&mut t);
        assert_eq!(t.decision, Decision::AutoOk);
        on_order_placed(&mut t, "ord1".into(), "tok".into(), 5.0, 1066).unwrap();
        assert_eq!(t.status, TradeStatus::OrderPlaced);
        on_order_filled(&mut t, 0.45);
        assert_eq!(t.fill_status, FillStatus::Filled);
        on_settled(&mut t, true, 4.5, 4600).unwrap();
        assert_eq!(t.status, TradeStatus::Settled);
        assert!(t.is_terminal());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut t = new_trade();
        let err = on_confirm_reached(&mut t, 1000).unwrap_err();
        assert!(matches!(err, MartinError::Trade { from: TradeStatus::New, .. }));
    }

    #[test]
    fn expired_is_noop_on_terminal_trade() {
        let mut t = new_trade();
        on_start_searching(&mut t, 1001).unwrap();
        on_no_qualifying_signal(&mut t, 1000).unwrap();
        assert_eq!(t.status, TradeStatus::Cancelled);
        on_expired(&mut t, 2000).unwrap();
        assert_eq!(t.status, TradeStatus::Cancelled);
        assert_eq!(t.cancel_reason, Some(CancelReason::NoSignal));
    }

    #[test]
    fn expired_sets_auto_skip_when_decision_pending() {
        let mut t = new_trade();
        on_start_searching(&mut t, 1001).unwrap();
        on_qualifying_signal_found(&mut t, &signal(), 1002).unwrap();
        on_quality_pass(&mut t, 1003).unwrap();
        assert_eq!(t.decision, Decision::Pending);
        on_expired(&mut t, 2000).unwrap();
        assert_eq!(t.cancel_reason, Some(CancelReason::Expired));
        assert_eq!(t.decision, Decision::AutoSkip);
    }

    #[test]
    fn cap_fail_sets_reason_and_auto_skip() {
        let mut t = new_trade();
        on_start_searching(&mut t, 1001).unwrap();
        on_qualifying_signal_found(&mut t, &signal(), 1002).unwrap();
        on_quality_pass(&mut t, 1003).unwrap();
        on_confirm_reached(&mut t, 1060).unwrap();
        on_cap_fail(&mut t, 1200).unwrap();
        assert_eq!(t.status, TradeStatus::Cancelled);
        assert_eq!(t.cancel_reason, Some(CancelReason::CapFail));
        assert_eq!(t.decision, Decision::AutoSkip);
    }

    #[test]
    fn order_rejected_goes_to_error_not_cancelled() {
        let mut t = new_trade();
        on_start_searching(&mut t, 1001).unwrap();
        on_qualifying_signal_found(&mut t, &signal(), 1002).unwrap();
        on_quality_pass(&mut t, 1003).unwrap();
        on_confirm_reached(&mut t, 1060).unwrap();
        let cap = CapCheck::new(1, "tok".into(), 1060, 4600, 1060);
        on_cap_pass(&mut t, &cap, 1065).unwrap();
        on_order_placed(&mut t, "ord1".into(), "tok".into(), 5.0, 1066).unwrap();
        on_order_rejected(&mut t, 1070).unwrap();
        assert_eq!(t.status, TradeStatus::Error);
        assert_eq!(t.fill_status, FillStatus::Rejected);
    }

    #[test]
    fn user_no_response_skip_sets_auto_skip_and_skip_reason() {
        let mut t = new_trade();
        on_start_searching(&mut t, 1001).unwrap();
        on_qualifying_signal_found(&mut t, &signal(), 1002).unwrap();
        on_quality_pass(&mut t, 1003).unwrap();
        on_confirm_reached(&mut t, 1060).unwrap();
        let cap = CapCheck::new(1, "tok".into(), 1060, 4600, 1060);
        on_cap_pass(&mut t, &cap, 1065).unwrap();
        on_user_no_response_skip(&mut t, 1200).unwrap();
        assert_eq!(t.status, TradeStatus::Cancelled);
        assert_eq!(t.decision, Decision::AutoSkip);
        assert_eq!(t.cancel_reason, Some(CancelReason::Skip));
    }
}
