//! Data model entities (§3). All timestamps are unix seconds; money is decimal USD-coin units.

use serde::{Deserialize, Serialize};

use super::enums::{
    CancelReason, CapStatus, Decision, Direction, FillStatus, PolicyMode, TimeMode, TradeStatus,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketWindow {
    pub id: Option<i64>,
    pub asset: String,
    pub slug: String,
    pub condition_id: String,
    pub up_token_id: String,
    pub down_token_id: String,
    pub start_ts: i64,
    pub end_ts: i64,
    pub outcome: Option<Direction>,
    pub created_at: i64,
}

impl MarketWindow {
    pub fn is_expired(&self, current_ts: i64) -> bool {
        current_ts >= self.end_ts
    }

    pub fn time_remaining(&self, current_ts: i64) -> i64 {
        (self.end_ts - current_ts).max(0)
    }
}

/// Breakdown of quality score components, kept bit-exact across schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub schema_version: u32,
    pub anchor_price: f64,
    pub signal_price: f64,
    pub ret_from_anchor: f64,
    pub edge_component: f64,
    pub edge_penalty_applied: bool,
    pub adx_value: f64,
    pub q_adx: f64,
    pub ema50_slope: f64,
    pub q_slope: f64,
    pub trend_mult: f64,
    pub trend_confirms: bool,
    pub w_anchor: f64,
    pub w_adx: f64,
    pub w_slope: f64,
    pub final_quality: f64,
}

impl Default for QualityBreakdown {
    fn default() -> Self {
        Self {
            schema_version: 1,
            anchor_price: 0.0,
            signal_price: 0.0,
            ret_from_anchor: 0.0,
            edge_component: 0.0,
            edge_penalty_applied: false,
            adx_value: 0.0,
            q_adx: 0.0,
            ema50_slope: 0.0,
            q_slope: 0.0,
            trend_mult: 1.0,
            trend_confirms: true,
            w_anchor: 0.0,
            w_adx: 0.0,
            w_slope: 0.0,
            final_quality: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Option<i64>,
    pub window_id: i64,
    pub direction: Direction,
    pub signal_ts: i64,
    pub confirm_ts: i64,
    pub quality: f64,
    pub quality_breakdown: QualityBreakdown,
    pub anchor_bar_ts: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<i64>,
    pub window_id: i64,
    pub signal_id: Option<i64>,
    pub status: TradeStatus,
    pub time_mode: TimeMode,
    pub policy_mode: PolicyMode,
    pub decision: Decision,
    pub cancel_reason: Option<CancelReason>,
    pub token_id: String,
    pub order_id: Option<String>,
    pub fill_status: FillStatus,
    pub fill_price: Option<f64>,
    pub stake_amount: f64,
    pub pnl: Option<f64>,
    pub is_win: Option<bool>,
    pub trade_level_streak: i64,
    pub night_streak: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Trade {
    pub fn new(window_id: i64, time_mode: TimeMode, policy_mode: PolicyMode, streaks: (i64, i64), now: i64) -> Self {
        Self {
            id: None,
            window_id,
            signal_id: None,
            status: TradeStatus::New,
            time_mode,
            policy_mode,
            decision: Decision::Pending,
            cancel_reason: None,
            token_id: String::new(),
            order_id: None,
            fill_status: FillStatus::Pending,
            fill_price: None,
            stake_amount: 0.0,
            pnl: None,
            is_win: None,
            trade_level_streak: streaks.0,
            night_streak: streaks.1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_taken(&self) -> bool {
        matches!(self.decision, Decision::Ok | Decision::AutoOk)
    }

    pub fn is_filled(&self) -> bool {
        self.fill_status == FillStatus::Filled
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// decision in {OK, AUTO_OK} AND fill_status == FILLED.
    pub fn counts_for_streak(&self) -> bool {
        self.is_taken() && self.is_filled()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapCheck {
    pub id: Option<i64>,
    pub trade_id: i64,
    pub token_id: String,
    pub confirm_ts: i64,
    pub end_ts: i64,
    pub status: CapStatus,
    pub consecutive_ticks: i64,
    pub first_pass_ts: Option<i64>,
    pub price_at_pass: Option<f64>,
    pub created_at: i64,
}

impl CapCheck {
    /// Status starts LATE iff confirm_ts >= end_ts, PENDING otherwise.
    pub fn new(trade_id: i64, token_id: String, confirm_ts: i64, end_ts: i64, now: i64) -> Self {
        let status = if confirm_ts >= end_ts { CapStatus::Late } else { CapStatus::Pending };
        Self {
            id: None,
            trade_id,
            token_id,
            confirm_ts,
            end_ts,
            status,
            consecutive_ticks: 0,
            first_pass_ts: None,
            price_at_pass: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub id: i64,
    pub trade_level_streak: i64,
    pub night_streak: i64,
    pub policy_mode: PolicyMode,
    pub total_trades: i64,
    pub total_wins: i64,
    pub total_losses: i64,
    pub last_strict_day_threshold: Option<f64>,
    pub last_strict_night_threshold: Option<f64>,
    pub last_quantile_update_ts: Option<i64>,
    pub is_paused: bool,
    pub day_only: bool,
    pub night_only: bool,
    pub updated_at: i64,
}

impl Stats {
    pub fn singleton(now: i64) -> Self {
        Self {
            id: 1,
            trade_level_streak: 0,
            night_streak: 0,
            policy_mode: PolicyMode::Base,
            total_trades: 0,
            total_wins: 0,
            total_losses: 0,
            last_strict_day_threshold: None,
            last_strict_night_threshold: None,
            last_quantile_update_ts: None,
            is_paused: false,
            day_only: false,
            night_only: false,
            updated_at: now,
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.total_wins as f64 / self.total_trades as f64 * 100.0
        }
    }
}

/// DB-backed override layer (§6): a subset of `Config` fields that operators can change
/// at runtime without a restart. Overrides `Config` per cycle when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub id: i64,
    pub price_cap: Option<f64>,
    pub stake_amount: Option<f64>,
    pub is_paused: Option<bool>,
    pub day_only: Option<bool>,
    pub night_only: Option<bool>,
    pub execution_mode: Option<String>,
    pub updated_at: i64,
}

impl Settings {
    pub fn empty(now: i64) -> Self {
        Self {
            id: 1,
            price_cap: None,
            stake_amount: None,
            is_paused: None,
            day_only: None,
            night_only: None,
            execution_mode: None,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_window_expiry() {
        let w = MarketWindow {
            id: Some(1),
            asset: "BTC".into(),
            slug: "btc-up-or-down".into(),
            condition_id: "c1".into(),
            up_token_id: "u1".into(),
            down_token_id: "d1".into(),
            start_ts: 1000,
            end_ts: 4600,
            outcome: None,
            created_at: 1000,
        };
        assert!(!w.is_expired(4599));
        assert!(w.is_expired(4600));
        assert_eq!(w.time_remaining(4600), 0);
        assert_eq!(w.time_remaining(4000), 600);
    }

    #[test]
    fn trade_counts_for_streak_requires_taken_and_filled() {
        let mut t = Trade::new(1, TimeMode::Day, PolicyMode::Base, (0, 0), 1000);
        assert!(!t.counts_for_streak());
        t.decision = Decision::Ok;
        assert!(!t.counts_for_streak());
        t.fill_status = FillStatus::Filled;
        assert!(t.counts_for_streak());
        t.decision = Decision::Skip;
        assert!(!t.counts_for_streak());
    }

    #[test]
    fn cap_check_starts_late_when_confirm_after_end() {
        let c = CapCheck::new(1, "tok".into(), 5000, 4600, 1000);
        assert_eq!(c.status, CapStatus::Late);
        let c2 = CapCheck::new(1, "tok".into(), 4000, 4600, 1000);
        assert_eq!(c2.status, CapStatus::Pending);
    }

    #[test]
    fn stats_win_rate_zero_trades() {
        let s = Stats::singleton(1000);
        assert_eq!(s.win_rate(), 0.0);
    }
}
