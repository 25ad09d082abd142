//! Streak bookkeeping, BASE/STRICT policy switching, and rolling quality thresholds.

use crate::domain::enums::{PolicyMode, TimeMode};
use crate::domain::models::{Stats, Trade};
use crate::logging;

pub const QUANTILE_P90: f64 = 0.90;
pub const QUANTILE_P95: f64 = 0.95;
pub const QUANTILE_P97: f64 = 0.97;
pub const QUANTILE_P99: f64 = 0.99;

/// Type 7 (R/Excel default) quantile interpolation over an unsorted sample.
pub fn compute_quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let h = (n - 1) as f64 * q;
    let k = h.floor() as i64;
    let d = h - k as f64;

    if k < 0 {
        return sorted[0];
    }
    if k as usize >= n - 1 {
        return sorted[n - 1];
    }
    let k = k as usize;
    sorted[k] + d * (sorted[k + 1] - sorted[k])
}

#[derive(Debug, Clone)]
pub struct StatsConfig {
    pub switch_streak_at: i64,
    pub night_max_win_streak: i64,
    pub night_session_resets_trade_streak: bool,
    pub strict_day_q: f64,
    pub strict_night_q: f64,
    pub rolling_days: i64,
    pub max_samples: usize,
    pub min_samples: usize,
    pub strict_fallback_mult: f64,
    pub base_day_min_quality: f64,
    pub base_night_min_quality: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            switch_streak_at: 3,
            night_max_win_streak: 5,
            night_session_resets_trade_streak: true,
            strict_day_q: QUANTILE_P95,
            strict_night_q: QUANTILE_P95,
            rolling_days: 14,
            max_samples: 500,
            min_samples: 50,
            strict_fallback_mult: 1.25,
            base_day_min_quality: 50.0,
            base_night_min_quality: 60.0,
        }
    }
}

pub struct StatsService {
    config: StatsConfig,
}

impl StatsService {
    pub fn new(config: StatsConfig) -> Self {
        Self { config }
    }

    /// Updates streaks and policy mode for a settled trade.
    ///
    /// Only trades that count for streak (taken AND filled) affect counters.
    /// On loss, streaks and policy mode reset unconditionally.
    pub fn on_trade_settled(&self, stats: &mut Stats, trade: &Trade, is_win: bool, time_mode: TimeMode, now: i64) {
        if !trade.counts_for_streak() {
            return;
        }

        stats.total_trades += 1;

        if is_win {
            stats.total_wins += 1;
            stats.trade_level_streak += 1;
            if time_mode == TimeMode::Night {
                stats.night_streak += 1;
            }

            logging::log_settlement(trade.id.unwrap_or(0), true, trade.pnl.unwrap_or(0.0), stats.trade_level_streak);

            if time_mode == TimeMode::Night && stats.night_streak >= self.config.night_max_win_streak {
                self.apply_night_session_reset(stats);
            }

            if stats.policy_mode == PolicyMode::Base && stats.trade_level_streak >= self.config.switch_streak_at {
                stats.policy_mode = PolicyMode::Strict;
                logging::log(
                    logging::Level::Info,
                    logging::Domain::Stats,
                    "policy_mode_switched_strict",
                    logging::obj(&[("trade_level_streak", serde_json::json!(stats.trade_level_streak))]),
                );
            }
        } else {
            stats.total_losses += 1;
            logging::log_settlement(trade.id.unwrap_or(0), false, trade.pnl.unwrap_or(0.0), 0);
            stats.trade_level_streak = 0;
            stats.night_streak = 0;
            stats.policy_mode = PolicyMode::Base;
        }

        stats.updated_at = now;
    }

    fn apply_night_session_reset(&self, stats: &mut Stats) {
        stats.night_streak = 0;
        stats.policy_mode = PolicyMode::Base;
        if self.config.night_session_resets_trade_streak {
            stats.trade_level_streak = 0;
        }
        logging::log(logging::Level::Info, logging::Domain::Stats, "night_session_reset", logging::obj(&[]));
    }

    /// Recomputes day/night STRICT thresholds from the quality samples of recent
    /// taken+filled trades. Falls back to `base_quality * fallback_mult` below
    /// `min_samples`.
    pub fn update_rolling_quantiles(&self, stats: &mut Stats, day_qualities: &[f64], night_qualities: &[f64], now: i64) {
        stats.last_strict_day_threshold = Some(self.calculate_threshold(day_qualities, self.config.strict_day_q, self.config.base_day_min_quality));
        stats.last_strict_night_threshold =
            Some(self.calculate_threshold(night_qualities, self.config.strict_night_q, self.config.base_night_min_quality));
        stats.last_quantile_update_ts = Some(now);

        logging::log(
            logging::Level::Info,
            logging::Domain::Stats,
            "rolling_quantiles_updated",
            logging::obj(&[
                ("day_samples", serde_json::json!(day_qualities.len())),
                ("night_samples", serde_json::json!(night_qualities.len())),
            ]),
        );
    }

    fn calculate_threshold(&self, qualities: &[f64], quantile: f64, base_quality: f64) -> f64 {
        let capped: Vec<f64> = qualities.iter().rev().take(self.config.max_samples).copied().collect();
        if capped.len() < self.config.min_samples {
            return base_quality * self.config.strict_fallback_mult;
        }
        compute_quantile(&capped, quantile)
    }

    /// Current quality threshold for a signal to qualify, given time/policy mode.
    pub fn get_current_threshold(&self, stats: &Stats, time_mode: TimeMode, policy_mode: PolicyMode) -> f64 {
        if policy_mode == PolicyMode::Base {
            return match time_mode {
                TimeMode::Day => self.config.base_day_min_quality,
                TimeMode::Night => self.config.base_night_min_quality,
            };
        }

        match time_mode {
            TimeMode::Day => stats
                .last_strict_day_threshold
                .unwrap_or(self.config.base_day_min_quality * self.config.strict_fallback_mult),
            TimeMode::Night => stats
                .last_strict_night_threshold
                .unwrap_or(self.config.base_night_min_quality * self.config.strict_fallback_mult),
        }
    }
}
