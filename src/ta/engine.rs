//! Signal detection and quality scoring, fixed-constant formula (§4.2).

use crate::domain::enums::Direction;
use crate::domain::models::QualityBreakdown;
use crate::exchange::Candle;

use super::primitives::{adx, ema, slope};

const ANCHOR_SCALE: f64 = 10000.0;
const W_ANCHOR: f64 = 1.0;
const W_ADX: f64 = 0.2;
const W_SLOPE: f64 = 0.2;
const TREND_BONUS: f64 = 1.10;
const TREND_PENALTY: f64 = 0.70;
const TREND_NEUTRAL: f64 = 1.00;
const ADX_PERIOD: usize = 14;
const EMA50_SLOPE_BARS: usize = 6;
const EDGE_PENALTY_MULT: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedSignal {
    pub direction: Direction,
    pub signal_ts: i64,
    pub signal_price: f64,
    pub anchor_bar_ts: i64,
    pub anchor_price: f64,
}

/// Scan 1-minute candles from the first bar at or after `start_ts` for a touch +
/// 2-bar confirm against EMA20. Returns the first match, or `None`.
pub fn detect_signal(candles_1m: &[Candle], start_ts: i64) -> Option<DetectedSignal> {
    if candles_1m.len() < 22 {
        return None;
    }

    let closes: Vec<f64> = candles_1m.iter().map(|c| c.close()).collect();
    let ema20 = ema(&closes, 20);

    let anchor_idx = candles_1m.iter().position(|c| c.t >= start_ts)?;
    if anchor_idx >= candles_1m.len() - 1 {
        return None;
    }
    let anchor_bar = &candles_1m[anchor_idx];
    let anchor_price = anchor_bar.close();

    for i in anchor_idx..(candles_1m.len() - 1) {
        let (ema_i, ema_i1) = match (ema20[i], ema20[i + 1]) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };

        let c_i = &candles_1m[i];
        let c_i1 = &candles_1m[i + 1];

        if c_i.low() <= ema_i && c_i.close() > ema_i && c_i1.close() > ema_i1 {
            return Some(DetectedSignal {
                direction: Direction::Up,
                signal_ts: c_i1.t,
                signal_price: c_i1.close(),
                anchor_bar_ts: anchor_bar.t,
                anchor_price,
            });
        }

        if c_i.high() >= ema_i && c_i.close() < ema_i && c_i1.close() < ema_i1 {
            return Some(DetectedSignal {
                direction: Direction::Down,
                signal_ts: c_i1.t,
                signal_price: c_i1.close(),
                anchor_bar_ts: anchor_bar.t,
                anchor_price,
            });
        }
    }

    None
}

/// Fixed-weight quality score on 5m candles:
/// `quality = (W_ANCHOR*edge + W_ADX*q_adx + W_SLOPE*q_slope) * trend_mult`.
pub fn calculate_quality(signal: &DetectedSignal, candles_5m: &[Candle]) -> QualityBreakdown {
    let mut b = QualityBreakdown { anchor_price: signal.anchor_price, signal_price: signal.signal_price, ..Default::default() };

    let ret_from_anchor = (signal.signal_price - signal.anchor_price) / signal.anchor_price;
    b.ret_from_anchor = ret_from_anchor;

    let mut edge_component = ret_from_anchor.abs() * ANCHOR_SCALE;
    let inconsistent = (signal.direction == Direction::Up && ret_from_anchor < 0.0)
        || (signal.direction == Direction::Down && ret_from_anchor > 0.0);
    if inconsistent {
        edge_component *= EDGE_PENALTY_MULT;
        b.edge_penalty_applied = true;
    }
    b.edge_component = edge_component;

    if candles_5m.is_empty() {
        b.final_quality = edge_component * W_ANCHOR;
        return b;
    }

    let idx5 = candles_5m
        .iter()
        .rposition(|c| c.t <= signal.signal_ts)
        .unwrap_or(candles_5m.len() - 1);

    let highs: Vec<f64> = candles_5m.iter().map(|c| c.high()).collect();
    let lows: Vec<f64> = candles_5m.iter().map(|c| c.low()).collect();
    let closes: Vec<f64> = candles_5m.iter().map(|c| c.close()).collect();

    let adx_values = adx(&highs, &lows, &closes, ADX_PERIOD);
    let adx_value = adx_values.get(idx5).copied().flatten().unwrap_or(0.0);
    b.adx_value = adx_value;
    b.q_adx = adx_value;

    let ema50 = ema(&closes, 50);
    if idx5 >= EMA50_SLOPE_BARS {
        if let Some(slope50) = slope(&ema50, idx5 - EMA50_SLOPE_BARS, idx5) {
            b.ema50_slope = slope50;
            let close_idx5 = closes[idx5];
            if close_idx5 != 0.0 {
                b.q_slope = 1000.0 * (slope50 / close_idx5).abs();
            }
        }
    }

    let ema20_5m = ema(&closes, 20);
    let mut trend_mult = TREND_NEUTRAL;
    if let Some(ema20_val) = ema20_5m.get(idx5).copied().flatten() {
        let close_val = closes[idx5];
        let confirms = match signal.direction {
            Direction::Up => close_val > ema20_val,
            Direction::Down => close_val < ema20_val,
        };
        b.trend_confirms = confirms;
        trend_mult = if confirms { TREND_BONUS } else { TREND_PENALTY };
    }
    b.trend_mult = trend_mult;

    b.w_anchor = W_ANCHOR * edge_component;
    b.w_adx = W_ADX * b.q_adx;
    b.w_slope = W_SLOPE * b.q_slope;

    let base_quality = W_ANCHOR * edge_component + W_ADX * b.q_adx + W_SLOPE * b.q_slope;
    b.final_quality = base_quality * trend_mult;

    b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(t: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle { t, o, h, l, c, v: 1.0, close_time: t + 59 }
    }

    #[test]
    fn no_signal_with_too_few_candles() {
        let candles: Vec<Candle> = (0..10).map(|i| candle(i * 60, 100.0, 101.0, 99.0, 100.0)).collect();
        assert!(detect_signal(&candles, 0).is_none());
    }

    #[test]
    fn up_signal_fires_on_touch_and_confirm() {
        // Flat run to warm EMA20, then a dip that touches EMA from below and closes above,
        // confirmed by the next bar closing above too.
        let mut candles: Vec<Candle> = (0..20).map(|i| candle(i * 60, 100.0, 100.5, 99.5, 100.0)).collect();
        candles.push(candle(20 * 60, 100.0, 100.2, 99.0, 100.1)); // touch low, close above ema
        candles.push(candle(21 * 60, 100.1, 100.3, 100.0, 100.2)); // confirm
        let result = detect_signal(&candles, 0).expect("expected an UP signal");
        assert_eq!(result.direction, Direction::Up);
        assert_eq!(result.signal_ts, 21 * 60);
    }

    #[test]
    fn anchor_bar_is_first_candle_at_or_after_start_ts() {
        let mut candles: Vec<Candle> = (0..20).map(|i| candle(i * 60, 100.0, 100.5, 99.5, 100.0)).collect();
        candles.push(candle(20 * 60, 100.0, 100.2, 99.0, 100.1));
        candles.push(candle(21 * 60, 100.1, 100.3, 100.0, 100.2));
        let result = detect_signal(&candles, 19 * 60).unwrap();
        assert_eq!(result.anchor_bar_ts, 19 * 60);
    }

    #[test]
    fn quality_applies_edge_penalty_on_direction_mismatch() {
        let signal = DetectedSignal {
            direction: Direction::Up,
            signal_ts: 100,
            signal_price: 99.0,
            anchor_bar_ts: 0,
            anchor_price: 100.0,
        };
        let breakdown = calculate_quality(&signal, &[]);
        assert!(breakdown.edge_penalty_applied);
        let expected_edge = ((99.0 - 100.0) / 100.0_f64).abs() * ANCHOR_SCALE * EDGE_PENALTY_MULT;
        assert!((breakdown.edge_component - expected_edge).abs() < 1e-9);
    }

    #[test]
    fn quality_neutral_trend_mult_when_ema_undefined() {
        let signal = DetectedSignal {
            direction: Direction::Up,
            signal_ts: 60,
            signal_price: 101.0,
            anchor_bar_ts: 0,
            anchor_price: 100.0,
        };
        let candles_5m = vec![candle(0, 100.0, 101.0, 99.0, 100.0), candle(300, 100.0, 101.0, 99.0, 101.0)];
        let breakdown = calculate_quality(&signal, &candles_5m);
        assert_eq!(breakdown.trend_mult, TREND_NEUTRAL);
    }
}
