//! Pure TA building blocks: EMA, Wilder-smoothed ADX, simple slope.
//!
//! Values before an indicator's warmup period are `None`, never `0.0` — callers must
//! not treat an undefined entry as a real reading.

/// Exponential moving average. `ema[i]` is `None` for `i < period - 1`.
/// `ema[period - 1]` is the simple mean of the first `period` closes; subsequent
/// entries follow the standard recurrence.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    if period == 0 || n < period {
        return vec![None; n];
    }

    let mut out = vec![None; n];
    let multiplier = 2.0 / (period as f64 + 1.0);

    let sma: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(sma);

    for i in period..n {
        let prev = out[i - 1].expect("previous EMA entry is always defined once warmed up");
        out[i] = Some((values[i] - prev) * multiplier + prev);
    }

    out
}

struct DirectionalMovement {
    tr: Vec<f64>,
    plus_dm: Vec<f64>,
    minus_dm: Vec<f64>,
}

fn directional_movement(highs: &[f64], lows: &[f64], closes: &[f64]) -> DirectionalMovement {
    let n = closes.len();
    let mut tr = vec![0.0; n];
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];

    for i in 1..n {
        let high = highs[i];
        let low = lows[i];
        let prev_close = closes[i - 1];
        let prev_high = highs[i - 1];
        let prev_low = lows[i - 1];

        tr[i] = (high - low).max((high - prev_close).abs()).max((low - prev_close).abs());

        let up_move = high - prev_high;
        let down_move = prev_low - low;

        plus_dm[i] = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        minus_dm[i] = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };
    }

    DirectionalMovement { tr, plus_dm, minus_dm }
}

/// Wilder smoothing: `result[period]` is the sum of `values[1..=period]`, then
/// `result[i] = result[i-1] - result[i-1]/period + values[i]`.
fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![0.0; n];
    if n < period + 1 {
        return result;
    }

    let first_sum: f64 = values[1..=period].iter().sum();
    result[period] = first_sum;

    for i in (period + 1)..n {
        result[i] = result[i - 1] - result[i - 1] / period as f64 + values[i];
    }

    result
}

/// Wilder-smoothed Average Directional Index. `adx[i]` is `None` for `i < 2*period - 1`.
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = closes.len();
    if period == 0 || n < period * 2 {
        return vec![None; n];
    }

    let dm = directional_movement(highs, lows, closes);
    let atr = wilder_smooth(&dm.tr, period);
    let smoothed_plus_dm = wilder_smooth(&dm.plus_dm, period);
    let smoothed_minus_dm = wilder_smooth(&dm.minus_dm, period);

    let mut plus_di = vec![0.0; n];
    let mut minus_di = vec![0.0; n];
    for i in period..n {
        if atr[i] != 0.0 {
            plus_di[i] = 100.0 * smoothed_plus_dm[i] / atr[i];
            minus_di[i] = 100.0 * smoothed_minus_dm[i] / atr[i];
        }
    }

    let mut dx = vec![0.0; n];
    for i in period..n {
        let di_sum = plus_di[i] + minus_di[i];
        if di_sum != 0.0 {
            dx[i] = 100.0 * (plus_di[i] - minus_di[i]).abs() / di_sum;
        }
    }

    let mut out = vec![None; n];
    let start_idx = period * 2 - 1;
    if start_idx < n {
        let first_adx: f64 = dx[period..=start_idx].iter().sum::<f64>() / period as f64;
        out[start_idx] = Some(first_adx);

        for i in (start_idx + 1)..n {
            let prev = out[i - 1].expect("ADX entry is defined once warmed up");
            out[i] = Some((prev * (period as f64 - 1.0) + dx[i]) / period as f64);
        }
    }

    out
}

/// Signed difference between two EMA readings, `None` if either endpoint is undefined.
pub fn slope(series: &[Option<f64>], from_idx: usize, to_idx: usize) -> Option<f64> {
    let from = series.get(from_idx).copied().flatten()?;
    let to = series.get(to_idx).copied().flatten()?;
    Some(to - from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_undefined_before_warmup() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = ema(&values, 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!(out[2].is_some());
    }

    #[test]
    fn ema_first_value_is_sma() {
        let values = vec![2.0, 4.0, 6.0];
        let out = ema(&values, 3);
        assert_eq!(out[2], Some(4.0));
    }

    #[test]
    fn ema_recurrence() {
        let values = vec![2.0, 4.0, 6.0, 8.0];
        let out = ema(&values, 3);
        let prev = out[2].unwrap();
        let mult = 2.0 / 4.0;
        let expected = (8.0 - prev) * mult + prev;
        assert!((out[3].unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn ema_too_short_is_all_undefined() {
        let values = vec![1.0, 2.0];
        let out = ema(&values, 5);
        assert_eq!(out, vec![None, None]);
    }

    #[test]
    fn adx_undefined_before_warmup() {
        let n = 20;
        let closes: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 1.0).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 1.0).collect();
        let out = adx(&highs, &lows, &closes, 14);
        assert_eq!(out[26], None);
        assert!(out[27].is_some());
    }

    #[test]
    fn adx_short_series_all_undefined() {
        let closes = vec![1.0, 2.0, 3.0];
        let out = adx(&closes, &closes, &closes, 14);
        assert_eq!(out, vec![None, None, None]);
    }

    #[test]
    fn slope_none_when_undefined() {
        let series = vec![None, Some(1.0), None];
        assert_eq!(slope(&series, 0, 1), None);
        assert_eq!(slope(&series, 1, 2), None);
    }

    #[test]
    fn slope_signed_difference() {
        let series = vec![Some(1.0), Some(2.0), Some(5.0)];
        assert_eq!(slope(&series, 0, 2), Some(4.0));
        assert_eq!(slope(&series, 2, 0), Some(-4.0));
    }
}
