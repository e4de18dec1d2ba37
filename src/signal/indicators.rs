//! Indicator math over candle close/high/low series
//!
//! All functions return `None` when the series is too short to produce a
//! stable value, so callers can treat "not enough history" and "no signal"
//! uniformly.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Exponential moving average with an SMA seed over the first `period` values.
pub fn ema(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let p = Decimal::from(period as u64);
    let k = dec!(2) / (p + Decimal::ONE);
    let mut e = values[..period]
        .iter()
        .fold(Decimal::ZERO, |acc, v| acc + v)
        / p;
    for v in &values[period..] {
        e = v * k + e * (Decimal::ONE - k);
    }
    Some(e)
}

/// Wilder-smoothed average true range.
///
/// True range needs the previous close, so `period + 1` bars are required.
pub fn wilder_atr(
    highs: &[Decimal],
    lows: &[Decimal],
    closes: &[Decimal],
    period: usize,
) -> Option<Decimal> {
    if period == 0 || highs.len() != lows.len() || highs.len() != closes.len() {
        return None;
    }
    if highs.len() < period + 1 {
        return None;
    }
    let mut trs = Vec::with_capacity(highs.len() - 1);
    for i in 1..highs.len() {
        let prev_close = closes[i - 1];
        let tr = (highs[i] - lows[i])
            .max((highs[i] - prev_close).abs())
            .max((lows[i] - prev_close).abs());
        trs.push(tr);
    }
    if trs.len() < period {
        return None;
    }
    let p = Decimal::from(period as u64);
    let mut atr = trs[..period]
        .iter()
        .fold(Decimal::ZERO, |acc, v| acc + v)
        / p;
    for tr in &trs[period..] {
        atr = (atr * (p - Decimal::ONE) + tr) / p;
    }
    Some(atr)
}

/// Stochastic oscillator applied to a Wilder RSI series, returning %K in
/// `[0, 100]`. A flat RSI window (max == min) reads as neutral 50.
pub fn stoch_rsi(closes: &[Decimal], rsi_period: usize, stoch_period: usize) -> Option<Decimal> {
    if rsi_period == 0 || stoch_period == 0 {
        return None;
    }
    if closes.len() < rsi_period + stoch_period + 1 {
        return None;
    }
    let p = Decimal::from(rsi_period as u64);
    let mut rsi_values = Vec::with_capacity(closes.len() - rsi_period);
    let mut avg_gain = Decimal::ZERO;
    let mut avg_loss = Decimal::ZERO;
    for i in 1..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let gain = if delta > Decimal::ZERO { delta } else { Decimal::ZERO };
        let loss = if delta < Decimal::ZERO { -delta } else { Decimal::ZERO };
        if i <= rsi_period {
            avg_gain += gain;
            avg_loss += loss;
            if i == rsi_period {
                avg_gain /= p;
                avg_loss /= p;
                rsi_values.push(rsi_from_averages(avg_gain, avg_loss));
            }
        } else {
            avg_gain = (avg_gain * (p - Decimal::ONE) + gain) / p;
            avg_loss = (avg_loss * (p - Decimal::ONE) + loss) / p;
            rsi_values.push(rsi_from_averages(avg_gain, avg_loss));
        }
    }
    if rsi_values.len() < stoch_period {
        return None;
    }
    let window = &rsi_values[rsi_values.len() - stoch_period..];
    let min = window.iter().copied().min()?;
    let max = window.iter().copied().max()?;
    if max == min {
        return Some(dec!(50));
    }
    let last = window[window.len() - 1];
    Some((last - min) / (max - min) * dec!(100))
}

fn rsi_from_averages(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    let rs = if avg_loss == Decimal::ZERO {
        dec!(100)
    } else {
        avg_gain / avg_loss
    };
    dec!(100) - dec!(100) / (Decimal::ONE + rs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<Decimal> {
        values
            .iter()
            .map(|v| Decimal::try_from(*v).unwrap())
            .collect()
    }

    #[test]
    fn test_ema_too_short() {
        assert_eq!(ema(&series(&[1.0, 2.0]), 3), None);
        assert_eq!(ema(&[], 1), None);
    }

    #[test]
    fn test_ema_seed_is_sma() {
        // Exactly `period` values: the EMA is the plain average
        let e = ema(&series(&[1.0, 2.0, 3.0]), 3).unwrap();
        assert_eq!(e, dec!(2));
    }

    #[test]
    fn test_ema_smooths_toward_latest() {
        // seed = 2, k = 0.5: e = 4 * 0.5 + 2 * 0.5 = 3
        let e = ema(&series(&[1.0, 2.0, 3.0, 4.0]), 3).unwrap();
        assert_eq!(e, dec!(3));
    }

    #[test]
    fn test_ema_constant_series() {
        let e = ema(&series(&[5.0; 10]), 5).unwrap();
        assert_eq!(e, dec!(5));
    }

    #[test]
    fn test_atr_needs_period_plus_one_bars() {
        let xs = series(&[10.0, 11.0]);
        assert_eq!(wilder_atr(&xs, &xs, &xs, 2), None);
    }

    #[test]
    fn test_atr_mismatched_lengths() {
        let highs = series(&[10.0, 11.0, 12.0]);
        let lows = series(&[9.0, 10.0]);
        let closes = series(&[9.5, 10.5, 11.5]);
        assert_eq!(wilder_atr(&highs, &lows, &closes, 1), None);
    }

    #[test]
    fn test_atr_true_range_uses_prev_close() {
        // Bar 1: range 1.0 but gap from prev close 9.5 widens TR to 2.5
        let highs = series(&[10.0, 12.0]);
        let lows = series(&[9.0, 11.0]);
        let closes = series(&[9.5, 11.5]);
        let atr = wilder_atr(&highs, &lows, &closes, 1).unwrap();
        assert_eq!(atr, dec!(2.5));
    }

    #[test]
    fn test_atr_wilder_smoothing() {
        // TRs = [2.5, 1.5, 1.5]; seed = 2.0; next = (2.0 * 1 + 1.5) / 2 = 1.75
        let highs = series(&[10.0, 12.0, 13.0, 14.0]);
        let lows = series(&[9.0, 11.0, 12.0, 13.0]);
        let closes = series(&[9.5, 11.5, 12.5, 13.5]);
        let atr = wilder_atr(&highs, &lows, &closes, 2).unwrap();
        assert_eq!(atr, dec!(1.75));
    }

    #[test]
    fn test_stoch_rsi_too_short() {
        assert_eq!(stoch_rsi(&series(&[10.0, 11.0]), 1, 2), None);
    }

    #[test]
    fn test_stoch_rsi_last_at_window_high() {
        // RSI(1) per delta: +1 -> ~99, -0.5 -> 0, +1.5 -> ~99.
        // Window of 2 ends on its max, so %K = 100.
        let k = stoch_rsi(&series(&[10.0, 11.0, 10.5, 12.0]), 1, 2).unwrap();
        assert_eq!(k, dec!(100));
    }

    #[test]
    fn test_stoch_rsi_last_at_window_low() {
        let k = stoch_rsi(&series(&[10.0, 9.0, 9.5, 8.0]), 1, 2).unwrap();
        assert_eq!(k, dec!(0));
    }

    #[test]
    fn test_stoch_rsi_flat_window_reads_neutral() {
        // Gains only: every RSI value is identical, so the window is flat
        let k = stoch_rsi(&series(&[10.0, 11.0, 12.0, 13.0]), 1, 2).unwrap();
        assert_eq!(k, dec!(50));
    }

    #[test]
    fn test_stoch_rsi_bounded() {
        let closes = series(&[
            100.0, 101.0, 99.0, 102.0, 98.0, 103.0, 97.0, 104.0, 96.0, 105.0, 95.0, 106.0, 94.0,
            107.0, 93.0, 108.0, 92.0, 109.0, 91.0, 110.0, 90.0, 111.0, 89.0, 112.0, 88.0, 113.0,
            87.0, 114.0, 86.0, 115.0,
        ]);
        let k = stoch_rsi(&closes, 14, 14).unwrap();
        assert!(k >= Decimal::ZERO && k <= dec!(100));
    }
}
