//! EMA-reclaim entry detector
//!
//! Long: price above the 1h EMA50 while the latest 15m close crosses back
//! above the 15m EMA20. Short is the mirror image. The stop distance is
//! ATR-proportional, clamped to a configured maximum.

use rust_decimal::Decimal;

use crate::config::{Config, SignalConfig};
use crate::market::Candles;
use crate::signal::indicators::{ema, stoch_rsi, wilder_atr};
use crate::signal::types::{Side, Signal};

const TREND_EMA_PERIOD: usize = 50;
const RECLAIM_EMA_PERIOD: usize = 20;
const ATR_PERIOD: usize = 14;
const RSI_PERIOD: usize = 14;
const STOCH_PERIOD: usize = 14;

/// Anything that can turn candle history plus a current price into an
/// entry recommendation.
pub trait SignalSource: Send + Sync {
    fn evaluate(&self, m15: &Candles, h1: &Candles, mid: Decimal) -> Option<Signal>;
}

/// The production detector: trend gate, reclaim gate, then the optional
/// distance / StochRSI / confirmation filters.
pub struct ReclaimDetector {
    cfg: SignalConfig,
    atr_min_pct: Option<Decimal>,
}

impl ReclaimDetector {
    pub fn new(cfg: SignalConfig, atr_min_pct: Option<Decimal>) -> Self {
        Self { cfg, atr_min_pct }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.signal.clone(), config.risk.atr_min_pct)
    }
}

impl SignalSource for ReclaimDetector {
    fn evaluate(&self, m15: &Candles, h1: &Candles, mid: Decimal) -> Option<Signal> {
        if mid <= Decimal::ZERO {
            return None;
        }
        let ema_1h = ema(&h1.closes, TREND_EMA_PERIOD)?;
        let ema_15m = ema(&m15.closes, RECLAIM_EMA_PERIOD)?;
        let atr = wilder_atr(&m15.highs, &m15.lows, &m15.closes, ATR_PERIOD)?;

        let atr_pct = atr / mid;
        if let Some(min_pct) = self.atr_min_pct {
            if atr_pct < min_pct {
                return None;
            }
        }

        let n = m15.closes.len();
        if n < 2 {
            return None;
        }
        let last_close = m15.closes[n - 1];
        let prev_close = m15.closes[n - 2];
        let prev2_close = if n >= 3 { Some(m15.closes[n - 3]) } else { None };

        let trend_up = mid > ema_1h;
        let trend_down = mid < ema_1h;
        let reclaimed_up = prev_close <= ema_15m && last_close > ema_15m;
        let reclaimed_down = prev_close >= ema_15m && last_close < ema_15m;

        // Skip entries stretched too far from the trend EMA; those tend to
        // mean-revert before the reclaim follows through.
        if let Some(max_dist) = self.cfg.max_ema_dist_pct {
            if max_dist > Decimal::ZERO && (mid - ema_1h).abs() / ema_1h > max_dist {
                return None;
            }
        }

        if self.cfg.stoch_filter.enabled {
            if let Some(k) = stoch_rsi(&m15.closes, RSI_PERIOD, STOCH_PERIOD) {
                if trend_down && reclaimed_down && k <= self.cfg.stoch_filter.oversold {
                    return None;
                }
                if trend_up && reclaimed_up && k >= self.cfg.stoch_filter.overbought {
                    return None;
                }
            }
        }

        // With confirm_candles >= 2 the bar before the reclaim must still be
        // on the far side of the EMA, so a single wick cannot trigger.
        if self.cfg.confirm_candles >= 2 {
            if let Some(p2) = prev2_close {
                if trend_up && reclaimed_up && p2 > ema_15m {
                    return None;
                }
                if trend_down && reclaimed_down && p2 < ema_15m {
                    return None;
                }
            }
        }

        let stop_pct = (self.cfg.atr_mult * atr_pct).min(self.cfg.max_stop_pct);
        if trend_up && reclaimed_up {
            return Some(Signal {
                side: Side::Long,
                stop_pct,
                reason: format!(
                    "trend up (1h EMA50) + 15m reclaim of EMA20; atr_pct={:.4}",
                    atr_pct
                ),
            });
        }
        if trend_down && reclaimed_down {
            return Some(Signal {
                side: Side::Short,
                stop_pct,
                reason: format!(
                    "trend down (1h EMA50) + 15m reclaim of EMA20; atr_pct={:.4}",
                    atr_pct
                ),
            });
        }
        None
    }
}
