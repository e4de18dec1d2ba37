//! Position sizing implementations
//!
//! Risk-based sizing targets a fixed equity loss at the stop; margin-fraction
//! sizing commits a fixed share of equity at the configured leverage.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::{ExitsConfig, RiskConfig};

/// Trait for position sizing implementations
pub trait PositionSizer: Send + Sync {
    /// Notional USD to deploy for an entry, given account equity and the
    /// effective stop distance
    fn notional_usd(&self, equity: Decimal, stop_pct: Decimal) -> Decimal;

    /// Get the sizing mode name
    fn mode_name(&self) -> &'static str;
}

/// Sizes so a stop-out loses `risk_per_trade_pct` of equity, capped at
/// `max_leverage` times equity
#[derive(Debug, Clone)]
pub struct RiskBasedSizer {
    /// Fraction of equity lost when the stop hits (e.g. 0.01 = 1%)
    pub risk_per_trade_pct: Decimal,
    pub max_leverage: Decimal,
}

impl RiskBasedSizer {
    pub fn new(risk_per_trade_pct: Decimal, max_leverage: Decimal) -> Self {
        Self {
            risk_per_trade_pct,
            max_leverage,
        }
    }
}

impl PositionSizer for RiskBasedSizer {
    fn notional_usd(&self, equity: Decimal, stop_pct: Decimal) -> Decimal {
        let risk_usd = equity * self.risk_per_trade_pct;
        // Floor the stop at 1e-6 so a degenerate signal cannot divide by zero
        let notional = risk_usd / stop_pct.max(Decimal::new(1, 6));
        notional.min(equity * self.max_leverage)
    }

    fn mode_name(&self) -> &'static str {
        "risk"
    }
}

/// Commits a fixed fraction of equity as margin at the configured leverage,
/// independent of the stop distance
#[derive(Debug, Clone)]
pub struct MarginFractionSizer {
    /// Fraction of equity committed as margin (e.g. 0.5 = 50%)
    pub margin_use_pct: Decimal,
    pub leverage: Decimal,
}

impl MarginFractionSizer {
    pub fn new(margin_use_pct: Decimal, leverage: Decimal) -> Self {
        Self {
            margin_use_pct,
            leverage,
        }
    }
}

impl PositionSizer for MarginFractionSizer {
    fn notional_usd(&self, equity: Decimal, _stop_pct: Decimal) -> Decimal {
        equity * self.margin_use_pct * self.leverage
    }

    fn mode_name(&self) -> &'static str {
        "margin_fraction"
    }
}

/// Create a position sizer based on configuration
///
/// Margin-fraction sizing is selected when `margin_use_pct` is a usable
/// fraction in (0, 1] and leverage is positive; risk-based otherwise.
pub fn create_sizer(risk: &RiskConfig) -> Box<dyn PositionSizer> {
    match risk.margin_use_pct {
        Some(frac)
            if frac > Decimal::ZERO && frac <= Decimal::ONE && risk.max_leverage > Decimal::ZERO =>
        {
            Box::new(MarginFractionSizer::new(frac, risk.max_leverage))
        }
        _ => Box::new(RiskBasedSizer::new(
            risk.risk_per_trade_pct,
            risk.max_leverage,
        )),
    }
}

/// Clamp a signal's stop distance to the configured caps: the absolute
/// `stop_loss_pct` and the margin-loss cap `max_margin_loss_pct / leverage`
pub fn capped_stop_pct(signal_stop: Decimal, exits: &ExitsConfig, risk: &RiskConfig) -> Decimal {
    let mut stop = signal_stop;
    if let Some(cap) = exits.stop_loss_pct.filter(|c| *c > Decimal::ZERO) {
        stop = stop.min(cap);
    }
    if let Some(margin_cap) = exits.max_margin_loss_pct.filter(|c| *c > Decimal::ZERO) {
        if risk.max_leverage > Decimal::ZERO {
            stop = stop.min(margin_cap / risk.max_leverage);
        }
    }
    stop
}

pub fn round_size(value: Decimal, sz_decimals: u32) -> Decimal {
    value.round_dp_with_strategy(sz_decimals, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_price(value: Decimal, px_decimals: u32) -> Decimal {
    value.round_dp_with_strategy(px_decimals, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_risk_sizer_basic() {
        // 1% of 10k is 100 at risk; a 2% stop gives 5000 notional
        let sizer = RiskBasedSizer::new(dec!(0.01), dec!(10));
        assert_eq!(sizer.notional_usd(dec!(10000), dec!(0.02)), dec!(5000));
    }

    #[test]
    fn test_risk_sizer_halving_stop_doubles_notional() {
        let sizer = RiskBasedSizer::new(dec!(0.01), dec!(10));
        let wide = sizer.notional_usd(dec!(10000), dec!(0.02));
        let tight = sizer.notional_usd(dec!(10000), dec!(0.01));
        assert_eq!(tight, wide * dec!(2));
    }

    #[test]
    fn test_risk_sizer_leverage_cap() {
        let sizer = RiskBasedSizer::new(dec!(0.01), dec!(10));
        // A 0.01% stop would ask for 1M notional; leverage caps it at 100k
        assert_eq!(sizer.notional_usd(dec!(10000), dec!(0.0001)), dec!(100000));
    }

    #[test]
    fn test_risk_sizer_zero_stop_does_not_divide_by_zero() {
        let sizer = RiskBasedSizer::new(dec!(0.01), dec!(10));
        assert_eq!(sizer.notional_usd(dec!(10000), Decimal::ZERO), dec!(100000));
    }

    #[test]
    fn test_margin_sizer_exact() {
        // Half the equity at 10x: 10000 * 0.5 * 10 = 50000
        let sizer = MarginFractionSizer::new(dec!(0.5), dec!(10));
        assert_eq!(sizer.notional_usd(dec!(10000), dec!(0.02)), dec!(50000));
    }

    #[test]
    fn test_margin_sizer_ignores_stop() {
        let sizer = MarginFractionSizer::new(dec!(0.25), dec!(4));
        assert_eq!(
            sizer.notional_usd(dec!(10000), dec!(0.01)),
            sizer.notional_usd(dec!(10000), dec!(0.05))
        );
    }

    #[test]
    fn test_create_sizer_default_is_risk() {
        let sizer = create_sizer(&RiskConfig::default());
        assert_eq!(sizer.mode_name(), "risk");
    }

    #[test]
    fn test_create_sizer_margin_fraction() {
        let mut risk = RiskConfig::default();
        risk.margin_use_pct = Some(dec!(0.5));
        let sizer = create_sizer(&risk);
        assert_eq!(sizer.mode_name(), "margin_fraction");
    }

    #[test]
    fn test_create_sizer_rejects_unusable_margin_fraction() {
        let mut risk = RiskConfig::default();
        risk.margin_use_pct = Some(dec!(1.5));
        assert_eq!(create_sizer(&risk).mode_name(), "risk");

        risk.margin_use_pct = Some(Decimal::ZERO);
        assert_eq!(create_sizer(&risk).mode_name(), "risk");
    }

    #[test]
    fn test_capped_stop_pct() {
        let risk = RiskConfig::default();
        let mut exits = ExitsConfig::default();
        assert_eq!(capped_stop_pct(dec!(0.05), &exits, &risk), dec!(0.05));

        exits.stop_loss_pct = Some(dec!(0.02));
        assert_eq!(capped_stop_pct(dec!(0.05), &exits, &risk), dec!(0.02));

        // 30% margin loss at 10x leverage is a 3% price move
        exits.stop_loss_pct = None;
        exits.max_margin_loss_pct = Some(dec!(0.3));
        assert_eq!(capped_stop_pct(dec!(0.05), &exits, &risk), dec!(0.03));

        exits.stop_loss_pct = Some(dec!(0.02));
        assert_eq!(capped_stop_pct(dec!(0.05), &exits, &risk), dec!(0.02));
    }

    #[test]
    fn test_round_size_half_away_from_zero() {
        assert_eq!(round_size(dec!(0.123456), 5), dec!(0.12346));
        assert_eq!(round_size(dec!(0.000015), 5), dec!(0.00002));
    }

    #[test]
    fn test_round_price_whole_dollars_for_btc() {
        assert_eq!(round_price(dec!(43250.5), 0), dec!(43251));
        assert_eq!(round_price(dec!(1876.544), 2), dec!(1876.54));
    }
}
