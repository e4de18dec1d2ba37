//! Entry evaluation and execution
//!
//! Flat-path half of the loop: cooldown gates, signal evaluation, sizing,
//! the market entry itself, and the protection handshake that either
//! confirms the native stop/TP set or closes the position again.

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::events::{CloseReason, TradeEvent};
use crate::gateway::PositionSnapshot;
use crate::market::CandleInterval;
use crate::risk::{capped_stop_pct, round_price, round_size};
use crate::state::PositionPlan;
use crate::telemetry::{inc_counter, CounterMetric};

use super::Engine;

/// Pause before the single protection retry after entry
const PROTECTION_RETRY_DELAY_MS: u64 = 1_500;

impl Engine {
    /// Evaluate the detector and open a position when everything lines up.
    pub(crate) async fn try_enter(
        &mut self,
        mid: Decimal,
        equity: Decimal,
        now_ms: i64,
    ) -> anyhow::Result<()> {
        let loss_cooldown_ms = self.config.risk.loss_cooldown_mins as i64 * 60_000;
        if loss_cooldown_ms > 0 {
            if let Some(last_loss) = self.state.last_loss_ms {
                if now_ms - last_loss < loss_cooldown_ms {
                    debug!("Inside loss cooldown; not entering");
                    return Ok(());
                }
            }
        }
        let reentry_ms = self.config.risk.reentry_cooldown_secs as i64 * 1_000;
        if reentry_ms > 0 {
            if let Some(last_exit) = self.state.last_exit_ms {
                if now_ms - last_exit < reentry_ms {
                    debug!("Inside re-entry cooldown; not entering");
                    return Ok(());
                }
            }
        }

        let m15 = self
            .gateway
            .candles(CandleInterval::M15, chrono::Duration::days(3))
            .await?;
        let h1 = self
            .gateway
            .candles(CandleInterval::H1, chrono::Duration::days(14))
            .await?;
        let Some(mut signal) = self.signal_source.evaluate(&m15, &h1, mid) else {
            return Ok(());
        };
        inc_counter(CounterMetric::Signals);
        self.state.last_signal_ms = Some(now_ms);

        signal.stop_pct = capped_stop_pct(signal.stop_pct, &self.config.exits, &self.config.risk);
        if signal.stop_pct <= Decimal::ZERO {
            warn!("Signal stop distance capped to zero; not entering");
            return Ok(());
        }
        if equity <= Decimal::ZERO {
            warn!("No equity; not entering");
            return Ok(());
        }

        let notional = self.sizer.notional_usd(equity, signal.stop_pct);
        let size = round_size(notional / mid, self.config.market.sz_decimals);
        if size <= Decimal::ZERO {
            warn!(%notional, %mid, "Sized to zero; not entering");
            return Ok(());
        }

        info!(
            side = %signal.side,
            %notional,
            stop_pct = %signal.stop_pct,
            mode = self.sizer.mode_name(),
            reason = %signal.reason,
            "Entering"
        );

        let report = self.gateway.place_market(signal.side, size).await?;
        inc_counter(CounterMetric::Entries);
        let entry_price = report.avg_price.unwrap_or(mid);
        let filled = report.filled_size.unwrap_or(size);
        let notional_usd = entry_price * filled;
        let margin_usd = if self.config.risk.max_leverage > Decimal::ZERO {
            notional_usd / self.config.risk.max_leverage
        } else {
            notional_usd
        };

        let plan = PositionPlan::new(
            signal.side,
            entry_price,
            filled,
            notional_usd,
            margin_usd,
            signal.stop_pct,
            self.ladder_from_config(),
        );

        let event = TradeEvent::open(
            signal.side,
            entry_price,
            filled,
            notional_usd,
            margin_usd,
            signal.stop_pct,
            signal.reason.clone(),
        );
        if let Err(e) = self.trade_log.append(&event) {
            warn!(error = %e, "Trade log append failed");
        }
        self.notify_open(&plan);

        self.state.plan = Some(plan);
        self.state.protection_key = None;
        self.state.last_trail_ms = None;
        self.persist();

        let pos = PositionSnapshot {
            side: signal.side,
            size: filled,
            entry_price,
        };
        if !self.protect_or_retry(&pos).await {
            error!("Protection unconfirmed after entry; closing to avoid naked exposure");
            self.flatten_position(
                signal.side,
                filled,
                CloseReason::ProtectionUnconfirmed,
                mid,
                now_ms,
            )
            .await;
        }

        self.state.last_action_ms = Utc::now().timestamp_millis();
        self.persist();
        Ok(())
    }

    /// One protection pass plus a single delayed retry.
    async fn protect_or_retry(&mut self, pos: &PositionSnapshot) -> bool {
        match self.ensure_protection(pos).await {
            Ok(true) => return true,
            Ok(false) => debug!("Protection incomplete; retrying once"),
            Err(e) => warn!(error = %e, "Protection pass failed; retrying once"),
        }
        sleep(Duration::from_millis(PROTECTION_RETRY_DELAY_MS)).await;
        match self.ensure_protection(pos).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "Protection retry failed");
                false
            }
        }
    }

    fn notify_open(&self, plan: &PositionPlan) {
        let px_decimals = self.config.market.px_decimals();
        let mut parts = vec![
            "SIGNALBOT OPEN".to_string(),
            format!(
                "{} {}",
                plan.side.as_str().to_uppercase(),
                self.config.market.coin
            ),
            format!("{} @ {}", plan.initial_size, plan.entry_price),
            format!("SL {}", round_price(plan.stop_price, px_decimals)),
        ];
        for (idx, rung) in plan.ladder.iter().enumerate() {
            let target = rung.target_price(plan.side, plan.entry_price, plan.stop_pct);
            let frac_pct = (rung.close_frac * Decimal::new(100, 0)).normalize();
            parts.push(format!(
                "TP{} {} ({}%)",
                idx + 1,
                round_price(target, px_decimals),
                frac_pct
            ));
        }
        self.notify(parts.join(" | "));
    }
}
