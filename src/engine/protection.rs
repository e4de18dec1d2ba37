//! Open-position management
//!
//! Mirrors the venue's stop and take-profit orders against the position
//! plan: places them once per position identity, detects rung fills from
//! the remaining size, ratchets the stop after each rung, trails the
//! runner, and backstops everything with in-code stop and ladder checks.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::RunnerExitMode;
use crate::events::{CloseReason, TradeEvent};
use crate::gateway::{OrderId, PositionSnapshot, TriggerKind};
use crate::market::CandleInterval;
use crate::risk::{round_price, round_size};
use crate::signal::Side;
use crate::state::{LadderRung, PositionPlan, RungTrigger};
use crate::telemetry::{inc_counter, CounterMetric};

use super::{direction_pnl, Engine};

/// When the post-placement verification read fails, trust the placements
/// that succeeded instead of cancelling and replacing on the next tick.
const ASSUME_SUCCESS_ON_VERIFY_FAILURE: bool = true;

impl Engine {
    /// Converge an open position toward its exit plan. Runs once per tick.
    pub(crate) async fn manage_position(
        &mut self,
        pos: &PositionSnapshot,
        mid: Decimal,
        now_ms: i64,
    ) -> anyhow::Result<()> {
        if !self.sync_plan_with_venue(pos).await {
            // No usable stop distance; leave the position to the operator.
            self.state.last_action_ms = now_ms;
            self.persist();
            return Ok(());
        }
        let Some(mut plan) = self.state.plan.clone() else {
            return Ok(());
        };

        let protection_ok = match self.ensure_protection(pos).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "Protection pass failed");
                false
            }
        };

        let mut remaining = pos.size;

        // Venue-side rung fills show up as missing size. Rungs complete in
        // order; a later rung cannot fill while an earlier one rests.
        let mut completed: Vec<usize> = Vec::new();
        if plan.initial_size > Decimal::ZERO {
            let remaining_frac = remaining / plan.initial_size;
            let eps = Decimal::new(1, 3);
            for idx in 0..plan.ladder.len() {
                if plan.ladder[idx].done {
                    continue;
                }
                if remaining_frac <= Decimal::ONE - plan.cumulative_close_frac(idx) + eps {
                    plan.ladder[idx].done = true;
                    info!(rung = idx + 1, remaining = %remaining, "Ladder rung filled on the venue");
                    completed.push(idx);
                } else {
                    break;
                }
            }
        }
        if !completed.is_empty() {
            self.state.plan = Some(plan.clone());
            self.persist();
        }

        // While the native ladder is unconfirmed, close due rungs in-code.
        if !protection_ok {
            let closed = self.close_due_rungs(&mut plan, &mut remaining, mid).await;
            completed.extend(closed);
        }

        self.ratchet_stop_for_rungs(&mut plan, &completed, remaining)
            .await;
        let all_rungs_done = !plan.ladder.is_empty() && plan.ladder.iter().all(|r| r.done);
        if all_rungs_done && remaining > Decimal::ZERO {
            self.trail_runner_stop(&mut plan, remaining, mid, now_ms)
                .await;
        }

        // The venue's stop orders win over the recorded level, so manual
        // edits are honored before the crossing check.
        let effective_stop = self.adopt_native_stop(&mut plan).await;
        if effective_stop > Decimal::ZERO {
            let stop_crossed = match plan.side {
                Side::Long => mid <= effective_stop,
                Side::Short => mid >= effective_stop,
            };
            if stop_crossed {
                warn!(stop = %effective_stop, mid = %mid, "Backstop stop-out");
                self.flatten_position(plan.side, remaining, CloseReason::StopOut, mid, now_ms)
                    .await;
                return Ok(());
            }
        }

        if self.config.exits.runner_exit == Some(RunnerExitMode::Signal)
            && all_rungs_done
            && remaining > Decimal::ZERO
        {
            match self.opposite_signal(plan.side, mid).await {
                Ok(true) => {
                    info!(side = %plan.side, "Opposite signal; closing runner");
                    self.flatten_position(plan.side, remaining, CloseReason::RunnerExit, mid, now_ms)
                        .await;
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => debug!(error = %e, "Runner-exit signal check failed"),
            }
        }

        self.state.last_action_ms = Utc::now().timestamp_millis();
        self.persist();
        Ok(())
    }

    /// Make the plan agree with the venue's position. Returns false when no
    /// usable plan can be built, in which case the tick is a no-op.
    async fn sync_plan_with_venue(&mut self, pos: &PositionSnapshot) -> bool {
        match &self.state.plan {
            Some(plan) if plan.side == pos.side => return true,
            Some(plan) => {
                warn!(
                    planned = %plan.side,
                    venue = %pos.side,
                    "Venue position side differs from plan; re-adopting"
                );
            }
            None => {
                info!(side = %pos.side, size = %pos.size, "Adopting position found on the venue");
            }
        }

        let Some(stop_pct) = self.infer_stop_pct(pos).await else {
            warn!("Cannot derive a stop distance for the adopted position; leaving it untouched");
            return false;
        };

        let notional = pos.entry_price * pos.size;
        let margin = if self.config.risk.max_leverage > Decimal::ZERO {
            notional / self.config.risk.max_leverage
        } else {
            notional
        };
        let plan = PositionPlan::new(
            pos.side,
            pos.entry_price,
            pos.size,
            notional,
            margin,
            stop_pct,
            self.ladder_from_config(),
        );
        info!(stop_pct = %stop_pct, stop = %plan.stop_price, "Adopted plan rebuilt");
        self.state.plan = Some(plan);
        self.state.protection_key = None;
        self.state.last_trail_ms = None;
        self.persist();
        true
    }

    /// Stop distance for a position this bot did not open: invert the resting
    /// take-profit closest to entry through the first rung's R-multiple.
    async fn infer_stop_pct(&self, pos: &PositionSnapshot) -> Option<Decimal> {
        let r1 = self.config.exits.tp.first().and_then(|r| r.r_multiple)?;
        if r1 <= Decimal::ZERO || pos.entry_price <= Decimal::ZERO {
            return None;
        }
        let orders = match self.gateway.open_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                debug!(error = %e, "Open-order read failed during stop inference");
                return None;
            }
        };
        let take_profits = orders
            .iter()
            .filter(|o| o.reduce_only && o.kind == TriggerKind::TakeProfit)
            .map(|o| o.trigger_price);
        let nearest = match pos.side {
            Side::Long => take_profits.min(),
            Side::Short => take_profits.max(),
        }?;
        let inferred = match pos.side {
            Side::Long => (nearest - pos.entry_price) / (r1 * pos.entry_price),
            Side::Short => (pos.entry_price - nearest) / (r1 * pos.entry_price),
        };
        (inferred > Decimal::ZERO).then_some(inferred)
    }

    /// Place the native stop and take-profit ladder once per position
    /// identity. A side with resting reduce-only orders is treated as
    /// manually managed: nothing on it is cancelled or placed.
    pub(crate) async fn ensure_protection(
        &mut self,
        pos: &PositionSnapshot,
    ) -> anyhow::Result<bool> {
        let Some(plan) = self.state.plan.clone() else {
            return Ok(false);
        };
        let key = plan.protection_key();
        if self.state.protection_key.as_deref() == Some(key.as_str()) {
            return Ok(true);
        }

        let px_decimals = self.config.market.px_decimals();
        let sz_decimals = self.config.market.sz_decimals;

        let (has_stop, has_tp) = match self.gateway.open_orders().await {
            Ok(orders) => (
                orders
                    .iter()
                    .any(|o| o.reduce_only && o.kind == TriggerKind::Stop),
                orders
                    .iter()
                    .any(|o| o.reduce_only && o.kind == TriggerKind::TakeProfit),
            ),
            Err(e) => {
                warn!(error = %e, "Existing-order detection failed; assuming none");
                (false, false)
            }
        };

        // Clear only the sides being replaced so manual edits survive.
        self.cancel_reduce_only_orders(!has_stop, !has_tp).await;

        let mut want = 0usize;
        let mut placed = 0usize;

        if !has_stop {
            want += 1;
            let stop_px = round_price(plan.stop_price, px_decimals);
            match self
                .gateway
                .place_trigger(TriggerKind::Stop, stop_px, pos.size)
                .await
            {
                Ok(_) => {
                    placed += 1;
                    debug!(price = %stop_px, size = %pos.size, "Stop placed");
                }
                Err(e) => warn!(error = %e, "Stop placement failed"),
            }
        }

        if !has_tp {
            for (idx, rung) in plan.ladder.iter().enumerate() {
                if rung.done {
                    continue;
                }
                let target = round_price(
                    rung.target_price(plan.side, plan.entry_price, plan.stop_pct),
                    px_decimals,
                );
                let tp_size = pos
                    .size
                    .min(round_size(plan.initial_size * rung.close_frac, sz_decimals));
                if tp_size <= Decimal::ZERO {
                    continue;
                }
                want += 1;
                match self
                    .gateway
                    .place_trigger(TriggerKind::TakeProfit, target, tp_size)
                    .await
                {
                    Ok(_) => {
                        placed += 1;
                        debug!(rung = idx + 1, price = %target, size = %tp_size, "Take-profit placed");
                    }
                    Err(e) => warn!(error = %e, rung = idx + 1, "Take-profit placement failed"),
                }
            }
        }

        if want == 0 {
            // Both sides already rest on the venue; adopt them as-is.
            self.state.protection_key = Some(key);
            self.persist();
            return Ok(true);
        }
        if placed < want {
            return Ok(false);
        }

        // Confirm the venue kept the orders before trusting the skip key.
        match self.gateway.open_orders().await {
            Ok(orders) => {
                let resting = orders.iter().filter(|o| o.reduce_only).count();
                if resting < want {
                    warn!(resting, want, "Protection verification short; will retry");
                    return Ok(false);
                }
            }
            Err(e) if ASSUME_SUCCESS_ON_VERIFY_FAILURE => {
                // The placements themselves succeeded; a flaky read must not
                // trigger an endless cancel-and-replace cycle.
                warn!(error = %e, "Protection verification read failed; keeping placements");
            }
            Err(_) => return Ok(false),
        }

        self.state.protection_key = Some(key);
        self.persist();
        inc_counter(CounterMetric::ProtectionPlacements);
        info!(placed, "Protection resting");
        Ok(true)
    }

    /// TP ladder from config; rungs without a positive trigger and close
    /// fraction are dropped.
    pub(crate) fn ladder_from_config(&self) -> Vec<LadderRung> {
        self.config
            .exits
            .tp
            .iter()
            .filter_map(LadderRung::from_config)
            .filter(valid_rung)
            .collect()
    }

    /// In-code ladder backstop: close rungs the price has crossed while the
    /// native take-profits are not confirmed resting.
    async fn close_due_rungs(
        &mut self,
        plan: &mut PositionPlan,
        remaining: &mut Decimal,
        mid: Decimal,
    ) -> Vec<usize> {
        let sz_decimals = self.config.market.sz_decimals;
        let mut closed = Vec::new();
        for idx in 0..plan.ladder.len() {
            if plan.ladder[idx].done {
                continue;
            }
            if *remaining <= Decimal::ZERO {
                break;
            }
            let rung = plan.ladder[idx];
            let target = rung.target_price(plan.side, plan.entry_price, plan.stop_pct);
            let hit = match plan.side {
                Side::Long => mid >= target,
                Side::Short => mid <= target,
            };
            if !hit {
                continue;
            }
            let close_size =
                (*remaining).min(round_size(plan.initial_size * rung.close_frac, sz_decimals));
            if close_size <= Decimal::ZERO {
                plan.ladder[idx].done = true;
                closed.push(idx);
                continue;
            }
            match self.gateway.market_close(Some(close_size)).await {
                Ok(report) => {
                    let exit_price = report.avg_price.unwrap_or(mid);
                    let exit_size = report.filled_size.unwrap_or(close_size);
                    let pnl = direction_pnl(plan.side, plan.entry_price, exit_price, exit_size);
                    let event = TradeEvent::partial_take_profit(
                        plan.side, exit_price, exit_size, Some(pnl), idx,
                    );
                    if let Err(e) = self.trade_log.append(&event) {
                        warn!(error = %e, "Trade log append failed");
                    }
                    info!(
                        rung = idx + 1,
                        size = %exit_size,
                        price = %exit_price,
                        pnl = %pnl,
                        "Ladder rung closed in-code"
                    );
                    *remaining -= exit_size;
                    plan.ladder[idx].done = true;
                    closed.push(idx);
                    self.state.plan = Some(plan.clone());
                    self.persist();
                }
                Err(e) => warn!(error = %e, rung = idx + 1, "In-code rung close failed"),
            }
        }
        closed
    }

    /// Stop moves earned by completed rungs: breakeven after the first,
    /// the first rung's price after the second. Moves only ever tighten.
    async fn ratchet_stop_for_rungs(
        &mut self,
        plan: &mut PositionPlan,
        completed: &[usize],
        remaining: Decimal,
    ) {
        if remaining <= Decimal::ZERO {
            return;
        }
        let px_decimals = self.config.market.px_decimals();
        for &idx in completed {
            let candidate = match idx {
                0 if self.config.exits.trail_to_breakeven_on_tp1 => Some(plan.entry_price),
                1 if self.config.exits.trail_stop_to_tp1_on_tp2 => plan.first_rung_price(),
                _ => None,
            };
            let Some(candidate) = candidate else {
                continue;
            };
            let candidate = round_price(candidate, px_decimals);
            if !stop_improves(plan.side, candidate, plan.stop_price) {
                continue;
            }
            match self.replace_stop(candidate, remaining).await {
                Ok(()) => {
                    info!(
                        from = %plan.stop_price,
                        to = %candidate,
                        rung = idx + 1,
                        "Stop ratcheted"
                    );
                    plan.stop_price = candidate;
                    self.state.plan = Some(plan.clone());
                    self.persist();
                }
                Err(e) => warn!(error = %e, rung = idx + 1, "Stop replace failed"),
            }
        }
    }

    /// Trail the runner's stop behind the mid, throttled and tightening-only.
    async fn trail_runner_stop(
        &mut self,
        plan: &mut PositionPlan,
        remaining: Decimal,
        mid: Decimal,
        now_ms: i64,
    ) {
        let trailing = &self.config.exits.trailing_after_tp2;
        if !trailing.enabled {
            return;
        }
        let trail_pct = trailing.trail_pct;
        let throttle_ms = trailing.min_update_secs as i64 * 1_000;
        let due = self
            .state
            .last_trail_ms
            .map(|t| now_ms - t >= throttle_ms)
            .unwrap_or(true);
        if !due {
            return;
        }
        let candidate = match plan.side {
            Side::Long => mid * (Decimal::ONE - trail_pct),
            Side::Short => mid * (Decimal::ONE + trail_pct),
        };
        let candidate = round_price(candidate, self.config.market.px_decimals());
        if !stop_improves(plan.side, candidate, plan.stop_price) {
            return;
        }
        match self.replace_stop(candidate, remaining).await {
            Ok(()) => {
                info!(from = %plan.stop_price, to = %candidate, mid = %mid, "Trailing stop moved");
                plan.stop_price = candidate;
                self.state.last_trail_ms = Some(now_ms);
                self.state.plan = Some(plan.clone());
                self.persist();
            }
            Err(e) => warn!(error = %e, "Trailing stop replace failed"),
        }
    }

    /// Cancel resting stops and place a fresh one for the remaining size.
    async fn replace_stop(&self, stop_price: Decimal, size: Decimal) -> anyhow::Result<()> {
        let orders = self.gateway.open_orders().await?;
        let stops: Vec<OrderId> = orders
            .iter()
            .filter(|o| o.reduce_only && o.kind == TriggerKind::Stop)
            .map(|o| o.id)
            .collect();
        if !stops.is_empty() {
            self.gateway.cancel_orders(&stops).await?;
        }
        self.gateway
            .place_trigger(TriggerKind::Stop, stop_price, size)
            .await?;
        Ok(())
    }

    /// The best resting stop order defines the effective stop level: highest
    /// trigger for longs, lowest for shorts. Adopting it keeps manual UI
    /// edits out of the hidden-stop backstop.
    async fn adopt_native_stop(&mut self, plan: &mut PositionPlan) -> Decimal {
        let mut effective = plan.stop_price;
        match self.gateway.open_orders().await {
            Ok(orders) => {
                let stops = orders
                    .iter()
                    .filter(|o| o.reduce_only && o.kind == TriggerKind::Stop)
                    .map(|o| o.trigger_price);
                let native = match plan.side {
                    Side::Long => stops.max(),
                    Side::Short => stops.min(),
                };
                if let Some(px) = native {
                    if px > Decimal::ZERO {
                        effective = px;
                        if plan.stop_price != px {
                            debug!(from = %plan.stop_price, to = %px, "Adopting venue stop level");
                            plan.stop_price = px;
                            self.state.plan = Some(plan.clone());
                            self.persist();
                        }
                    }
                }
            }
            Err(e) => debug!(error = %e, "Open-order read failed during stop adoption"),
        }
        effective
    }

    async fn opposite_signal(&self, side: Side, mid: Decimal) -> anyhow::Result<bool> {
        let m15 = self
            .gateway
            .candles(CandleInterval::M15, chrono::Duration::days(3))
            .await?;
        let h1 = self
            .gateway
            .candles(CandleInterval::H1, chrono::Duration::days(14))
            .await?;
        Ok(self
            .signal_source
            .evaluate(&m15, &h1, mid)
            .map(|sig| sig.side == side.opposite())
            .unwrap_or(false))
    }
}

/// A stop move must tighten toward price; loosening is never applied.
fn stop_improves(side: Side, candidate: Decimal, current: Decimal) -> bool {
    match side {
        Side::Long => candidate > current,
        Side::Short => current.is_zero() || candidate < current,
    }
}

fn valid_rung(rung: &LadderRung) -> bool {
    let trigger_positive = match rung.trigger {
        RungTrigger::RMultiple(v) | RungTrigger::PctFromEntry(v) => v > Decimal::ZERO,
    };
    trigger_positive && rung.close_frac > Decimal::ZERO
}
