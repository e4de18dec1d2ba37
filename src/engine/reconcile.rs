//! Flat-but-plan-says-open reconciliation
//!
//! When the venue reports no position while a plan is still recorded, the
//! position was closed out of band: a native trigger fired between polls,
//! the operator flattened it in the UI, or the close command ran. The
//! recorded side is closed out in the journal and local state is reset so
//! the entry path starts from a clean slate.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::events::{CloseReason, TradeEvent};
use crate::gateway::FillKind;
use crate::telemetry::{inc_counter, CounterMetric};

use super::{direction_pnl, Engine};

/// How far back to look for the fill that closed the position.
const EXIT_FILL_LOOKBACK_MS: i64 = 10 * 60 * 1_000;

impl Engine {
    pub(crate) async fn reconcile_external_close(
        &mut self,
        mid: Decimal,
        now_ms: i64,
    ) -> anyhow::Result<()> {
        if self.state.plan.is_none() {
            return Ok(());
        }

        // The close command records the exit on disk; prefer its version of
        // events over synthesizing a second close here.
        match self.store.load() {
            Ok(Some(disk)) if disk.plan.is_none() => {
                debug!("Disk state already flat; adopting it");
                self.state = disk;
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "State re-read failed during reconciliation"),
        }

        let Some(plan) = self.state.plan.clone() else {
            return Ok(());
        };

        let mut exit_price = Decimal::ZERO;
        let mut exit_size = plan.initial_size;
        match self
            .gateway
            .recent_fills(now_ms - EXIT_FILL_LOOKBACK_MS)
            .await
        {
            Ok(fills) => {
                if let Some(fill) = fills.iter().filter(|f| f.kind == FillKind::Close).last() {
                    exit_price = fill.price;
                    exit_size = fill.size;
                }
            }
            Err(e) => debug!(error = %e, "Fill lookup failed during reconciliation"),
        }
        if exit_price <= Decimal::ZERO {
            exit_price = mid;
        }

        let pnl = direction_pnl(plan.side, plan.entry_price, exit_price, exit_size);
        let event = TradeEvent::close(
            plan.side,
            exit_price,
            exit_size,
            Some(pnl),
            CloseReason::ExternalClose,
        );
        if let Err(e) = self.trade_log.append(&event) {
            warn!(error = %e, "Trade log append failed");
        }
        inc_counter(CounterMetric::Closes);
        info!(
            side = %plan.side,
            price = %exit_price,
            size = %exit_size,
            pnl = %pnl,
            "Position closed externally; state reset"
        );

        self.cancel_reduce_only_orders(true, true).await;
        self.state.reset_position();
        self.state.last_exit_ms = Some(now_ms);
        self.persist();
        Ok(())
    }
}
