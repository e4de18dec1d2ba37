//! Manual close command
//!
//! Closes out the recorded position: cancels protective orders and
//! market-closes on the venue when one is reachable, then journals a
//! `manual_close` event and resets the persisted plan. A running engine
//! picks the reset up from disk instead of journaling a second close.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;

use crate::config::{Config, DataSource};
use crate::engine::direction_pnl;
use crate::events::{CloseReason, TradeEvent, TradeLog};
use crate::gateway::{ExchangeGateway, OrderId, PaperGateway};
use crate::market::{HyperliquidConfig, HyperliquidInfo, MarketData, SyntheticFeed};
use crate::state::StateStore;

pub async fn execute(config: Config) -> anyhow::Result<()> {
    let store = StateStore::new(&config.data.dir);
    let trade_log = TradeLog::new(&config.data.dir);
    let Some(mut state) = store.load()? else {
        println!("No persisted state; nothing to close.");
        return Ok(());
    };
    let Some(plan) = state.plan.clone() else {
        println!("No open position plan; nothing to close.");
        return Ok(());
    };

    let feed: Arc<dyn MarketData> = match config.execution.data_source {
        DataSource::Hyperliquid => Arc::new(HyperliquidInfo::new(HyperliquidConfig::default())),
        DataSource::Synthetic => Arc::new(SyntheticFeed::new(0)),
    };
    let gateway = PaperGateway::new(feed, config.market.coin.clone(), &config.execution);

    match gateway.open_orders().await {
        Ok(orders) => {
            let ids: Vec<OrderId> = orders
                .iter()
                .filter(|o| o.reduce_only)
                .map(|o| o.id)
                .collect();
            if !ids.is_empty() {
                if let Err(e) = gateway.cancel_orders(&ids).await {
                    warn!(error = %e, "Order cancel failed");
                }
            }
        }
        Err(e) => warn!(error = %e, "Open-order read failed"),
    }

    let mut exit_price = Decimal::ZERO;
    let mut exit_size = plan.initial_size;
    match gateway.market_close(None).await {
        Ok(report) => {
            exit_price = report.avg_price.unwrap_or(Decimal::ZERO);
            exit_size = report.filled_size.unwrap_or(exit_size);
        }
        Err(e) => {
            warn!(error = %e, "Venue reports no position; recording the close from the plan")
        }
    }
    if exit_price <= Decimal::ZERO {
        exit_price = gateway.mid_price().await?;
    }

    let pnl = direction_pnl(plan.side, plan.entry_price, exit_price, exit_size);
    trade_log.append(&TradeEvent::close(
        plan.side,
        exit_price,
        exit_size,
        Some(pnl),
        CloseReason::ManualClose,
    ))?;

    state.reset_position();
    state.last_exit_ms = Some(Utc::now().timestamp_millis());
    store.save(&state)?;

    println!(
        "Closed {} {} @ {} (pnl {:.2} USD); state reset.",
        plan.side, exit_size, exit_price, pnl
    );
    Ok(())
}
