//! Run command implementation

use std::sync::Arc;

use clap::Args;
use tracing::info;

use crate::config::{Config, DataSource, ExecutionMode};
use crate::engine::Engine;
use crate::gateway::PaperGateway;
use crate::market::{HyperliquidConfig, HyperliquidInfo, MarketData, SyntheticFeed};
use crate::notify::TelegramNotifier;
use crate::risk::create_sizer;
use crate::signal::ReclaimDetector;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Use live Hyperliquid market data instead of the synthetic feed
    #[arg(long)]
    pub live_data: bool,

    /// Seed for the synthetic feed; same seed replays the same market
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl RunArgs {
    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        if self.live_data {
            config.execution.data_source = DataSource::Hyperliquid;
        }
        if config.execution.mode == ExecutionMode::Live {
            anyhow::bail!(
                "live order execution is not wired to a venue; set [execution] mode = \"paper\""
            );
        }

        let feed: Arc<dyn MarketData> = match config.execution.data_source {
            DataSource::Hyperliquid => {
                info!("Market data: Hyperliquid info API");
                Arc::new(HyperliquidInfo::new(HyperliquidConfig::default()))
            }
            DataSource::Synthetic => {
                info!(seed = self.seed, "Market data: synthetic random walk");
                Arc::new(SyntheticFeed::new(self.seed))
            }
        };
        let gateway = Arc::new(PaperGateway::new(
            feed,
            config.market.coin.clone(),
            &config.execution,
        ));
        let signal_source = Box::new(ReclaimDetector::from_config(&config));
        let sizer = create_sizer(&config.risk);
        let notifier = Arc::new(TelegramNotifier::from_config(&config.telegram));

        let mut engine = Engine::new(config, gateway, signal_source, sizer, notifier)?;
        tokio::select! {
            res = engine.run() => res,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                Ok(())
            }
        }
    }
}
