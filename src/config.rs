//! Configuration types for hl-signalbot

use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub exits: ExitsConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub data: DataConfig,
}

/// Instrument configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Coin symbol (e.g. "BTC"); the perp instrument is "{coin}-PERP"
    #[serde(default = "default_coin")]
    pub coin: String,

    /// Size rounding in decimal places
    #[serde(default = "default_sz_decimals")]
    pub sz_decimals: u32,

    /// Price rounding override; unset means 0 dp for BTC, 2 dp otherwise
    #[serde(default)]
    pub px_decimals: Option<u32>,
}

fn default_coin() -> String {
    "BTC".to_string()
}
fn default_sz_decimals() -> u32 {
    5
}

impl MarketConfig {
    /// Perp symbol for the configured coin
    pub fn perp_symbol(&self) -> String {
        format!("{}-PERP", self.coin)
    }

    /// Price decimal places for the configured coin
    pub fn px_decimals(&self) -> u32 {
        match self.px_decimals {
            Some(dp) => dp,
            None if self.coin == "BTC" => 0,
            None => 2,
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            coin: default_coin(),
            sz_decimals: 5,
            px_decimals: None,
        }
    }
}

/// Risk and cooldown configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Leverage used for sizing caps and margin-loss capping
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,

    /// Fraction of equity risked per trade (risk-based sizing)
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: Decimal,

    /// Fraction of equity committed as margin; setting this switches to
    /// margin-fraction sizing
    #[serde(default)]
    pub margin_use_pct: Option<Decimal>,

    /// Daily realized-loss ceiling in USD; breaching it halts the bot
    #[serde(default = "default_max_daily_loss_usd")]
    pub max_daily_loss_usd: Decimal,

    /// Minimum seconds between an exit and the next entry
    #[serde(default = "default_reentry_cooldown_secs")]
    pub reentry_cooldown_secs: u64,

    /// Minimum minutes between a losing close and the next entry
    #[serde(default = "default_loss_cooldown_mins")]
    pub loss_cooldown_mins: u64,

    /// Minimum seconds between working ticks
    #[serde(default = "default_action_cooldown_secs")]
    pub action_cooldown_secs: u64,

    /// Reject signals when ATR as a fraction of price is below this
    #[serde(default)]
    pub atr_min_pct: Option<Decimal>,
}

fn default_max_leverage() -> Decimal {
    Decimal::new(10, 0)
}
fn default_risk_per_trade_pct() -> Decimal {
    Decimal::new(1, 2) // 0.01 = 1%
}
fn default_max_daily_loss_usd() -> Decimal {
    Decimal::new(200, 0)
}
fn default_reentry_cooldown_secs() -> u64 {
    300
}
fn default_loss_cooldown_mins() -> u64 {
    30
}
fn default_action_cooldown_secs() -> u64 {
    10
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_leverage: default_max_leverage(),
            risk_per_trade_pct: default_risk_per_trade_pct(),
            margin_use_pct: None,
            max_daily_loss_usd: default_max_daily_loss_usd(),
            reentry_cooldown_secs: 300,
            loss_cooldown_mins: 30,
            action_cooldown_secs: 10,
            atr_min_pct: None,
        }
    }
}

/// Exit plan configuration: stop capping, TP ladder, trailing behavior
#[derive(Debug, Clone, Deserialize)]
pub struct ExitsConfig {
    /// Absolute cap on the signal's stop distance
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,

    /// Cap on loss as a fraction of margin used; the effective stop cap is
    /// max_margin_loss_pct / max_leverage
    #[serde(default)]
    pub max_margin_loss_pct: Option<Decimal>,

    /// Take-profit ladder rungs, nearest first
    #[serde(default = "default_tp_ladder")]
    pub tp: Vec<TpRungConfig>,

    /// Move the stop to entry once the first rung fills
    #[serde(default = "default_true")]
    pub trail_to_breakeven_on_tp1: bool,

    /// Move the stop to the first rung's trigger once the second rung fills
    #[serde(default = "default_true")]
    pub trail_stop_to_tp1_on_tp2: bool,

    /// Trailing stop for the runner after the final rung
    #[serde(default)]
    pub trailing_after_tp2: TrailingConfig,

    /// Runner exit policy; "signal" closes the runner on an opposite signal
    #[serde(default)]
    pub runner_exit: Option<RunnerExitMode>,
}

/// One take-profit rung: trigger as an R-multiple of the stop distance or an
/// absolute percentage from entry (pct wins when both are set)
#[derive(Debug, Clone, Deserialize)]
pub struct TpRungConfig {
    #[serde(default)]
    pub r_multiple: Option<Decimal>,
    #[serde(default)]
    pub pct: Option<Decimal>,
    pub close_frac: Decimal,
}

/// Runner exit mode
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunnerExitMode {
    Signal,
}

/// Trailing stop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TrailingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Stop trails the mid by this fraction
    #[serde(default = "default_trail_pct")]
    pub trail_pct: Decimal,

    /// Minimum seconds between trailing stop updates
    #[serde(default = "default_trail_min_update_secs")]
    pub min_update_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_trail_pct() -> Decimal {
    Decimal::new(5, 3) // 0.005 = 0.5%
}
fn default_trail_min_update_secs() -> u64 {
    20
}
fn default_tp_ladder() -> Vec<TpRungConfig> {
    vec![
        TpRungConfig {
            r_multiple: Some(Decimal::new(2, 0)),
            pct: None,
            close_frac: Decimal::new(25, 2),
        },
        TpRungConfig {
            r_multiple: Some(Decimal::new(4, 0)),
            pct: None,
            close_frac: Decimal::new(25, 2),
        },
    ]
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trail_pct: default_trail_pct(),
            min_update_secs: 20,
        }
    }
}

impl Default for ExitsConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: None,
            max_margin_loss_pct: None,
            tp: default_tp_ladder(),
            trail_to_breakeven_on_tp1: true,
            trail_stop_to_tp1_on_tp2: true,
            trailing_after_tp2: TrailingConfig::default(),
            runner_exit: None,
        }
    }
}

/// Signal engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    /// Poll loop interval in seconds
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,

    /// Stop distance = atr_mult * (ATR / price), capped by max_stop_pct
    #[serde(default = "default_atr_mult")]
    pub atr_mult: Decimal,

    #[serde(default = "default_max_stop_pct")]
    pub max_stop_pct: Decimal,

    /// Reject entries further than this fraction from the 1h EMA50
    #[serde(default)]
    pub max_ema_dist_pct: Option<Decimal>,

    /// Closes required on the wrong side of the EMA before a reclaim counts
    #[serde(default = "default_confirm_candles")]
    pub confirm_candles: u32,

    #[serde(default)]
    pub stoch_filter: StochFilterConfig,
}

fn default_poll_secs() -> u64 {
    20
}
fn default_atr_mult() -> Decimal {
    Decimal::new(15, 1) // 1.5
}
fn default_max_stop_pct() -> Decimal {
    Decimal::new(35, 3) // 0.035
}
fn default_confirm_candles() -> u32 {
    1
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            poll_secs: 20,
            atr_mult: default_atr_mult(),
            max_stop_pct: default_max_stop_pct(),
            max_ema_dist_pct: None,
            confirm_candles: 1,
            stoch_filter: StochFilterConfig::default(),
        }
    }
}

/// Stochastic RSI entry filter
#[derive(Debug, Clone, Deserialize)]
pub struct StochFilterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reject longs when %K is at or above this
    #[serde(default = "default_overbought")]
    pub overbought: Decimal,

    /// Reject shorts when %K is at or below this
    #[serde(default = "default_oversold")]
    pub oversold: Decimal,
}

fn default_overbought() -> Decimal {
    Decimal::new(80, 0)
}
fn default_oversold() -> Decimal {
    Decimal::new(20, 0)
}

impl Default for StochFilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overbought: default_overbought(),
            oversold: default_oversold(),
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_execution_mode")]
    pub mode: ExecutionMode,

    /// Market-data source for the paper venue
    #[serde(default = "default_data_source")]
    pub data_source: DataSource,

    /// Taker fee as a fraction of notional
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,

    /// Market-order slippage as a fraction of mid
    #[serde(default = "default_slippage")]
    pub slippage: Decimal,

    /// Starting equity for the paper venue
    #[serde(default = "default_initial_equity_usd")]
    pub initial_equity_usd: Decimal,
}

/// Execution mode: paper trading or live
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Paper,
    Live,
}

/// Where the paper venue gets candles and mids
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Synthetic,
    Hyperliquid,
}

fn default_execution_mode() -> ExecutionMode {
    ExecutionMode::Paper
}
fn default_data_source() -> DataSource {
    DataSource::Synthetic
}
fn default_fee_rate() -> Decimal {
    Decimal::new(45, 5) // 0.00045
}
fn default_slippage() -> Decimal {
    Decimal::new(1, 3) // 0.001
}
fn default_initial_equity_usd() -> Decimal {
    Decimal::new(10_000, 0)
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            data_source: DataSource::Synthetic,
            fee_rate: default_fee_rate(),
            slippage: default_slippage(),
            initial_equity_usd: default_initial_equity_usd(),
        }
    }
}

/// Telegram notification configuration
///
/// The bot token is read from the environment variable named by `token_env`,
/// never from the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Channel @username or numeric chat id
    #[serde(default)]
    pub chat_id: Option<String>,

    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_token_env() -> String {
    "TG_TOKEN".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            chat_id: None,
            token_env: default_token_env(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus exporter port; 0 disables the exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_metrics_port() -> u16 {
    9090
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: 9090,
            log_level: default_log_level(),
        }
    }
}

/// Data directory configuration; holds state.json and trades.jsonl
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
