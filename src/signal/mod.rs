//! Signal generation module
//!
//! Detects EMA-reclaim entries confirmed by the higher-timeframe trend

mod engine;
mod indicators;
mod types;

pub use engine::{ReclaimDetector, SignalSource};
pub use indicators::{ema, stoch_rsi, wilder_atr};
pub use types::{Side, Signal};
