//! hl-signalbot: signal-driven BTC perp bot with native protective orders
//!
//! This library provides the core components for:
//! - EMA-reclaim signal detection over 15m/1h candles
//! - Risk- or margin-fraction position sizing
//! - A position lifecycle engine: entry, stop/take-profit ladder,
//!   stop ratcheting, trailing, runner exit, external-close reconciliation
//! - Daily-loss halt with persistent latch
//! - Paper execution against live or synthetic market data
//! - Crash-safe state persistence and a trade event journal
//! - Telegram notifications and Prometheus metrics

pub mod cli;
pub mod config;
pub mod engine;
pub mod events;
pub mod gateway;
pub mod market;
pub mod notify;
pub mod risk;
pub mod signal;
pub mod state;
pub mod telemetry;
