//! Seeded synthetic price feed for paper runs
//!
//! Generates a deterministic random walk of 15m candles in integer cents;
//! hourly candles aggregate groups of four. Each `mid_price` call advances
//! the walk by one bar, so a paper session replays the same market for the
//! same seed.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use super::{CandleInterval, Candles, MarketData};

const START_CENTS: i64 = 6_000_000;
const INITIAL_BARS: usize = 2048;
const CURSOR_START: usize = 1536;
const EXTEND_BARS: usize = 256;

#[derive(Debug, Clone, Copy)]
struct Bar {
    high: i64,
    low: i64,
    close: i64,
}

struct WalkState {
    rng: u64,
    bars: Vec<Bar>,
    cursor: usize,
}

pub struct SyntheticFeed {
    state: Mutex<WalkState>,
}

impl SyntheticFeed {
    pub fn new(seed: u64) -> Self {
        let mut rng = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        let mut bars = Vec::with_capacity(INITIAL_BARS);
        let mut prev_close = START_CENTS;
        for _ in 0..INITIAL_BARS {
            let bar = next_bar(&mut rng, prev_close);
            prev_close = bar.close;
            bars.push(bar);
        }
        Self {
            state: Mutex::new(WalkState {
                rng,
                bars,
                cursor: CURSOR_START,
            }),
        }
    }
}

#[async_trait]
impl MarketData for SyntheticFeed {
    async fn mid_price(&self, _coin: &str) -> anyhow::Result<Decimal> {
        let mut state = self.state.lock().await;
        state.cursor += 1;
        while state.bars.len() <= state.cursor + EXTEND_BARS {
            let prev_close = state.bars[state.bars.len() - 1].close;
            let bar = next_bar(&mut state.rng, prev_close);
            state.bars.push(bar);
        }
        Ok(cents(state.bars[state.cursor].close))
    }

    async fn candles(
        &self,
        _coin: &str,
        interval: CandleInterval,
        lookback: chrono::Duration,
    ) -> anyhow::Result<Candles> {
        let state = self.state.lock().await;
        let have = state.cursor + 1;
        let want = (lookback.num_milliseconds() / interval.millis()).max(0) as usize;
        let mut candles = Candles::default();
        match interval {
            CandleInterval::M15 => {
                let take = want.min(have);
                for bar in &state.bars[have - take..have] {
                    push_bar(&mut candles, bar.high, bar.low, bar.close);
                }
            }
            CandleInterval::H1 => {
                let groups = want.min(have / 4);
                let start = have - groups * 4;
                for chunk in state.bars[start..have].chunks_exact(4) {
                    let high = chunk.iter().map(|b| b.high).max().unwrap_or(0);
                    let low = chunk.iter().map(|b| b.low).min().unwrap_or(0);
                    push_bar(&mut candles, high, low, chunk[3].close);
                }
            }
        }
        Ok(candles)
    }
}

fn next_bar(rng: &mut u64, prev_close: i64) -> Bar {
    let max_step = (prev_close / 250).max(1);
    let delta = next_in(rng, 2 * max_step) - max_step;
    let close = (prev_close + delta).max(1);
    let wick = (prev_close / 500).max(1);
    let high = prev_close.max(close) + next_in(rng, wick);
    let low = (prev_close.min(close) - next_in(rng, wick)).max(1);
    Bar { high, low, close }
}

fn next_in(rng: &mut u64, max: i64) -> i64 {
    if max <= 0 {
        return 0;
    }
    (next_u64(rng) % (max as u64 + 1)) as i64
}

fn next_u64(rng: &mut u64) -> u64 {
    let mut x = *rng;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    *rng = x;
    x.wrapping_mul(0x2545_F491_4F6C_DD1D)
}

fn push_bar(candles: &mut Candles, high: i64, low: i64, close: i64) {
    candles.highs.push(cents(high));
    candles.lows.push(cents(low));
    candles.closes.push(cents(close));
}

fn cents(value: i64) -> Decimal {
    Decimal::new(value, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_same_seed_same_path() {
        let a = SyntheticFeed::new(7);
        let b = SyntheticFeed::new(7);
        for _ in 0..5 {
            assert_eq!(
                a.mid_price("BTC").await.unwrap(),
                b.mid_price("BTC").await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_different_seeds_diverge() {
        let a = SyntheticFeed::new(1);
        let b = SyntheticFeed::new(2);
        let mut diverged = false;
        for _ in 0..20 {
            if a.mid_price("BTC").await.unwrap() != b.mid_price("BTC").await.unwrap() {
                diverged = true;
            }
        }
        assert!(diverged);
    }

    #[tokio::test]
    async fn test_lookback_sets_series_length() {
        let feed = SyntheticFeed::new(3);
        let m15 = feed
            .candles("BTC", CandleInterval::M15, chrono::Duration::days(3))
            .await
            .unwrap();
        assert_eq!(m15.len(), 288);
        let h1 = feed
            .candles("BTC", CandleInterval::H1, chrono::Duration::days(14))
            .await
            .unwrap();
        assert_eq!(h1.len(), 336);
    }

    #[tokio::test]
    async fn test_hourly_aggregates_four_quarters() {
        let feed = SyntheticFeed::new(11);
        let m15 = feed
            .candles("BTC", CandleInterval::M15, chrono::Duration::minutes(60))
            .await
            .unwrap();
        let h1 = feed
            .candles("BTC", CandleInterval::H1, chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(m15.len(), 4);
        assert_eq!(h1.len(), 1);
        assert_eq!(h1.closes[0], m15.closes[3]);
        assert_eq!(h1.highs[0], *m15.highs.iter().max().unwrap());
        assert_eq!(h1.lows[0], *m15.lows.iter().min().unwrap());
    }

    #[tokio::test]
    async fn test_mid_matches_forming_candle_close() {
        let feed = SyntheticFeed::new(5);
        let mid = feed.mid_price("BTC").await.unwrap();
        let m15 = feed
            .candles("BTC", CandleInterval::M15, chrono::Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(*m15.closes.last().unwrap(), mid);
        assert!(mid > dec!(0));
    }
}
