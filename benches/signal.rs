//! Benchmarks for signal evaluation

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hl_signalbot::config::Config;
use hl_signalbot::market::Candles;
use hl_signalbot::signal::{ema, wilder_atr, ReclaimDetector, SignalSource};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Deterministic candle history resembling a trending market
fn synthetic_candles(bars: usize) -> Candles {
    let mut closes = Vec::with_capacity(bars);
    let mut highs = Vec::with_capacity(bars);
    let mut lows = Vec::with_capacity(bars);
    let mut price = dec!(60000);
    let mut rng: u64 = 0x2545_F491_4F6C_DD1D;
    for _ in 0..bars {
        rng ^= rng << 13;
        rng ^= rng >> 7;
        rng ^= rng << 17;
        let step = Decimal::from((rng % 200) as i64) - dec!(90);
        price += step;
        closes.push(price);
        highs.push(price + dec!(40));
        lows.push(price - dec!(40));
    }
    Candles {
        closes,
        highs,
        lows,
    }
}

fn benchmark_detector_evaluate(c: &mut Criterion) {
    let config: Config = toml::from_str("").unwrap();
    let detector = ReclaimDetector::from_config(&config);
    let m15 = synthetic_candles(288);
    let h1 = synthetic_candles(336);
    let mid = *m15.closes.last().unwrap();

    c.bench_function("detector_evaluate", |b| {
        b.iter(|| detector.evaluate(black_box(&m15), black_box(&h1), black_box(mid)))
    });
}

fn benchmark_wilder_atr(c: &mut Criterion) {
    let candles = synthetic_candles(288);

    c.bench_function("wilder_atr_288", |b| {
        b.iter(|| {
            wilder_atr(
                black_box(&candles.highs),
                black_box(&candles.lows),
                black_box(&candles.closes),
                black_box(14),
            )
        })
    });
}

fn benchmark_ema(c: &mut Criterion) {
    let candles = synthetic_candles(336);

    c.bench_function("ema_200_over_336", |b| {
        b.iter(|| ema(black_box(&candles.closes), black_box(200)))
    });
}

criterion_group!(
    benches,
    benchmark_detector_evaluate,
    benchmark_wilder_atr,
    benchmark_ema
);
criterion_main!(benches);
