//! Status command implementation

use chrono::{TimeZone, Utc};

use crate::config::Config;
use crate::state::StateStore;

pub fn execute(config: &Config) -> anyhow::Result<()> {
    let store = StateStore::new(&config.data.dir);
    let Some(state) = store.load()? else {
        println!("No persisted state at {}", store.path().display());
        return Ok(());
    };

    println!("hl-signalbot state ({})", store.path().display());
    println!("  halted: {}", state.halted);
    println!("  error streak: {}", state.err_streak);
    let now_ms = Utc::now().timestamp_millis();
    if state.backoff_until_ms > now_ms {
        println!(
            "  backing off: {}s remaining",
            (state.backoff_until_ms - now_ms) / 1_000
        );
    }
    match &state.plan {
        Some(plan) => {
            println!(
                "  position: {} {} @ {} (stop {})",
                plan.side, plan.initial_size, plan.entry_price, plan.stop_price
            );
            for (idx, rung) in plan.ladder.iter().enumerate() {
                let target = rung.target_price(plan.side, plan.entry_price, plan.stop_pct);
                let mark = if rung.done { "done" } else { "open" };
                println!("    tp{}: {} ({})", idx + 1, target, mark);
            }
            println!(
                "  protection: {}",
                state.protection_key.as_deref().unwrap_or("not yet resting")
            );
        }
        None => println!("  position: flat"),
    }
    if let Some(ms) = state.last_signal_ms {
        println!("  last signal: {}", format_ms(ms));
    }
    if let Some(ms) = state.last_exit_ms {
        println!("  last exit: {}", format_ms(ms));
    }
    if let Some(ms) = state.last_loss_ms {
        println!("  last loss: {}", format_ms(ms));
    }
    Ok(())
}

fn format_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}
