//! Risk management module
//!
//! Position sizing, stop capping, and instrument rounding

mod sizing;

pub use sizing::{
    capped_stop_pct, create_sizer, round_price, round_size, MarginFractionSizer, PositionSizer,
    RiskBasedSizer,
};
