//! Position state module
//!
//! Typed persistent state: the position plan, loop bookkeeping, and the
//! JSON store that survives restarts

mod plan;
mod store;

pub use plan::{BotState, LadderRung, PositionPlan, RungTrigger};
pub use store::{StateError, StateStore};
