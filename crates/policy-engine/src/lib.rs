//! Review rule evaluation and the human approval gate.

mod decision;
pub mod gate;
pub mod matcher;

pub use decision::{Decision, MatchResult};
pub use gate::{ApprovalGate, Resolution};
pub use matcher::evaluate;
