use thiserror::Error;

use crate::ids::ApprovalId;

#[derive(Debug, Error)]
pub enum GateError {
    /// The rule table could not be read or parsed. Never an approval.
    #[error("rule source error: {0}")]
    RuleSource(String),
    /// Consumed, expired and never-issued ids all land here.
    #[error("unknown approval: {0}")]
    UnknownApproval(ApprovalId),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("approval store error: {0}")]
    Store(String),
}
