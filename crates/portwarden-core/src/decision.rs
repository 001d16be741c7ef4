use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ApprovalId;

/// Outcome of running a request through the approval gate.
///
/// The serialized `status` tag and `status_label` use the same spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Decision {
    /// No review rule matched.
    #[serde(rename = "auto-approved")]
    AutoApproved,
    ApprovedByHuman { reason: String },
    /// Suspended. The caller must not act until the id is resumed.
    #[serde(rename = "pending_human_review")]
    PendingReview { approval_id: ApprovalId, reason: String },
    Denied { reason: String },
    Cancelled { reason: String },
}

impl Decision {
    /// Only these two outcomes may lead to the firewall change.
    pub fn permits_action(&self) -> bool {
        matches!(self, Decision::AutoApproved | Decision::ApprovedByHuman { .. })
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Decision::PendingReview { .. })
    }

    pub fn review_needed(&self) -> bool {
        !matches!(self, Decision::AutoApproved)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::AutoApproved => None,
            Decision::ApprovedByHuman { reason }
            | Decision::PendingReview { reason, .. }
            | Decision::Denied { reason }
            | Decision::Cancelled { reason } => Some(reason),
        }
    }

    pub fn approval_id(&self) -> Option<ApprovalId> {
        match self {
            Decision::PendingReview { approval_id, .. } => Some(*approval_id),
            _ => None,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            Decision::AutoApproved => "auto-approved",
            Decision::ApprovedByHuman { .. } => "approved_by_human",
            Decision::PendingReview { .. } => "pending_human_review",
            Decision::Denied { .. } => "denied",
            Decision::Cancelled { .. } => "cancelled",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} ({reason})", self.status_label()),
            None => f.write_str(self.status_label()),
        }
    }
}
