use std::path::PathBuf;

use anyhow::{Context, Result};

use portwarden_core::ids::ApprovalId;
use portwarden_core::ipc::{DecisionPayload, PortWardenRequest, ResumePayload};

use crate::commands::daemon::DaemonClient;
use crate::context::Session;

#[derive(Debug, Clone, Copy)]
pub enum ReviewAction {
    Approve,
    Deny,
    Cancel,
}

pub struct ReviewInputs {
    pub config_path: Option<PathBuf>,
    pub approval_id: ApprovalId,
    pub action: ReviewAction,
    pub use_daemon: bool,
    pub json: bool,
}

pub fn execute(inputs: ReviewInputs) -> Result<()> {
    let session = Session::open(inputs.config_path.as_deref())?;
    let approval_id = inputs.approval_id;

    let payload = if inputs.use_daemon {
        review_via_daemon(approval_id, inputs.action)?
    } else {
        review_local(&session, approval_id, inputs.action)?
    };

    session.conclude(payload.request, payload.decision, inputs.json)?;
    Ok(())
}

fn review_local(session: &Session, approval_id: ApprovalId, action: ReviewAction) -> Result<DecisionPayload> {
    let context = || format!("answer approval {approval_id}");
    match action {
        ReviewAction::Approve | ReviewAction::Deny => {
            let confirmed = matches!(action, ReviewAction::Approve);
            let resolution = session
                .gate
                .resolve(&approval_id, confirmed)
                .with_context(context)?;
            session.check_rules_drift(&resolution.approval);
            Ok(DecisionPayload {
                request: resolution.approval.request,
                decision: resolution.decision,
            })
        }
        ReviewAction::Cancel => {
            let approval = session
                .gate
                .get(&approval_id)
                .with_context(context)?
                .ok_or_else(|| anyhow::anyhow!("unknown approval: {approval_id}"))?;
            let decision = session.gate.cancel(&approval_id).with_context(context)?;
            Ok(DecisionPayload {
                request: approval.request,
                decision,
            })
        }
    }
}

fn review_via_daemon(approval_id: ApprovalId, action: ReviewAction) -> Result<DecisionPayload> {
    let request = match action {
        ReviewAction::Approve => PortWardenRequest::Resume(ResumePayload {
            approval_id,
            confirmed: true,
        }),
        ReviewAction::Deny => PortWardenRequest::Resume(ResumePayload {
            approval_id,
            confirmed: false,
        }),
        ReviewAction::Cancel => PortWardenRequest::Cancel(approval_id),
    };
    DaemonClient::new(None).decide(&request)
}
