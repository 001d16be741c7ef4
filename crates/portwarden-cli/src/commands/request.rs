use std::path::PathBuf;

use anyhow::{Context, Result};

use portwarden_core::config::Config;
use portwarden_core::decision::Decision;
use portwarden_core::ipc::PortWardenRequest;
use portwarden_core::types::{ConnectionRequest, Port};

use crate::commands::daemon::DaemonClient;
use crate::context::Session;

pub struct RequestInputs {
    pub config_path: Option<PathBuf>,
    pub source: String,
    pub destination: String,
    pub port: u16,
    pub use_daemon: bool,
    pub json: bool,
}

pub fn execute(inputs: RequestInputs) -> Result<()> {
    let session = Session::open(inputs.config_path.as_deref())?;
    let request = resolve_request(&session.config, &inputs)?;

    let decision = if inputs.use_daemon {
        DaemonClient::new(None)
            .decide(&PortWardenRequest::Begin(request.clone()))?
            .decision
    } else {
        session.gate.begin(&request, &session.rules).with_context(|| {
            format!(
                "evaluate {request} against {} (run `portwarden init` if missing)",
                session.rules_path().display()
            )
        })?
    };

    if !session.json_output(inputs.json) {
        if let Some(notice) = pause_notice(&request, &decision) {
            println!("{notice}");
        }
    }
    session.conclude(request, decision, inputs.json)?;
    Ok(())
}

/// Human-facing hint for a suspended request; `None` for any other decision.
pub fn pause_notice(request: &ConnectionRequest, decision: &Decision) -> Option<String> {
    let Decision::PendingReview { approval_id, reason } = decision else {
        return None;
    };
    Some(format!(
        "Paused: waiting for human approval.\n\
         Request: {request}. Reason: {reason}\n\
         Approve with `portwarden approve {approval_id}` or deny with `portwarden deny {approval_id}`."
    ))
}

pub fn resolve_request(config: &Config, inputs: &RequestInputs) -> Result<ConnectionRequest> {
    Ok(ConnectionRequest {
        source: config.resolve_tag(&inputs.source)?,
        destination: config.resolve_tag(&inputs.destination)?,
        port: Port(inputs.port),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(source: &str, destination: &str) -> RequestInputs {
        RequestInputs {
            config_path: None,
            source: source.to_string(),
            destination: destination.to_string(),
            port: 5432,
            use_daemon: false,
            json: false,
        }
    }

    #[test]
    fn test_resolve_request_through_aliases() {
        let config = Config::default_config();
        let request = resolve_request(&config, &inputs("checkout", "billing")).unwrap();
        assert_eq!(request, ConnectionRequest::new("app:checkout", "db:billing", 5432));

        let request = resolve_request(&config, &inputs("app:checkout", "db:other")).unwrap();
        assert_eq!(request, ConnectionRequest::new("app:checkout", "db:other", 5432));
    }

    #[test]
    fn test_pause_notice_only_for_pending_review() {
        let request = ConnectionRequest::new("app:checkout", "db:billing", 5432);
        let approval_id = portwarden_core::ids::ApprovalId::new();
        let pending = Decision::PendingReview {
            approval_id,
            reason: "Billing database holds payment data".to_string(),
        };

        let notice = pause_notice(&request, &pending).unwrap();
        let lines: Vec<_> = notice.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            "Request: app:checkout -> db:billing:5432. Reason: Billing database holds payment data"
        );
        assert!(lines[2].contains(&format!("portwarden approve {approval_id}")));

        assert!(pause_notice(&request, &Decision::AutoApproved).is_none());
        assert!(pause_notice(&request, &Decision::Denied { reason: "r".into() }).is_none());
    }

    #[test]
    fn test_unknown_alias_is_an_error() {
        let config = Config::default_config();
        assert!(resolve_request(&config, &inputs("mystery", "billing")).is_err());
    }
}
