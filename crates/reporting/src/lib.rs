use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use executor::ActionResult;
use portwarden_core::decision::Decision;
use portwarden_core::ids::ReportId;
use portwarden_core::types::ConnectionRequest;

pub mod json;
pub mod timeline;

/// What happened to one request: the gate's decision and, if it permitted
/// the action, what the executor reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub report_id: ReportId,
    pub request: ConnectionRequest,
    pub decision: Decision,
    pub action: Option<ActionResult>,
    pub decided_at: OffsetDateTime,
}

impl OutcomeReport {
    pub fn new(request: ConnectionRequest, decision: Decision, action: Option<ActionResult>) -> Self {
        Self {
            report_id: ReportId::new(),
            request,
            decision,
            action,
            decided_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn human_summary(&self) -> String {
        let mut lines = vec![format!(
            "Status: {}. Review needed: {}.",
            self.decision.status_label(),
            self.decision.review_needed()
        )];
        lines.push(format!("Request: {}", self.request));
        if let Some(reason) = self.decision.reason() {
            lines.push(format!("Reason: {reason}"));
        }
        if let Some(approval_id) = self.decision.approval_id() {
            lines.push(format!("Approval id: {approval_id}"));
        }
        match &self.action {
            Some(action) if action.success => lines.push(format!("Action: {}", action.detail)),
            Some(action) => lines.push(format!("Action failed: {}", action.detail)),
            None if self.decision.permits_action() => lines.push("Action: not run".to_string()),
            None => {}
        }
        lines.join("\n")
    }

    /// Writes `<report_id>.json` into `dir` and returns the path.
    pub fn store(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("create report dir {}", dir.display()))?;
        let report_path = dir.join(format!("{}.json", self.report_id));
        let contents = serde_json::to_string_pretty(self).context("render report JSON")?;
        fs::write(&report_path, contents)
            .with_context(|| format!("write report {}", report_path.display()))?;
        Ok(report_path)
    }
}

pub(crate) fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_seconds_f64().max(0.0) as i64;
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
