use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

use executor::ActionExecutor;
use policy_engine::ApprovalGate;
use portwarden_core::config::{Config, ConfigPaths};
use portwarden_core::decision::Decision;
use portwarden_core::rules::{RuleFile, RuleSource};
use portwarden_core::store::{FileApprovalStore, PendingApproval};
use portwarden_core::types::ConnectionRequest;
use reporting::json::render_json;
use reporting::OutcomeReport;

/// Everything one CLI invocation needs to run the gate and act on it.
///
/// Suspensions go to the file store: the `approve` that answers them runs in
/// a later process.
pub struct Session {
    pub config: Config,
    pub paths: ConfigPaths,
    pub rules: RuleFile,
    pub gate: ApprovalGate<FileApprovalStore>,
    pub executor: Box<dyn ActionExecutor>,
}

impl Session {
    pub fn open(config_path: Option<&Path>) -> Result<Self> {
        let paths = ConfigPaths::resolve()?;
        Self::open_with(config_path, paths)
    }

    pub fn open_with(config_path: Option<&Path>, paths: ConfigPaths) -> Result<Self> {
        let config = Config::load_or_default(config_path, &paths)?;
        let rules = RuleFile::new(config.rules_path(&paths));
        let mut gate = ApprovalGate::new(FileApprovalStore::new(&paths.pending_db_path));
        if let Some(ttl) = config.approval_ttl() {
            gate = gate.with_ttl(ttl);
        }
        let executor = executor::from_config(&config.executor);
        Ok(Self {
            config,
            paths,
            rules,
            gate,
            executor,
        })
    }

    /// Runs the action only for a permitting decision, then reports.
    pub fn conclude(
        &self,
        request: ConnectionRequest,
        decision: Decision,
        json: bool,
    ) -> Result<OutcomeReport> {
        self.conclude_with(self.executor.as_ref(), request, decision, json)
    }

    /// `conclude` against a caller-supplied executor.
    ///
    /// Once the executor has run the outcome is always printed: a report that
    /// cannot be written is logged, not returned as a failure.
    pub fn conclude_with(
        &self,
        executor: &dyn ActionExecutor,
        request: ConnectionRequest,
        decision: Decision,
        json: bool,
    ) -> Result<OutcomeReport> {
        let action = if decision.permits_action() {
            Some(executor.apply(&request.source, &request.destination, request.port))
        } else {
            None
        };
        let report = OutcomeReport::new(request, decision, action);

        if self.config.reporting.store_reports {
            match report.store(&self.paths.report_dir) {
                Ok(path) => debug!(path = %path.display(), "outcome report stored"),
                Err(err) => {
                    let detail = format!("{err:#}");
                    warn!(report_id = %report.report_id, error = %detail, "outcome report not stored");
                }
            }
        }
        if self.json_output(json) {
            println!("{}", render_json(&report));
        } else {
            println!("{}", report.human_summary());
        }
        Ok(report)
    }

    /// True when stdout must carry nothing but the JSON report.
    pub fn json_output(&self, json: bool) -> bool {
        json || self.config.reporting.structured_json
    }

    /// Warns when the rule table moved on since the request was suspended.
    /// The captured decision stands either way.
    pub fn check_rules_drift(&self, approval: &PendingApproval) {
        match self.rules.load() {
            Ok(table) if table.digest() != approval.rules_digest => warn!(
                approval_id = %approval.id,
                "rule table changed since suspension; honoring the captured decision"
            ),
            Ok(_) => {}
            Err(err) => debug!(error = %err, "rule table unavailable for drift check"),
        }
    }

    pub fn rules_path(&self) -> PathBuf {
        self.rules.path().to_path_buf()
    }
}
