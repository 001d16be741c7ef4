use anyhow::Result;
use time::{Duration, OffsetDateTime};
use tracing::warn;

use policy_engine::ApprovalGate;
use portwarden_core::config::{Config, ConfigPaths, StoreKind};
use portwarden_core::decision::Decision;
use portwarden_core::ipc::{DecisionPayload, PortWardenRequest, PortWardenResponse, StatusPayload};
use portwarden_core::rules::{RuleFile, RuleSource};
use portwarden_core::store::{ApprovalStore, FileApprovalStore, MemoryApprovalStore};

use crate::scheduler::PurgeSchedule;

/// The daemon's single gate plus bookkeeping for `Status`.
pub struct DaemonState {
    pub started_at: OffsetDateTime,
    pub decisions: u32,
    pub last_decision: Option<String>,
    pub gate: ApprovalGate<Box<dyn ApprovalStore>>,
    pub rules: Box<dyn RuleSource + Send + Sync>,
    pub purge: PurgeSchedule,
    /// Suspensions are on disk and outlive this process.
    pub durable: bool,
}

impl DaemonState {
    pub fn from_config(config: &Config, paths: &ConfigPaths) -> Self {
        let store: Box<dyn ApprovalStore> = match config.gate.store {
            StoreKind::Memory => Box::new(MemoryApprovalStore::new()),
            StoreKind::File => Box::new(FileApprovalStore::new(&paths.pending_db_path)),
        };
        let mut gate = ApprovalGate::new(store);
        if let Some(ttl) = config.approval_ttl() {
            gate = gate.with_ttl(ttl);
        }
        let mut state = Self::new(gate, Box::new(RuleFile::new(config.rules_path(paths))));
        state.durable = config.gate.store == StoreKind::File;
        state
    }

    pub fn new(
        gate: ApprovalGate<Box<dyn ApprovalStore>>,
        rules: Box<dyn RuleSource + Send + Sync>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            started_at: now,
            decisions: 0,
            last_decision: None,
            gate,
            rules,
            purge: PurgeSchedule::new(Duration::minutes(1), now),
            durable: false,
        }
    }

    pub fn handle(&mut self, request: PortWardenRequest) -> Result<PortWardenResponse> {
        let now = OffsetDateTime::now_utc();
        if self.gate.ttl().is_some() && self.purge.take_due(now) {
            if let Err(err) = self.gate.purge_expired(now) {
                warn!(error = %err, "expiry sweep failed");
            }
        }

        match request {
            PortWardenRequest::Ping => Ok(PortWardenResponse::Pong),
            PortWardenRequest::Status => Ok(PortWardenResponse::Status(self.status(now)?)),
            PortWardenRequest::Begin(request) => {
                let decision = self.gate.begin(&request, self.rules.as_ref())?;
                Ok(self.record(DecisionPayload { request, decision }))
            }
            PortWardenRequest::Resume(payload) => {
                let resolution = self.gate.resolve(&payload.approval_id, payload.confirmed)?;
                Ok(self.record(DecisionPayload {
                    request: resolution.approval.request,
                    decision: resolution.decision,
                }))
            }
            PortWardenRequest::Cancel(approval_id) => {
                let approval = self
                    .gate
                    .get(&approval_id)?
                    .ok_or(portwarden_core::GateError::UnknownApproval(approval_id))?;
                let decision = self.gate.cancel(&approval_id)?;
                Ok(self.record(DecisionPayload {
                    request: approval.request,
                    decision,
                }))
            }
            PortWardenRequest::Pending => Ok(PortWardenResponse::Pending(self.gate.pending()?)),
        }
    }

    fn record(&mut self, payload: DecisionPayload) -> PortWardenResponse {
        self.decisions = self.decisions.saturating_add(1);
        self.last_decision = Some(describe(&payload));
        PortWardenResponse::Decision(payload)
    }

    fn status(&self, now: OffsetDateTime) -> Result<StatusPayload> {
        let uptime = now - self.started_at;
        Ok(StatusPayload {
            started_at: self.started_at,
            uptime_seconds: uptime.whole_seconds().max(0) as u64,
            pending: u32::try_from(self.gate.pending()?.len()).unwrap_or(u32::MAX),
            decisions: self.decisions,
            last_decision: self.last_decision.clone(),
            durable: self.durable,
            ttl_seconds: self
                .gate
                .ttl()
                .map(|ttl| ttl.whole_seconds().max(0) as u64),
        })
    }
}

fn describe(payload: &DecisionPayload) -> String {
    match &payload.decision {
        Decision::PendingReview { approval_id, .. } => {
            format!("{}: pending_human_review ({approval_id})", payload.request)
        }
        decision => format!("{}: {}", payload.request, decision.status_label()),
    }
}
