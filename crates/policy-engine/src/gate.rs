//! Suspend/resume checkpoint in front of the firewall action.
//!
//! `begin` evaluates a request once. A matching review rule parks the request
//! in the store and hands back an approval id; `resume` later consumes that
//! record and yields the decision captured at suspension time. The gate never
//! runs the action itself.

use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use portwarden_core::error::GateError;
use portwarden_core::ids::ApprovalId;
use portwarden_core::rules::RuleSource;
use portwarden_core::store::{ApprovalStore, MemoryApprovalStore, PendingApproval};
use portwarden_core::types::ConnectionRequest;

use crate::decision::Decision;
use crate::matcher;

/// A consumed suspension together with the decision it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub approval: PendingApproval,
    pub decision: Decision,
}

#[derive(Debug)]
pub struct ApprovalGate<S = MemoryApprovalStore> {
    store: S,
    ttl: Option<Duration>,
}

impl ApprovalGate<MemoryApprovalStore> {
    pub fn in_memory() -> Self {
        Self::new(MemoryApprovalStore::new())
    }
}

impl<S: ApprovalStore> ApprovalGate<S> {
    pub fn new(store: S) -> Self {
        Self { store, ttl: None }
    }

    /// Suspensions older than `ttl` can no longer be resumed.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Evaluates a fresh request. Suspends on a rule match.
    pub fn begin(
        &self,
        request: &ConnectionRequest,
        rules: &dyn RuleSource,
    ) -> Result<Decision, GateError> {
        self.begin_confirmed(request, rules, false)
    }

    /// Evaluates a request whose caller may already hold a human confirmation.
    /// With `confirmed` set, a match resolves to `ApprovedByHuman` directly.
    pub fn begin_confirmed(
        &self,
        request: &ConnectionRequest,
        rules: &dyn RuleSource,
        confirmed: bool,
    ) -> Result<Decision, GateError> {
        let table = rules.load()?;
        let result = matcher::evaluate(&table.rules, request);

        let reason = match result.reason {
            Some(reason) if result.matched => reason,
            _ => {
                info!(%request, "no review rule matched, auto-approving");
                return Ok(Decision::AutoApproved);
            }
        };

        warn!(%request, %reason, "high-risk request matched a review rule");

        if confirmed {
            info!(%request, "confirmation already present, not suspending again");
            return Ok(Decision::ApprovedByHuman { reason });
        }

        let created_at = OffsetDateTime::now_utc();
        let approval = PendingApproval {
            id: ApprovalId::new(),
            request: request.clone(),
            reason: reason.clone(),
            created_at,
            expires_at: self.ttl.map(|ttl| created_at + ttl),
            rules_digest: table.digest(),
        };
        let approval_id = approval.id;
        self.store.insert(approval)?;

        info!(%approval_id, %request, "request suspended pending human confirmation");
        Ok(Decision::PendingReview {
            approval_id,
            reason,
        })
    }

    /// Answers a suspension. The record is consumed whatever the answer.
    pub fn resume(&self, approval_id: &ApprovalId, confirmed: bool) -> Result<Decision, GateError> {
        self.resolve(approval_id, confirmed)
            .map(|resolution| resolution.decision)
    }

    /// Like `resume`, but also returns the consumed record so the caller can
    /// act on the original request.
    pub fn resolve(
        &self,
        approval_id: &ApprovalId,
        confirmed: bool,
    ) -> Result<Resolution, GateError> {
        self.resolve_at(approval_id, confirmed, OffsetDateTime::now_utc())
    }

    pub fn resolve_at(
        &self,
        approval_id: &ApprovalId,
        confirmed: bool,
        now: OffsetDateTime,
    ) -> Result<Resolution, GateError> {
        let approval = self.take_live(approval_id, now)?;
        let reason = approval.reason.clone();
        let decision = if confirmed {
            info!(%approval_id, request = %approval.request, "human approved request");
            Decision::ApprovedByHuman { reason }
        } else {
            info!(%approval_id, request = %approval.request, "human denied request");
            Decision::Denied { reason }
        };
        Ok(Resolution { approval, decision })
    }

    /// Withdraws a suspension without a human answer.
    pub fn cancel(&self, approval_id: &ApprovalId) -> Result<Decision, GateError> {
        let approval = self.take_live(approval_id, OffsetDateTime::now_utc())?;
        info!(%approval_id, request = %approval.request, "suspension cancelled");
        Ok(Decision::Cancelled {
            reason: approval.reason,
        })
    }

    pub fn get(&self, approval_id: &ApprovalId) -> Result<Option<PendingApproval>, GateError> {
        self.store.get(approval_id)
    }

    pub fn pending(&self) -> Result<Vec<PendingApproval>, GateError> {
        self.store.list()
    }

    /// Drops every suspension that expired before `now`. Returns how many went.
    pub fn purge_expired(&self, now: OffsetDateTime) -> Result<usize, GateError> {
        let mut purged = 0;
        for approval in self.store.list()? {
            if approval.is_expired(now) && self.store.take(&approval.id)?.is_some() {
                debug!(approval_id = %approval.id, "expired suspension purged");
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "expired suspensions removed");
        }
        Ok(purged)
    }

    fn take_live(
        &self,
        approval_id: &ApprovalId,
        now: OffsetDateTime,
    ) -> Result<PendingApproval, GateError> {
        let approval = self
            .store
            .take(approval_id)?
            .ok_or(GateError::UnknownApproval(*approval_id))?;

        if approval.id != *approval_id {
            return Err(GateError::InvariantViolation(format!(
                "store returned approval {} for id {approval_id}",
                approval.id
            )));
        }
        if approval.is_expired(now) {
            warn!(%approval_id, "suspension expired before it was answered");
            return Err(GateError::UnknownApproval(*approval_id));
        }
        Ok(approval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portwarden_core::rules::{RuleFile, RuleTable};
    use portwarden_core::store::FileApprovalStore;
    use portwarden_core::types::{FieldMatch, Port, Rule, Tag};

    fn billing_rules() -> RuleTable {
        RuleTable::new(vec![Rule::new(
            FieldMatch::Any,
            FieldMatch::Exact(Tag::new("db:billing")),
            FieldMatch::Exact(Port(5432)),
            "sensitive",
        )])
    }

    fn checkout_to(destination: &str) -> ConnectionRequest {
        ConnectionRequest::new("app:checkout", destination, 5432)
    }

    #[test]
    fn test_no_match_auto_approves_without_state() {
        let gate = ApprovalGate::in_memory();
        let decision = gate.begin(&checkout_to("db:other"), &billing_rules()).unwrap();
        assert_eq!(decision, Decision::AutoApproved);
        assert!(gate.pending().unwrap().is_empty());
    }

    #[test]
    fn test_match_suspends_with_single_record() {
        let gate = ApprovalGate::in_memory();
        let decision = gate.begin(&checkout_to("db:billing"), &billing_rules()).unwrap();

        let approval_id = match &decision {
            Decision::PendingReview { approval_id, reason } => {
                assert_eq!(reason, "sensitive");
                *approval_id
            }
            other => panic!("expected suspension, got {other:?}"),
        };
        let pending = gate.pending().unwrap();
        assert_eq!(pending.len(), 1);
        let stored = gate.get(&approval_id).unwrap().unwrap();
        assert_eq!(stored.request, checkout_to("db:billing"));
        assert_eq!(stored.reason, "sensitive");
        assert_eq!(stored.rules_digest, billing_rules().digest());
    }

    #[test]
    fn test_identical_requests_get_distinct_ids() {
        let gate = ApprovalGate::in_memory();
        let first = gate.begin(&checkout_to("db:billing"), &billing_rules()).unwrap();
        let second = gate.begin(&checkout_to("db:billing"), &billing_rules()).unwrap();
        assert_ne!(first.approval_id(), second.approval_id());
        assert_eq!(gate.pending().unwrap().len(), 2);
    }

    #[test]
    fn test_resume_consumes_once() {
        let gate = ApprovalGate::in_memory();
        let id = gate
            .begin(&checkout_to("db:billing"), &billing_rules())
            .unwrap()
            .approval_id()
            .unwrap();

        let decision = gate.resume(&id, true).unwrap();
        assert_eq!(
            decision,
            Decision::ApprovedByHuman {
                reason: "sensitive".to_string()
            }
        );
        let err = gate.resume(&id, true).unwrap_err();
        assert!(matches!(err, GateError::UnknownApproval(found) if found == id));
        assert!(gate.pending().unwrap().is_empty());
    }

    #[test]
    fn test_resume_unknown_id() {
        let gate = ApprovalGate::in_memory();
        let id = ApprovalId::new();
        assert!(matches!(
            gate.resume(&id, true),
            Err(GateError::UnknownApproval(_))
        ));
    }

    #[test]
    fn test_denial_is_terminal_and_consumes() {
        let gate = ApprovalGate::in_memory();
        let id = gate
            .begin(&checkout_to("db:billing"), &billing_rules())
            .unwrap()
            .approval_id()
            .unwrap();

        let decision = gate.resume(&id, false).unwrap();
        assert_eq!(
            decision,
            Decision::Denied {
                reason: "sensitive".to_string()
            }
        );
        assert!(decision.is_terminal());
        assert!(!decision.permits_action());
        assert!(matches!(
            gate.resume(&id, true),
            Err(GateError::UnknownApproval(_))
        ));
    }

    #[test]
    fn test_resume_uses_reason_captured_at_suspension() {
        let dir = tempfile::tempdir().unwrap();
        let rule_file = RuleFile::new(dir.path().join("rules.json"));
        rule_file.save(&billing_rules()).unwrap();

        let gate = ApprovalGate::in_memory();
        let id = gate
            .begin(&checkout_to("db:billing"), &rule_file)
            .unwrap()
            .approval_id()
            .unwrap();

        rule_file.save(&RuleTable::default()).unwrap();
        let resolution = gate.resolve(&id, true).unwrap();
        assert_eq!(resolution.decision.reason(), Some("sensitive"));
        assert_eq!(resolution.approval.request, checkout_to("db:billing"));
        assert_ne!(resolution.approval.rules_digest, rule_file.load().unwrap().digest());
    }

    #[test]
    fn test_confirmed_begin_does_not_suspend_again() {
        let gate = ApprovalGate::in_memory();
        let decision = gate
            .begin_confirmed(&checkout_to("db:billing"), &billing_rules(), true)
            .unwrap();
        assert_eq!(
            decision,
            Decision::ApprovedByHuman {
                reason: "sensitive".to_string()
            }
        );
        assert!(gate.pending().unwrap().is_empty());

        let decision = gate
            .begin_confirmed(&checkout_to("db:other"), &billing_rules(), true)
            .unwrap();
        assert_eq!(decision, Decision::AutoApproved);
    }

    #[test]
    fn test_missing_rule_file_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let gate = ApprovalGate::in_memory();
        let err = gate
            .begin(&checkout_to("db:other"), &RuleFile::new(dir.path().join("absent.json")))
            .unwrap_err();
        assert!(matches!(err, GateError::RuleSource(_)));
        assert!(gate.pending().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_rule_file_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, r#"[{"from": "*"}]"#).unwrap();
        let gate = ApprovalGate::in_memory();
        let err = gate.begin(&checkout_to("db:billing"), &RuleFile::new(&path)).unwrap_err();
        assert!(matches!(err, GateError::RuleSource(_)));
    }

    #[test]
    fn test_cancel_consumes() {
        let gate = ApprovalGate::in_memory();
        let id = gate
            .begin(&checkout_to("db:billing"), &billing_rules())
            .unwrap()
            .approval_id()
            .unwrap();
        let decision = gate.cancel(&id).unwrap();
        assert_eq!(
            decision,
            Decision::Cancelled {
                reason: "sensitive".to_string()
            }
        );
        assert!(matches!(gate.cancel(&id), Err(GateError::UnknownApproval(_))));
        assert!(matches!(gate.resume(&id, true), Err(GateError::UnknownApproval(_))));
    }

    #[test]
    fn test_expired_suspension_is_unknown() {
        let gate = ApprovalGate::in_memory().with_ttl(Duration::minutes(5));
        let id = gate
            .begin(&checkout_to("db:billing"), &billing_rules())
            .unwrap()
            .approval_id()
            .unwrap();
        let stored = gate.get(&id).unwrap().unwrap();
        assert_eq!(stored.expires_at, Some(stored.created_at + Duration::minutes(5)));

        let later = stored.created_at + Duration::minutes(6);
        assert!(matches!(
            gate.resolve_at(&id, true, later),
            Err(GateError::UnknownApproval(_))
        ));
        assert!(gate.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_purge_expired() {
        let gate = ApprovalGate::in_memory().with_ttl(Duration::seconds(30));
        gate.begin(&checkout_to("db:billing"), &billing_rules()).unwrap();
        gate.begin(&checkout_to("db:billing"), &billing_rules()).unwrap();

        let now = OffsetDateTime::now_utc();
        assert_eq!(gate.purge_expired(now).unwrap(), 0);
        assert_eq!(gate.purge_expired(now + Duration::minutes(1)).unwrap(), 2);
        assert!(gate.pending().unwrap().is_empty());
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let gate = ApprovalGate::in_memory();
        let id = gate
            .begin(&checkout_to("db:billing"), &billing_rules())
            .unwrap()
            .approval_id()
            .unwrap();
        let far_future = OffsetDateTime::now_utc() + Duration::days(365);
        assert_eq!(gate.purge_expired(far_future).unwrap(), 0);
        assert!(gate.resolve_at(&id, true, far_future).is_ok());
    }

    #[test]
    fn test_suspension_survives_gate_restart_with_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending.json");

        let id = {
            let gate = ApprovalGate::new(FileApprovalStore::new(&path));
            gate.begin(&checkout_to("db:billing"), &billing_rules())
                .unwrap()
                .approval_id()
                .unwrap()
        };

        let gate = ApprovalGate::new(FileApprovalStore::new(&path));
        let resolution = gate.resolve(&id, true).unwrap();
        assert_eq!(resolution.approval.request, checkout_to("db:billing"));
        assert!(resolution.decision.permits_action());
    }

    #[test]
    fn test_concurrent_begin_and_resume_do_not_interfere() {
        let gate = ApprovalGate::in_memory();
        let rules = billing_rules();

        let decisions: Vec<Decision> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        let id = gate
                            .begin(&checkout_to("db:billing"), &rules)
                            .unwrap()
                            .approval_id()
                            .unwrap();
                        gate.resume(&id, true).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        assert_eq!(decisions.len(), 16);
        assert!(decisions.iter().all(Decision::permits_action));
        assert!(gate.pending().unwrap().is_empty());
    }
}
