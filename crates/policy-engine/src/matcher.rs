//! Review rule matching.
//!
//! A rule matches when its source, destination and port fields all accept the
//! request. Fields compare exactly, with no case folding. Rows parsed with a
//! missing field carry `FieldMatch::Any` there, so an incomplete row is
//! permissive in what it matches (and therefore strict in what it gates).

use portwarden_core::types::{ConnectionRequest, Rule};

use crate::decision::MatchResult;

/// Returns the reason of the first rule that matches, in table order.
pub fn evaluate(rules: &[Rule], request: &ConnectionRequest) -> MatchResult {
    rules
        .iter()
        .find(|rule| rule_matches(rule, request))
        .map(|rule| MatchResult::hit(rule.reason.clone()))
        .unwrap_or_else(MatchResult::miss)
}

pub fn rule_matches(rule: &Rule, request: &ConnectionRequest) -> bool {
    rule.from.accepts(&request.source)
        && rule.to.accepts(&request.destination)
        && rule.port.accepts(&request.port)
}
