//! Review table loading.
//!
//! The table is a JSON array of `{from, to, port, reason}` rows. Row order is
//! priority: the first matching row decides.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GateError;
use crate::types::Rule;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleTable {
    pub rules: Vec<Rule>,
}

/// Supplies a freshly loaded rule table for one evaluation.
pub trait RuleSource {
    fn load(&self) -> Result<RuleTable, GateError>;
}

/// Rule table read from a JSON file on every load.
#[derive(Debug, Clone)]
pub struct RuleFile {
    path: PathBuf,
}

impl RuleTable {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn from_json_str(contents: &str) -> Result<Self, GateError> {
        serde_json::from_str(contents)
            .map_err(|err| GateError::RuleSource(format!("parse rule table JSON: {err}")))
    }

    pub fn to_json_string(&self) -> Result<String, GateError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| GateError::RuleSource(format!("render rule table JSON: {err}")))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// SHA-256 over the canonical JSON rendering of the table.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

impl RuleSource for RuleTable {
    fn load(&self) -> Result<RuleTable, GateError> {
        Ok(self.clone())
    }
}

impl RuleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, table: &RuleTable) -> Result<(), GateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                GateError::RuleSource(format!("create rule dir {}: {err}", parent.display()))
            })?;
        }
        let contents = table.to_json_string()?;
        fs::write(&self.path, contents).map_err(|err| {
            GateError::RuleSource(format!("write rule table {}: {err}", self.path.display()))
        })
    }
}

impl RuleSource for RuleFile {
    fn load(&self) -> Result<RuleTable, GateError> {
        let contents = fs::read_to_string(&self.path).map_err(|err| {
            GateError::RuleSource(format!("read rule table {}: {err}", self.path.display()))
        })?;
        let table = RuleTable::from_json_str(&contents)?;
        tracing::debug!(path = %self.path.display(), rules = table.len(), "rule table loaded");
        Ok(table)
    }
}

/// Rows shipped with `portwarden init`.
pub fn default_rule_table() -> RuleTable {
    RuleTable::from_json_str(
        r#"[
            {"from": "*", "to": "db:billing", "port": 5432, "reason": "Billing database holds payment data"},
            {"from": "app:public-ingress", "to": "*", "port": "*", "reason": "Public ingress must not reach internal services directly"},
            {"from": "*", "to": "db:admin", "reason": "Admin database access requires review"}
        ]"#,
    )
    .unwrap_or_default()
}
