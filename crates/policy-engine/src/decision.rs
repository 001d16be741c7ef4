use serde::{Deserialize, Serialize};

pub use portwarden_core::decision::Decision;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    pub reason: Option<String>,
}

impl MatchResult {
    pub fn hit(reason: impl Into<String>) -> Self {
        Self {
            matched: true,
            reason: Some(reason.into()),
        }
    }

    pub fn miss() -> Self {
        Self::default()
    }
}
