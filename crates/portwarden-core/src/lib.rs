pub mod config;
pub mod decision;
pub mod error;
pub mod ids;
pub mod ipc;
pub mod rules;
pub mod store;
pub mod types;

pub use config::{Config, ConfigPaths};
pub use decision::Decision;
pub use error::GateError;
pub use ids::{ApprovalId, ReportId};
pub use ipc::{PortWardenRequest, PortWardenResponse};
pub use rules::{RuleFile, RuleSource, RuleTable};
pub use store::{ApprovalStore, FileApprovalStore, MemoryApprovalStore, PendingApproval};
pub use types::{ConnectionRequest, FieldMatch, Port, Rule, Tag};
