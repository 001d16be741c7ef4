use std::fmt;

use portwarden_core::types::{ConnectionRequest, Tag};

/// Firewall invocation that opens one tagged flow.
///
/// Tags are addressed as ipsets of the same name, with `:` replaced by `-`
/// since set names cannot carry a colon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl FirewallCommand {
    pub fn allow(program: &str, chain: &str, request: &ConnectionRequest) -> Self {
        let args = vec![
            "-A".to_string(),
            chain.to_string(),
            "-p".to_string(),
            "tcp".to_string(),
            "-m".to_string(),
            "set".to_string(),
            "--match-set".to_string(),
            set_name(&request.source),
            "src".to_string(),
            "-m".to_string(),
            "set".to_string(),
            "--match-set".to_string(),
            set_name(&request.destination),
            "dst".to_string(),
            "--dport".to_string(),
            request.port.to_string(),
            "-m".to_string(),
            "comment".to_string(),
            "--comment".to_string(),
            format!("portwarden {request}"),
            "-j".to_string(),
            "ACCEPT".to_string(),
        ];
        Self {
            program: program.to_string(),
            args,
        }
    }
}

impl fmt::Display for FirewallCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

pub fn set_name(tag: &Tag) -> String {
    tag.as_str().replace(':', "-")
}
