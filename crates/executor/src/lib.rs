use std::process::Command;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use portwarden_core::config::{ExecutorConfig, ExecutorMode};
use portwarden_core::types::{ConnectionRequest, Port, Tag};

pub mod command;

use command::FirewallCommand;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub detail: String,
}

/// Performs the firewall change. Callers invoke it only with a decision that
/// permits the action in hand.
pub trait ActionExecutor: Send + Sync {
    fn apply(&self, source: &Tag, destination: &Tag, port: Port) -> ActionResult;
}

/// Renders the firewall command and records it instead of running it.
#[derive(Debug)]
pub struct DryRunExecutor {
    program: String,
    chain: String,
    applied: Mutex<Vec<FirewallCommand>>,
}

/// Runs the firewall binary.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    chain: String,
}

impl ActionResult {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

impl DryRunExecutor {
    pub fn new(program: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            chain: chain.into(),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn applied(&self) -> Vec<FirewallCommand> {
        self.applied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ActionExecutor for DryRunExecutor {
    fn apply(&self, source: &Tag, destination: &Tag, port: Port) -> ActionResult {
        let request = ConnectionRequest {
            source: source.clone(),
            destination: destination.clone(),
            port,
        };
        let command = FirewallCommand::allow(&self.program, &self.chain, &request);
        let detail = format!("dry run: {command}");
        info!(%request, %command, "firewall rule rendered (dry run)");
        self.applied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command);
        ActionResult::ok(detail)
    }
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            chain: chain.into(),
        }
    }
}

impl ActionExecutor for CommandExecutor {
    fn apply(&self, source: &Tag, destination: &Tag, port: Port) -> ActionResult {
        let request = ConnectionRequest {
            source: source.clone(),
            destination: destination.clone(),
            port,
        };
        let command = FirewallCommand::allow(&self.program, &self.chain, &request);
        let output = match Command::new(&command.program).args(&command.args).output() {
            Ok(output) => output,
            Err(err) => {
                warn!(%request, error = %err, "failed to launch firewall binary");
                return ActionResult::failed(format!("launch {}: {err}", command.program));
            }
        };

        if output.status.success() {
            info!(%request, "firewall rule created");
            ActionResult::ok(format!("created: {command}"))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(%request, status = %output.status, %stderr, "firewall rule creation failed");
            ActionResult::failed(if stderr.is_empty() {
                format!("{} exited with {}", command.program, output.status)
            } else {
                stderr
            })
        }
    }
}

pub fn from_config(config: &ExecutorConfig) -> Box<dyn ActionExecutor> {
    match config.mode {
        ExecutorMode::DryRun => Box::new(DryRunExecutor::new(&config.firewall_binary, &config.chain)),
        ExecutorMode::Command => Box::new(CommandExecutor::new(&config.firewall_binary, &config.chain)),
    }
}
