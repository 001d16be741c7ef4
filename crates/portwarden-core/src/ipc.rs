use std::io::{BufRead, BufReader, BufWriter, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::decision::Decision;
use crate::ids::ApprovalId;
use crate::store::PendingApproval;
use crate::types::ConnectionRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub approval_id: ApprovalId,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub started_at: OffsetDateTime,
    pub uptime_seconds: u64,
    pub pending: u32,
    pub decisions: u32,
    pub last_decision: Option<String>,
    /// Whether suspensions survive a daemon restart (file store).
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// Decision plus the request it applies to, so the caller can act on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPayload {
    pub request: ConnectionRequest,
    pub decision: Decision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PortWardenRequest {
    Ping,
    Status,
    Begin(ConnectionRequest),
    Resume(ResumePayload),
    Cancel(ApprovalId),
    Pending,
}

impl PortWardenRequest {
    /// Short name for logs; never carries the request body.
    pub fn kind(&self) -> &'static str {
        match self {
            PortWardenRequest::Ping => "ping",
            PortWardenRequest::Status => "status",
            PortWardenRequest::Begin(_) => "begin",
            PortWardenRequest::Resume(payload) if payload.confirmed => "approve",
            PortWardenRequest::Resume(_) => "deny",
            PortWardenRequest::Cancel(_) => "cancel",
            PortWardenRequest::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum PortWardenResponse {
    Pong,
    Status(StatusPayload),
    Decision(DecisionPayload),
    Pending(Vec<PendingApproval>),
    Error(ErrorPayload),
}

pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime).join("portwarden").join("portwarden.sock");
    }
    PathBuf::from("/tmp").join("portwarden.sock")
}

pub fn default_pid_path() -> PathBuf {
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime).join("portwarden").join("portwarden.pid");
    }
    PathBuf::from("/tmp").join("portwarden.pid")
}

pub fn resolve_socket_path() -> PathBuf {
    if let Ok(value) = std::env::var("PORTWARDEN_SOCKET") {
        return PathBuf::from(value);
    }
    default_socket_path()
}

pub fn resolve_pid_path() -> PathBuf {
    if let Ok(value) = std::env::var("PORTWARDEN_PID") {
        return PathBuf::from(value);
    }
    default_pid_path()
}

pub fn send_request(socket_path: &Path, request: &PortWardenRequest) -> Result<PortWardenResponse> {
    let stream = UnixStream::connect(socket_path)
        .with_context(|| format!("connect to daemon at {}", socket_path.display()))?;
    let mut writer = BufWriter::new(stream.try_clone()?);
    let payload = serde_json::to_string(request).context("serialize request")?;
    writer.write_all(payload.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let response = serde_json::from_str(&line).context("parse response")?;
    Ok(response)
}
