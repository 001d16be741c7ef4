use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use time::OffsetDateTime;

use portwarden_core::ipc::{
    resolve_pid_path, resolve_socket_path, send_request, DecisionPayload, PortWardenRequest,
    PortWardenResponse, StatusPayload,
};
use portwarden_core::store::PendingApproval;
use reporting::timeline::pending_lines;

const READY_POLLS: u32 = 30;
const READY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum DaemonAction {
    Start {
        config: Option<PathBuf>,
        socket: Option<PathBuf>,
        pid: Option<PathBuf>,
    },
    Stop {
        socket: Option<PathBuf>,
        pid: Option<PathBuf>,
        force: bool,
    },
    Ping {
        socket: Option<PathBuf>,
    },
    Status {
        socket: Option<PathBuf>,
    },
    SocketPath,
    PidPath,
}

/// Typed calls to a running `portwarden-daemon`. Daemon-side errors come
/// back as `Err` with the daemon's message.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn new(socket: Option<PathBuf>) -> Self {
        Self {
            socket: socket.unwrap_or_else(resolve_socket_path),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn call(&self, request: &PortWardenRequest) -> Result<PortWardenResponse> {
        match send_request(&self.socket, request)? {
            PortWardenResponse::Error(error) => Err(anyhow!(error.message)),
            response => Ok(response),
        }
    }

    pub fn ping(&self) -> Result<()> {
        match self.call(&PortWardenRequest::Ping)? {
            PortWardenResponse::Pong => Ok(()),
            other => unexpected(other),
        }
    }

    pub fn status(&self) -> Result<StatusPayload> {
        match self.call(&PortWardenRequest::Status)? {
            PortWardenResponse::Status(status) => Ok(status),
            other => unexpected(other),
        }
    }

    pub fn pending(&self) -> Result<Vec<PendingApproval>> {
        match self.call(&PortWardenRequest::Pending)? {
            PortWardenResponse::Pending(pending) => Ok(pending),
            other => unexpected(other),
        }
    }

    /// `Begin`, `Resume` or `Cancel`, answered with the decision and the
    /// request it applies to.
    pub fn decide(&self, request: &PortWardenRequest) -> Result<DecisionPayload> {
        match self.call(request)? {
            PortWardenResponse::Decision(payload) => Ok(payload),
            other => unexpected(other),
        }
    }
}

fn unexpected<T>(response: PortWardenResponse) -> Result<T> {
    Err(anyhow!("unexpected response: {response:?}"))
}

pub fn execute(action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Start {
            config,
            socket,
            pid,
        } => start_daemon(config, socket, pid),
        DaemonAction::Stop { socket, pid, force } => stop_daemon(socket, pid, force),
        DaemonAction::Ping { socket } => {
            let client = DaemonClient::new(socket);
            client.ping()?;
            println!("PortWarden daemon answers on {}.", client.socket().display());
            Ok(())
        }
        DaemonAction::Status { socket } => {
            let client = DaemonClient::new(socket);
            let status = client.status()?;
            let pending = client.pending()?;
            for line in status_lines(&status, &pending, OffsetDateTime::now_utc()) {
                println!("{line}");
            }
            Ok(())
        }
        DaemonAction::SocketPath => {
            println!("{}", resolve_socket_path().display());
            Ok(())
        }
        DaemonAction::PidPath => {
            println!("{}", resolve_pid_path().display());
            Ok(())
        }
    }
}

/// Spawns the daemon and waits until it answers, so a following
/// `request --daemon` does not race its startup.
fn start_daemon(config: Option<PathBuf>, socket: Option<PathBuf>, pid: Option<PathBuf>) -> Result<()> {
    let client = DaemonClient::new(socket);
    if client.ping().is_ok() {
        bail!("a daemon already answers on {}", client.socket().display());
    }

    let mut cmd = Command::new("portwarden-daemon");
    cmd.env("PORTWARDEN_SOCKET", client.socket());
    if let Some(config) = config {
        cmd.env("PORTWARDEN_CONFIG", config);
    }
    if let Some(pid) = pid {
        cmd.env("PORTWARDEN_PID", pid);
    }
    let mut child = cmd.spawn().context("start portwarden-daemon")?;

    for _ in 0..READY_POLLS {
        if client.ping().is_ok() {
            println!("PortWarden daemon listening on {}.", client.socket().display());
            return Ok(());
        }
        if let Some(status) = child.try_wait().context("poll portwarden-daemon")? {
            bail!("portwarden-daemon exited during startup ({status})");
        }
        thread::sleep(READY_INTERVAL);
    }
    bail!(
        "portwarden-daemon did not answer on {} in time",
        client.socket().display()
    )
}

fn stop_daemon(socket: Option<PathBuf>, pid_override: Option<PathBuf>, force: bool) -> Result<()> {
    let client = DaemonClient::new(socket);
    let status = client.status().with_context(|| {
        format!(
            "no daemon answers on {}; not sending a signal",
            client.socket().display()
        )
    })?;
    check_stop_allowed(&status, force)?;

    let pid_path = pid_override.unwrap_or_else(resolve_pid_path);
    let pid_text = std::fs::read_to_string(&pid_path)
        .with_context(|| format!("read pid file {}", pid_path.display()))?;
    let pid: i32 = pid_text.trim().parse().context("parse pid")?;
    // SAFETY: kill only sends a signal to the pid read above.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("signal daemon pid {pid}"));
    }
    println!("PortWarden daemon stopped.");
    Ok(())
}

/// An in-memory daemon takes its suspensions down with it.
pub fn check_stop_allowed(status: &StatusPayload, force: bool) -> Result<()> {
    if status.pending > 0 && !status.durable && !force {
        bail!(
            "{} approval(s) are held in memory and would be lost; answer them or pass --force",
            status.pending
        );
    }
    Ok(())
}

pub fn status_lines(
    status: &StatusPayload,
    pending: &[PendingApproval],
    now: OffsetDateTime,
) -> Vec<String> {
    let mut lines = vec![
        "PortWarden daemon is running.".to_string(),
        format!("Uptime: {}s", status.uptime_seconds),
        format!(
            "Store: {}",
            if status.durable {
                "file (survives restart)"
            } else {
                "memory (lost on restart)"
            }
        ),
    ];
    match status.ttl_seconds {
        Some(ttl) => lines.push(format!("Approvals expire after {ttl}s")),
        None => lines.push("Approvals never expire".to_string()),
    }
    lines.push(format!("Decisions made: {}", status.decisions));
    if let Some(decision) = &status.last_decision {
        lines.push(format!("Last decision: {decision}"));
    }
    lines.push(format!("Awaiting approval: {}", pending.len()));
    lines.extend(pending_lines(pending, now).into_iter().map(|line| format!("- {line}")));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use portwarden_core::ids::ApprovalId;
    use portwarden_core::types::ConnectionRequest;

    fn status(pending: u32, durable: bool) -> StatusPayload {
        StatusPayload {
            started_at: OffsetDateTime::now_utc(),
            uptime_seconds: 42,
            pending,
            decisions: 3,
            last_decision: Some("app:a -> db:b:80: auto-approved".to_string()),
            durable,
            ttl_seconds: None,
        }
    }

    #[test]
    fn test_stop_refuses_to_drop_in_memory_approvals() {
        assert!(check_stop_allowed(&status(2, false), false).is_err());
        assert!(check_stop_allowed(&status(2, false), true).is_ok());
        assert!(check_stop_allowed(&status(2, true), false).is_ok());
        assert!(check_stop_allowed(&status(0, false), false).is_ok());
    }

    #[test]
    fn test_status_lines_list_each_pending_approval() {
        let now = OffsetDateTime::now_utc();
        let approval = PendingApproval {
            id: ApprovalId::new(),
            request: ConnectionRequest::new("app:checkout", "db:billing", 5432),
            reason: "Billing database holds payment data".to_string(),
            created_at: now,
            expires_at: None,
            rules_digest: String::new(),
        };
        let lines = status_lines(&status(1, true), std::slice::from_ref(&approval), now);

        assert!(lines.contains(&"Store: file (survives restart)".to_string()));
        assert!(lines.contains(&"Approvals never expire".to_string()));
        assert!(lines.contains(&"Awaiting approval: 1".to_string()));
        let last = lines.last().unwrap();
        assert!(last.starts_with(&format!("- {}", approval.id)));
        assert!(last.ends_with(&approval.hint()));
    }

    #[test]
    fn test_client_reports_unreachable_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let client = DaemonClient::new(Some(dir.path().join("missing.sock")));
        let err = client.ping().unwrap_err();
        assert!(format!("{err:#}").contains("missing.sock"));
    }
}
