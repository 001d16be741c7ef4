use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info_span, warn};

use portwarden_core::ipc::{send_request, ErrorPayload, PortWardenRequest, PortWardenResponse};

use crate::state::DaemonState;

pub type SharedState = Arc<Mutex<DaemonState>>;

/// Requests are served one at a time with the gate locked.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct Peer {
    pid: i32,
    uid: u32,
}

/// Binds the control socket, owner-only.
///
/// A leftover socket file is replaced, but one that still answers `Ping`
/// belongs to a running daemon: two daemons on one pending store would
/// each hand out the same approvals.
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create socket dir {}", parent.display()))?;
    }
    if socket_path.exists() {
        if let Ok(PortWardenResponse::Pong) = send_request(socket_path, &PortWardenRequest::Ping) {
            bail!("a portwarden daemon already answers on {}", socket_path.display());
        }
        fs::remove_file(socket_path)
            .with_context(|| format!("remove stale socket {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("bind socket {}", socket_path.display()))?;
    fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("set socket permissions {}", socket_path.display()))?;
    Ok(listener)
}

pub fn serve(listener: UnixListener, state: SharedState) -> Result<()> {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "failed to accept connection");
                continue;
            }
        };
        let peer = match authorize(&stream) {
            Ok(peer) => peer,
            Err(err) => {
                warn!(error = %err, "rejected connection");
                continue;
            }
        };
        if let Err(err) = handle_connection(stream, &state) {
            warn!(peer_pid = peer.pid, error = %err, "connection failed");
        }
    }
    Ok(())
}

fn handle_connection(stream: UnixStream, state: &SharedState) -> Result<()> {
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_TIMEOUT))?;

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(());
    }
    let response = match serde_json::from_str::<PortWardenRequest>(&line) {
        Ok(request) => {
            let _span = info_span!("request", kind = request.kind()).entered();
            dispatch(state, request)
        }
        Err(err) => error_response(&anyhow::anyhow!("parse request: {err}")),
    };
    debug!(?response, "responding");

    let mut payload = serde_json::to_string(&response).context("serialize response")?;
    payload.push('\n');
    let mut stream = stream;
    stream.write_all(payload.as_bytes())?;
    stream.flush()?;
    Ok(())
}

/// Runs one request against the gate. Gate failures become `Error`
/// responses; they never reach the accept loop.
pub fn dispatch(state: &SharedState, request: PortWardenRequest) -> PortWardenResponse {
    let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard
        .handle(request)
        .unwrap_or_else(|err| error_response(&err))
}

pub fn error_response(err: &anyhow::Error) -> PortWardenResponse {
    PortWardenResponse::Error(ErrorPayload {
        message: format!("{err:#}"),
    })
}

/// Only the account running the daemon may answer its approvals.
fn authorize(stream: &UnixStream) -> Result<Peer> {
    let peer = peer_credentials(stream)?;
    // SAFETY: geteuid has no preconditions.
    let owner = unsafe { libc::geteuid() };
    if peer.uid != owner {
        bail!("peer uid {} (pid {}) is not the daemon owner", peer.uid, peer.pid);
    }
    Ok(peer)
}

fn peer_credentials(stream: &UnixStream) -> Result<Peer> {
    let mut cred = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    // SAFETY: `cred` and `len` outlive the call and `len` holds its size.
    let rc = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut libc::ucred as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("read peer credentials");
    }
    Ok(Peer {
        pid: cred.pid,
        uid: cred.uid,
    })
}
