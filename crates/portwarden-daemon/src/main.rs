use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use portwarden_core::config::{Config, ConfigPaths};
use portwarden_core::ipc::{resolve_pid_path, resolve_socket_path};

mod ipc;
mod scheduler;
mod state;

use state::DaemonState;

fn main() -> Result<()> {
    let paths = ConfigPaths::resolve()?;
    let config_path = std::env::var_os("PORTWARDEN_CONFIG").map(PathBuf::from);
    let config = Config::load_or_default(config_path.as_deref(), &paths)?;
    init_tracing(&config);

    let socket_path = resolve_socket_path();
    let pid_path = resolve_pid_path();
    let state = Arc::new(Mutex::new(DaemonState::from_config(&config, &paths)));

    let listener = ipc::bind(&socket_path)?;
    write_pid_file(&pid_path)?;
    info!(
        socket = %socket_path.display(),
        rules = %config.rules_path(&paths).display(),
        store = ?config.gate.store,
        ttl_seconds = ?config.gate.approval_ttl_seconds,
        "PortWarden daemon listening"
    );
    ipc::serve(listener, state)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create pid dir {}", parent.display()))?;
    }
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())
        .with_context(|| format!("write pid file {}", path.display()))?;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)
        .with_context(|| format!("set pid permissions {}", path.display()))?;
    Ok(())
}
