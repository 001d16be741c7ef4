use std::path::PathBuf;

use anyhow::Result;
use time::OffsetDateTime;

use reporting::timeline::pending_lines;

use crate::commands::daemon::DaemonClient;
use crate::context::Session;

pub fn list(config_path: Option<PathBuf>, use_daemon: bool, json: bool) -> Result<()> {
    let pending = if use_daemon {
        DaemonClient::new(None).pending()?
    } else {
        Session::open(config_path.as_deref())?.gate.pending()?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }
    if pending.is_empty() {
        println!("No requests awaiting approval.");
        return Ok(());
    }
    println!("Awaiting approval: {}", pending.len());
    for line in pending_lines(&pending, OffsetDateTime::now_utc()) {
        println!("- {line}");
    }
    Ok(())
}

pub fn purge(config_path: Option<PathBuf>) -> Result<()> {
    let session = Session::open(config_path.as_deref())?;
    let purged = session.gate.purge_expired(OffsetDateTime::now_utc())?;
    println!("Expired approvals removed: {purged}");
    Ok(())
}
