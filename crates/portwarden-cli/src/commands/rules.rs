use std::path::PathBuf;

use anyhow::{Context, Result};

use portwarden_core::rules::RuleSource;

use crate::context::Session;

pub fn print_table(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let session = Session::open(config_path.as_deref())?;
    let table = session
        .rules
        .load()
        .with_context(|| format!("load rules {}", session.rules_path().display()))?;

    if json {
        println!("{}", table.to_json_string()?);
        return Ok(());
    }
    println!("Rules: {} ({})", table.len(), session.rules_path().display());
    for (index, rule) in table.rules.iter().enumerate() {
        println!(
            "{:>3}. {} -> {}:{}  {}",
            index + 1,
            rule.from,
            rule.to,
            rule.port,
            rule.reason
        );
    }
    println!("Digest: {}", table.digest());
    Ok(())
}
