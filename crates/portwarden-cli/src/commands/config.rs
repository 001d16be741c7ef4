use std::path::PathBuf;

use anyhow::{Context, Result};

use portwarden_core::config::{Config, ConfigPaths};
use portwarden_core::rules::{default_rule_table, RuleFile};

pub fn print_effective(config_path: Option<PathBuf>) -> Result<()> {
    let paths = ConfigPaths::resolve()?;
    let config_path = config_path.unwrap_or(paths.config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    let output = config.to_toml_string()?;
    println!("{}", output);
    Ok(())
}

/// Writes the default config and, unless one exists, the starter rule table.
pub fn init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let paths = ConfigPaths::resolve()?;
    let config_path = path.unwrap_or_else(|| paths.config_path.clone());
    if config_path.exists() && !force {
        return Err(anyhow::anyhow!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        ));
    }
    let config = Config::default_config();
    config.save(&config_path)?;
    println!("Config written to {}", config_path.display());

    let rules = RuleFile::new(config.rules_path(&paths));
    if rules.path().exists() {
        println!("Keeping existing rules at {}", rules.path().display());
    } else {
        rules.save(&default_rule_table())?;
        println!("Rules written to {}", rules.path().display());
    }
    Ok(())
}
