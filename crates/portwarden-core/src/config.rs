use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::types::Tag;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gate: GateConfig,
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub reporting: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Review table location. Defaults to `rules.json` in the data dir.
    pub rules_path: Option<PathBuf>,
    /// Unset means a suspension never expires.
    pub approval_ttl_seconds: Option<u64>,
    pub store: StoreKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub mode: ExecutorMode,
    pub firewall_binary: String,
    pub chain: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorMode {
    DryRun,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub store_reports: bool,
    pub structured_json: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub report_dir: PathBuf,
    pub pending_db_path: PathBuf,
    pub rules_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn default_config() -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("checkout".to_string(), "app:checkout".to_string());
        tags.insert("public-ingress".to_string(), "app:public-ingress".to_string());
        tags.insert("billing".to_string(), "db:billing".to_string());
        tags.insert("admin".to_string(), "db:admin".to_string());

        Self {
            gate: GateConfig {
                rules_path: None,
                approval_ttl_seconds: None,
                store: StoreKind::File,
            },
            executor: ExecutorConfig {
                mode: ExecutorMode::DryRun,
                firewall_binary: "iptables".to_string(),
                chain: "PORTWARDEN".to_string(),
            },
            tags,
            logging: LoggingConfig::default(),
            reporting: ReportConfig {
                store_reports: true,
                structured_json: false,
            },
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("parse config TOML")?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let output = toml::to_string_pretty(self).context("render config TOML")?;
        Ok(output)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        let contents = self.to_toml_string()?;
        fs::write(path, contents).with_context(|| format!("write config at {}", path.display()))?;
        Ok(())
    }

    /// Explicit config file if given, else the default location, else defaults.
    pub fn load_or_default(path: Option<&Path>, paths: &ConfigPaths) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if paths.config_path.exists() => Self::load(&paths.config_path),
            None => Ok(Self::default_config()),
        }
    }

    pub fn rules_path(&self, paths: &ConfigPaths) -> PathBuf {
        self.gate
            .rules_path
            .clone()
            .unwrap_or_else(|| paths.rules_path.clone())
    }

    pub fn approval_ttl(&self) -> Option<time::Duration> {
        self.gate
            .approval_ttl_seconds
            .map(|seconds| time::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX)))
    }

    /// Names containing `:` are tags already; anything else goes through the alias table.
    pub fn resolve_tag(&self, name: &str) -> Result<Tag> {
        let name = name.trim();
        if name.contains(':') {
            return Ok(Tag::new(name));
        }
        self.tags
            .get(name)
            .map(|tag| Tag::new(tag.as_str()))
            .ok_or_else(|| anyhow::anyhow!("unknown endpoint name: {name}"))
    }
}

impl ConfigPaths {
    pub fn resolve() -> Result<Self> {
        let project_dirs = ProjectDirs::from("io", "portwarden", "portwarden")
            .ok_or_else(|| anyhow::anyhow!("unable to determine project directories"))?;
        Ok(Self::under(project_dirs.config_dir(), project_dirs.data_dir()))
    }

    pub fn under(config_dir: &Path, data_dir: &Path) -> Self {
        Self {
            config_path: config_dir.join("config.toml"),
            data_dir: data_dir.to_path_buf(),
            report_dir: data_dir.join("reports"),
            pending_db_path: data_dir.join("pending.json"),
            rules_path: data_dir.join("rules.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default_config();
        let rendered = config.to_toml_string().unwrap();
        let parsed = Config::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed.gate.store, StoreKind::File);
        assert_eq!(parsed.executor.mode, ExecutorMode::DryRun);
        assert_eq!(parsed.tags.len(), config.tags.len());
    }

    #[test]
    fn test_partial_config_uses_section_defaults() {
        let config = Config::from_toml_str(
            r#"
            [gate]
            store = "memory"
            approval_ttl_seconds = 3600

            [executor]
            mode = "command"
            firewall_binary = "iptables"
            chain = "INPUT"

            [reporting]
            store_reports = false
            structured_json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.gate.store, StoreKind::Memory);
        assert_eq!(config.executor.mode, ExecutorMode::Command);
        assert_eq!(config.approval_ttl(), Some(time::Duration::hours(1)));
        assert_eq!(config.logging.level, "info");
        assert!(config.tags.is_empty());
    }

    #[test]
    fn test_resolve_tag() {
        let config = Config::default_config();
        assert_eq!(config.resolve_tag("checkout").unwrap(), Tag::new("app:checkout"));
        assert_eq!(config.resolve_tag("db:other").unwrap(), Tag::new("db:other"));
        assert!(config.resolve_tag("nowhere").is_err());
    }

    #[test]
    fn test_rules_path_falls_back_to_data_dir() {
        let paths = ConfigPaths::under(Path::new("/tmp/cfg"), Path::new("/tmp/data"));
        let mut config = Config::default_config();
        assert_eq!(config.rules_path(&paths), PathBuf::from("/tmp/data/rules.json"));
        config.gate.rules_path = Some(PathBuf::from("/etc/portwarden/review_list.json"));
        assert_eq!(
            config.rules_path(&paths),
            PathBuf::from("/etc/portwarden/review_list.json")
        );
    }
}
