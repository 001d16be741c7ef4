use std::path::Path;

use tracing_subscriber::EnvFilter;

use portwarden_core::config::{Config, ConfigPaths};

/// `RUST_LOG` wins; otherwise the configured level, falling back to `warn`
/// when no config can be read. Logs go to stderr so stdout stays parseable.
pub fn init(config_path: Option<&Path>) {
    let level = ConfigPaths::resolve()
        .and_then(|paths| Config::load_or_default(config_path, &paths))
        .map(|config| config.logging.level)
        .unwrap_or_else(|_| "warn".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
