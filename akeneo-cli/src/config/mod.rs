//! Configuration loading
//!
//! Connection settings for the two PIM instances come from a TOML file
//! (`--config` or the platform config directory), with environment variables
//! taking precedence over the file so credentials can stay out of it
//! entirely. `.env` files are honored via dotenvy at startup.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Default number of changed entities requested per page.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Connection settings for one Akeneo instance
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub host: String,
    pub client_id: String,
    pub secret: String,
    pub username: String,
    pub password: String,
}

/// Engine tuning settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub batch_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Fully-resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub source: InstanceConfig,
    pub destination: InstanceConfig,
    pub sync: SyncSettings,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    source: RawInstance,
    #[serde(default)]
    destination: RawInstance,
    #[serde(default)]
    sync: SyncSettings,
}

#[derive(Debug, Default, Deserialize)]
struct RawInstance {
    host: Option<String>,
    client_id: Option<String>,
    secret: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl Config {
    /// Load configuration from `path` (or the default location when `None`),
    /// then apply environment overrides. A missing file is fine as long as
    /// the environment provides every required field.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut raw = match path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("failed to parse config file: {}", path.display()))?
            }
            None => match default_config_path() {
                Some(default) if default.exists() => {
                    let content = fs::read_to_string(&default).with_context(|| {
                        format!("failed to read config file: {}", default.display())
                    })?;
                    toml::from_str(&content).with_context(|| {
                        format!("failed to parse config file: {}", default.display())
                    })?
                }
                _ => RawConfig::default(),
            },
        };

        apply_env_overrides(&mut raw.source, "AKENEO_SOURCE");
        apply_env_overrides(&mut raw.destination, "AKENEO_DESTINATION");
        if let Ok(batch) = env::var("AKENEO_SYNC_BATCH_SIZE") {
            raw.sync.batch_size = batch
                .parse()
                .context("AKENEO_SYNC_BATCH_SIZE is not a number")?;
        }

        Ok(Self {
            source: resolve_instance(raw.source, "source")?,
            destination: resolve_instance(raw.destination, "destination")?,
            sync: raw.sync,
        })
    }
}

/// `<config dir>/akeneo-cli/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("akeneo-cli").join("config.toml"))
}

fn apply_env_overrides(raw: &mut RawInstance, prefix: &str) {
    let fields: [(&str, &mut Option<String>); 5] = [
        ("HOST", &mut raw.host),
        ("CLIENT_ID", &mut raw.client_id),
        ("SECRET", &mut raw.secret),
        ("USERNAME", &mut raw.username),
        ("PASSWORD", &mut raw.password),
    ];
    for (name, slot) in fields {
        if let Ok(value) = env::var(format!("{}_{}", prefix, name)) {
            if !value.is_empty() {
                *slot = Some(value);
            }
        }
    }
}

fn resolve_instance(raw: RawInstance, section: &str) -> Result<InstanceConfig> {
    let mut missing = Vec::new();
    let mut require = |field: &'static str, value: Option<String>| {
        if value.as_deref().map(str::is_empty).unwrap_or(true) {
            missing.push(field);
        }
        value.unwrap_or_default()
    };

    let instance = InstanceConfig {
        host: require("host", raw.host),
        client_id: require("client_id", raw.client_id),
        secret: require("secret", raw.secret),
        username: require("username", raw.username),
        password: require("password", raw.password),
    };

    if !missing.is_empty() {
        bail!(
            "incomplete [{}] configuration: missing {}",
            section,
            missing.join(", ")
        );
    }

    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> tempfile_path::TempConfig {
        tempfile_path::TempConfig::new(content)
    }

    // Minimal self-cleaning temp file helper for config tests
    mod tempfile_path {
        use std::io::Write;
        use std::path::PathBuf;

        pub struct TempConfig {
            pub path: PathBuf,
        }

        impl TempConfig {
            pub fn new(content: &str) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "akeneo-cli-test-{}-{:?}.toml",
                    std::process::id(),
                    std::thread::current().id()
                ));
                let mut file = std::fs::File::create(&path).unwrap();
                file.write_all(content.as_bytes()).unwrap();
                Self { path }
            }
        }

        impl Drop for TempConfig {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    const FULL_CONFIG: &str = r#"
[source]
host = "https://source.pim.example"
client_id = "src-id"
secret = "src-secret"
username = "src-user"
password = "src-pass"

[destination]
host = "https://dest.pim.example"
client_id = "dst-id"
secret = "dst-secret"
username = "dst-user"
password = "dst-pass"

[sync]
batch_size = 50
"#;

    #[test]
    fn test_load_full_config() {
        let file = write_config(FULL_CONFIG);

        let config = Config::load(Some(file.path.as_path())).unwrap();

        assert_eq!(config.source.host, "https://source.pim.example");
        assert_eq!(config.destination.username, "dst-user");
        assert_eq!(config.sync.batch_size, 50);
    }

    #[test]
    fn test_batch_size_defaults_when_absent() {
        let without_sync = FULL_CONFIG
            .replace("[sync]\nbatch_size = 50\n", "");
        let file = write_config(&without_sync);

        let config = Config::load(Some(file.path.as_path())).unwrap();
        assert_eq!(config.sync.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_missing_fields_are_reported_by_name() {
        let file = write_config(
            r#"
[source]
host = "https://source.pim.example"

[destination]
host = "https://dest.pim.example"
client_id = "dst-id"
secret = "dst-secret"
username = "dst-user"
password = "dst-pass"
"#,
        );

        let err = Config::load(Some(file.path.as_path())).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("[source]"));
        assert!(message.contains("client_id"));
        assert!(message.contains("password"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(FULL_CONFIG);

        // No other test asserts on destination.secret, so the temporary
        // override cannot race a parallel config load
        std::env::set_var("AKENEO_DESTINATION_SECRET", "env-secret");
        let config = Config::load(Some(file.path.as_path())).unwrap();
        std::env::remove_var("AKENEO_DESTINATION_SECRET");

        assert_eq!(config.destination.secret, "env-secret");
        assert_eq!(config.destination.username, "dst-user");
    }
}
