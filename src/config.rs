//! irods-ops configuration — layered TOML files, env overrides, validation.
//!
//! Files are read from the system, user and project locations in that order;
//! each later layer overrides matching keys of the earlier ones, table by
//! table. The merged result is immutable for the lifetime of the process.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::Table;

use crate::error::OpsError;

pub const CONFIG_FILE_NAME: &str = "irods-ops.toml";

/// Environment variable holding the broker URI for rule-execution publishers.
pub const AMQP_URI_ENV: &str = "IRODS_AMQP_URI";

/// Strip an env var reference to its variable name.
///
/// Accepts `${VAR_NAME}` syntax only. Returns `None` if the value is not a
/// valid env-var reference.
pub fn parse_env_ref(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Resolve a `${VAR}` reference to the variable's value; literals pass through.
/// Unknown variables resolve to the empty string (same as shell `${UNSET-}`).
pub fn resolve_env_ref(value: &str) -> String {
    match parse_env_ref(value) {
        Some(var_name) => std::env::var(var_name).unwrap_or_default(),
        None => value.to_string(),
    }
}

/// Top-level configuration shared by every tool.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub amqp: AmqpConfig,
    pub mail: MailConfig,
    pub bisque: BisqueConfig,
    pub irods_http: IrodsHttpConfig,
}

/// Message broker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpConfig {
    /// Broker URI; `IRODS_AMQP_URI` takes precedence when set.
    pub uri: Option<String>,
    /// Exchange used by publishers that declare their own exchange.
    pub exchange: String,
    pub connect_timeout_secs: u64,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            uri: None,
            exchange: "irods".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

/// SMTP relay settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 25,
            timeout_secs: 30,
        }
    }
}

/// BisQue catalog defaults for `bisque-ops`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BisqueConfig {
    pub host: String,
    pub admin_user: String,
    pub admin_pass: String,
    /// Prefix for bare iRODS paths in compatible mode.
    pub irods_host: String,
    pub log_file: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for BisqueConfig {
    fn default() -> Self {
        Self {
            host: "https://loup.ece.ucsb.edu".to_string(),
            admin_user: "admin".to_string(),
            admin_pass: "admin".to_string(),
            irods_host: "irods://mokie.iplantcollaborative.org".to_string(),
            log_file: Some(PathBuf::from("/tmp/bisque_insert.log")),
            timeout_secs: 60,
        }
    }
}

/// iRODS HTTP API settings used by the user task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IrodsHttpConfig {
    pub base_path: String,
    /// HTTP API port; when unset the task's `port` is used.
    pub port: Option<u16>,
    pub tls: bool,
    pub timeout_secs: u64,
}

impl Default for IrodsHttpConfig {
    fn default() -> Self {
        Self {
            base_path: "/irods-http-api/0.5.0".to_string(),
            port: None,
            tls: true,
            timeout_secs: 30,
        }
    }
}

/// Config file locations, lowest precedence first: system, user, project.
pub fn default_layers() -> Vec<PathBuf> {
    let mut layers = vec![PathBuf::from("/etc/irods-ops").join(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        layers.push(config_dir.join("irods-ops").join(CONFIG_FILE_NAME));
    }
    layers.push(PathBuf::from(CONFIG_FILE_NAME));
    layers
}

/// Recursively overlay `overlay` onto `base`; nested tables merge, other values replace.
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                    continue;
                }
                base.insert(key, toml::Value::Table(incoming));
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

fn read_layer(path: &Path) -> crate::Result<Option<Table>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(OpsError::InvalidConfig(
                path.display().to_string(),
                format!("unreadable: {}", e),
            ));
        }
    };
    let table = toml::from_str::<Table>(&content)
        .map_err(|e| OpsError::InvalidConfig(path.display().to_string(), e.to_string()))?;
    Ok(Some(table))
}

impl OpsConfig {
    /// Load the default layers, apply environment overrides and validate.
    pub fn load() -> crate::Result<Self> {
        let mut config = Self::from_layers(&default_layers())?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Merge the given files, lowest precedence first. Missing files are skipped.
    pub fn from_layers(paths: &[PathBuf]) -> crate::Result<Self> {
        let mut merged = Table::new();
        for path in paths {
            if let Some(layer) = read_layer(path)? {
                tracing::debug!(path = %path.display(), "loaded config layer");
                merge_tables(&mut merged, layer);
            }
        }
        let mut config: OpsConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| {
                OpsError::InvalidConfig(CONFIG_FILE_NAME.to_string(), e.to_string())
            })?;
        config.resolve_env_refs();
        Ok(config)
    }

    /// Environment variables override file values.
    pub fn apply_env(&mut self) {
        if let Ok(uri) = std::env::var(AMQP_URI_ENV) {
            if !uri.is_empty() {
                self.amqp.uri = Some(uri);
            }
        }
    }

    fn resolve_env_refs(&mut self) {
        if let Some(uri) = self.amqp.uri.as_mut() {
            *uri = resolve_env_ref(uri);
        }
        self.bisque.admin_pass = resolve_env_ref(&self.bisque.admin_pass);
    }

    /// Validate the config, failing fast before any connection is attempted.
    pub fn validate(&self) -> crate::Result<()> {
        if self.amqp.exchange.is_empty() {
            return Err(OpsError::InvalidConfig(
                "amqp".to_string(),
                "exchange must be non-empty".to_string(),
            ));
        }
        if self.amqp.connect_timeout_secs == 0 {
            return Err(OpsError::InvalidConfig(
                "amqp".to_string(),
                "connect_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.mail.host.is_empty() || self.mail.port == 0 {
            return Err(OpsError::InvalidConfig(
                "mail".to_string(),
                "host must be non-empty and port must be > 0".to_string(),
            ));
        }
        if !(self.bisque.host.starts_with("http://") || self.bisque.host.starts_with("https://"))
        {
            return Err(OpsError::InvalidConfig(
                "bisque".to_string(),
                format!("host must be an http(s) URL, got '{}'", self.bisque.host),
            ));
        }
        if !self.irods_http.base_path.starts_with('/') {
            return Err(OpsError::InvalidConfig(
                "irods_http".to_string(),
                format!(
                    "base_path must start with '/', got '{}'",
                    self.irods_http.base_path
                ),
            ));
        }
        Ok(())
    }
}
