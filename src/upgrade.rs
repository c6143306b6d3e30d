//! `upgrade-config-files`: bring iRODS JSON configuration files up to the
//! configuration schema version named in `VERSION.json.dist`.
//!
//! Each file whose `schema_version` is older than the target has its
//! `schema_version` and the version segment of its `$schema` URL rewritten.
//! The original is kept next to it with a `.prev` suffix. Files already at
//! the target version are left untouched.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::OpsError;
use crate::invocation::Invocation;
use crate::runner::{
    Connector, ExitContract, ExitStatus, Operation, ResourceHandle, Streams, ToolSpec,
    run_single_shot,
};

pub const DEFAULT_VERSION_FILE: &str = "/var/lib/irods/VERSION.json.dist";
pub const DEFAULT_SERVER_CONFIG: &str = "/etc/irods/server_config.json";
pub const DEFAULT_HOSTS_CONFIG: &str = "/etc/irods/hosts_config.json";
pub const DEFAULT_HOST_ACCESS_CONTROL_CONFIG: &str = "/etc/irods/host_access_control_config.json";
pub const DEFAULT_IRODS_ENVIRONMENT: &str = "/var/lib/irods/.irods/irods_environment.json";

/// Schema the service account environment file is validated against.
pub const ENVIRONMENT_SCHEMA_NAME: &str = "service_account_environment";

const SCHEMA_BASE_URL: &str = "https://schemas.irods.org/configuration";

/// Matches the `/vN/` segment of a `$schema` URL.
fn schema_version_segment() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/v\d+/").expect("valid regex"))
}

/// The release being upgraded from.
fn previous_version() -> Value {
    json!({
        "schema_name": "VERSION",
        "schema_version": "v2",
        "irods_version": "4.1.10",
        "commit_id": "bb48cd38c4a543ad8bf45082fa06b15290378b50",
        "catalog_schema_version": 4,
        "configuration_schema_version": 2
    })
}

/// Files touched by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePaths {
    pub version_file: PathBuf,
    pub server_config: PathBuf,
    pub hosts_config: PathBuf,
    pub host_access_control_config: PathBuf,
    pub irods_environment: PathBuf,
}

impl Default for UpgradePaths {
    fn default() -> Self {
        Self {
            version_file: PathBuf::from(DEFAULT_VERSION_FILE),
            server_config: PathBuf::from(DEFAULT_SERVER_CONFIG),
            hosts_config: PathBuf::from(DEFAULT_HOSTS_CONFIG),
            host_access_control_config: PathBuf::from(DEFAULT_HOST_ACCESS_CONTROL_CONFIG),
            irods_environment: PathBuf::from(DEFAULT_IRODS_ENVIRONMENT),
        }
    }
}

fn parse_version(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim_start_matches('v').parse().ok(),
        _ => None,
    }
}

fn read_json(path: &Path) -> crate::Result<Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| OpsError::Io(path.display().to_string(), e.to_string()))?;
    serde_json::from_str(&text)
        .map_err(|e| OpsError::Operation(format!("{} is not valid JSON: {}", path.display(), e)))
}

/// Four-space indented JSON with a trailing newline.
fn to_pretty_json(value: &Value) -> crate::Result<String> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| OpsError::Unexpected(e.to_string()))?;
    out.push(b'\n');
    String::from_utf8(out).map_err(|e| OpsError::Unexpected(e.to_string()))
}

/// The loaded `VERSION.json.dist`, annotated with the previous release.
pub struct VersionStore {
    version: Value,
    source: PathBuf,
}

impl VersionStore {
    pub fn target_schema_version(&self) -> crate::Result<u64> {
        self.version
            .get("configuration_schema_version")
            .and_then(parse_version)
            .ok_or_else(|| {
                OpsError::Operation(format!(
                    "{} has no configuration_schema_version",
                    self.source.display()
                ))
            })
    }

    fn previous_schema_version(&self) -> u64 {
        self.version
            .pointer("/previous_version/configuration_schema_version")
            .and_then(parse_version)
            .unwrap_or(0)
    }
}

/// Reads the version file.
pub struct VersionFileConnector {
    path: PathBuf,
}

#[async_trait]
impl Connector for VersionFileConnector {
    type Handle = VersionStore;

    fn target(&self) -> String {
        self.path.display().to_string()
    }

    async fn acquire(&self) -> crate::Result<VersionStore> {
        let mut version = read_json(&self.path)?;
        let Some(fields) = version.as_object_mut() else {
            return Err(OpsError::Operation(format!(
                "{} must hold a JSON object",
                self.path.display()
            )));
        };
        fields.insert("previous_version".to_string(), previous_version());
        Ok(VersionStore {
            version,
            source: self.path.clone(),
        })
    }
}

#[async_trait]
impl ResourceHandle for VersionStore {
    async fn release(self) {
        tracing::debug!(path = %self.source.display(), "version store closed");
    }
}

/// Rewrite `doc` to schema version `target`. Returns false when it is already current.
pub fn upgrade_document(
    doc: &mut Map<String, Value>,
    target: u64,
    fallback_version: u64,
    schema_name: &str,
) -> bool {
    let current = doc
        .get("schema_version")
        .and_then(parse_version)
        .unwrap_or(fallback_version);
    if current >= target {
        return false;
    }

    let version = format!("v{}", target);
    let schema = match doc.get("$schema").and_then(Value::as_str) {
        Some(url) if schema_version_segment().is_match(url) => schema_version_segment()
            .replace(url, format!("/{}/", version).as_str())
            .into_owned(),
        _ => format!("{}/{}/{}.json", SCHEMA_BASE_URL, version, schema_name),
    };
    doc.insert("schema_version".to_string(), Value::String(version));
    doc.insert("$schema".to_string(), Value::String(schema));
    true
}

/// Upgrade one file in place, keeping `<file>.prev`. `schema_name` defaults to
/// the file stem.
pub fn upgrade_config_file(
    store: &VersionStore,
    path: &Path,
    schema_name: Option<&str>,
) -> crate::Result<bool> {
    let target = store.target_schema_version()?;
    let original = std::fs::read_to_string(path)
        .map_err(|e| OpsError::Io(path.display().to_string(), e.to_string()))?;
    let mut doc: Value = serde_json::from_str(&original)
        .map_err(|e| OpsError::Operation(format!("{} is not valid JSON: {}", path.display(), e)))?;
    let Some(fields) = doc.as_object_mut() else {
        return Err(OpsError::Operation(format!(
            "{} must hold a JSON object",
            path.display()
        )));
    };

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let schema_name = schema_name.unwrap_or(&stem);
    if !upgrade_document(fields, target, store.previous_schema_version(), schema_name) {
        tracing::info!(path = %path.display(), target, "already current");
        return Ok(false);
    }

    let mut backup = path.as_os_str().to_owned();
    backup.push(".prev");
    std::fs::write(&backup, &original)
        .map_err(|e| OpsError::Io(PathBuf::from(&backup).display().to_string(), e.to_string()))?;
    std::fs::write(path, to_pretty_json(&doc)?)
        .map_err(|e| OpsError::Io(path.display().to_string(), e.to_string()))?;
    tracing::info!(path = %path.display(), target, "upgraded");
    Ok(true)
}

/// Upgrade the server, hosts, access control and environment files in that order.
pub struct UpgradeConfigFiles {
    files: Vec<(PathBuf, Option<&'static str>)>,
}

impl UpgradeConfigFiles {
    pub fn new(paths: &UpgradePaths) -> Self {
        Self {
            files: vec![
                (paths.server_config.clone(), None),
                (paths.hosts_config.clone(), None),
                (paths.host_access_control_config.clone(), None),
                (paths.irods_environment.clone(), Some(ENVIRONMENT_SCHEMA_NAME)),
            ],
        }
    }
}

#[async_trait]
impl Operation<VersionStore> for UpgradeConfigFiles {
    type Output = String;

    async fn perform(&self, store: &mut VersionStore) -> crate::Result<String> {
        for (path, schema_name) in &self.files {
            upgrade_config_file(store, path, *schema_name)?;
        }
        Ok(String::new())
    }
}

fn describe_upgrade_failure(_: &Invocation, err: &OpsError) -> String {
    err.to_string()
}

pub const UPGRADE_CONFIG_FILES: ToolSpec = ToolSpec {
    name: "upgrade-config-files",
    usage: "usage: upgrade-config-files [OPTIONS]",
    fields: &[],
    contract: ExitContract::Propagate,
    describe_failure: describe_upgrade_failure,
};

pub async fn upgrade_config_files(paths: &UpgradePaths, streams: &mut Streams<'_>) -> ExitStatus {
    run_single_shot(&UPGRADE_CONFIG_FILES, &Invocation::default(), streams, |_| {
        let connector = VersionFileConnector {
            path: paths.version_file.clone(),
        };
        Ok((connector, UpgradeConfigFiles::new(paths)))
    })
    .await
}
