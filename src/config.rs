// ABOUTME: Loads connection profiles and backup jobs from a YAML or TOML file
// ABOUTME: Substitutes ${VAR} references and validates every job before the run starts

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::error::ArchiverError;
use crate::registry::ConnectionProfile;

pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_PURGE_BATCH_LIMIT: u64 = 1000;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// One backup unit: dump a database or table, upload it, optionally purge the archived rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub database: String,
    /// `None` dumps the whole database.
    pub table: Option<String>,
    /// Raw filter expression scoping both the dump and the purge.
    pub row_predicate: String,
    pub local_output_dir: PathBuf,
    pub remote_dir: String,
    pub remote_bucket: String,
    pub auto_purge: bool,
    pub purge_batch_limit: u64,
    pub dump_connection: String,
    pub purge_connection: String,
}

impl JobSpec {
    /// Human readable job identity used in logs and reports.
    pub fn label(&self) -> String {
        match &self.table {
            Some(table) => format!("{}.{}", self.database, table),
            None => self.database.clone(),
        }
    }

    pub fn has_predicate(&self) -> bool {
        !self.row_predicate.trim().is_empty()
    }

    /// Leading segment of the artifact file name. Whole-database dumps use the database name.
    pub fn artifact_stem(&self) -> &str {
        self.table.as_deref().unwrap_or(self.database.as_str())
    }
}

/// Object storage client settings shared by all jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default, alias = "force_path_style")]
    pub force_path_style: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub connections: Vec<ConnectionProfile>,
    pub jobs: Vec<JobSpec>,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

// Ports and batch limits were historically written as strings in config files.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

impl NumberOrString {
    fn parse(&self) -> Option<u64> {
        match self {
            NumberOrString::Number(n) => Some(*n),
            NumberOrString::Text(s) => s.trim().parse().ok(),
        }
    }

    fn raw(&self) -> String {
        match self {
            NumberOrString::Number(n) => n.to_string(),
            NumberOrString::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "dbConfig", alias = "db_config", default)]
    db_config: Vec<RawConnection>,
    #[serde(rename = "dumpConfig", alias = "dump_config", default)]
    dump_config: Vec<RawJob>,
    #[serde(default)]
    storage: StorageSettings,
}

#[derive(Debug, Deserialize)]
struct RawConnection {
    #[serde(rename = "connectionName", alias = "connection_name")]
    connection_name: String,
    host: String,
    port: Option<NumberOrString>,
    #[serde(rename = "userName", alias = "user_name")]
    user_name: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
struct RawJob {
    #[serde(rename = "dbName", alias = "db_name")]
    db_name: String,
    #[serde(rename = "tableName", alias = "table_name", default)]
    table_name: String,
    #[serde(rename = "whereOperation", alias = "where_operation", default)]
    where_operation: String,
    #[serde(rename = "backFilePath", alias = "back_file_path", default)]
    back_file_path: String,
    #[serde(rename = "s3BackDir", alias = "s3_back_dir", default)]
    s3_back_dir: String,
    #[serde(rename = "s3Bucket", alias = "s3_bucket", default)]
    s3_bucket: String,
    #[serde(rename = "autoDelete", alias = "auto_delete", default)]
    auto_delete: bool,
    #[serde(rename = "deleteLimit", alias = "delete_limit")]
    delete_limit: Option<NumberOrString>,
    #[serde(rename = "dumpUseDb", alias = "dump_use_db", default)]
    dump_use_db: String,
    #[serde(rename = "deleteUseDb", alias = "delete_use_db")]
    delete_use_db: Option<String>,
}

/// Expand `${VAR_NAME}` references, recording every variable that is not set.
fn expand_env_refs(input: &str, missing: &mut Vec<String>) -> String {
    ENV_VAR_RE
        .replace_all(input, |caps: &regex::Captures| {
            match std::env::var(&caps[1]) {
                Ok(val) => val,
                Err(_) => {
                    missing.push(caps[1].to_string());
                    String::new()
                }
            }
        })
        .into_owned()
}

fn missing_vars_error(mut missing: Vec<String>) -> Result<()> {
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort();
    missing.dedup();
    bail!("Missing environment variable(s): {}", missing.join(", "))
}

// Only string leaves of the parsed document are expanded. Keys and comments never are.
fn substitute_yaml_strings(value: &mut serde_yaml::Value, missing: &mut Vec<String>) {
    match value {
        serde_yaml::Value::String(s) => *s = expand_env_refs(s, missing),
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                substitute_yaml_strings(item, missing);
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                substitute_yaml_strings(item, missing);
            }
        }
        serde_yaml::Value::Tagged(tagged) => substitute_yaml_strings(&mut tagged.value, missing),
        _ => {}
    }
}

fn substitute_toml_strings(value: &mut toml::Value, missing: &mut Vec<String>) {
    match value {
        toml::Value::String(s) => *s = expand_env_refs(s, missing),
        toml::Value::Array(items) => {
            for item in items {
                substitute_toml_strings(item, missing);
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                substitute_toml_strings(item, missing);
            }
        }
        _ => {}
    }
}

/// Parse and validate a configuration document.
pub fn parse_config_str(content: &str, format: ConfigFormat) -> Result<Config> {
    let mut missing = Vec::new();
    let raw: RawConfig = match format {
        ConfigFormat::Yaml => {
            let mut value: serde_yaml::Value =
                serde_yaml::from_str(content).context("Failed to parse YAML config")?;
            substitute_yaml_strings(&mut value, &mut missing);
            missing_vars_error(missing)?;
            serde_yaml::from_value::<RawConfig>(value).context("Failed to parse YAML config")?
        }
        ConfigFormat::Toml => {
            let table: toml::Table =
                toml::from_str(content).context("Failed to parse TOML config")?;
            let mut value = toml::Value::Table(table);
            substitute_toml_strings(&mut value, &mut missing);
            missing_vars_error(missing)?;
            value
                .try_into::<RawConfig>()
                .context("Failed to parse TOML config")?
        }
    };
    validate(raw)
}

/// Load the configuration file. Any failure here is fatal to the whole run.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).with_context(|| {
        format!(
            "Failed to read config file {}. Pass --config with the path to your config.yml",
            path.display()
        )
    })?;
    parse_config_str(&content, ConfigFormat::from_path(path))
        .with_context(|| format!("Invalid config file {}", path.display()))
}

fn validate(raw: RawConfig) -> Result<Config> {
    let mut errors = Vec::new();

    let mut connections = Vec::with_capacity(raw.db_config.len());
    for (idx, conn) in raw.db_config.into_iter().enumerate() {
        let context = format!("dbConfig[{}]", idx);
        let name = conn.connection_name.trim().to_string();
        if name.is_empty() {
            errors.push(format!("{context}: connectionName must not be empty"));
            continue;
        }
        if connections
            .iter()
            .any(|existing: &ConnectionProfile| existing.name == name)
        {
            errors.push(format!("{context}: duplicate connectionName '{name}'"));
            continue;
        }
        if conn.host.trim().is_empty() {
            errors.push(format!("{context} ({name}): host must not be empty"));
        }
        let port = match &conn.port {
            None => DEFAULT_MYSQL_PORT,
            Some(value) => match value.parse().and_then(|p| u16::try_from(p).ok()) {
                Some(p) if p > 0 => p,
                _ => {
                    errors.push(format!(
                        "{context} ({name}): invalid port '{}'",
                        value.raw()
                    ));
                    continue;
                }
            },
        };
        connections.push(ConnectionProfile {
            name,
            host: conn.host.trim().to_string(),
            port,
            username: conn.user_name,
            password: conn.password,
        });
    }

    if raw.dump_config.is_empty() {
        errors.push("dumpConfig must contain at least one job".to_string());
    }

    let mut jobs = Vec::with_capacity(raw.dump_config.len());
    for (idx, job) in raw.dump_config.into_iter().enumerate() {
        let context = format!("dumpConfig[{}]", idx);
        let database = job.db_name.trim().to_string();
        if database.is_empty() {
            errors.push(format!("{context}: dbName must not be empty"));
        }
        if job.s3_bucket.trim().is_empty() {
            errors.push(format!("{context}: s3Bucket must not be empty"));
        }
        let dump_connection = job.dump_use_db.trim().to_string();
        if dump_connection.is_empty() {
            errors.push(format!("{context}: dumpUseDb must not be empty"));
        }

        let purge_batch_limit = match &job.delete_limit {
            Some(value) => match value.parse() {
                Some(limit) if limit > 0 => limit,
                _ => {
                    errors.push(format!(
                        "{context}: deleteLimit must be a positive integer, got '{}'",
                        value.raw()
                    ));
                    continue;
                }
            },
            None if job.auto_delete => {
                errors.push(format!(
                    "{context}: deleteLimit is required when autoDelete is enabled"
                ));
                continue;
            }
            None => DEFAULT_PURGE_BATCH_LIMIT,
        };

        let purge_connection = job
            .delete_use_db
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| dump_connection.clone());

        let table = Some(job.table_name.trim().to_string()).filter(|t| !t.is_empty());
        if job.auto_delete && table.is_none() {
            errors.push(format!(
                "{context}: autoDelete requires tableName; whole-database dumps cannot be purged"
            ));
        }
        let local_output_dir = if job.back_file_path.trim().is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(job.back_file_path.trim())
        };

        jobs.push(JobSpec {
            database,
            table,
            row_predicate: job.where_operation,
            local_output_dir,
            remote_dir: job.s3_back_dir.trim().to_string(),
            remote_bucket: job.s3_bucket.trim().to_string(),
            auto_purge: job.auto_delete,
            purge_batch_limit,
            dump_connection,
            purge_connection,
        });
    }

    if !errors.is_empty() {
        return Err(ArchiverError::Config(errors.join("; ")).into());
    }

    Ok(Config {
        connections,
        jobs,
        storage: raw.storage,
    })
}
