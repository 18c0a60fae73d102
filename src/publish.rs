//! Artifacts handed to the downstream tool-execution logger.
//!
//! Two files with fixed names are written side by side: a JSON document with
//! the full run configuration, and a shell snippet exporting the three
//! variables the logger reads at start-up.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{
    ConnectionParameters, ENV_LOGGER_COLLECTION, ENV_LOGGER_DB, ENV_MONGODB_URI, WriteConcernLevel,
};
use crate::error::PublishError;
use crate::indexes::IndexSpec;
use crate::status::ConnectionStatus;
use crate::target::{RunMode, TargetIdentity};

pub const CONFIG_FILE_NAME: &str = "mongo_logger_config.json";
pub const ENV_FILE_NAME: &str = "mongo_logger_env.sh";

/// Client options the consumer should mirror. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionOptions {
    pub max_pool_size: u32,
    pub server_selection_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub max_idle_time_ms: u64,
    pub write_concern: WriteConcernLevel,
    pub retry_writes: bool,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl From<&ConnectionParameters> for ConnectionOptions {
    fn from(params: &ConnectionParameters) -> Self {
        Self {
            max_pool_size: params.max_pool_size,
            server_selection_timeout_ms: millis(params.server_selection_timeout),
            connect_timeout_ms: millis(params.connect_timeout),
            socket_timeout_ms: millis(params.socket_timeout),
            max_idle_time_ms: millis(params.max_idle_time),
            write_concern: params.write_concern,
            retry_writes: params.retry_writes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedConfig {
    pub mongodb_uri: String,
    pub database_name: String,
    pub collection_name: String,
    pub test_mode: bool,
    pub connection_options: ConnectionOptions,
    /// Index names the consumer may rely on.
    pub index_catalog: Vec<String>,
    pub connection_info: ConnectionStatus,
    pub bootstrap_timestamp: DateTime<FixedOffset>,
}

impl PublishedConfig {
    pub fn new(
        params: &ConnectionParameters,
        target: &TargetIdentity,
        mode: RunMode,
        catalog: &[IndexSpec],
        status: ConnectionStatus,
        published_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            mongodb_uri: params.uri.clone(),
            database_name: target.database_name.clone(),
            collection_name: target.collection_name.clone(),
            test_mode: mode.is_test(),
            connection_options: ConnectionOptions::from(params),
            index_catalog: catalog.iter().map(IndexSpec::identifier).collect(),
            connection_info: status,
            bootstrap_timestamp: published_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifactPaths {
    pub config_file: PathBuf,
    pub env_file: PathBuf,
}

/// Quote a value for POSIX shells: single quotes, with embedded single
/// quotes closed, escaped and reopened.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub fn render_env_exports(config: &PublishedConfig) -> String {
    format!(
        "# MongoDB Logger Configuration (generated by mongo-logger-bootstrap)\n\
         export {ENV_MONGODB_URI}={}\n\
         export {ENV_LOGGER_DB}={}\n\
         export {ENV_LOGGER_COLLECTION}={}\n",
        shell_quote(&config.mongodb_uri),
        shell_quote(&config.database_name),
        shell_quote(&config.collection_name),
    )
}

fn write_artifact(path: PathBuf, content: &str) -> Result<PathBuf, PublishError> {
    fs::write(&path, content).map_err(|source| PublishError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Write both artifacts into `output_dir`. Nothing already done by earlier
/// stages is undone when this fails.
pub fn publish(
    config: &PublishedConfig,
    output_dir: &Path,
) -> Result<PublishedArtifactPaths, PublishError> {
    let json = serde_json::to_string_pretty(config).map_err(PublishError::Serialize)?;
    let config_file = write_artifact(output_dir.join(CONFIG_FILE_NAME), &json)?;
    tracing::info!("Configuration exported to {}", config_file.display());

    let env_file = write_artifact(output_dir.join(ENV_FILE_NAME), &render_env_exports(config))?;
    tracing::info!("Environment exports saved to {}", env_file.display());

    Ok(PublishedArtifactPaths {
        config_file,
        env_file,
    })
}
