use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clock::Clock;
use crate::target::{DEFAULT_COLLECTION, DEFAULT_DATABASE, RunMode, TargetIdentity};

pub const ENV_MONGODB_URI: &str = "MONGODB_URI";
pub const ENV_LOGGER_DB: &str = "MONGODB_LOGGER_DB";
pub const ENV_LOGGER_COLLECTION: &str = "MONGODB_LOGGER_COLLECTION";

pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";

const APP_DIR: &str = "mongo-logger-bootstrap";

/// Expand environment variables and tilde in a path string.
/// Supports: $HOME, ${VAR}, ~/path
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// Acknowledgment level requested for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteConcernLevel {
    #[default]
    Majority,
    Nodes(u32),
}

/// Everything the connection manager needs to open a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub uri: String,
    pub max_pool_size: u32,
    pub server_selection_timeout: Duration,
    pub connect_timeout: Duration,
    /// Upper bound for every individual network call after connecting.
    pub socket_timeout: Duration,
    pub max_idle_time: Duration,
    pub write_concern: WriteConcernLevel,
    pub retry_writes: bool,
}

impl ConnectionParameters {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            max_pool_size: 10,
            server_selection_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            socket_timeout: Duration::from_secs(10),
            max_idle_time: Duration::from_secs(30),
            write_concern: WriteConcernLevel::Majority,
            retry_writes: true,
        }
    }
}

/// Optional on-disk configuration. Every field falls back to the
/// environment and then to built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub mongodb_uri: Option<String>,

    /// Production database name
    #[serde(default)]
    pub database_name: Option<String>,

    /// Production collection name
    #[serde(default)]
    pub collection_name: Option<String>,

    #[serde(default)]
    pub max_pool_size: Option<u32>,

    #[serde(default)]
    pub server_selection_timeout_ms: Option<u64>,

    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default)]
    pub socket_timeout_ms: Option<u64>,

    #[serde(default)]
    pub max_idle_time_ms: Option<u64>,

    /// `majority` or `nodes: <n>`
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub write_concern: Option<WriteConcernLevel>,

    #[serde(default)]
    pub retry_writes: Option<bool>,

    /// Where the published artifacts are written (default: current directory)
    #[serde(default)]
    pub output_dir: Option<String>,
}

impl FileConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self =
            serde_yaml::from_str(content).context("Failed to parse config file")?;
        if let Some(dir) = &config.output_dir {
            config.output_dir = Some(expand_path(dir));
        }
        Ok(config)
    }
}

/// Values supplied on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mongo_uri: Option<String>,
    pub production: bool,
    pub config_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Resolved configuration for one bootstrap run. Built once at start-up and
/// passed down explicitly; no component reads the environment itself.
#[derive(Debug, Clone)]
pub struct Config {
    pub connection: ConnectionParameters,
    pub mode: RunMode,
    /// Names used in production mode.
    pub production_target: TargetIdentity,
    pub output_dir: PathBuf,
}

impl Config {
    pub fn config_file() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR)
            .join("config.yaml"))
    }

    /// Load the optional config file and merge it with the process
    /// environment and the command line.
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let file = match &overrides.config_path {
            Some(path) => {
                let path = PathBuf::from(expand_path(&path.to_string_lossy()));
                if !path.exists() {
                    bail!("Configuration file not found: {}", path.display());
                }
                Some(Self::read_file(&path)?)
            }
            None => {
                let path = Self::config_file()?;
                if path.exists() {
                    Some(Self::read_file(&path)?)
                } else {
                    tracing::debug!("No config file at {}, using defaults", path.display());
                    None
                }
            }
        };

        Self::resolve(file.unwrap_or_default(), |key| std::env::var(key).ok(), overrides)
    }

    fn read_file(path: &Path) -> Result<FileConfig> {
        tracing::info!("Configuration loaded from {}", path.display());
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        FileConfig::parse(&content)
    }

    /// Merge sources with precedence: command line, environment, file, defaults.
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> Result<Self> {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let uri = overrides
            .mongo_uri
            .clone()
            .or_else(|| non_empty(ENV_MONGODB_URI))
            .or(file.mongodb_uri)
            .unwrap_or_else(|| DEFAULT_MONGODB_URI.to_string());

        if uri.trim().is_empty() {
            bail!("MongoDB URI must not be empty");
        }

        let mode = if overrides.production {
            RunMode::Production
        } else {
            RunMode::Test
        };

        let production_target = TargetIdentity::new(
            non_empty(ENV_LOGGER_DB)
                .or(file.database_name)
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            non_empty(ENV_LOGGER_COLLECTION)
                .or(file.collection_name)
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
        );

        let mut connection = ConnectionParameters::new(uri);
        if let Some(size) = file.max_pool_size {
            if size == 0 {
                bail!("max_pool_size must be greater than 0");
            }
            connection.max_pool_size = size;
        }
        if let Some(ms) = file.server_selection_timeout_ms {
            connection.server_selection_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.connect_timeout_ms {
            connection.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.socket_timeout_ms {
            connection.socket_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.max_idle_time_ms {
            connection.max_idle_time = Duration::from_millis(ms);
        }
        if let Some(level) = file.write_concern {
            connection.write_concern = level;
        }
        if let Some(retry) = file.retry_writes {
            connection.retry_writes = retry;
        }

        let output_dir = overrides
            .output_dir
            .clone()
            .or_else(|| file.output_dir.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            connection,
            mode,
            production_target,
            output_dir,
        })
    }

    /// The database/collection this run will provision.
    pub fn target(&self, clock: &dyn Clock) -> TargetIdentity {
        match self.mode {
            RunMode::Test => TargetIdentity::for_test_run(clock),
            RunMode::Production => self.production_target.clone(),
        }
    }
}
