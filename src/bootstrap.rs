//! The bootstrap pipeline: connect, provision, collect stats, publish.

use std::fmt::Write as _;

use crate::clock::Clock;
use crate::config::Config;
use crate::connection::{self, LiveConnection, redact_uri};
use crate::indexes;
use crate::provision::{self, ProvisionReport};
use crate::publish::{self, PublishedArtifactPaths, PublishedConfig};
use crate::stats::{self, CollectionStats};
use crate::status::ConnectionStatus;
use crate::store::LogStore;
use crate::target::TargetIdentity;

/// Everything a finished (or aborted) run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Connected, provisioned and published.
    pub success: bool,
    pub target: TargetIdentity,
    pub status: ConnectionStatus,
    pub report: Option<ProvisionReport>,
    pub stats: Option<CollectionStats>,
    pub artifacts: Option<PublishedArtifactPaths>,
}

impl RunOutcome {
    fn aborted(target: &TargetIdentity, status: ConnectionStatus) -> Self {
        Self {
            success: false,
            target: target.clone(),
            status,
            report: None,
            stats: None,
            artifacts: None,
        }
    }

    /// Human-readable end-of-run report.
    pub fn summary(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();

        let headline = if self.success {
            "MongoDB Logger Bootstrap Complete!"
        } else {
            "MongoDB Logger Bootstrap Failed"
        };
        let _ = writeln!(out, "{rule}\n{headline}\n{rule}");
        let _ = writeln!(out, "Database: {}", self.target.database_name);
        let _ = writeln!(out, "Collection: {}", self.target.collection_name);
        let _ = writeln!(out, "MongoDB URI: {}", redact_uri(&self.status.mongo_uri));

        if let Some(error) = self.status.error.as_ref().or(self.status.setup_error.as_ref()) {
            let _ = writeln!(out, "Error: {error}");
        }

        if let Some(report) = &self.report {
            let created = report.indexes.iter().filter(|o| o.succeeded()).count();
            let health = if report.fully_healthy() { "healthy" } else { "completed with warnings" };
            let _ = writeln!(out, "Provisioning: {health}");
            let _ = writeln!(out, "Indexes created: {created}/{}", report.indexes.len());
            match &report.verification {
                Ok(()) => {
                    let _ = writeln!(out, "Access verification: ok");
                }
                Err(e) => {
                    let _ = writeln!(out, "Access verification: FAILED ({e})");
                }
            }
        }

        if let Some(stats) = &self.stats {
            let _ = writeln!(out, "\nCollection Stats:");
            let _ = writeln!(out, "  Documents: {}", stats.document_count);
            let _ = writeln!(out, "  Indexes: {}", stats.index_count);
            let _ = writeln!(out, "  Size: {} bytes", stats.size_bytes);
        }

        if let Some(paths) = &self.artifacts {
            let _ = writeln!(out, "\nConfiguration files created:");
            let _ = writeln!(out, "  - {}", paths.config_file.display());
            let _ = writeln!(out, "  - {}", paths.env_file.display());
            let _ = writeln!(out, "\nTo use this configuration, run:");
            let _ = writeln!(out, "  source {}", paths.env_file.display());
        } else if let Some(error) = &self.status.publish_error {
            let _ = writeln!(out, "Publish: FAILED ({error})");
        }

        out
    }
}

/// One bootstrap run. Owns the connection from the moment it is opened
/// until [`Bootstrap::cleanup`].
pub struct Bootstrap {
    config: Config,
    clock: Box<dyn Clock>,
    target: TargetIdentity,
    connection: Option<LiveConnection>,
}

impl Bootstrap {
    /// The target identity is fixed here, once, for the lifetime of the run.
    pub fn new(config: Config, clock: Box<dyn Clock>) -> Self {
        let target = config.target(clock.as_ref());
        Self {
            config,
            clock,
            target,
            connection: None,
        }
    }

    /// Run only the connection manager.
    pub async fn test_connection(&mut self) -> bool {
        tracing::info!("Testing MongoDB connection...");
        match connection::connect(&self.config.connection, &mut self.connection).await {
            Ok(_) => {
                tracing::info!("MongoDB connection test successful!");
                true
            }
            Err(e) => {
                tracing::error!("{}", e);
                tracing::error!("MongoDB connection test failed!");
                false
            }
        }
    }

    /// Run the full pipeline. Stops at the first fatal stage and always
    /// returns the status gathered so far.
    pub async fn run(&mut self) -> RunOutcome {
        tracing::info!(
            "MongoDB Logger Bootstrap starting ({:?} mode, target {})",
            self.config.mode,
            self.target
        );

        let status = match connection::connect(&self.config.connection, &mut self.connection).await {
            Ok(conn) => ConnectionStatus::connected(
                &self.config.connection.uri,
                &self.target,
                conn.server_version().map(str::to_string),
                self.clock.now(),
            ),
            Err(e) => {
                tracing::error!("{}", e);
                tracing::error!("Bootstrap failed - Could not connect to MongoDB");
                let status = ConnectionStatus::failed(
                    &self.config.connection.uri,
                    &self.target,
                    e.to_string(),
                    self.clock.now(),
                );
                return RunOutcome::aborted(&self.target, status);
            }
        };

        self.provision_and_publish(status).await
    }

    /// Everything after the connection is confirmed.
    async fn provision_and_publish(&self, mut status: ConnectionStatus) -> RunOutcome {
        let Some(conn) = &self.connection else {
            status.setup_error = Some("No open MongoDB connection".to_string());
            return RunOutcome::aborted(&self.target, status);
        };

        let provisioned = provision::provision(
            conn,
            &self.target,
            self.config.mode,
            self.clock.as_ref(),
            &mut status,
        )
        .await;

        match provisioned {
            Ok((store, report)) => self.finish(&store, status, report).await,
            Err(e) => {
                tracing::error!("{}", e);
                tracing::error!("Bootstrap failed - Could not setup database/collection");
                RunOutcome::aborted(&self.target, status)
            }
        }
    }

    /// Stats and publishing, once a handle exists.
    async fn finish(
        &self,
        store: &dyn LogStore,
        mut status: ConnectionStatus,
        report: ProvisionReport,
    ) -> RunOutcome {
        if !status.indexes_healthy() {
            tracing::warn!(
                "{} of {} indexes could not be created",
                status.index_failures.len(),
                report.indexes.len()
            );
        }

        let stats = stats::collect_stats(store).await;

        let published = PublishedConfig::new(
            &self.config.connection,
            &self.target,
            self.config.mode,
            &indexes::catalog(),
            status.clone(),
            self.clock.now(),
        );

        let artifacts = match publish::publish(&published, &self.config.output_dir) {
            Ok(paths) => Some(paths),
            Err(e) => {
                let message = match std::error::Error::source(&e) {
                    Some(cause) => format!("{e}: {cause}"),
                    None => e.to_string(),
                };
                tracing::error!("Failed to export configuration: {}", message);
                status.publish_error = Some(message);
                None
            }
        };

        RunOutcome {
            success: artifacts.is_some(),
            target: self.target.clone(),
            status,
            report: Some(report),
            stats,
            artifacts,
        }
    }

    /// Release the connection if one is held. Safe to call more than once.
    pub async fn cleanup(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::{FileConfig, Overrides};
    use crate::publish::{CONFIG_FILE_NAME, ENV_FILE_NAME};
    use crate::store::memory::MemoryStore;
    use crate::target::RunMode;
    use chrono::DateTime;
    use std::path::Path;
    use std::time::Duration;

    fn clock() -> Box<dyn Clock> {
        Box::new(FixedClock(
            DateTime::parse_from_rfc3339("2026-10-15T09:30:05+02:00").unwrap(),
        ))
    }

    fn config(uri: &str, output_dir: &Path, production: bool) -> Config {
        let overrides = Overrides {
            mongo_uri: Some(uri.to_string()),
            production,
            output_dir: Some(output_dir.to_path_buf()),
            ..Default::default()
        };
        let mut config = Config::resolve(FileConfig::default(), |_| None, &overrides).unwrap();
        config.connection.server_selection_timeout = Duration::from_millis(300);
        config.connection.connect_timeout = Duration::from_millis(300);
        config
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_target_fixed_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let bootstrap = Bootstrap::new(config("mongodb://localhost:27017", dir.path(), false), clock());
        assert_eq!(bootstrap.target.database_name, "mcp_test_logs_20261015_093005");

        let bootstrap = Bootstrap::new(config("mongodb://localhost:27017", dir.path(), true), clock());
        assert_eq!(bootstrap.target.database_name, "mcp_tool_logs");
    }

    #[tokio::test]
    async fn test_unreachable_uri_fails_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut bootstrap = Bootstrap::new(
            config("mongodb://127.0.0.1:1/?directConnection=true", dir.path(), false),
            clock(),
        );

        let outcome = bootstrap.run().await;
        bootstrap.cleanup().await;

        assert!(!outcome.success);
        assert!(!outcome.status.is_connected());
        assert!(outcome.status.error.is_some());
        assert!(outcome.artifacts.is_none());
        assert!(outcome.report.is_none());
        assert!(dir_is_empty(dir.path()));
        assert!(outcome.summary().contains("Bootstrap Failed"));
    }

    #[tokio::test]
    async fn test_connection_only_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let mut bootstrap = Bootstrap::new(
            config("mongodb://127.0.0.1:1/?directConnection=true", dir.path(), false),
            clock(),
        );

        assert!(!bootstrap.test_connection().await);
        bootstrap.cleanup().await;
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_finish_publishes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let bootstrap = Bootstrap::new(config("mongodb://localhost:27017", dir.path(), false), clock());
        let target = bootstrap.target.clone();
        let store = MemoryStore::new(&target.database_name, &target.collection_name);
        let mut status = ConnectionStatus::connected(
            "mongodb://localhost:27017",
            &target,
            Some("7.0.4".to_string()),
            clock().now(),
        );

        let report = provision::prepare(
            &store,
            &indexes::catalog(),
            RunMode::Test,
            clock().as_ref(),
            &mut status,
        )
        .await;
        let outcome = bootstrap.finish(&store, status, report).await;

        assert!(outcome.success);
        let stats = outcome.stats.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.index_count, 8);

        let env = std::fs::read_to_string(dir.path().join(ENV_FILE_NAME)).unwrap();
        assert_eq!(env.lines().filter(|l| l.starts_with("export ")).count(), 3);

        let json: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(json["connection_info"]["test_document_inserted"], true);
        assert_eq!(json["connection_info"]["indexes_created"].as_array().unwrap().len(), 7);

        let summary = outcome.summary();
        assert!(summary.contains("Bootstrap Complete"));
        assert!(summary.contains("Indexes created: 7/7"));
        assert!(summary.contains("source "));
    }

    #[tokio::test]
    async fn test_finish_reports_publish_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let bootstrap = Bootstrap::new(config("mongodb://localhost:27017", &missing, false), clock());
        let target = bootstrap.target.clone();
        let store = MemoryStore {
            fail_stats: true,
            ..MemoryStore::new(&target.database_name, &target.collection_name)
        };
        let mut status = ConnectionStatus::connected("mongodb://localhost:27017", &target, None, clock().now());

        let report = provision::prepare(
            &store,
            &indexes::catalog(),
            RunMode::Test,
            clock().as_ref(),
            &mut status,
        )
        .await;
        let outcome = bootstrap.finish(&store, status, report).await;

        assert!(!outcome.success);
        assert!(outcome.stats.is_none());
        // earlier stages keep their results
        assert!(outcome.status.is_connected());
        assert_eq!(outcome.status.test_document_inserted, Some(true));
        assert!(outcome.status.publish_error.is_some());
    }

    #[tokio::test]
    async fn test_finish_succeeds_despite_verification_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bootstrap = Bootstrap::new(config("mongodb://localhost:27017", dir.path(), true), clock());
        let target = bootstrap.target.clone();
        let store = MemoryStore {
            lose_writes: true,
            ..MemoryStore::new(&target.database_name, &target.collection_name)
        };
        let mut status = ConnectionStatus::connected("mongodb://localhost:27017", &target, None, clock().now());

        let report = provision::prepare(
            &store,
            &indexes::catalog(),
            RunMode::Production,
            clock().as_ref(),
            &mut status,
        )
        .await;
        let outcome = bootstrap.finish(&store, status, report).await;

        assert!(outcome.success);
        assert!(outcome.status.verification_error.is_some());
        assert!(outcome.summary().contains("Access verification: FAILED"));
    }

    #[tokio::test]
    async fn test_invalid_production_target_aborts_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config("mongodb://127.0.0.1:1/?directConnection=true", dir.path(), true);
        config.production_target = TargetIdentity::new("bad.name", "tool_executions");
        let mut bootstrap = Bootstrap::new(config, clock());
        bootstrap.connection = Some(LiveConnection::unconfirmed(&bootstrap.config.connection).await);
        let status = ConnectionStatus::connected(
            &bootstrap.config.connection.uri,
            &bootstrap.target,
            None,
            clock().now(),
        );

        let outcome = bootstrap.provision_and_publish(status).await;
        bootstrap.cleanup().await;

        assert!(!outcome.success);
        assert!(outcome.report.is_none());
        assert!(outcome.artifacts.is_none());
        assert!(outcome.status.is_connected());
        assert!(outcome.status.setup_error.as_deref().unwrap().contains("bad.name"));
        assert!(outcome.status.indexes_created.is_none());
        assert!(dir_is_empty(dir.path()));
        assert!(outcome.summary().contains("Bootstrap Failed"));
    }

    /// Connection string of a disposable MongoDB instance, e.g.
    /// `MONGODB_TEST_URI=mongodb://localhost:27017 cargo test -- --ignored`.
    fn live_uri() -> String {
        std::env::var("MONGODB_TEST_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB instance (MONGODB_TEST_URI)"]
    async fn test_live_full_run_in_test_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&live_uri(), dir.path(), false);
        config.connection.server_selection_timeout = Duration::from_secs(5);
        let mut bootstrap = Bootstrap::new(config, Box::new(crate::clock::SystemClock));

        let outcome = bootstrap.run().await;

        assert!(outcome.success, "{}", outcome.summary());
        assert!(outcome.report.as_ref().unwrap().fully_healthy());
        let env = std::fs::read_to_string(dir.path().join(ENV_FILE_NAME)).unwrap();
        assert_eq!(env.lines().filter(|l| l.starts_with("export ")).count(), 3);
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());

        // re-applying the catalog leaves the index set unchanged
        let conn = bootstrap.connection.as_ref().unwrap();
        let store = provision::collection_handle(conn, &bootstrap.target).unwrap();
        let before = store.index_names().await.unwrap();
        let again = indexes::install_indexes(&store, &indexes::catalog()).await;
        assert!(indexes::all_succeeded(&again));
        assert_eq!(store.index_names().await.unwrap(), before);
        assert_eq!(before.len(), 8);

        conn.client()
            .database(&bootstrap.target.database_name)
            .drop()
            .await
            .unwrap();
        bootstrap.cleanup().await;
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB instance (MONGODB_TEST_URI)"]
    async fn test_live_connection_only_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&live_uri(), dir.path(), false);
        config.connection.server_selection_timeout = Duration::from_secs(5);
        let mut bootstrap = Bootstrap::new(config, Box::new(crate::clock::SystemClock));

        assert!(bootstrap.test_connection().await);

        let names = bootstrap
            .connection
            .as_ref()
            .unwrap()
            .client()
            .list_database_names()
            .await
            .unwrap();
        assert!(!names.contains(&bootstrap.target.database_name));
        assert!(dir_is_empty(dir.path()));
        bootstrap.cleanup().await;
    }
}
