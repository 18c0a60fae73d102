//! Provisioner: resolves the target collection handle, then installs
//! indexes and verifies access against it, in that order.

use crate::clock::Clock;
use crate::connection::LiveConnection;
use crate::error::{ProvisionError, VerificationError};
use crate::indexes::{self, IndexOutcome, IndexSpec};
use crate::status::ConnectionStatus;
use crate::store::{LogStore, MongoStore};
use crate::target::{RunMode, TargetIdentity};
use crate::verify;

/// What the dependent stages reported for one handle.
#[derive(Debug)]
pub struct ProvisionReport {
    pub indexes: Vec<IndexOutcome>,
    pub verification: Result<(), VerificationError>,
}

impl ProvisionReport {
    /// The probe made it to the server, even if reading it back failed.
    pub fn probe_written(&self) -> bool {
        !matches!(self.verification, Err(VerificationError::WriteFailed { .. }))
    }

    pub fn fully_healthy(&self) -> bool {
        indexes::all_succeeded(&self.indexes) && self.verification.is_ok()
    }
}

/// Select the target database and collection. No server round-trip happens
/// here; an unusable name is the only way this fails.
pub fn collection_handle(
    connection: &LiveConnection,
    target: &TargetIdentity,
) -> Result<MongoStore, ProvisionError> {
    target
        .validate()
        .map_err(|reason| ProvisionError::InvalidTarget {
            target: target.to_string(),
            reason,
        })?;
    Ok(MongoStore::new(connection, target))
}

/// Obtain the handle and run the dependent stages against it. Sub-stage
/// failures land in `status`; the handle is returned regardless.
pub async fn provision(
    connection: &LiveConnection,
    target: &TargetIdentity,
    mode: RunMode,
    clock: &dyn Clock,
    status: &mut ConnectionStatus,
) -> Result<(MongoStore, ProvisionReport), ProvisionError> {
    let store = collection_handle(connection, target).inspect_err(|e| {
        status.setup_error = Some(format!("Failed to setup database/collection: {e}"));
    })?;

    let report = prepare(&store, &indexes::catalog(), mode, clock, status).await;
    Ok((store, report))
}

/// Install `specs` and then verify access, recording both in `status`.
/// Verification runs even when some indexes failed.
pub async fn prepare(
    store: &dyn LogStore,
    specs: &[IndexSpec],
    mode: RunMode,
    clock: &dyn Clock,
    status: &mut ConnectionStatus,
) -> ProvisionReport {
    tracing::info!("Database '{}' ready", store.database_name());
    tracing::info!("Collection '{}' ready", store.collection_name());

    let outcomes = indexes::install_indexes(store, specs).await;
    status.record_indexes(&outcomes);
    match store.index_names().await {
        Ok(names) => tracing::debug!("Indexes now on collection: {}", names.join(", ")),
        Err(e) => tracing::debug!("Could not list indexes: {:#}", e),
    }

    let verification = verify::verify_access(store, mode, clock).await;
    if let Err(e) = &verification {
        tracing::warn!("Access verification failed: {}", e);
        status.verification_error = Some(e.to_string());
    }

    let report = ProvisionReport {
        indexes: outcomes,
        verification,
    };

    // The database and collection exist once anything was written to them.
    let materialized = report.probe_written() || report.indexes.iter().any(IndexOutcome::succeeded);
    status.database_created = Some(materialized);
    status.collection_created = Some(materialized);
    status.test_document_inserted = Some(report.probe_written());

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::ConnectionParameters;
    use crate::indexes::Direction;
    use crate::store::memory::MemoryStore;
    use chrono::DateTime;

    fn clock() -> FixedClock {
        FixedClock(DateTime::parse_from_rfc3339("2026-10-15T09:30:05+02:00").unwrap())
    }

    fn status_for(store: &MemoryStore) -> ConnectionStatus {
        ConnectionStatus::connected(
            "mongodb://localhost:27017",
            &TargetIdentity::new(store.database_name(), store.collection_name()),
            None,
            clock().now(),
        )
    }

    #[tokio::test]
    async fn test_prepare_healthy() {
        let store = MemoryStore::new("db", "coll");
        let mut status = status_for(&store);

        let report = prepare(&store, &indexes::catalog(), RunMode::Test, &clock(), &mut status).await;

        assert!(report.fully_healthy());
        assert!(status.indexes_healthy());
        assert_eq!(status.indexes_created.as_ref().map(Vec::len), Some(7));
        assert_eq!(status.database_created, Some(true));
        assert_eq!(status.test_document_inserted, Some(true));
        assert!(status.verification_error.is_none());
    }

    #[tokio::test]
    async fn test_indexes_run_before_verification() {
        let store = MemoryStore::new("db", "coll");
        let mut status = status_for(&store);

        prepare(&store, &indexes::catalog(), RunMode::Test, &clock(), &mut status).await;

        let calls = store.calls();
        assert_eq!(calls.len(), 9);
        assert!(calls[..7].iter().all(|c| c.starts_with("create_index")));
        assert_eq!(calls[7], "upsert bootstrap_test");
        assert_eq!(calls[8], "find bootstrap_test");
    }

    #[tokio::test]
    async fn test_partial_index_failure_still_verifies() {
        let store = MemoryStore::new("db", "coll");
        let mut status = status_for(&store);
        let mut specs = indexes::catalog();
        specs.push(IndexSpec::new(&[("success", Direction::Ascending), ("success", Direction::Descending)]));

        let report = prepare(&store, &specs, RunMode::Test, &clock(), &mut status).await;

        assert_eq!(report.indexes.iter().filter(|o| o.succeeded()).count(), 7);
        assert_eq!(report.indexes.iter().filter(|o| !o.succeeded()).count(), 1);
        assert!(report.verification.is_ok());
        assert!(!report.fully_healthy());
        assert!(status.index_failures.contains_key("success_1_success_-1"));
        assert_eq!(status.test_document_inserted, Some(true));
    }

    #[tokio::test]
    async fn test_verification_failure_is_recorded_not_fatal() {
        let store = MemoryStore {
            fail_writes: true,
            ..MemoryStore::new("db", "coll")
        };
        let mut status = status_for(&store);

        let report = prepare(&store, &indexes::catalog(), RunMode::Production, &clock(), &mut status).await;

        assert!(indexes::all_succeeded(&report.indexes));
        assert!(!report.probe_written());
        assert_eq!(status.test_document_inserted, Some(false));
        // indexes alone materialize the collection
        assert_eq!(status.collection_created, Some(true));
        assert!(status.verification_error.as_deref().unwrap().contains("write failed"));
    }

    #[tokio::test]
    async fn test_nothing_written_means_nothing_created() {
        let store = MemoryStore {
            fail_writes: true,
            reject_index_fields: vec![
                "toolName".to_string(),
                "startTime".to_string(),
                "sessionId".to_string(),
                "success".to_string(),
            ],
            ..MemoryStore::new("db", "coll")
        };
        let mut status = status_for(&store);

        prepare(&store, &indexes::catalog(), RunMode::Test, &clock(), &mut status).await;

        assert_eq!(status.database_created, Some(false));
        assert_eq!(status.index_failures.len(), 7);
        assert_eq!(status.indexes_created, Some(vec![]));
    }

    #[tokio::test]
    async fn test_invalid_target_is_fatal_and_recorded() {
        let params = ConnectionParameters::new("mongodb://127.0.0.1:1/?directConnection=true");
        let conn = LiveConnection::unconfirmed(&params).await;
        let target = TargetIdentity::new("bad.name", "tool_executions");
        let mut status = ConnectionStatus::connected(&params.uri, &target, None, clock().now());

        let result = provision(&conn, &target, RunMode::Production, &clock(), &mut status).await;

        assert!(matches!(result, Err(ProvisionError::InvalidTarget { .. })));
        let setup_error = status.setup_error.as_deref().unwrap();
        assert!(setup_error.contains("bad.name"));
        assert!(setup_error.contains("forbidden character"));
        assert!(status.indexes_created.is_none());
        assert!(status.test_document_inserted.is_none());
        conn.close().await;
    }
}
