//! Probe-document write/read check.

use mongodb::bson::{self, Document, doc};

use crate::clock::Clock;
use crate::error::{VerificationError, format_error};
use crate::store::LogStore;
use crate::target::RunMode;

/// Constant so repeated runs against one collection touch the same document.
pub const PROBE_ID: &str = "bootstrap_test";
pub const PROBE_TYPE: &str = "bootstrap_verification";
pub const PROBE_CREATOR: &str = "mongo-logger-bootstrap";

/// Fields that must read back exactly as written.
const ASSERTED_FIELDS: &[&str] = &["_id", "type", "timestamp", "test_mode", "created_by"];

pub fn probe_document(mode: RunMode, clock: &dyn Clock) -> Document {
    doc! {
        "_id": PROBE_ID,
        "type": PROBE_TYPE,
        "timestamp": bson::DateTime::from_millis(clock.now().timestamp_millis()),
        "test_mode": mode.is_test(),
        "created_by": PROBE_CREATOR,
    }
}

/// Write the probe (replacing any earlier one) and read it back by id.
/// The probe is left in place whatever the outcome.
pub async fn verify_access(
    store: &dyn LogStore,
    mode: RunMode,
    clock: &dyn Clock,
) -> Result<(), VerificationError> {
    let probe = probe_document(mode, clock);

    store
        .upsert_by_id(PROBE_ID, probe.clone())
        .await
        .map_err(|e| VerificationError::WriteFailed {
            reason: format_error(&e),
        })?;
    tracing::info!("Test document inserted successfully");

    let found = store
        .find_by_id(PROBE_ID)
        .await
        .map_err(|e| VerificationError::ReadFailed {
            reason: format_error(&e),
        })?
        .ok_or_else(|| VerificationError::NotFound {
            id: PROBE_ID.to_string(),
        })?;

    if let Some(field) = ASSERTED_FIELDS.iter().find(|f| probe.get(**f) != found.get(**f)) {
        return Err(VerificationError::Mismatch {
            id: PROBE_ID.to_string(),
            field: (*field).to_string(),
        });
    }

    tracing::info!("Test document retrieval successful");
    Ok(())
}
