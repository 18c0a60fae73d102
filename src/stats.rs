//! Collection statistics for the run summary.

use mongodb::bson::{Bson, Document};
use serde::Serialize;

use crate::store::LogStore;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CollectionStats {
    pub document_count: u64,
    pub size_bytes: u64,
    pub average_document_size: f64,
    pub index_count: u64,
    pub total_index_size: u64,
}

impl CollectionStats {
    /// Read the fields of a `collStats` reply. The server reports these as
    /// int32, int64 or double depending on magnitude; missing fields are zero.
    pub fn from_coll_stats(reply: &Document) -> Self {
        Self {
            document_count: as_u64(reply.get("count")),
            size_bytes: as_u64(reply.get("size")),
            average_document_size: as_f64(reply.get("avgObjSize")),
            index_count: as_u64(reply.get("nindexes")),
            total_index_size: as_u64(reply.get("totalIndexSize")),
        }
    }
}

fn as_u64(value: Option<&Bson>) -> u64 {
    match value {
        Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or(0),
        Some(Bson::Double(n)) if *n > 0.0 => *n as u64,
        _ => 0,
    }
}

fn as_f64(value: Option<&Bson>) -> f64 {
    match value {
        Some(Bson::Int32(n)) => f64::from(*n),
        Some(Bson::Int64(n)) => *n as f64,
        Some(Bson::Double(n)) => *n,
        _ => 0.0,
    }
}

/// Snapshot the collection. Statistics are diagnostic only, so a failed
/// query is logged and reported as `None`.
pub async fn collect_stats(store: &dyn LogStore) -> Option<CollectionStats> {
    match store.collection_stats().await {
        Ok(reply) => Some(CollectionStats::from_coll_stats(&reply)),
        Err(e) => {
            tracing::warn!(
                "Could not get collection stats for {}.{}: {:#}",
                store.database_name(),
                store.collection_name(),
                e
            );
            None
        }
    }
}
