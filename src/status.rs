//! Aggregate status of one bootstrap run.
//!
//! Built by the pipeline and filled in stage by stage. Fields are only ever
//! set, never cleared, so the published artifact shows how far the run got.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::indexes::IndexOutcome;
use crate::target::TargetIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub status: ConnectionState,
    pub mongo_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    pub connection_time: DateTime<FixedOffset>,
    pub database_name: String,
    pub collection_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexes_created: Option<Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub index_failures: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_document_inserted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_error: Option<String>,
}

impl ConnectionStatus {
    fn base(
        state: ConnectionState,
        mongo_uri: &str,
        target: &TargetIdentity,
        at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            status: state,
            mongo_uri: mongo_uri.to_string(),
            server_version: None,
            connection_time: at,
            database_name: target.database_name.clone(),
            collection_name: target.collection_name.clone(),
            error: None,
            database_created: None,
            collection_created: None,
            indexes_created: None,
            index_failures: BTreeMap::new(),
            test_document_inserted: None,
            verification_error: None,
            setup_error: None,
            publish_error: None,
        }
    }

    pub fn connected(
        mongo_uri: &str,
        target: &TargetIdentity,
        server_version: Option<String>,
        at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            server_version,
            ..Self::base(ConnectionState::Connected, mongo_uri, target, at)
        }
    }

    pub fn failed(
        mongo_uri: &str,
        target: &TargetIdentity,
        error: String,
        at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            error: Some(error),
            ..Self::base(ConnectionState::Failed, mongo_uri, target, at)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionState::Connected
    }

    pub fn record_indexes(&mut self, outcomes: &[IndexOutcome]) {
        let mut created = Vec::new();
        for outcome in outcomes {
            match &outcome.result {
                Ok(_) => created.push(outcome.identifier.clone()),
                Err(e) => {
                    self.index_failures
                        .insert(outcome.identifier.clone(), e.to_string());
                }
            }
        }
        self.indexes_created = Some(created);
    }

    pub fn indexes_healthy(&self) -> bool {
        self.indexes_created.is_some() && self.index_failures.is_empty()
    }
}
