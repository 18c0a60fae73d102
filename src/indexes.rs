//! Index catalog for the tool-execution log collection and its installer.

use mongodb::bson::{Document, doc};
use serde::Serialize;
use std::collections::HashSet;

use crate::error::{IndexError, OperationTimedOut, format_error};
use crate::store::LogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexField {
    pub name: String,
    pub direction: Direction,
}

/// An ordered list of indexed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub fields: Vec<IndexField>,
}

impl IndexSpec {
    pub fn new(fields: &[(&str, Direction)]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(name, direction)| IndexField {
                    name: (*name).to_string(),
                    direction: *direction,
                })
                .collect(),
        }
    }

    pub fn is_compound(&self) -> bool {
        self.fields.len() > 1
    }

    /// Matches the name MongoDB assigns by default, e.g. `toolName_1_startTime_-1`.
    pub fn identifier(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}_{}", f.name, f.direction.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn keys(&self) -> Document {
        let mut keys = Document::new();
        for field in &self.fields {
            keys.insert(field.name.clone(), field.direction.as_i32());
        }
        keys
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.fields.is_empty() {
            return Err(IndexError::Malformed {
                reason: "index has no fields".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(IndexError::Malformed {
                    reason: "empty field name".to_string(),
                });
            }
            if field.name.starts_with('$') {
                return Err(IndexError::Malformed {
                    reason: format!("field '{}' starts with '$'", field.name),
                });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(IndexError::Malformed {
                    reason: format!("field '{}' appears more than once", field.name),
                });
            }
        }
        Ok(())
    }
}

/// The fixed index set the downstream logger relies on, in application order.
pub fn catalog() -> Vec<IndexSpec> {
    use Direction::{Ascending, Descending};

    vec![
        IndexSpec::new(&[("toolName", Ascending)]),
        IndexSpec::new(&[("startTime", Descending)]),
        IndexSpec::new(&[("sessionId", Ascending)]),
        IndexSpec::new(&[("success", Ascending)]),
        IndexSpec::new(&[("toolName", Ascending), ("startTime", Descending)]),
        IndexSpec::new(&[("sessionId", Ascending), ("startTime", Descending)]),
        IndexSpec::new(&[("success", Ascending), ("startTime", Descending)]),
    ]
}

/// Result of one index request, tagged with the spec's identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOutcome {
    pub identifier: String,
    pub result: Result<String, IndexError>,
}

impl IndexOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// True when every index request succeeded.
pub fn all_succeeded(outcomes: &[IndexOutcome]) -> bool {
    outcomes.iter().all(IndexOutcome::succeeded)
}

/// Apply each spec in order. A failed request is recorded and the loop moves on.
pub async fn install_indexes(store: &dyn LogStore, specs: &[IndexSpec]) -> Vec<IndexOutcome> {
    let mut outcomes = Vec::with_capacity(specs.len());

    for spec in specs {
        let identifier = spec.identifier();
        let kind = if spec.is_compound() { "Compound index" } else { "Index" };

        let result = match spec.validate() {
            Ok(()) => store.create_index(spec.keys()).await.map_err(|e| {
                match e.downcast_ref::<OperationTimedOut>() {
                    Some(OperationTimedOut(limit)) => IndexError::TimedOut(*limit),
                    None => IndexError::Rejected {
                        reason: format_error(&e),
                    },
                }
            }),
            Err(e) => Err(e),
        };

        match &result {
            Ok(name) => tracing::info!("{} created: {}", kind, name),
            Err(e) => tracing::warn!("{} creation failed for {}: {}", kind, identifier, e),
        }

        outcomes.push(IndexOutcome { identifier, result });
    }

    outcomes
}
