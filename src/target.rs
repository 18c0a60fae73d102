//! Target database/collection naming.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

pub const TEST_DATABASE_PREFIX: &str = "mcp_test_logs";
pub const TEST_COLLECTION_PREFIX: &str = "tool_executions";
pub const DEFAULT_DATABASE: &str = "mcp_tool_logs";
pub const DEFAULT_COLLECTION: &str = "tool_executions";

/// Fixed-width, second-resolution stamp used in test-mode names.
const NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Characters MongoDB refuses in database names.
const FORBIDDEN_DATABASE_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?', '\0'];

const MAX_DATABASE_NAME_BYTES: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Disposable, timestamp-named database and collection.
    Test,
    /// Fixed, configured names.
    Production,
}

impl RunMode {
    pub const fn is_test(self) -> bool {
        matches!(self, Self::Test)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub database_name: String,
    pub collection_name: String,
}

impl TargetIdentity {
    pub fn new(database_name: impl Into<String>, collection_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            collection_name: collection_name.into(),
        }
    }

    /// Unique-per-second names derived from the clock. Two calls within the
    /// same wall-clock second produce equal identities.
    pub fn for_test_run(clock: &dyn Clock) -> Self {
        let stamp = clock.now().format(NAME_TIMESTAMP_FORMAT).to_string();
        Self {
            database_name: format!("{TEST_DATABASE_PREFIX}_{stamp}"),
            collection_name: format!("{TEST_COLLECTION_PREFIX}_{stamp}"),
        }
    }

    /// Check both names against MongoDB naming restrictions.
    pub fn validate(&self) -> Result<(), String> {
        validate_database_name(&self.database_name)?;
        validate_collection_name(&self.collection_name)
    }
}

impl std::fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database_name, self.collection_name)
    }
}

fn validate_database_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("database name must not be empty".to_string());
    }
    if name.len() > MAX_DATABASE_NAME_BYTES {
        return Err(format!(
            "database name '{name}' is {} bytes long (maximum is {MAX_DATABASE_NAME_BYTES})",
            name.len()
        ));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_DATABASE_CHARS.contains(c)) {
        return Err(format!("database name '{name}' contains forbidden character {c:?}"));
    }
    Ok(())
}

fn validate_collection_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("collection name must not be empty".to_string());
    }
    if name.contains('$') || name.contains('\0') {
        return Err(format!("collection name '{name}' contains '$' or a NUL byte"));
    }
    if name.starts_with("system.") {
        return Err(format!("collection name '{name}' uses the reserved 'system.' prefix"));
    }
    Ok(())
}
