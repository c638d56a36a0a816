//! Run configuration
//!
//! A [`MigrateConfig`] is built once at startup and handed to every stage of
//! the pipeline. Nothing reads ambient state after that point.

use std::path::PathBuf;

use thiserror::Error;

use crate::descriptor::ConnectionDescriptor;

/// Default name of the ledger table
pub const DEFAULT_LEDGER_TABLE: &str = "version";

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}

/// Everything a run needs to know
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Target database
    pub connection: ConnectionDescriptor,
    /// Directory holding the numbered upgrade scripts
    pub scripts_dir: PathBuf,
    /// Table recording applied versions
    pub ledger_table: String,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionDescriptor::default(),
            scripts_dir: PathBuf::from("./"),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

impl MigrateConfig {
    pub fn new(connection: ConnectionDescriptor, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            connection,
            scripts_dir: scripts_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger_table = table.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scripts_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "path".to_string(),
                reason: "Scripts path cannot be empty".to_string(),
            });
        }

        if self.connection.dbname.is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "dbname".to_string(),
                reason: "Database name cannot be empty".to_string(),
            });
        }

        if self.connection.user.is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "user".to_string(),
                reason: "User name cannot be empty".to_string(),
            });
        }

        if self.connection.port == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "port".to_string(),
                reason: "Port cannot be 0".to_string(),
            });
        }

        // The table name is interpolated into SQL, so only plain identifiers pass
        if !is_plain_identifier(&self.ledger_table) {
            return Err(ConfigError::InvalidValue {
                field: "ledger_table".to_string(),
                value: self.ledger_table.clone(),
                expected: "letters, digits and underscores, not starting with a digit".to_string(),
            });
        }

        Ok(())
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MigrateConfig::default();
        assert_eq!(config.ledger_table, "version");
        assert_eq!(config.scripts_dir, PathBuf::from("./"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_scripts_path() {
        let config = MigrateConfig::new(ConnectionDescriptor::default(), "");
        match config.validate() {
            Err(ConfigError::ValidationFailed { field, .. }) => assert_eq!(field, "path"),
            other => panic!("Expected path validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_port() {
        let mut config = MigrateConfig::default();
        config.connection.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed { field, .. }) if field == "port"
        ));
    }

    #[test]
    fn test_ledger_table_must_be_identifier() {
        for bad in ["", "1version", "version; DROP TABLE x", "public.version", "vérsion"] {
            let config = MigrateConfig::default().with_ledger_table(bad);
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidValue { .. })),
                "'{}' should be rejected",
                bad
            );
        }

        for good in ["version", "_ledger", "schema_versions_2"] {
            let config = MigrateConfig::default().with_ledger_table(good);
            assert!(config.validate().is_ok(), "'{}' should be accepted", good);
        }
    }
}
