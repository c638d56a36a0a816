//! Error types for the upgrade pipeline
//!
//! Every stage reports failures through [`MigrateError`]. Errors are logged
//! where they are detected and then propagated to the pipeline driver, which
//! turns them into a non-zero exit.

use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;

use crate::config::ConfigError;

/// Result type alias for pipeline operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Step of the per-script transaction that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Begin,
    RecordVersion,
    ExecuteScript,
    Commit,
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionPhase::Begin => write!(f, "begin transaction"),
            TransactionPhase::RecordVersion => write!(f, "record version"),
            TransactionPhase::ExecuteScript => write!(f, "execute script"),
            TransactionPhase::Commit => write!(f, "commit"),
        }
    }
}

/// Error types for the upgrade pipeline
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("Connection to '{target}' failed: {source}")]
    Connection {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Unsupported connection option '{option}'")]
    InvalidOption { option: String },

    #[error("Database '{database}' does not exist")]
    DatabaseMissing { database: String },

    #[error("Failed to create database '{database}': {source}")]
    DatabaseCreation {
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Ledger {operation} failed: {source}")]
    Ledger {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to read scripts directory '{}': {source}", path.display())]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid version prefix in '{script}': {source}")]
    VersionParse {
        script: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Failed to read script '{script}': {source}")]
    ScriptRead {
        script: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Version {version} is claimed by both '{first}' and '{second}'")]
    DuplicateVersion {
        version: i32,
        first: String,
        second: String,
    },

    #[error("Upgrade failed on '{script}' during {phase}: {source}")]
    Transaction {
        script: String,
        phase: TransactionPhase,
        #[source]
        source: sqlx::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline task failed: {0}")]
    Task(String),
}

impl MigrateError {
    /// Name of the script involved in the failure, if any
    pub fn script(&self) -> Option<&str> {
        match self {
            MigrateError::VersionParse { script, .. }
            | MigrateError::ScriptRead { script, .. }
            | MigrateError::Transaction { script, .. } => Some(script),
            MigrateError::DuplicateVersion { second, .. } => Some(second),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for MigrateError {
    fn from(err: tokio::task::JoinError) -> Self {
        MigrateError::Task(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_error_names_script_and_phase() {
        let err = MigrateError::Transaction {
            script: "002_b.sql".to_string(),
            phase: TransactionPhase::ExecuteScript,
            source: sqlx::Error::Protocol("syntax error at or near \"SELEC\"".to_string()),
        };

        let msg = err.to_string();
        assert!(msg.contains("002_b.sql"));
        assert!(msg.contains("execute script"));
        assert!(msg.contains("SELEC"));
        assert_eq!(err.script(), Some("002_b.sql"));
    }

    #[test]
    fn test_directory_error_display() {
        let err = MigrateError::DirectoryRead {
            path: PathBuf::from("/nope"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to read scripts directory '/nope': no such directory"
        );
        assert_eq!(err.script(), None);
    }

    #[test]
    fn test_duplicate_version_reports_second_script() {
        let err = MigrateError::DuplicateVersion {
            version: 4,
            first: "004_a.sql".to_string(),
            second: "04_b.sql".to_string(),
        };
        assert_eq!(err.script(), Some("04_b.sql"));
        assert!(err.to_string().contains("Version 4"));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(TransactionPhase::Begin.to_string(), "begin transaction");
        assert_eq!(TransactionPhase::RecordVersion.to_string(), "record version");
        assert_eq!(TransactionPhase::Commit.to_string(), "commit");
    }
}
