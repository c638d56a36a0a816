//! Core types passed between pipeline stages

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ledger::LedgerEntry;

/// A discovered script that has not been applied yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeCandidate {
    /// Leading number of the file name
    pub version: i32,
    /// File name, stored in the ledger
    pub name: String,
    /// Script body, executed verbatim
    pub content: String,
}

/// Emitted by the executor after a candidate has been committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedResult {
    pub version: i32,
    pub name: String,
}

impl From<&UpgradeCandidate> for AppliedResult {
    fn from(candidate: &UpgradeCandidate) -> Self {
        Self {
            version: candidate.version,
            name: candidate.name.clone(),
        }
    }
}

/// A script selected by a directory scan, content not loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingScript {
    pub version: i32,
    pub name: String,
    pub path: PathBuf,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Version found by the bootstrapper
    pub start_version: i32,
    /// Version after the last committed script
    pub final_version: i32,
    /// Committed scripts, in order
    pub applied: Vec<AppliedResult>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl RunSummary {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Ledger contents plus scripts still waiting to be applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub current_version: i32,
    pub applied: Vec<LedgerEntry>,
    pub pending: Vec<PendingScript>,
}
