//! Pipeline driver
//!
//! Wires the stages together: bootstrap, then discovery and execution running
//! side by side, with completion events logged as they arrive.

use std::time::Instant;

use tracing::{info, warn};

use crate::bootstrap::Bootstrapper;
use crate::config::MigrateConfig;
use crate::definitions::{PendingScript, RunSummary, StatusReport};
use crate::discovery::ScriptDiscoverer;
use crate::error::MigrateResult;
use crate::executor::MigrationExecutor;
use crate::ledger::{LedgerEntry, VersionStore};

/// Runs upgrades for one configured database
#[derive(Debug, Clone)]
pub struct Migrator {
    config: MigrateConfig,
    store: VersionStore,
}

impl Migrator {
    /// Validates the configuration up front
    pub fn new(config: MigrateConfig) -> MigrateResult<Self> {
        config.validate()?;
        let store = VersionStore::new(config.ledger_table.clone());
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    fn bootstrapper(&self) -> Bootstrapper {
        Bootstrapper::new(self.config.connection.clone(), self.store.clone())
    }

    /// Apply every pending script.
    ///
    /// Returns the first failure of either stage, so callers can tell a
    /// clean finish from a run that stopped early.
    pub async fn run(&self) -> MigrateResult<RunSummary> {
        let start_time = Instant::now();

        let start_version = self.bootstrapper().ensure_database().await?;
        info!("Initialization complete.");
        info!("Database is at version {}", start_version);

        let discoverer = ScriptDiscoverer::new(self.config.scripts_dir.clone(), start_version);
        let executor = MigrationExecutor::new(self.config.connection.clone(), self.store.clone());

        let (candidates, discovery) = discoverer.spawn();
        let (mut completed, execution) = executor.spawn(candidates);

        let mut applied = Vec::new();
        while let Some(result) = completed.recv().await {
            info!("Completed: {}", result.name);
            info!("Database is at version {}", result.version);
            applied.push(result);
        }

        let executed = execution.await?;
        let discovered = discovery.await?;
        let executed = executed?;
        let discovered = discovered?;

        if executed != discovered {
            warn!(
                "Discovered {} script(s) but applied {}",
                discovered, executed
            );
        }

        let final_version = applied.last().map_or(start_version, |r| r.version);

        Ok(RunSummary {
            start_version,
            final_version,
            applied,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Scripts a run would apply, without applying them.
    ///
    /// Read-only: a missing database or ledger is left missing and every
    /// script counts as pending.
    pub async fn pending(&self) -> MigrateResult<Vec<PendingScript>> {
        let version = current_version(&self.bootstrapper().inspect().await?);
        ScriptDiscoverer::new(self.config.scripts_dir.clone(), version)
            .scan()
            .await
    }

    /// Ledger rows plus pending scripts. Read-only, like [`pending`](Self::pending).
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let applied = self.bootstrapper().inspect().await?;
        let current_version = current_version(&applied);

        let pending = ScriptDiscoverer::new(self.config.scripts_dir.clone(), current_version)
            .scan()
            .await?;

        Ok(StatusReport {
            current_version,
            applied,
            pending,
        })
    }
}

fn current_version(entries: &[LedgerEntry]) -> i32 {
    entries.iter().map(|e| e.version).max().unwrap_or(0)
}
