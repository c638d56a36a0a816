//! # pgupgrade-migrate
//!
//! Applies numbered SQL upgrade scripts to a PostgreSQL database.
//!
//! A run bootstraps the target (creating the database and the ledger table
//! when needed), reads the current version from the ledger, then streams the
//! newer scripts from disk to an executor that applies them one by one, each
//! in its own transaction together with its ledger row. The first failure
//! stops the run.
//!
//! ```no_run
//! use pgupgrade_migrate::{ConnectionDescriptor, MigrateConfig, Migrator};
//!
//! # async fn demo() -> pgupgrade_migrate::MigrateResult<()> {
//! let config = MigrateConfig::new(ConnectionDescriptor::default(), "./scripts");
//! let summary = Migrator::new(config)?.run().await?;
//! println!("now at version {}", summary.final_version);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod definitions;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod pipeline;

/// Slots in the channels between stages. One slot keeps the stages in lockstep.
pub(crate) const HANDOFF_CAPACITY: usize = 1;

pub use bootstrap::{create_database, is_missing_database, Bootstrapper};
pub use config::{ConfigError, MigrateConfig, DEFAULT_LEDGER_TABLE};
pub use definitions::{AppliedResult, PendingScript, RunSummary, StatusReport, UpgradeCandidate};
pub use descriptor::ConnectionDescriptor;
pub use discovery::{parse_version, ScriptDiscoverer};
pub use error::{MigrateError, MigrateResult, TransactionPhase};
pub use executor::MigrationExecutor;
pub use ledger::{LedgerEntry, VersionStore};
pub use pipeline::Migrator;
