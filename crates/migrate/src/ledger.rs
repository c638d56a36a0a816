//! Version store
//!
//! The ledger table records every applied upgrade. The current schema version
//! is the highest recorded version, or 0 for an empty ledger.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Row};
use tracing::info;

use crate::definitions::UpgradeCandidate;
use crate::error::{MigrateError, MigrateResult};

/// Resolved against the search path the same way unquoted table names are
pub const TABLE_EXISTS_SQL: &str = "SELECT to_regclass($1) IS NOT NULL;";

/// One applied upgrade as stored in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: i32,
    pub script: Option<String>,
    pub upgrade_date: NaiveDateTime,
}

/// Reads and writes the ledger table
#[derive(Debug, Clone)]
pub struct VersionStore {
    table: String,
}

impl VersionStore {
    /// `table` must already be validated as a plain identifier
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it is missing
    pub async fn ensure_table(&self, conn: &mut PgConnection) -> MigrateResult<()> {
        info!("Creating {} table if not exists.", self.table);
        sqlx::query(&self.create_table_sql())
            .execute(&mut *conn)
            .await
            .map_err(|source| MigrateError::Ledger {
                operation: "table creation",
                source,
            })?;
        Ok(())
    }

    /// Whether the ledger table exists. Creates nothing.
    pub async fn table_exists(&self, conn: &mut PgConnection) -> MigrateResult<bool> {
        sqlx::query_scalar::<_, bool>(TABLE_EXISTS_SQL)
            .bind(&self.table)
            .fetch_one(&mut *conn)
            .await
            .map_err(|source| MigrateError::Ledger {
                operation: "table lookup",
                source,
            })
    }

    /// Highest applied version, 0 when nothing has been applied
    pub async fn current_version(&self, conn: &mut PgConnection) -> MigrateResult<i32> {
        let version = sqlx::query_scalar::<_, i32>(&self.current_version_sql())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|source| MigrateError::Ledger {
                operation: "version lookup",
                source,
            })?;

        Ok(version.unwrap_or(0))
    }

    /// All ledger rows, oldest version first
    pub async fn entries(&self, conn: &mut PgConnection) -> MigrateResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&self.entries_sql())
            .fetch_all(&mut *conn)
            .await
            .map_err(|source| MigrateError::Ledger {
                operation: "entry listing",
                source,
            })?;

        rows.iter()
            .map(|row| -> Result<LedgerEntry, sqlx::Error> {
                Ok(LedgerEntry {
                    version: row.try_get("id")?,
                    script: row.try_get("script")?,
                    upgrade_date: row.try_get("upgradedate")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|source| MigrateError::Ledger {
                operation: "entry decoding",
                source,
            })
    }

    /// Record a candidate inside the caller's transaction. Values are bound, never interpolated.
    pub async fn record(
        &self,
        conn: &mut PgConnection,
        candidate: &UpgradeCandidate,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&self.insert_sql())
            .bind(candidate.version)
            .bind(&candidate.name)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// SQL to create the ledger table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {}(\n    \
                Id integer not null primary key,\n    \
                Script varchar(255),\n    \
                UpgradeDate timestamp not null default current_timestamp\n\
            );",
            self.table
        )
    }

    /// SQL to record an applied version
    pub fn insert_sql(&self) -> String {
        format!("INSERT INTO {}(id, script) values($1, $2);", self.table)
    }

    /// SQL to read the current version
    pub fn current_version_sql(&self) -> String {
        format!("SELECT COALESCE(MAX(id), 0) FROM {};", self.table)
    }

    /// SQL to list applied versions
    pub fn entries_sql(&self) -> String {
        format!(
            "SELECT id, script, upgradedate FROM {} ORDER BY id;",
            self.table
        )
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_LEDGER_TABLE)
    }
}
