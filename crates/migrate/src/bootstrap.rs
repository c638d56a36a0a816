//! Bootstrapper
//!
//! Makes sure the target database and its ledger table exist, then reports
//! the version the run starts from. A missing database is created through
//! an administrative connection and the bootstrap is retried once.

use sqlx::{Connection, Executor, PgConnection};
use tracing::{error, info, warn};

use crate::descriptor::ConnectionDescriptor;
use crate::error::{MigrateError, MigrateResult};
use crate::ledger::{LedgerEntry, VersionStore};

/// SQLSTATE `invalid_catalog_name`
pub const INVALID_CATALOG_NAME: &str = "3D000";

/// How many times a missing target database may be created in one bootstrap
const MAX_CREATE_ATTEMPTS: u32 = 1;

/// Prepares the target database for a run
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    descriptor: ConnectionDescriptor,
    store: VersionStore,
}

impl Bootstrapper {
    pub fn new(descriptor: ConnectionDescriptor, store: VersionStore) -> Self {
        Self { descriptor, store }
    }

    /// Ensure the database and ledger exist and return the current version
    pub async fn ensure_database(&self) -> MigrateResult<i32> {
        info!("Initializing database...");
        let mut creations_left = MAX_CREATE_ATTEMPTS;

        loop {
            match self.descriptor.connect().await {
                Ok(mut conn) => {
                    let result = self.prepare_ledger(&mut conn).await;
                    if let Err(e) = conn.close().await {
                        warn!("Failed to close bootstrap connection: {}", e);
                    }
                    return result;
                }
                Err(e) if is_missing_database(&e, &self.descriptor.dbname) => {
                    if creations_left == 0 {
                        error!(
                            "Database {} is still missing after it was created",
                            self.descriptor.dbname
                        );
                        return Err(MigrateError::DatabaseMissing {
                            database: self.descriptor.dbname.clone(),
                        });
                    }
                    creations_left -= 1;

                    create_database(&self.descriptor.admin(), &self.descriptor.dbname).await?;
                    info!("Database created.");
                }
                Err(e) => {
                    error!("{}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Ledger rows, oldest first, without creating anything.
    ///
    /// A missing database or ledger table reads as an empty ledger.
    pub async fn inspect(&self) -> MigrateResult<Vec<LedgerEntry>> {
        let mut conn = match self.descriptor.connect().await {
            Ok(conn) => conn,
            Err(e) if is_missing_database(&e, &self.descriptor.dbname) => {
                info!("Database {} does not exist yet.", self.descriptor.dbname);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let entries = match self.store.table_exists(&mut conn).await {
            Ok(true) => self.store.entries(&mut conn).await,
            Ok(false) => {
                info!("Table {} does not exist yet.", self.store.table());
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = conn.close().await {
            warn!("Failed to close inspection connection: {}", e);
        }
        entries
    }

    async fn prepare_ledger(&self, conn: &mut PgConnection) -> MigrateResult<i32> {
        let prepared = match self.store.ensure_table(conn).await {
            Ok(()) => self.store.current_version(conn).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &prepared {
            error!("{}", e);
        }
        prepared
    }
}

/// Create `name` through an administrative connection.
///
/// The name is interpolated as-is and must come from trusted configuration.
pub async fn create_database(admin: &ConnectionDescriptor, name: &str) -> MigrateResult<()> {
    info!("Creating database {}...", name);

    let mut conn = admin.connect().await.map_err(|e| {
        error!("{}", e);
        e
    })?;

    let result = conn
        .execute(format!("CREATE DATABASE {}", name).as_str())
        .await
        .map(|_| ())
        .map_err(|source| {
            error!("CREATE DATABASE {} failed: {}", name, source);
            MigrateError::DatabaseCreation {
                database: name.to_string(),
                source,
            }
        });

    if let Err(e) = conn.close().await {
        warn!("Failed to close administrative connection: {}", e);
    }
    result
}

/// Whether a connection failure means the target database does not exist
pub fn is_missing_database(err: &MigrateError, dbname: &str) -> bool {
    match err {
        MigrateError::Connection {
            source: sqlx::Error::Database(db_err),
            ..
        } => reports_missing_database(db_err.code().as_deref(), db_err.message(), dbname),
        _ => false,
    }
}

/// SQLSTATE wins; the exact server message is the fallback for servers that omit it
fn reports_missing_database(code: Option<&str>, message: &str, dbname: &str) -> bool {
    match code {
        Some(code) => code == INVALID_CATALOG_NAME,
        None => message == format!("database \"{}\" does not exist", dbname),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_detects_missing_database() {
        assert!(reports_missing_database(
            Some("3D000"),
            "database \"shop\" does not exist",
            "shop"
        ));
        // The code is authoritative even if the message is localized
        assert!(reports_missing_database(
            Some("3D000"),
            "la base de données « shop » n'existe pas",
            "shop"
        ));
    }

    #[test]
    fn test_other_sqlstate_is_not_missing_database() {
        assert!(!reports_missing_database(
            Some("28P01"),
            "password authentication failed for user \"postgres\"",
            "shop"
        ));
    }

    #[test]
    fn test_message_fallback_requires_exact_name() {
        assert!(reports_missing_database(None, "database \"shop\" does not exist", "shop"));
        assert!(!reports_missing_database(None, "database \"shop2\" does not exist", "shop"));
        assert!(!reports_missing_database(None, "connection refused", "shop"));
    }

    #[test]
    fn test_non_database_errors_are_not_missing_database() {
        let io = MigrateError::Connection {
            target: "host=localhost".to_string(),
            source: sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
        };
        assert!(!is_missing_database(&io, "shop"));

        let option = MigrateError::InvalidOption {
            option: "bogus".to_string(),
        };
        assert!(!is_missing_database(&option, "shop"));
    }

    #[tokio::test]
    async fn test_invalid_options_make_bootstrap_fail() {
        let descriptor = ConnectionDescriptor {
            options: "sslmode".to_string(),
            ..ConnectionDescriptor::default()
        };
        let bootstrapper = Bootstrapper::new(descriptor, VersionStore::default());

        assert!(matches!(
            bootstrapper.ensure_database().await,
            Err(MigrateError::InvalidOption { .. })
        ));
    }
}
