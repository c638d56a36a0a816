//! Migration executor
//!
//! Applies candidates strictly one at a time over a single connection. Each
//! script runs in its own transaction together with its ledger row, so a
//! failing script leaves no trace in the ledger. The first failure ends the
//! run.

use sqlx::{Connection, Executor, PgConnection, Postgres, Transaction};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::definitions::{AppliedResult, UpgradeCandidate};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{MigrateError, MigrateResult, TransactionPhase};
use crate::ledger::VersionStore;
use crate::HANDOFF_CAPACITY;

/// Consumes candidates and applies them to the target database
#[derive(Debug, Clone)]
pub struct MigrationExecutor {
    descriptor: ConnectionDescriptor,
    store: VersionStore,
}

impl MigrationExecutor {
    pub fn new(descriptor: ConnectionDescriptor, store: VersionStore) -> Self {
        Self { descriptor, store }
    }

    /// Start the consumer task.
    ///
    /// Every committed candidate is reported on the returned receiver. The
    /// channel closes once the input is exhausted or on the first failure;
    /// the task result carries the number of applied scripts or that failure.
    pub fn spawn(
        self,
        candidates: mpsc::Receiver<UpgradeCandidate>,
    ) -> (mpsc::Receiver<AppliedResult>, JoinHandle<MigrateResult<usize>>) {
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);

        let handle = tokio::spawn(async move {
            let result = self.consume(candidates, &tx).await;
            drop(tx);
            result
        });

        (rx, handle)
    }

    async fn consume(
        &self,
        mut candidates: mpsc::Receiver<UpgradeCandidate>,
        applied: &mpsc::Sender<AppliedResult>,
    ) -> MigrateResult<usize> {
        let mut conn = match self.descriptor.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Executor could not connect: {}", e);
                return Err(e);
            }
        };

        let result = self.apply_all(&mut conn, &mut candidates, applied).await;
        candidates.close();

        if let Err(e) = conn.close().await {
            warn!("Failed to close executor connection: {}", e);
        }

        result
    }

    async fn apply_all(
        &self,
        conn: &mut PgConnection,
        candidates: &mut mpsc::Receiver<UpgradeCandidate>,
        applied: &mpsc::Sender<AppliedResult>,
    ) -> MigrateResult<usize> {
        let mut count = 0;

        while let Some(candidate) = candidates.recv().await {
            self.apply(conn, &candidate).await?;
            count += 1;

            if applied.send(AppliedResult::from(&candidate)).await.is_err() {
                debug!("No listener for completion of {}", candidate.name);
            }
        }

        Ok(count)
    }

    /// Apply one candidate: record its version and run its body in one transaction
    pub async fn apply(
        &self,
        conn: &mut PgConnection,
        candidate: &UpgradeCandidate,
    ) -> MigrateResult<()> {
        info!("Running: {}", candidate.name);

        let mut tx = conn
            .begin()
            .await
            .map_err(|source| failure(candidate, TransactionPhase::Begin, source))?;

        if let Err(source) = self.store.record(&mut *tx, candidate).await {
            return Err(abort(tx, candidate, TransactionPhase::RecordVersion, source).await);
        }

        if candidate.content.trim().is_empty() {
            debug!("{} has no statements, recording version only", candidate.name);
        } else if let Err(source) = (&mut *tx).execute(candidate.content.as_str()).await {
            return Err(abort(tx, candidate, TransactionPhase::ExecuteScript, source).await);
        }

        tx.commit()
            .await
            .map_err(|source| failure(candidate, TransactionPhase::Commit, source))?;

        Ok(())
    }
}

async fn abort(
    tx: Transaction<'_, Postgres>,
    candidate: &UpgradeCandidate,
    phase: TransactionPhase,
    source: sqlx::Error,
) -> MigrateError {
    if let Err(e) = tx.rollback().await {
        warn!("Rollback of {} failed: {}", candidate.name, e);
    }
    failure(candidate, phase, source)
}

fn failure(candidate: &UpgradeCandidate, phase: TransactionPhase, source: sqlx::Error) -> MigrateError {
    error!(
        script = %candidate.name,
        version = candidate.version,
        "Upgrade failed on {} during {}: {}",
        candidate.name,
        phase,
        source
    );

    MigrateError::Transaction {
        script: candidate.name.clone(),
        phase,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(version: i32, name: &str) -> UpgradeCandidate {
        UpgradeCandidate {
            version,
            name: name.to_string(),
            content: "SELECT 1;".to_string(),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_closes_both_channels() {
        let descriptor = ConnectionDescriptor {
            options: "bogus".to_string(),
            ..ConnectionDescriptor::default()
        };
        let executor = MigrationExecutor::new(descriptor, VersionStore::default());

        let (candidate_tx, candidate_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (mut applied_rx, handle) = executor.spawn(candidate_rx);

        assert!(applied_rx.recv().await.is_none());
        assert!(matches!(
            handle.await.unwrap(),
            Err(MigrateError::InvalidOption { option }) if option == "bogus"
        ));
        assert!(candidate_tx.send(candidate(1, "001_a.sql")).await.is_err());
    }

    #[test]
    fn test_failure_carries_script_and_phase() {
        let err = failure(
            &candidate(2, "002_b.sql"),
            TransactionPhase::RecordVersion,
            sqlx::Error::RowNotFound,
        );

        match err {
            MigrateError::Transaction { script, phase, .. } => {
                assert_eq!(script, "002_b.sql");
                assert_eq!(phase, TransactionPhase::RecordVersion);
            }
            other => panic!("Expected transaction error, got {:?}", other),
        }
    }

    #[test]
    fn test_applied_result_from_candidate() {
        let result = AppliedResult::from(&candidate(7, "007_g.sql"));
        assert_eq!(result.version, 7);
        assert_eq!(result.name, "007_g.sql");
    }
}
