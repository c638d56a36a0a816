//! Script discovery
//!
//! Scans the scripts directory for entries whose name starts with a run of
//! decimal digits, keeps the ones newer than the current version, and feeds
//! them one at a time to the executor.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::definitions::{PendingScript, UpgradeCandidate};
use crate::error::{MigrateError, MigrateResult};
use crate::HANDOFF_CAPACITY;

/// Parse the leading digit run of a file name.
///
/// Returns `None` when the name does not start with a digit, so the entry is
/// not a candidate at all.
pub fn parse_version(name: &str) -> Option<MigrateResult<i32>> {
    let digits = name.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }

    Some(
        name[..digits]
            .parse::<i32>()
            .map_err(|source| MigrateError::VersionParse {
                script: name.to_string(),
                source,
            }),
    )
}

/// Finds upgrade scripts newer than a given version
#[derive(Debug, Clone)]
pub struct ScriptDiscoverer {
    dir: PathBuf,
    since: i32,
}

impl ScriptDiscoverer {
    pub fn new(dir: impl Into<PathBuf>, since: i32) -> Self {
        Self {
            dir: dir.into(),
            since,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List pending scripts in numeric version order without loading them
    pub async fn scan(&self) -> MigrateResult<Vec<PendingScript>> {
        let dir_error = |source| MigrateError::DirectoryRead {
            path: self.dir.clone(),
            source,
        };

        let mut entries = fs::read_dir(&self.dir).await.map_err(dir_error)?;
        let mut pending = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(dir_error)? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    // A lossy name would end up in the ledger, so only non-candidates may pass
                    let lossy = raw.to_string_lossy().into_owned();
                    match parse_version(&lossy) {
                        Some(Ok(version)) if version > self.since => {
                            return Err(MigrateError::ScriptRead {
                                script: lossy,
                                source: io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    "file name is not valid UTF-8",
                                ),
                            });
                        }
                        _ => {
                            debug!("Skipping {}: name is not valid UTF-8", lossy);
                            continue;
                        }
                    }
                }
            };
            let version = match parse_version(&name) {
                Some(version) => version?,
                None => continue,
            };

            if version > self.since {
                pending.push(PendingScript {
                    version,
                    name,
                    path: entry.path(),
                });
            }
        }

        pending.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.name.cmp(&b.name)));

        if let Some(pair) = pending.windows(2).find(|pair| pair[0].version == pair[1].version) {
            return Err(MigrateError::DuplicateVersion {
                version: pair[0].version,
                first: pair[0].name.clone(),
                second: pair[1].name.clone(),
            });
        }

        Ok(pending)
    }

    /// Start the producer task.
    ///
    /// Candidates arrive on the returned receiver in version order. The
    /// channel is closed when the task finishes, whether it succeeded or not;
    /// the task result carries the number of candidates handed over.
    pub fn spawn(self) -> (mpsc::Receiver<UpgradeCandidate>, JoinHandle<MigrateResult<usize>>) {
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);

        let handle = tokio::spawn(async move {
            let result = self.produce(&tx).await;
            drop(tx);

            if let Err(e) = &result {
                error!("Script discovery stopped: {}", e);
            }
            result
        });

        (rx, handle)
    }

    async fn produce(&self, tx: &mpsc::Sender<UpgradeCandidate>) -> MigrateResult<usize> {
        let pending = self.scan().await?;
        let mut sent = 0;

        for script in pending {
            info!("Preparing: {}", script.name);
            let candidate = load_candidate(script).await?;

            if tx.send(candidate).await.is_err() {
                debug!("Executor stopped accepting scripts after {} candidate(s)", sent);
                break;
            }
            sent += 1;
        }

        Ok(sent)
    }
}

async fn load_candidate(script: PendingScript) -> MigrateResult<UpgradeCandidate> {
    let read_error = |source| MigrateError::ScriptRead {
        script: script.name.clone(),
        source,
    };

    let bytes = fs::read(&script.path).await.map_err(read_error)?;
    let content = String::from_utf8(bytes)
        .map_err(|e| read_error(io::Error::new(io::ErrorKind::InvalidData, e)))?;

    Ok(UpgradeCandidate {
        version: script.version,
        name: script.name,
        content,
    })
}
