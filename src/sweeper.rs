//! Retention Sweeper: a long-lived task that deletes expired files from the
//! Storage Area.
//!
//! Two states, `scanning` and `sleeping`. A pass lists the directory once and
//! deletes every regular file whose last modification is older than
//! `max_age`, plus `.work-*` staging entries of the same age (those only
//! survive a crash). A failed deletion is logged and the pass continues.
//! The loop scans immediately at start, then sleeps `interval` between
//! passes, and stops when its [`CancellationToken`] is cancelled.

use crate::error::ConvertError;
use crate::storage::{StorageArea, WORK_PREFIX};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long files live and how often the Storage Area is scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(600),
            interval: Duration::from_secs(60),
        }
    }
}

/// Result of one scanning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries examined (regular files and staging directories).
    pub scanned: usize,
    pub deleted: usize,
    /// Expired entries that could not be deleted.
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Sweeper {
    root: PathBuf,
    policy: RetentionPolicy,
}

impl Sweeper {
    pub fn new(storage: &StorageArea, policy: RetentionPolicy) -> Self {
        Self {
            root: storage.root().to_path_buf(),
            policy,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// One scanning pass using the current wall clock.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now())
    }

    /// One scanning pass as if the clock read `now`.
    ///
    /// An entry is expired when `now - mtime > max_age`. Entries with an
    /// mtime in the future are never expired.
    pub fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Sweeper cannot list {}: {}",
                    self.root.display(),
                    ConvertError::storage(&self.root, e)
                );
                return report;
            }
        };

        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let is_staging = entry.file_name().to_string_lossy().starts_with(WORK_PREFIX);
            if !(meta.is_file() || (meta.is_dir() && is_staging)) {
                continue;
            }
            report.scanned += 1;

            let Ok(modified) = meta.modified() else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.policy.max_age {
                continue;
            }

            match remove_entry(&path, meta.is_dir()) {
                Ok(()) => {
                    report.deleted += 1;
                    info!("Deleted expired {} (age {}s)", path.display(), age.as_secs());
                }
                Err(source) => {
                    report.failed += 1;
                    let err = ConvertError::CleanupFailed { path, source };
                    warn!("{}", err);
                }
            }
        }

        debug!(
            "Sweep pass: scanned={} deleted={} failed={}",
            report.scanned, report.deleted, report.failed
        );
        report
    }

    /// Start the perpetual loop on the Tokio runtime.
    pub fn spawn(self, token: CancellationToken) -> SweeperHandle {
        let join = tokio::spawn(self.run(token.clone()));
        SweeperHandle { token, join }
    }

    /// The loop itself. Returns once `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!(
            "Sweeper started on {} (max age {}s, every {}s)",
            self.root.display(),
            self.policy.max_age.as_secs(),
            self.policy.interval.as_secs()
        );

        loop {
            let pass = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || pass.sweep()).await {
                warn!("Sweep pass panicked: {}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.policy.interval) => {}
                _ = token.cancelled() => {
                    info!("Sweeper shutting down");
                    return;
                }
            }
        }
    }
}

fn remove_entry(path: &Path, is_dir: bool) -> std::io::Result<()> {
    if is_dir {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Owner of a running Sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            warn!("Sweeper task ended abnormally: {}", e);
        }
    }
}
