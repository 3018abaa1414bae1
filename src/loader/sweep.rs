//! Invalidation: dropping previews of removed, upgraded or absent packages.

use std::collections::{BTreeSet, HashSet};

use tracing::{error, info};

use super::PreviewLoader;
use crate::state::data::UserId;

/// Result of one [`PreviewLoader::sweep`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows looked at
    pub scanned: usize,
    /// (package, user) groups removed
    pub packages_removed: usize,
    pub rows_deleted: usize,
}

impl PreviewLoader {
    /// Remove every preview of `package` for `user`: its memoized version,
    /// its memory entries (buffers go to the recycling pool) and its rows.
    ///
    /// The steps fail independently. A database error is logged and the
    /// in-memory cleanup still happens; the next sweep retries the rows.
    /// Returns the number of rows deleted. Blocks on database I/O.
    pub fn remove_package(&self, package: &str, user: UserId) -> usize {
        let inner = &self.inner;

        inner.versions.invalidate(package);
        let evicted = inner.memory.lock().evict_package(package, user);

        let deleted = match inner.store.delete_by_package_and_user(package, user) {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(package, %user, "unable to delete previews from database: {}", e);
                0
            }
        };

        info!(package, %user, evicted, deleted, "🗑️  Removed package previews");
        deleted
    }

    /// Reconcile the database with what is installed. A row is dropped when
    /// its (user, package) no longer provides widgets or shortcuts, or when
    /// it was rendered from a different package version.
    ///
    /// This catches packages that changed while nothing was running.
    /// Blocks on database I/O; see [`sweep_in_background`](Self::sweep_in_background).
    pub fn sweep(&self) -> SweepReport {
        let inner = &self.inner;

        // Compare against live versions, not ones memoized earlier
        inner.versions.clear();

        // Every (user, package) that still provides widgets or shortcuts
        let valid: HashSet<(UserId, String)> = inner
            .packages
            .valid_providers()
            .into_iter()
            .map(|entry| (entry.user, entry.package))
            .collect();

        let rows = match inner.store.scan_all() {
            Ok(rows) => rows,
            Err(e) => {
                error!("error scanning widget previews: {}", e);
                return SweepReport::default();
            }
        };

        // Group stale rows so each package is removed once per user
        let mut stale: BTreeSet<(UserId, String)> = BTreeSet::new();
        for (user, package, stamp) in &rows {
            let pair = (*user, package.clone());
            if stale.contains(&pair) {
                continue;
            }
            if valid.contains(&pair) && inner.versions.get(package) == *stamp {
                continue;
            }
            stale.insert(pair);
        }

        let mut report = SweepReport {
            scanned: rows.len(),
            ..SweepReport::default()
        };
        // Removal also evicts memory and forgets the memoized version
        for (user, package) in stale {
            report.rows_deleted += self.remove_package(&package, user);
            report.packages_removed += 1;
        }

        info!(
            scanned = report.scanned,
            packages = report.packages_removed,
            rows = report.rows_deleted,
            "🔄 Preview sweep complete"
        );
        report
    }

    /// [`sweep`](Self::sweep) on a blocking worker
    pub async fn sweep_in_background(&self) -> SweepReport {
        let loader = self.clone();
        tokio::task::spawn_blocking(move || loader.sweep())
            .await
            .unwrap_or_else(|e| {
                error!("preview sweep task failed: {}", e);
                SweepReport::default()
            })
    }
}
