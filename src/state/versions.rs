use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use super::data::VersionStamp;
use crate::registry::PackageRegistry;

/// Memoized package versions.
///
/// A lookup that fails is remembered as [`VersionStamp::ZERO`] and is not
/// retried until the package is invalidated. A lookup that races with an
/// invalidation returns its answer without remembering it.
pub struct VersionRegistry {
    packages: Arc<dyn PackageRegistry>,
    memo: Mutex<Memo>,
}

#[derive(Default)]
struct Memo {
    stamps: HashMap<String, VersionStamp>,
    /// Bumped by every invalidation
    epoch: u64,
}

impl VersionRegistry {
    pub fn new(packages: Arc<dyn PackageRegistry>) -> Self {
        Self {
            packages,
            memo: Mutex::new(Memo::default()),
        }
    }

    pub fn get(&self, package: &str) -> VersionStamp {
        let epoch = {
            let memo = self.memo.lock();
            if let Some(stamp) = memo.stamps.get(package) {
                return *stamp;
            }
            memo.epoch
        };

        // Queried without holding the lock
        let stamp = match self.packages.installed_version(package) {
            Some(stamp) => stamp,
            None => {
                error!(package, "package info not found");
                VersionStamp::ZERO
            }
        };

        let mut memo = self.memo.lock();
        if memo.epoch != epoch {
            // Invalidated while we were asking: the answer may predate it
            return stamp;
        }
        *memo.stamps.entry(package.to_string()).or_insert(stamp)
    }

    pub fn invalidate(&self, package: &str) {
        let mut memo = self.memo.lock();
        memo.stamps.remove(package);
        memo.epoch += 1;
    }

    pub fn clear(&self) {
        let mut memo = self.memo.lock();
        memo.stamps.clear();
        memo.epoch += 1;
    }

    pub fn is_cached(&self, package: &str) -> bool {
        self.memo.lock().stamps.contains_key(package)
    }
}
