//! Installed package metadata
//!
//! The cache never talks to a package manager directly. It goes through
//! [`PackageRegistry`], which the embedding application implements.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::state::data::{UserId, VersionStamp};

/// A package that currently provides at least one widget or shortcut for a user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub package: String,
    pub user: UserId,
}

/// Source of truth for what is installed
pub trait PackageRegistry: Send + Sync {
    /// Live version of `package`, or `None` when it is not installed
    fn installed_version(&self, package: &str) -> Option<VersionStamp>;

    /// Every (package, user) pair that currently provides widgets or shortcuts
    fn valid_providers(&self) -> Vec<ProviderEntry>;
}

/// A package as described in a JSON manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPackage {
    pub name: String,
    pub version_code: i64,
    #[serde(default)]
    pub last_update_time: i64,
    /// Users this package provides widgets or shortcuts for
    #[serde(default = "default_users")]
    pub users: Vec<UserId>,
}

fn default_users() -> Vec<UserId> {
    vec![UserId::OWNER]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub packages: Vec<ManifestPackage>,
}

#[derive(Debug, Default)]
struct Installed {
    versions: HashMap<String, VersionStamp>,
    providers: HashMap<String, Vec<UserId>>,
}

/// In-memory registry, mutable at runtime. Backs the CLI and tests.
#[derive(Debug, Default)]
pub struct StaticPackageRegistry {
    installed: RwLock<Installed>,
}

impl StaticPackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_manifest(manifest: &Manifest) -> Self {
        let registry = Self::new();
        for pkg in &manifest.packages {
            registry.install(
                &pkg.name,
                VersionStamp::new(pkg.version_code, pkg.last_update_time),
                &pkg.users,
            );
        }
        registry
    }

    /// Read a JSON manifest such as
    /// `{"packages": [{"name": "com.example", "version_code": 3, "users": [0]}]}`
    pub fn load_manifest(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest =
            serde_json::from_str(&text).map_err(|source| ConfigError::Manifest {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_manifest(&manifest))
    }

    /// Install or upgrade a package
    pub fn install(&self, package: &str, stamp: VersionStamp, users: &[UserId]) {
        let mut installed = self.installed.write();
        installed.versions.insert(package.to_string(), stamp);
        installed.providers.insert(package.to_string(), users.to_vec());
    }

    /// Change the live version without touching its providers
    pub fn upgrade(&self, package: &str, stamp: VersionStamp) {
        self.installed
            .write()
            .versions
            .insert(package.to_string(), stamp);
    }

    pub fn uninstall(&self, package: &str) {
        let mut installed = self.installed.write();
        installed.versions.remove(package);
        installed.providers.remove(package);
    }
}

impl PackageRegistry for StaticPackageRegistry {
    fn installed_version(&self, package: &str) -> Option<VersionStamp> {
        self.installed.read().versions.get(package).copied()
    }

    fn valid_providers(&self) -> Vec<ProviderEntry> {
        let installed = self.installed.read();
        let mut entries: Vec<ProviderEntry> = installed
            .providers
            .iter()
            .flat_map(|(package, users)| {
                users.iter().map(move |user| ProviderEntry {
                    package: package.clone(),
                    user: *user,
                })
            })
            .collect();
        entries.sort_by(|a, b| (a.user, &a.package).cmp(&(b.user, &b.package)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_uninstall() {
        let registry = StaticPackageRegistry::new();
        registry.install("p", VersionStamp::new(1, 2), &[UserId(0), UserId(10)]);

        assert_eq!(registry.installed_version("p"), Some(VersionStamp::new(1, 2)));
        assert_eq!(registry.valid_providers().len(), 2);

        registry.uninstall("p");
        assert_eq!(registry.installed_version("p"), None);
        assert!(registry.valid_providers().is_empty());
    }

    #[test]
    fn test_manifest_defaults_to_owner() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"packages": [{"name": "com.android.calculator2", "version_code": 4}]}"#,
        )
        .unwrap();
        let registry = StaticPackageRegistry::from_manifest(&manifest);

        assert_eq!(
            registry.valid_providers(),
            vec![ProviderEntry {
                package: "com.android.calculator2".to_string(),
                user: UserId::OWNER,
            }]
        );
        assert_eq!(
            registry.installed_version("com.android.calculator2"),
            Some(VersionStamp::new(4, 0))
        );
    }

    #[test]
    fn test_load_manifest_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            StaticPackageRegistry::load_manifest(&path),
            Err(ConfigError::Manifest { .. })
        ));
    }
}
