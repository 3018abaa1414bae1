//! Widget Preview Cache
//!
//! Disk-backed cache of rendered home-screen widget and shortcut previews,
//! keyed by (component, user, size).
//!
//! Architecture:
//! - `state/` - data model, the SQLite preview database and memoized package versions
//! - `preview/` - the in-memory tier, buffer recycling and the preview renderer
//! - `loader/` - request handling, single-flight loads and invalidation sweeps
//! - `registry.rs` - installed package metadata
//! - `config.rs` - configuration

pub mod config;
pub mod error;
pub mod loader;
pub mod preview;
pub mod registry;
pub mod state;

pub use config::{CacheConfig, RenderConfig};
pub use error::{ConfigError, PreviewError, RenderError, StoreError};
pub use loader::{LoaderStats, PreviewLoader, PreviewRequest, SweepReport};
pub use preview::{PreviewGenerator, TilePreviewGenerator};
pub use registry::{PackageRegistry, ProviderEntry, StaticPackageRegistry};
pub use state::data::{
    CacheKey, ComponentName, PersistentRecord, PreviewSize, PreviewSource, ShortcutActivity,
    UserId, VersionStamp, WidgetProvider,
};
pub use state::store::PreviewStore;
pub use state::versions::VersionRegistry;
