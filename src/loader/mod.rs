//! Preview loading
//!
//! [`PreviewLoader`] answers preview requests from memory when it can,
//! and otherwise loads them on a blocking worker: stored blob first,
//! freshly rendered preview second. Concurrent requests for the same key
//! share one load.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use widget_preview_cache::{
//!     CacheConfig, PreviewLoader, PreviewStore, StaticPackageRegistry, TilePreviewGenerator,
//! };
//! use widget_preview_cache::state::data::{
//!     ComponentName, PreviewSize, PreviewSource, ShortcutActivity,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheConfig::default();
//! let store = PreviewStore::open(&config.resolved_database_path()?)?;
//! let loader = PreviewLoader::new(
//!     &config,
//!     store,
//!     Arc::new(StaticPackageRegistry::new()),
//!     Arc::new(TilePreviewGenerator::new(config.render)),
//! )?;
//!
//! let source = PreviewSource::Shortcut(ShortcutActivity {
//!     component: ComponentName::new("com.android.calculator2", "com.android.calculator2.Calculator"),
//!     icon: None,
//! });
//! let mut request = loader.request_preview(source, PreviewSize::new(100, 100));
//! let image = request.wait().await?;
//! # let _ = image;
//! # Ok(())
//! # }
//! ```

mod flight;
mod request;
mod sweep;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::CacheConfig;
use crate::error::{PreviewError, RenderError};
use crate::preview::{MemoryTier, PreviewGenerator};
use crate::registry::PackageRegistry;
use crate::state::data::{CacheKey, PersistentRecord, PreviewSize, PreviewSource, VersionStamp};
use crate::state::store::{decode_preview, encode_preview, PreviewStore};
use crate::state::versions::VersionRegistry;

use flight::FlightMap;
pub use request::PreviewRequest;
pub use sweep::SweepReport;

/// Counters since the loader was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub renders: u64,
    pub render_failures: u64,
    /// Requests that joined a load already running for their key
    pub attached: u64,
    pub in_flight: usize,
    pub memory_entries: usize,
    pub pooled_buffers: usize,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    renders: AtomicU64,
    render_failures: AtomicU64,
    attached: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

enum LoadOutcome {
    Loaded(RgbaImage),
    Failed(RenderError),
    Cancelled,
}

struct LoadTask {
    key: CacheKey,
    source: PreviewSource,
    size: PreviewSize,
    flight_id: u64,
    token: CancellationToken,
}

pub(crate) struct LoaderInner {
    store: PreviewStore,
    versions: VersionRegistry,
    packages: Arc<dyn PackageRegistry>,
    generator: Arc<dyn PreviewGenerator>,
    /// Lock order: `flights` before `memory`
    flights: Mutex<FlightMap>,
    memory: Mutex<MemoryTier>,
    permits: Arc<Semaphore>,
    counters: Counters,
    runtime: Handle,
}

/// The preview cache. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct PreviewLoader {
    inner: Arc<LoaderInner>,
}

impl PreviewLoader {
    /// Must be called from within a tokio runtime; loads are spawned on it.
    pub fn new(
        config: &CacheConfig,
        store: PreviewStore,
        packages: Arc<dyn PackageRegistry>,
        generator: Arc<dyn PreviewGenerator>,
    ) -> Result<Self, PreviewError> {
        let runtime = Handle::try_current().map_err(|_| PreviewError::NoRuntime)?;

        let inner = LoaderInner {
            store,
            versions: VersionRegistry::new(packages.clone()),
            packages,
            generator,
            flights: Mutex::new(FlightMap::default()),
            memory: Mutex::new(MemoryTier::new(
                config.memory_entries,
                config.recycle_capacity,
            )),
            permits: Arc::new(Semaphore::new(config.max_concurrent_loads.max(1))),
            counters: Counters::default(),
            runtime,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Request the preview of `source` at `size`.
    ///
    /// Never blocks. A preview already in memory makes the returned request
    /// ready at once; anything else is loaded in the background.
    pub fn request_preview(&self, source: PreviewSource, size: PreviewSize) -> PreviewRequest {
        let inner = &self.inner;
        let key = source.cache_key(size);

        let mut flights = inner.flights.lock();

        if let Some(image) = inner.memory.lock().lookup(&key) {
            bump(&inner.counters.memory_hits);
            debug!(%key, "preview served from memory");
            return PreviewRequest::ready(key, image, inner.clone());
        }

        if let Some((ticket, rx)) = flights.attach(&key) {
            bump(&inner.counters.attached);
            debug!(%key, "joined running preview load");
            return PreviewRequest::pending(key, ticket, rx, inner.clone());
        }

        let (ticket, rx, token) = flights.start(key.clone());
        drop(flights);

        let task = LoadTask {
            key: key.clone(),
            source,
            size,
            flight_id: ticket.flight_id,
            token,
        };
        let worker = inner.clone();
        inner.runtime.spawn(async move { worker.run(task).await });

        PreviewRequest::pending(key, ticket, rx, inner.clone())
    }

    /// Whether `key` is currently held in memory
    pub fn cached_in_memory(&self, key: &CacheKey) -> bool {
        self.inner.memory.lock().contains(key)
    }

    /// Drop the whole memory tier into the recycling pool.
    /// Returns how many entries were dropped.
    pub fn trim_memory(&self) -> usize {
        self.inner.memory.lock().trim()
    }

    pub fn store(&self) -> &PreviewStore {
        &self.inner.store
    }

    pub fn versions(&self) -> &VersionRegistry {
        &self.inner.versions
    }

    pub fn stats(&self) -> LoaderStats {
        let inner = &self.inner;
        let in_flight = inner.flights.lock().len();
        let (memory_entries, pooled_buffers) = {
            let memory = inner.memory.lock();
            (memory.len(), memory.pooled())
        };
        let c = &inner.counters;

        LoaderStats {
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            disk_hits: c.disk_hits.load(Ordering::Relaxed),
            renders: c.renders.load(Ordering::Relaxed),
            render_failures: c.render_failures.load(Ordering::Relaxed),
            attached: c.attached.load(Ordering::Relaxed),
            in_flight,
            memory_entries,
            pooled_buffers,
        }
    }
}

impl LoaderInner {
    async fn run(self: Arc<Self>, task: LoadTask) {
        let key = task.key.clone();
        let flight_id = task.flight_id;

        let permit = tokio::select! {
            _ = task.token.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        };

        let outcome = match permit {
            Some(permit) => {
                let worker = self.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    worker.load_blocking(&task)
                })
                .await;

                joined.unwrap_or_else(|e| {
                    error!(%key, "preview worker failed: {}", e);
                    LoadOutcome::Failed(RenderError::new(format!("preview worker failed: {e}")))
                })
            }
            None => LoadOutcome::Cancelled,
        };

        self.finish(&key, flight_id, outcome);
    }

    /// Runs on a blocking worker. Cancellation is checked before the disk
    /// read, before rendering and before the disk write.
    fn load_blocking(&self, task: &LoadTask) -> LoadOutcome {
        let key = &task.key;

        // Claim a recycled render target, or allocate one
        let buffer = self
            .memory
            .lock()
            .take_buffer(task.size)
            .unwrap_or_else(|| RgbaImage::new(task.size.width, task.size.height));
        let mut reuse = Some(buffer);

        if task.token.is_cancelled() {
            self.give_back(reuse);
            return LoadOutcome::Cancelled;
        }

        // Try the database first
        if let Some(image) = self.read_stored(key, &mut reuse) {
            bump(&self.counters.disk_hits);
            debug!(%key, "preview loaded from database");
            self.give_back(reuse);
            return LoadOutcome::Loaded(image);
        }

        if task.token.is_cancelled() {
            self.give_back(reuse);
            return LoadOutcome::Cancelled;
        }

        // Taken before rendering: if the package is updated mid-render the
        // stored stamp is the old one and the next sweep drops the row.
        let stamp = self.versions.get(key.package());

        // Not stored: render into the claimed buffer
        let image = match self.generator.render(&task.source, task.size, reuse.take()) {
            Ok(image) => image,
            Err(e) => {
                bump(&self.counters.render_failures);
                warn!(%key, "preview generation failed: {}", e);
                return LoadOutcome::Failed(e);
            }
        };
        bump(&self.counters.renders);
        debug!(%key, "🎨 rendered preview");

        // The image still goes to memory even if nobody waits for it anymore
        if task.token.is_cancelled() {
            debug!(%key, "load cancelled, preview not written");
        } else {
            self.write_stored(key, stamp, &image);
        }

        LoadOutcome::Loaded(image)
    }

    /// Storage errors degrade to a miss
    fn read_stored(&self, key: &CacheKey, reuse: &mut Option<RgbaImage>) -> Option<RgbaImage> {
        let record = match self.store.get(key) {
            Ok(record) => record?,
            Err(e) => {
                warn!(%key, "error loading preview from database: {}", e);
                return None;
            }
        };

        match decode_preview(&record.blob, reuse) {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(%key, "stored preview is unreadable: {}", e);
                None
            }
        }
    }

    /// Storage errors are logged and the write dropped
    fn write_stored(&self, key: &CacheKey, stamp: VersionStamp, image: &RgbaImage) {
        let blob = match encode_preview(image) {
            Ok(blob) => blob,
            Err(e) => {
                error!(%key, "error encoding preview: {}", e);
                return;
            }
        };

        let record = PersistentRecord {
            key: key.clone(),
            package: key.package().to_string(),
            stamp,
            blob,
        };
        if let Err(e) = self.store.put(&record) {
            error!(%key, "error saving preview to database: {}", e);
        }
    }

    fn give_back(&self, buffer: Option<RgbaImage>) {
        if let Some(buffer) = buffer {
            self.memory.lock().give_back(buffer);
        }
    }

    /// Publish the outcome and deliver it to every attached request
    fn finish(&self, key: &CacheKey, flight_id: u64, outcome: LoadOutcome) {
        let (waiters, delivery) = {
            let mut flights = self.flights.lock();
            let waiters = flights.finish(key, flight_id);

            let delivery = match outcome {
                LoadOutcome::Loaded(image) => {
                    let image = Arc::new(image);
                    self.memory.lock().publish(key.clone(), image.clone());
                    Ok(image)
                }
                LoadOutcome::Failed(e) => Err(PreviewError::Render(e)),
                LoadOutcome::Cancelled => Err(PreviewError::Cancelled),
            };
            (waiters, delivery)
        };

        for tx in waiters {
            // The requester may have dropped its handle
            let _ = tx.send(delivery.clone());
        }
    }
}
