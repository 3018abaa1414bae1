use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::png::PngDecoder;
use image::{ColorType, DynamicImage, ImageDecoder, ImageFormat, RgbaImage};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::data::{CacheKey, PersistentRecord, UserId, VersionStamp};
use crate::error::StoreError;

/// Bumping this drops every stored preview on the next open
pub const SCHEMA_VERSION: i64 = 3;

const TABLE_NAME: &str = "shortcut_and_widget_previews";

/// The PreviewStore manages the SQLite preview database.
/// It holds one rendered preview per (component, user, size) together with
/// the package version it was rendered from.
pub struct PreviewStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl PreviewStore {
    /// Open (or create) the database at `path`.
    /// Parent directories are created as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        // Ensure the parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // Open or create the database
        let conn = Connection::open(path)?;
        let store = PreviewStore {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.init_schema()?;

        info!("📁 Preview database initialized at: {}", path.display());
        Ok(store)
    }

    /// Private, non-persistent database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = PreviewStore {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create the table, or recreate it when the stored schema version differs.
    /// Previews can always be regenerated so there is no migration path.
    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        // Compare the stored schema version with ours
        let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if current != SCHEMA_VERSION {
            if current != 0 {
                info!(
                    "🔄 Preview schema {} -> {}, dropping cached previews",
                    current, SCHEMA_VERSION
                );
            }
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {TABLE_NAME}"))?;
        }

        // Create previews table
        // One row per (component, user, size), with the package version it was rendered from
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
                componentName   TEXT NOT NULL,
                profileId       INTEGER NOT NULL,
                size            TEXT NOT NULL,
                packageName     TEXT NOT NULL,
                lastUpdated     INTEGER NOT NULL DEFAULT 0,
                version         INTEGER NOT NULL DEFAULT 0,
                preview_bitmap  BLOB,
                PRIMARY KEY (componentName, profileId, size)
            )"
        ))?;
        // Record the version so the next open can tell
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(())
    }

    /// Get the path to the database file (None for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Read the record stored for `key`
    pub fn get(&self, key: &CacheKey) -> Result<Option<PersistentRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!(
                    "SELECT packageName, version, lastUpdated, preview_bitmap FROM {TABLE_NAME}
                     WHERE componentName = ?1 AND profileId = ?2 AND size = ?3"
                ),
                params![key.component.flatten(), key.user.0 as i64, key.size.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<Vec<u8>>>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.and_then(|(package, version, last_updated, blob)| {
            blob.map(|blob| PersistentRecord {
                key: key.clone(),
                package,
                stamp: VersionStamp::new(version, last_updated),
                blob,
            })
        }))
    }

    /// Insert or replace the record for its key; the last writer wins
    pub fn put(&self, record: &PersistentRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {TABLE_NAME}
                 (componentName, profileId, size, packageName, version, lastUpdated, preview_bitmap)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                record.key.component.flatten(),
                record.key.user.0 as i64,
                record.key.size.to_string(),
                record.package,
                record.stamp.version_code,
                record.stamp.last_update_time,
                record.blob,
            ],
        )?;
        Ok(())
    }

    /// Delete every preview of `package` stored for `user`.
    /// Returns the number of rows removed.
    pub fn delete_by_package_and_user(
        &self,
        package: &str,
        user: UserId,
    ) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            &format!("DELETE FROM {TABLE_NAME} WHERE packageName = ?1 AND profileId = ?2"),
            params![package, user.0 as i64],
        )?;
        debug!(package, %user, deleted, "deleted stored previews");
        Ok(deleted)
    }

    /// Full table scan of (user, package, stamp), one item per row
    pub fn scan_all(&self) -> Result<Vec<(UserId, String, VersionStamp)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT profileId, packageName, lastUpdated, version FROM {TABLE_NAME}"
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok((
                UserId(row.get::<_, i64>(0)? as u64),
                row.get::<_, String>(1)?,
                VersionStamp::new(row.get(3)?, row.get(2)?),
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Number of stored previews
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {TABLE_NAME}"), [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl std::fmt::Debug for PreviewStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Encode a preview as PNG for storage
pub fn encode_preview(image: &RgbaImage) -> Result<Vec<u8>, StoreError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Decode a stored preview. When `reuse` holds a buffer of the decoded
/// dimensions and the blob is 8-bit RGBA, the pixels are decoded straight
/// into it and the buffer is taken; otherwise it is left for the caller.
pub fn decode_preview(blob: &[u8], reuse: &mut Option<RgbaImage>) -> Result<RgbaImage, StoreError> {
    let decoder = PngDecoder::new(Cursor::new(blob))?;

    let fits = decoder.color_type() == ColorType::Rgba8
        && reuse
            .as_ref()
            .is_some_and(|buffer| buffer.dimensions() == decoder.dimensions());

    if fits {
        if let Some(mut buffer) = reuse.take() {
            decoder.read_image(&mut buffer)?;
            return Ok(buffer);
        }
    }

    // Anything else is converted through a fresh allocation
    Ok(DynamicImage::from_decoder(decoder)?.into_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::{ComponentName, PreviewSize};
    use image::Rgba;

    fn key(package: &str, user: u64, size: &str) -> CacheKey {
        CacheKey::new(
            ComponentName::new(package, format!("{package}.Widget")),
            UserId(user),
            size.parse().unwrap(),
        )
    }

    fn record(key: CacheKey, stamp: VersionStamp) -> PersistentRecord {
        let image = RgbaImage::from_pixel(key.size.width, key.size.height, Rgba([10, 20, 30, 255]));
        PersistentRecord {
            package: key.package().to_string(),
            key,
            stamp,
            blob: encode_preview(&image).unwrap(),
        }
    }

    #[test]
    fn test_put_then_get() {
        let store = PreviewStore::open_in_memory().unwrap();
        let k = key("com.android.calculator2", 0, "100x100");
        let rec = record(k.clone(), VersionStamp::new(7, 1000));

        store.put(&rec).unwrap();

        let back = store.get(&k).unwrap().unwrap();
        assert_eq!(back, rec);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_get_missing() {
        let store = PreviewStore::open_in_memory().unwrap();
        assert!(store.get(&key("p", 0, "1x1")).unwrap().is_none());
    }

    #[test]
    fn test_put_replaces() {
        let store = PreviewStore::open_in_memory().unwrap();
        let k = key("p", 0, "4x4");
        store.put(&record(k.clone(), VersionStamp::new(1, 1))).unwrap();
        store.put(&record(k.clone(), VersionStamp::new(2, 2))).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get(&k).unwrap().unwrap().stamp, VersionStamp::new(2, 2));
    }

    #[test]
    fn test_delete_by_package_and_user() {
        let store = PreviewStore::open_in_memory().unwrap();
        store.put(&record(key("p", 0, "4x4"), VersionStamp::ZERO)).unwrap();
        store.put(&record(key("p", 0, "8x8"), VersionStamp::ZERO)).unwrap();
        store.put(&record(key("p", 10, "4x4"), VersionStamp::ZERO)).unwrap();
        store.put(&record(key("q", 0, "4x4"), VersionStamp::ZERO)).unwrap();

        assert_eq!(store.delete_by_package_and_user("p", UserId(0)).unwrap(), 2);
        assert!(store.get(&key("p", 10, "4x4")).unwrap().is_some());
        assert!(store.get(&key("q", 0, "4x4")).unwrap().is_some());
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_scan_all() {
        let store = PreviewStore::open_in_memory().unwrap();
        store.put(&record(key("p", 3, "4x4"), VersionStamp::new(5, 6))).unwrap();

        let rows = store.scan_all().unwrap();
        assert_eq!(rows, vec![(UserId(3), "p".to_string(), VersionStamp::new(5, 6))]);
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("previews.db");
        {
            let store = PreviewStore::open(&path).unwrap();
            store.put(&record(key("p", 0, "4x4"), VersionStamp::ZERO)).unwrap();
        }
        let store = PreviewStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn test_schema_change_drops_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("previews.db");
        {
            let store = PreviewStore::open(&path).unwrap();
            store.put(&record(key("p", 0, "4x4"), VersionStamp::ZERO)).unwrap();
        }
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION - 1).unwrap();
        }

        let store = PreviewStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_decode_reuses_matching_buffer() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        let blob = encode_preview(&image).unwrap();

        let mut reuse = Some(RgbaImage::new(3, 2));
        let decoded = decode_preview(&blob, &mut reuse).unwrap();
        assert!(reuse.is_none());
        assert_eq!(decoded, image);

        let mut reuse = Some(RgbaImage::new(3, 2));
        let target = reuse.as_ref().unwrap().as_raw().as_ptr();
        let decoded = decode_preview(&blob, &mut reuse).unwrap();
        assert_eq!(decoded.as_raw().as_ptr(), target);

        let mut wrong = Some(RgbaImage::new(5, 5));
        let decoded = decode_preview(&blob, &mut wrong).unwrap();
        assert_eq!(decoded, image);
        assert_eq!(wrong.map(|b| b.dimensions()), Some((5, 5)));
    }

    #[test]
    fn test_blob_is_byte_identical() {
        let mut image = RgbaImage::new(PreviewSize::new(6, 6).width, 6);
        image.put_pixel(2, 3, Rgba([200, 100, 50, 255]));
        let blob = encode_preview(&image).unwrap();
        let decoded = decode_preview(&blob, &mut None).unwrap();
        assert_eq!(decoded.as_raw(), image.as_raw());
    }
}
