//! Persistent and memoized state
//!
//! - `data.rs` - keys, version stamps, records and preview sources
//! - `store.rs` - the SQLite preview database
//! - `versions.rs` - memoized package versions

pub mod data;
pub mod store;
pub mod versions;
