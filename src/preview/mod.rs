//! Preview buffers and rendering
//!
//! - `memory.rs` - bounded in-memory tier of loaded previews
//! - `pool.rs` - retired buffers kept for reuse
//! - `render.rs` - the generator capability and the stock tile renderer

pub mod memory;
pub mod pool;
pub mod render;

pub use memory::MemoryTier;
pub use pool::RecyclePool;
pub use render::{PreviewGenerator, TilePreviewGenerator};
