//! In-memory columnar storage.
//!
//! - [`Column`]: typed nullable cells, immutable once built
//! - [`Table`]: ordered named columns of equal length
//! - [`MemoryPool`]: recycled scratch buffers for operator working state

mod column;
mod memory_pool;
mod table;

pub use column::Column;
pub use memory_pool::{words_for_bits, MemoryPool, MemoryPoolStats, ScratchBuffer, WORD_BITS};
pub use table::Table;
