//! State Layout (spec §4.2): mapping the inner grid onto worker blocks,
//! plus the chunk list the integrator uses to traverse interior storage.

pub mod chunk;
pub mod layout;

pub use chunk::{Chunk, ChunkList};
pub use layout::{BlockLayout, GridSpec};
