//! Per-worker block storage and integration state (spec §3).

pub mod block;
pub mod integration_state;

pub use block::Block;
pub use integration_state::{DeltaMode, IntegrationState};
