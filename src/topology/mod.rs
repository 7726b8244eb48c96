//! Worker Topology (spec §4.1): process-group abstraction, rank identity,
//! virtual-rank remapping, and collective/point-to-point primitives.

pub mod collectives;
pub mod message;

pub use collectives::Topology;
pub use message::{ghost_tag, tags, Message};
