//! Ghost Exchange and Boundary Setup (spec §4.4, §4.5): together these
//! complete a worker's stencil before every right-hand-side evaluation.

pub mod boundary;
pub mod exchange;

pub use boundary::{apply_boundary, OuterBoundary, OuterFace};
pub use exchange::exchange_ghosts;
