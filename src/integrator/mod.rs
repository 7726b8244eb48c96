//! Adaptive Runge-Kutta-Merson integration (spec §4.3).

pub mod merson;
pub mod rhs;

pub use merson::{integrate, Outcome};
pub use rhs::{FixedRhs, NoCallback, NoRebalance, RebalanceHook, RhsProvider, RightHandSide, ServiceCallback, StepContext};
