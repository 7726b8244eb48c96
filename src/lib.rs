//! `merson-core`: the adaptive Runge-Kutta-Merson integrator, the
//! distributed state-and-domain protocol (grid layout, ghost exchange,
//! boundary setup, worker topology), and the simulation-driver state
//! machine shared by the Intertrack/HiPPIES phase-field freezing
//! simulators and the sphere-collider particle code.
//!
//! The crate is organized the way the simulators that depend on it are:
//! a worker [`topology`] of OS threads exchanging messages, a [`grid`]
//! describing how the global domain tiles across them, per-worker
//! [`state`] advanced by the [`integrator`], [`ghost`] exchange and
//! boundary application keeping neighboring blocks consistent, and a
//! [`driver`] tying parameter scripts, initial conditions, and dataset
//! emission into one parameter-script-to-dataset run.

pub mod batch;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod ghost;
pub mod grid;
pub mod integrator;
pub mod logbuf;
pub mod params;
pub mod rng;
pub mod snapshot;
pub mod state;
pub mod topology;

pub mod demos;

pub use error::{CoreError, CoreResult};
