//! Integration state carried by each worker across RK-Merson steps
//! (spec §3 "Integration state (per worker)").

use serde::{Deserialize, Serialize};

use crate::state::Block;

/// Whether the reduced error norm is compared against `delta` directly
/// (`Global`) or scaled by `|h/3|` first (`Local`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaMode {
    Local,
    Global,
}

/// Everything the RK-Merson core needs to thread through one `solve` call.
/// `t` is only authoritative at the master; workers carry it along so the
/// right-hand side can use it without an extra broadcast per stage.
pub struct IntegrationState {
    pub t: f64,
    pub h: f64,
    pub h_min: f64,
    pub delta: f64,
    pub delta_mode: DeltaMode,
    pub steps: u64,
    pub steps_total: u64,
    pub x: Block,
}

impl IntegrationState {
    pub fn new(x: Block, t0: f64, h_init: f64, h_min: f64, delta: f64, delta_mode: DeltaMode) -> Self {
        Self {
            t: t0,
            h: h_init,
            h_min,
            delta,
            delta_mode,
            steps: 0,
            steps_total: 0,
            x,
        }
    }
}
