//! Meta right-hand-side indirection and the service/rebalance hooks
//! (spec §4.3 design notes, §4.10, §9).

use crate::error::CoreResult;
use crate::grid::ChunkList;
use crate::state::Block;
use crate::topology::Topology;

/// The user-supplied right-hand side `f(t, x)`. `x` is mutable because a
/// correct evaluation starts by writing this worker's ghost layer (via
/// boundary setup and the neighbor exchange) before computing a
/// derivative from the now-complete stencil; the derivative itself is
/// written into the interior cells of `out`.
pub trait RightHandSide: Send + Sync {
    fn eval(&self, topo: &Topology, t: f64, x: &mut Block, out: &mut Block) -> CoreResult<()>;
}

/// Resolves the effective right-hand side for a given step count. Called
/// once at integrator entry and once after every accepted step, so a
/// caller can swap discretization variants between steps without
/// mutating integrator state directly (spec §4.3 "right-hand-side
/// meta-hook").
pub trait RhsProvider {
    fn resolve(&mut self, step_count: u64) -> &dyn RightHandSide;
}

/// The common case: one right-hand side used for the whole run.
pub struct FixedRhs<R: RightHandSide>(pub R);

impl<R: RightHandSide> RhsProvider for FixedRhs<R> {
    fn resolve(&mut self, _step_count: u64) -> &dyn RightHandSide {
        &self.0
    }
}

/// Read-only view of integration state handed to the service callback.
pub struct StepContext {
    pub next_snapshot_deadline: f64,
    pub t: f64,
    pub h: f64,
    pub steps: u64,
    /// elapsed wall-time / elapsed simulation time, for remaining-time projection.
    pub wall_per_sim_time: f64,
}

/// Invoked by the master after every accepted step (spec §4.10). A `true`
/// return requests the integrator finish cleanly with "interrupted"
/// status, e.g. because an on-demand snapshot trigger file was observed.
pub trait ServiceCallback {
    fn on_accepted_step(&mut self, ctx: &StepContext) -> bool;
}

/// No-op callback for runs that don't need progress reporting or triggers.
pub struct NoCallback;
impl ServiceCallback for NoCallback {
    fn on_accepted_step(&mut self, _ctx: &StepContext) -> bool {
        false
    }
}

/// Optional post-step rebalancing hook (spec §9 design note): reserved for
/// future dynamic load balancing. The default always keeps the same
/// chunk list.
pub trait RebalanceHook {
    fn rebalance(&mut self, current: &ChunkList) -> Option<Vec<crate::grid::Chunk>>;
}

pub struct NoRebalance;
impl RebalanceHook for NoRebalance {
    fn rebalance(&mut self, _current: &ChunkList) -> Option<Vec<crate::grid::Chunk>> {
        None
    }
}
