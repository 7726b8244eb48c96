//! Constant-decay demo right-hand side: `dx/dt = -x` on a single cell, one
//! worker, no neighbor exchange needed (spec §8 end-to-end scenario 1).

use crate::error::CoreResult;
use crate::state::block::Block;
use crate::topology::Topology;

use crate::integrator::rhs::RightHandSide;

pub struct Decay;

impl RightHandSide for Decay {
    fn eval(&self, _topo: &Topology, _t: f64, x: &mut Block, out: &mut Block) -> CoreResult<()> {
        let layout = x.layout;
        for k in layout.interior_range_k() {
            for j in layout.interior_range_j() {
                for i in layout.interior_range_i() {
                    let v = x.get(0, i, j, k);
                    out.set(0, i, j, k, -v);
                }
            }
        }
        Ok(())
    }
}

/// Runs the constant-decay scenario standalone and returns the final
/// value at the one interior cell, for use by the CLI's demo front-end
/// and by integration tests.
pub fn run() -> CoreResult<f64> {
    use crate::grid::{BlockLayout, ChunkList, GridSpec};
    use crate::integrator::{integrate, FixedRhs, NoCallback};
    use crate::state::{DeltaMode, IntegrationState};

    let spec = GridSpec { n1: 1, n2: 1, n3_total: 1, bc: 1, num_vars: 1 };
    let mut topo = Topology::init(1, 0)?;
    let t = topo.remove(0);

    let layout = BlockLayout::for_rank(spec, 0, 1)?;
    let mut block = Block::zeros(layout);
    block.set(0, 1, 1, 1, 1.0);
    let mut chunks = ChunkList::default_for(&layout);

    let mut state = IntegrationState::new(block, 0.0, 0.1, 1e-8, 1e-6, DeltaMode::Local);
    let mut rhs = FixedRhs(Decay);
    let mut cb = NoCallback;

    integrate(&t, &mut state, 1.0, &mut chunks, &mut rhs, false, f64::INFINITY, Some(&mut cb), None)?;
    Ok(state.x.get(0, 1, 1, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exp_minus_one() {
        let got = run().unwrap();
        let expect = std::f64::consts::E.recip();
        assert!((got - expect).abs() < 1e-6);
    }
}
