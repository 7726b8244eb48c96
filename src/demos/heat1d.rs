//! One-dimensional heat-equation demo right-hand side, split across
//! workers along axis 3: `du/dt = kappa * (u[k-1] - 2u[k] + u[k+1]) / dz^2`,
//! zero-Neumann at both outer faces. Exercises ghost exchange (§4.4) and
//! boundary setup (§4.5) the way a real phase-field right-hand side would.

use crate::error::CoreResult;
use crate::ghost::{apply_boundary, exchange_ghosts, OuterBoundary};
use crate::state::block::Block;
use crate::topology::Topology;

use crate::integrator::rhs::RightHandSide;

pub struct Heat1D {
    pub kappa: f64,
    pub dz: f64,
}

impl RightHandSide for Heat1D {
    fn eval(&self, topo: &Topology, t: f64, x: &mut Block, out: &mut Block) -> CoreResult<()> {
        let outer = vec![OuterBoundary::default()];
        apply_boundary(x, t, &outer)?;
        exchange_ghosts(topo, x)?;
        topo.barrier();

        let layout = x.layout;
        let dz2 = self.dz * self.dz;
        for k in layout.interior_range_k() {
            for j in layout.interior_range_j() {
                for i in layout.interior_range_i() {
                    let lo = x.get(0, i, j, k - 1);
                    let mid = x.get(0, i, j, k);
                    let hi = x.get(0, i, j, k + 1);
                    let d2u = (lo - 2.0 * mid + hi) / dz2;
                    out.set(0, i, j, k, self.kappa * d2u);
                }
            }
        }
        Ok(())
    }
}

/// Runs the two-worker heat diffusion scenario standalone and returns
/// the total heat on each worker before and after integration, for use
/// by the CLI's demo front-end.
pub fn run() -> CoreResult<Vec<(f64, f64)>> {
    use crate::grid::{BlockLayout, ChunkList, GridSpec};
    use crate::integrator::{integrate, FixedRhs, NoCallback};
    use crate::state::{DeltaMode, IntegrationState};
    use std::thread;

    let spec = GridSpec { n1: 1, n2: 1, n3_total: 8, bc: 1, num_vars: 1 };
    let topo = Topology::init(2, 0)?;
    let handles: Vec<_> = topo
        .into_iter()
        .enumerate()
        .map(|(rank, t)| {
            thread::spawn(move || -> CoreResult<(f64, f64)> {
                let layout = BlockLayout::for_rank(spec, rank, 2)?;
                let mut block = Block::zeros(layout);
                let mut local_sum = 0.0;
                for k in layout.interior_range_k() {
                    let global_k = layout.first_row + (k - layout.bc());
                    let v = if global_k == 3 { 10.0 } else { 0.0 };
                    for j in layout.interior_range_j() {
                        for i in layout.interior_range_i() {
                            block.set(0, i, j, k, v);
                            local_sum += v;
                        }
                    }
                }
                let mut chunks = ChunkList::default_for(&layout);
                let mut state = IntegrationState::new(block, 0.0, 1e-3, 1e-9, 1e-8, DeltaMode::Local);
                let mut rhs = FixedRhs(Heat1D { kappa: 1.0, dz: 1.0 });
                let mut cb = NoCallback;
                integrate(&t, &mut state, 0.05, &mut chunks, &mut rhs, false, f64::INFINITY, Some(&mut cb), None)?;

                let mut final_sum = 0.0;
                for k in layout.interior_range_k() {
                    for j in layout.interior_range_j() {
                        for i in layout.interior_range_i() {
                            final_sum += state.x.get(0, i, j, k);
                        }
                    }
                }
                Ok((local_sum, final_sum))
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().expect("demo worker thread panicked"))
        .collect()
}
