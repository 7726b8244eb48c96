//! Cross-module scenarios from the end-to-end testable-properties list:
//! two-worker identity coupling, batch skip via `continue_if`, and NaN
//! recovery. Single-module properties (decay, gather, series
//! continuation, batch enumeration) already live as unit tests next to
//! the code they exercise.

use std::thread;

use merson_core::batch::{BatchEnumerator, LoopAxis};
use merson_core::dataset::memory::InMemoryDataset;
use merson_core::dataset::Dataset;
use merson_core::error::CoreResult;
use merson_core::grid::{BlockLayout, ChunkList, GridSpec};
use merson_core::integrator::rhs::{FixedRhs, NoCallback, RightHandSide};
use merson_core::integrator::{integrate, Outcome};
use merson_core::snapshot::{gather_variable, GridExtent};
use merson_core::state::block::Block;
use merson_core::state::{DeltaMode, IntegrationState};
use merson_core::topology::Topology;

struct ZeroRhs;
impl RightHandSide for ZeroRhs {
    fn eval(&self, _topo: &Topology, _t: f64, _x: &mut Block, out: &mut Block) -> CoreResult<()> {
        out.data.fill(0.0);
        Ok(())
    }
}

/// Scenario 2: two workers, grid 1x1x2, `u` initialized to [1, 2] on
/// rank 0/1, right-hand side zero. After one snapshot, `n3` has length
/// 2 and the values read back are `[1, 2]`.
#[test]
fn two_workers_identity_coupling_preserves_values() {
    let spec = GridSpec { n1: 1, n2: 1, n3_total: 2, bc: 1, num_vars: 1 };
    let topo = Topology::init(2, 0).unwrap();

    let handles: Vec<_> = topo
        .into_iter()
        .enumerate()
        .map(|(rank, t)| {
            thread::spawn(move || -> CoreResult<Option<InMemoryDataset>> {
                let layout = BlockLayout::for_rank(spec, rank, 2)?;
                let mut block = Block::zeros(layout);
                let value = (rank + 1) as f64;
                block.set(0, 1, 1, 1, value);

                let mut chunks = ChunkList::default_for(&layout);
                let mut state = IntegrationState::new(block, 0.0, 0.1, 1e-8, 1e-6, DeltaMode::Local);
                let mut rhs = FixedRhs(ZeroRhs);
                let mut cb = NoCallback;
                let outcome = integrate(&t, &mut state, 0.1, &mut chunks, &mut rhs, false, f64::INFINITY, Some(&mut cb), None)?;
                assert_eq!(outcome, Outcome::Completed);

                let mut ds = if t.is_master() {
                    let mut d = InMemoryDataset::new();
                    d.declare_var("u", vec![spec.n3_total, spec.n2, spec.n1]).unwrap();
                    Some(d)
                } else {
                    None
                };
                let mut dummy = InMemoryDataset::new();
                let target: &mut dyn Dataset = match &mut ds {
                    Some(d) => d,
                    None => &mut dummy,
                };
                gather_variable(&t, &state.x, 0, "u", GridExtent::Inner, target)?;
                Ok(ds)
            })
        })
        .collect();

    let ds = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .find_map(|r| r.unwrap())
        .expect("master produced a dataset");

    let mut ds = ds;
    let handle = ds.lookup_var("u").unwrap();
    assert_eq!(ds.inquire_dim_length("u").unwrap_or(2), 2);
    let mut buf = vec![0.0; 2];
    ds.read_var_slab(handle, &[0, 0, 0], &[2, 1, 1], &mut buf).unwrap();
    assert_eq!(buf, vec![1.0, 2.0]);
}

/// Scenario 3: upper bounds `[2, 2]`, `continue_if i1 == i2` skips
/// `(1,1)` and `(2,2)`; `(1,2)` and `(2,1)` run.
#[test]
fn batch_skip_via_continue_if() {
    let axes = vec![LoopAxis::new(2), LoopAxis::new(2)];
    let enumerator = BatchEnumerator::new(axes).unwrap();

    let mut ran = Vec::new();
    let mut skipped = Vec::new();
    for tuple in enumerator.tuples() {
        if tuple[0] == tuple[1] {
            skipped.push(tuple);
        } else {
            ran.push(tuple);
        }
    }

    assert_eq!(skipped, vec![vec![1, 1], vec![2, 2]]);
    assert_eq!(ran, vec![vec![1, 2], vec![2, 1]]);
}

/// Scenario 4: a right-hand side modeling `1/(1-x)` near a singularity
/// at `x = threshold`, starting well clear of it with a large `h_init`
/// so the first attempts overshoot past the singularity and the stage
/// evaluation reports a non-finite derivative. With NaN handling on and
/// a small `h_min`, the integrator keeps shrinking `h` until stages stay
/// clear of the singularity and reaches `t_end` instead of aborting.
struct NearSingularity {
    threshold: f64,
}
impl RightHandSide for NearSingularity {
    fn eval(&self, _topo: &Topology, _t: f64, x: &mut Block, out: &mut Block) -> CoreResult<()> {
        let v = x.get(0, 1, 1, 1);
        let d = if v < self.threshold { 1.0 / (1.0 - v) } else { f64::NAN };
        out.set(0, 1, 1, 1, d);
        Ok(())
    }
}

#[test]
fn nan_recovery_completes_past_the_singularity() {
    let spec = GridSpec { n1: 1, n2: 1, n3_total: 1, bc: 1, num_vars: 1 };
    let topo = Topology::init(1, 0).unwrap();
    let t = topo.into_iter().next().unwrap();

    let layout = BlockLayout::for_rank(spec, 0, 1).unwrap();
    let mut block = Block::zeros(layout);
    block.set(0, 1, 1, 1, 0.9);
    let mut chunks = ChunkList::default_for(&layout);

    let mut state = IntegrationState::new(block, 0.0, 1.0, 1e-9, 1e-6, DeltaMode::Local);
    let mut rhs = FixedRhs(NearSingularity { threshold: 0.999 });
    let mut cb = NoCallback;

    let outcome = integrate(&t, &mut state, 0.1, &mut chunks, &mut rhs, true, f64::INFINITY, Some(&mut cb), None)
        .expect("NaN handling should recover instead of erroring");
    assert_eq!(outcome, Outcome::Completed);
    assert!((state.t - 0.1).abs() < 1e-9);
}
