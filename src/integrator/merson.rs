//! Adaptive Runge-Kutta-Merson integrator (spec §4.3), the heart of the
//! system: five stage evaluations, a combined local-error estimate, a
//! master-decided accept/reject broadcast, and optional NaN recovery.

use std::time::Instant;

use rayon::prelude::*;

use crate::error::{CoreError, CoreResult};
use crate::grid::{Chunk, ChunkList};
use crate::state::block::Block;
use crate::state::{DeltaMode, IntegrationState};
use crate::topology::Topology;

use super::rhs::{RebalanceHook, RhsProvider, ServiceCallback, StepContext};

/// Safeguard matching spec §4.3's NaN-recovery abort condition: once the
/// step size relative to the remaining interval drops below this, further
/// shrinking is pointless and the integrator gives up.
const MIN_RELATIVE_STEP: f64 = 1e-11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Interrupted,
}

/// Scratch buffers reused across every step and every retry, to avoid
/// per-step allocation (mirrors the teacher's `Rk4Scratch` pattern). `tmp`
/// is the intermediate state handed to the right-hand side as `x`; `k1..k5`
/// hold the stage derivatives; `rhs_out` is the throwaway buffer each
/// right-hand-side call writes its derivative into before it's copied
/// into the matching `k*`.
struct Scratch {
    k1: Block,
    k2: Block,
    k3: Block,
    k4: Block,
    k5: Block,
    tmp: Block,
    rhs_out: Block,
}

impl Scratch {
    fn new(template: &Block) -> Self {
        Self {
            k1: Block::zeros(template.layout),
            k2: Block::zeros(template.layout),
            k3: Block::zeros(template.layout),
            k4: Block::zeros(template.layout),
            k5: Block::zeros(template.layout),
            tmp: template.clone(),
            rhs_out: Block::zeros(template.layout),
        }
    }
}

/// Write `out[off] = base[off] + sum(coeff * term[off])` for every cell
/// named by `chunks`, with the inner element loop of each chunk run on a
/// rayon task (spec §4.3 "the five stage loops ... are split across
/// threads by iterating over chunks").
fn combine(chunks: &ChunkList, base: &[f64], terms: &[(&[f64], f64)], out: &mut [f64]) {
    let slices = chunks.disjoint_mut_slices(out);
    chunks
        .chunks()
        .par_iter()
        .zip(slices)
        .for_each(|(c, out_slice)| {
            for idx in 0..c.length {
                let off = c.offset + idx;
                let mut v = base[off];
                for (term, coeff) in terms {
                    v += coeff * term[off];
                }
                out_slice[idx] = v;
            }
        });
}

/// Thread-wise max of the weighted Merson error estimate, short-circuiting
/// a chunk's inner loop as soon as a non-finite value is seen when NaN
/// handling is enabled. A fresh accumulator is used on every call — per
/// spec §9, no partial maximum is ever carried across a rejected step.
fn max_error(chunks: &ChunkList, k1: &[f64], k3: &[f64], k4: &[f64], k5: &[f64], nan_handling: bool) -> (f64, bool) {
    chunks
        .chunks()
        .par_iter()
        .map(|c: &Chunk| {
            let mut local_max = 0.0f64;
            let mut saw_nonfinite = false;
            for idx in 0..c.length {
                let off = c.offset + idx;
                let e = c.weight * (0.2 * k1[off] - 0.9 * k3[off] + 0.8 * k4[off] - 0.1 * k5[off]).abs();
                if !e.is_finite() {
                    if nan_handling {
                        saw_nonfinite = true;
                        break;
                    }
                    continue;
                }
                if e > local_max {
                    local_max = e;
                }
            }
            (local_max, saw_nonfinite)
        })
        .reduce(|| (0.0, false), |a, b| (a.0.max(b.0), a.1 || b.1))
}

#[inline]
fn slice(b: &Block) -> &[f64] {
    b.data.as_slice().expect("contiguous")
}

#[inline]
fn slice_mut(b: &mut Block) -> &mut [f64] {
    b.data.as_slice_mut().expect("contiguous")
}

/// Integrate from `state.t` up to `t_end`, invoking `callback` after every
/// accepted step. Returns once `t_end` is reached (`Completed`) or the
/// callback requests an early exit (`Interrupted`).
#[allow(clippy::too_many_arguments)]
pub fn integrate(
    topo: &Topology,
    state: &mut IntegrationState,
    t_end: f64,
    chunks: &mut ChunkList,
    rhs: &mut dyn RhsProvider,
    nan_handling: bool,
    next_snapshot_deadline: f64,
    mut callback: Option<&mut dyn ServiceCallback>,
    mut rebalance: Option<&mut dyn RebalanceHook>,
) -> CoreResult<Outcome> {
    let mut sc = Scratch::new(&state.x);
    let wall_start = Instant::now();
    let sim_start = state.t;

    loop {
        let mut h = state.h;

        let last_step = 'attempt: loop {
            let remaining = t_end - state.t;
            let mut last_step = false;
            // the step size actually taken this attempt may get trimmed down
            // to `remaining`; `h_pretrim` is what the error controller would
            // have proposed absent that trim, and is what the next h_next
            // estimate is built from so a trimmed final step doesn't leave
            // the following `integrate` call crawling back up from a tiny h.
            let h_pretrim = h;
            if remaining.abs() <= h.abs() {
                h = remaining;
                last_step = true;
            }

            let rhs_fn = rhs.resolve(state.steps_total);
            state.steps_total += 1;

            // K1 = f(t, x)
            rhs_fn.eval(topo, state.t, &mut state.x, &mut sc.rhs_out)?;
            sc.k1.data.assign(&sc.rhs_out.data);

            // tmp = x + (h/3) K1
            combine(chunks, slice(&state.x), &[(slice(&sc.k1), h / 3.0)], slice_mut(&mut sc.tmp));
            rhs_fn.eval(topo, state.t + h / 3.0, &mut sc.tmp, &mut sc.rhs_out)?;
            sc.k2.data.assign(&sc.rhs_out.data);

            // tmp = x + (h/6)(K1+K2)
            combine(
                chunks,
                slice(&state.x),
                &[(slice(&sc.k1), h / 6.0), (slice(&sc.k2), h / 6.0)],
                slice_mut(&mut sc.tmp),
            );
            rhs_fn.eval(topo, state.t + h / 3.0, &mut sc.tmp, &mut sc.rhs_out)?;
            sc.k3.data.assign(&sc.rhs_out.data);

            // tmp = x + (h/8)(K1 + 3 K3)
            combine(
                chunks,
                slice(&state.x),
                &[(slice(&sc.k1), h / 8.0), (slice(&sc.k3), 3.0 * h / 8.0)],
                slice_mut(&mut sc.tmp),
            );
            rhs_fn.eval(topo, state.t + h / 2.0, &mut sc.tmp, &mut sc.rhs_out)?;
            sc.k4.data.assign(&sc.rhs_out.data);

            // tmp = x + h*(0.5 K1 - 1.5 K3 + 2 K4)
            combine(
                chunks,
                slice(&state.x),
                &[(slice(&sc.k1), 0.5 * h), (slice(&sc.k3), -1.5 * h), (slice(&sc.k4), 2.0 * h)],
                slice_mut(&mut sc.tmp),
            );
            rhs_fn.eval(topo, state.t + h, &mut sc.tmp, &mut sc.rhs_out)?;
            sc.k5.data.assign(&sc.rhs_out.data);

            let (local_max, local_nan) =
                max_error(chunks, slice(&sc.k1), slice(&sc.k3), slice(&sc.k4), slice(&sc.k5), nan_handling);

            if nan_handling {
                let nan_seen = topo.all_reduce_or(local_nan)?;
                if nan_seen {
                    h /= 10.0;
                    if (h / (t_end - state.t)).abs() < MIN_RELATIVE_STEP {
                        return Err(CoreError::Numerical(
                            "step size collapsed below safeguard during NaN recovery".into(),
                        ));
                    }
                    continue 'attempt;
                }
            }

            let mut eps = topo.all_reduce_max(local_max)?;
            if state.delta_mode == DeltaMode::Local {
                eps *= (h / 3.0).abs();
            }

            let accept_local = eps < state.delta || h.abs() < state.h_min;
            let accept = topo.broadcast_bool(topo.is_master().then_some(accept_local), 0)?;

            let h_next = if eps > 0.0 {
                0.8 * (state.delta / eps).powf(0.2) * h_pretrim
            } else {
                2.0 * h_pretrim
            };

            if !accept {
                tracing::debug!(t = state.t, h, eps, "step rejected, shrinking");
                h = h_next;
                continue 'attempt;
            }

            // UPDATE x: x_new = x + (h/3)*(0.5*(K1+K5) + 2*K4)
            let x_before: Vec<f64> = slice(&state.x).to_vec();
            combine(
                chunks,
                &x_before,
                &[(slice(&sc.k1), h / 6.0), (slice(&sc.k5), h / 6.0), (slice(&sc.k4), 2.0 * h / 3.0)],
                slice_mut(&mut state.x),
            );

            state.t += h;
            state.steps += 1;
            // "the stored h returned at the end is the estimate before the final trim"
            state.h = h_next;

            break 'attempt last_step;
        };

        if let Some(hook) = rebalance.as_deref_mut() {
            if let Some(new_chunks) = hook.rebalance(chunks) {
                chunks.set(new_chunks)?;
            }
        }

        if callback.is_some() {
            // Invoked on the master only (spec §4.10): a trigger file probe
            // or similar side effect must not run once per worker, and every
            // worker has to see the same accept/abort verdict or a worker
            // that misses the trigger keeps integrating while the master
            // enters the snapshot gather collective, deadlocking on the tag.
            let interrupt_local = if topo.is_master() {
                let elapsed_wall = wall_start.elapsed().as_secs_f64();
                let elapsed_sim = (state.t - sim_start).abs();
                let wall_per_sim_time = if elapsed_sim > 0.0 { elapsed_wall / elapsed_sim } else { 0.0 };
                let ctx = StepContext {
                    next_snapshot_deadline,
                    t: state.t,
                    h: state.h,
                    steps: state.steps,
                    wall_per_sim_time,
                };
                callback.as_deref_mut().unwrap().on_accepted_step(&ctx)
            } else {
                false
            };
            let interrupt = topo.broadcast_bool(topo.is_master().then_some(interrupt_local), 0)?;
            if interrupt {
                return Ok(Outcome::Interrupted);
            }
        }

        if last_step {
            return Ok(Outcome::Completed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BlockLayout, ChunkList, GridSpec};
    use crate::integrator::rhs::{FixedRhs, NoCallback, RightHandSide};
    use crate::state::block::Block;
    use crate::topology::Topology;
    use std::thread;

    fn single_worker_layout() -> BlockLayout {
        let spec = GridSpec { n1: 1, n2: 1, n3_total: 1, bc: 1, num_vars: 1 };
        BlockLayout::for_rank(spec, 0, 1).unwrap()
    }

    struct ConstantDecay;
    impl RightHandSide for ConstantDecay {
        fn eval(&self, _topo: &Topology, _t: f64, x: &mut Block, out: &mut Block) -> CoreResult<()> {
            let bc = x.layout.bc();
            let v = x.get(0, bc, bc, bc);
            out.set(0, bc, bc, bc, -v);
            Ok(())
        }
    }

    #[test]
    fn constant_decay_matches_exp_within_tolerance() {
        let layout = single_worker_layout();
        let mut topo = Topology::init(1, 0).unwrap();
        let t = topo.remove(0);

        let mut block = Block::zeros(layout);
        block.set(0, 1, 1, 1, 1.0);
        let mut chunks = ChunkList::default_for(&layout);

        let mut state = IntegrationState::new(block, 0.0, 0.1, 1e-8, 1e-6, DeltaMode::Local);
        let mut rhs = FixedRhs(ConstantDecay);
        let mut cb = NoCallback;

        let outcome = integrate(&t, &mut state, 1.0, &mut chunks, &mut rhs, false, f64::INFINITY, Some(&mut cb), None).unwrap();
        assert_eq!(outcome, Outcome::Completed);

        let got = state.x.get(0, 1, 1, 1);
        let expect = std::f64::consts::E.recip();
        assert!((got - expect).abs() < 1e-6, "got {got}, expected {expect}");
        assert!(state.steps >= 5);
    }

    struct ConstantRhs(f64);
    impl RightHandSide for ConstantRhs {
        fn eval(&self, _topo: &Topology, _t: f64, _x: &mut Block, out: &mut Block) -> CoreResult<()> {
            let bc = out.layout.bc();
            out.set(0, bc, bc, bc, self.0);
            Ok(())
        }
    }

    #[test]
    fn large_delta_always_accepts_and_matches_euler_step() {
        let layout = single_worker_layout();
        let mut topo = Topology::init(1, 0).unwrap();
        let t = topo.remove(0);

        let mut block = Block::zeros(layout);
        block.set(0, 1, 1, 1, 0.0);
        let mut chunks = ChunkList::default_for(&layout);

        let h = 0.1;
        let mut state = IntegrationState::new(block, 0.0, h, 1e-12, 1e9, DeltaMode::Local);
        let mut rhs = FixedRhs(ConstantRhs(2.0));
        let mut cb = NoCallback;

        integrate(&t, &mut state, h, &mut chunks, &mut rhs, false, f64::INFINITY, Some(&mut cb), None).unwrap();

        let got = state.x.get(0, 1, 1, 1);
        assert!((got - h * 2.0).abs() < 1e-12);
        assert_eq!(state.steps, 1);
    }

    struct Oscillating;
    impl RightHandSide for Oscillating {
        fn eval(&self, _topo: &Topology, t: f64, _x: &mut Block, out: &mut Block) -> CoreResult<()> {
            let bc = out.layout.bc();
            // A right-hand side with sharp curvature forces error-based rejection at large h.
            out.set(0, bc, bc, bc, (50.0 * t).sin() * 50.0);
            Ok(())
        }
    }

    #[test]
    fn rejects_then_shrinks_below_h_min_eventually_accepts() {
        let layout = single_worker_layout();
        let mut topo = Topology::init(1, 0).unwrap();
        let t = topo.remove(0);

        let mut block = Block::zeros(layout);
        let mut chunks = ChunkList::default_for(&layout);

        let mut state = IntegrationState::new(block.clone(), 0.0, 1.0, 1e-6, 1e-9, DeltaMode::Local);
        let mut rhs = FixedRhs(Oscillating);
        let mut cb = NoCallback;

        let outcome = integrate(&t, &mut state, 0.01, &mut chunks, &mut rhs, false, f64::INFINITY, Some(&mut cb), None).unwrap();
        assert_eq!(outcome, Outcome::Completed);
        let _ = &block;
    }

    #[test]
    fn deterministic_acceptance_across_workers() {
        let spec = GridSpec { n1: 1, n2: 1, n3_total: 2, bc: 1, num_vars: 1 };
        let mut topo = Topology::init(2, 0).unwrap();
        let handles: Vec<_> = topo
            .drain(..)
            .enumerate()
            .map(|(rank, t)| {
                thread::spawn(move || {
                    let layout = BlockLayout::for_rank(spec, rank, 2).unwrap();
                    let mut block = Block::zeros(layout);
                    block.set(0, 1, 1, 1, 1.0);
                    let mut chunks = ChunkList::default_for(&layout);
                    let mut state = IntegrationState::new(block, 0.0, 0.1, 1e-8, 1e-6, DeltaMode::Local);
                    let mut rhs = FixedRhs(ConstantDecay);
                    let mut cb = NoCallback;
                    integrate(&t, &mut state, 1.0, &mut chunks, &mut rhs, false, f64::INFINITY, Some(&mut cb), None)
                        .unwrap();
                    (state.steps, state.t)
                })
            })
            .collect();
        let results: Vec<(u64, f64)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0], results[1]);
    }
}
