//! Boundary setup (spec §4.5): mirrors interior values into the four
//! inner-grid side-face ghost layers (always Neumann), and writes the two
//! outer-extent faces (rank 0's front, the last rank's rear) according to
//! a per-variable policy.

use rayon::prelude::*;

use crate::error::CoreResult;
use crate::grid::layout::BlockLayout;
use crate::state::block::Block;

/// Per-variable policy for the two faces that sit at the outer extent of
/// the whole grid (axis 3, k = bc and k = N3-bc-1 on the first/last rank).
#[derive(Clone, Copy)]
pub enum OuterFace<'a> {
    /// Mirror the adjacent interior cell, same as every inner side face.
    Neumann,
    /// Evaluate a user function of `(t, i, j, k)` in block-local
    /// coordinates and write it directly into the ghost cell.
    Dirichlet(&'a (dyn Fn(f64, usize, usize, usize) -> f64 + Sync)),
}

/// One variable's outer-face policy on both ends of axis 3.
pub struct OuterBoundary<'a> {
    pub front: OuterFace<'a>,
    pub rear: OuterFace<'a>,
}

impl<'a> Default for OuterBoundary<'a> {
    fn default() -> Self {
        Self { front: OuterFace::Neumann, rear: OuterFace::Neumann }
    }
}

/// Mirror interior cells into the ghost layer on the four side faces
/// (axes 1 and 2) of every variable, then apply `outer` policies to the
/// axis-3 faces that are at the outer extent of the whole grid for this
/// worker. Side-face loops are split across chunks of the `j`/`k` sweep
/// and run on rayon so every thread participates before the barrier that
/// the caller (the right-hand side, via ghost exchange) is expected to
/// insert once boundary setup and exchange are both done.
pub fn apply_boundary(block: &mut Block, t: f64, outer: &[OuterBoundary]) -> CoreResult<()> {
    let layout = block.layout;
    debug_assert_eq!(outer.len(), layout.spec.num_vars);

    for variable in 0..layout.spec.num_vars {
        mirror_side_faces(block, variable, &layout);
        apply_outer_face(block, variable, &layout, t, &outer[variable].front, true);
        apply_outer_face(block, variable, &layout, t, &outer[variable].rear, false);
    }
    Ok(())
}

/// Mirrors interior values into the axis-1 and axis-2 ghost layers, which
/// are never exchanged with a neighbor worker (only axis-3 crosses a
/// worker boundary). Each k-plane is a contiguous, disjoint run inside the
/// variable's flat storage, so splitting the mutable slice into per-plane
/// chunks and driving them with rayon needs no `unsafe`.
fn mirror_side_faces(block: &mut Block, variable: usize, layout: &BlockLayout) {
    let bc = layout.bc();
    let n1 = layout.n1_padded;
    let n2 = layout.n2_padded;
    let plane = n1 * n2;
    let k_range = layout.interior_range_k();

    let slice = block.variable_slice_mut(variable);
    slice
        .par_chunks_mut(plane)
        .enumerate()
        .filter(|(k, _)| k_range.contains(k))
        .for_each(|(_, plane_data)| {
            for g in 0..bc {
                for j in 0..n2 {
                    let lo_src = plane_data[j * n1 + (2 * bc - 1 - g)];
                    plane_data[j * n1 + g] = lo_src;
                    let hi_src_idx = n1 - bc - 1 - (bc - 1 - g);
                    let hi_src = plane_data[j * n1 + hi_src_idx];
                    plane_data[j * n1 + (n1 - bc + g)] = hi_src;
                }
            }
            for g in 0..bc {
                let (lo_row, hi_row) = (2 * bc - 1 - g, n2 - bc - 1 - (bc - 1 - g));
                for i in 0..n1 {
                    let lo_src = plane_data[lo_row * n1 + i];
                    plane_data[g * n1 + i] = lo_src;
                    let hi_src = plane_data[hi_row * n1 + i];
                    plane_data[(n2 - bc + g) * n1 + i] = hi_src;
                }
            }
        });
}

fn apply_outer_face(block: &mut Block, variable: usize, layout: &BlockLayout, t: f64, face: &OuterFace, is_front: bool) {
    let bc = layout.bc();
    let owns_face = if is_front { layout.is_first() } else { layout.is_last() };
    if !owns_face {
        return;
    }

    for g in 0..bc {
        let k_ghost = if is_front { g } else { layout.n3_padded - bc + g };
        let k_mirror_src = if is_front { 2 * bc - 1 - g } else { layout.n3_padded - bc - 1 - (bc - 1 - g) };

        for j in 0..layout.n2_padded {
            for i in 0..layout.n1_padded {
                let v = match face {
                    OuterFace::Neumann => block.get(variable, i, j, k_mirror_src),
                    OuterFace::Dirichlet(f) => f(t, i, j, k_ghost),
                };
                block.set(variable, i, j, k_ghost, v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::layout::GridSpec;

    fn layout() -> BlockLayout {
        let spec = GridSpec { n1: 3, n2: 3, n3_total: 3, bc: 1, num_vars: 1 };
        BlockLayout::for_rank(spec, 0, 1).unwrap()
    }

    #[test]
    fn neumann_mirrors_side_faces() {
        let layout = layout();
        let mut block = Block::zeros(layout);
        for k in layout.interior_range_k() {
            for j in layout.interior_range_j() {
                for i in layout.interior_range_i() {
                    block.set(0, i, j, k, (i + 10 * j + 100 * k) as f64);
                }
            }
        }
        let outer = vec![OuterBoundary::default()];
        apply_boundary(&mut block, 0.0, &outer).unwrap();

        for k in layout.interior_range_k() {
            for j in layout.interior_range_j() {
                let g = block.get(0, 0, j, k);
                let m = block.get(0, 1, j, k);
                assert_eq!(g, m);
            }
        }
    }

    #[test]
    fn dirichlet_outer_face_uses_function() {
        let layout = layout();
        let mut block = Block::zeros(layout);
        let f = |t: f64, i: usize, j: usize, k: usize| t + (i + j + k) as f64;
        let outer = vec![OuterBoundary { front: OuterFace::Dirichlet(&f), rear: OuterFace::Neumann }];
        apply_boundary(&mut block, 2.5, &outer).unwrap();

        for j in 0..layout.n2_padded {
            for i in 0..layout.n1_padded {
                let got = block.get(0, i, j, 0);
                let expect = 2.5 + (i + j + 0) as f64;
                assert_eq!(got, expect);
            }
        }
    }
}
