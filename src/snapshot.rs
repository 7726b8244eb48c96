//! Snapshot Gather / Scatter (spec §4.7): collects per-worker blocks into
//! a dataset at the master on emit, and disperses an initial condition
//! from the master on load. Both directions transcribe through a cache
//! array sized to the largest per-worker block and skip ghost cells
//! unless full-grid output is requested.

use crate::dataset::Dataset;
use crate::error::{CoreError, CoreResult};
use crate::grid::layout::BlockLayout;
use crate::state::block::Block;
use crate::topology::Topology;

/// Whether a transcription includes ghost cells (full-grid, debugging
/// only) or just the interior (standard).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridExtent {
    Inner,
    Full,
}

/// Flatten one worker's block into a linear buffer in (k, j, i) order,
/// for the extent requested.
fn transcribe_to_buffer(block: &Block, variable: usize, extent: GridExtent) -> Vec<f64> {
    match extent {
        GridExtent::Inner => block.interior_iter(variable).collect(),
        GridExtent::Full => block.variable_slice(variable).to_vec(),
    }
}

fn transcribe_from_buffer(block: &mut Block, variable: usize, extent: GridExtent, data: &[f64]) {
    match extent {
        GridExtent::Inner => block.fill_interior(variable, data.iter().copied()),
        GridExtent::Full => block.variable_slice_mut(variable).copy_from_slice(data),
    }
}

/// Gather one variable from every worker's block into `dataset`, writing
/// each worker's slab at `(first_row, 0, 0)` (spec §4.7). Must be called
/// by every worker; only the master's dataset handle is touched.
pub fn gather_variable(
    topo: &Topology,
    block: &Block,
    variable: usize,
    var_name: &str,
    extent: GridExtent,
    dataset: &mut dyn Dataset,
) -> CoreResult<()> {
    let local = transcribe_to_buffer(block, variable, extent);
    let gathered = topo.gather(local, 0)?;

    if let Some(slabs) = gathered {
        let handle = dataset.lookup_var(var_name)?;
        let spec = block.layout.spec;
        let mut row_cursor = 0usize;
        for (rank, slab) in slabs.into_iter().enumerate() {
            let depth = BlockLayout::for_rank(spec, rank, block.layout.rank_count)?.n3;
            let plane = spec.n1 * spec.n2;
            dataset.write_var_slab(handle, &[row_cursor, 0, 0], &[depth, spec.n2, spec.n1], &slab[..depth * plane])?;
            row_cursor += depth;
        }
    }
    Ok(())
}

/// Disperse one dataset variable to every worker's block, scattering the
/// rows owned by each rank and transcribing them into the block's
/// interior (spec §4.7, ICOND *file* mode).
pub fn scatter_variable(
    topo: &Topology,
    block: &mut Block,
    variable: usize,
    var_name: &str,
    extent: GridExtent,
    dataset: &mut dyn Dataset,
) -> CoreResult<()> {
    let spec = block.layout.spec;
    let chunks = if topo.is_master() {
        let handle = dataset.lookup_var(var_name)?;
        let plane = spec.n1 * spec.n2;
        let mut chunks = Vec::with_capacity(topo.rank_count());
        let mut row_cursor = 0usize;
        for rank in 0..topo.rank_count() {
            let depth = BlockLayout::for_rank(spec, rank, topo.rank_count())?.n3;
            let mut buf = vec![0.0; depth * plane];
            dataset.read_var_slab(handle, &[row_cursor, 0, 0], &[depth, spec.n2, spec.n1], &mut buf)?;
            chunks.push(buf);
            row_cursor += depth;
        }
        Some(chunks)
    } else {
        None
    };

    let mine = topo.scatter(chunks, 0)?;
    let expected_len = match extent {
        GridExtent::Inner => block.interior_iter(variable).count(),
        GridExtent::Full => block.variable_slice(variable).len(),
    };
    if mine.len() != expected_len {
        return Err(CoreError::Configuration(format!(
            "scattered slab length {} does not match block's expected length {}",
            mine.len(),
            expected_len
        )));
    }
    transcribe_from_buffer(block, variable, extent, &mine);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::memory::InMemoryDataset;
    use crate::grid::layout::GridSpec;
    use std::thread;

    #[test]
    fn gather_yields_same_linear_index_everywhere() {
        let spec = GridSpec { n1: 3, n2: 3, n3_total: 9, bc: 1, num_vars: 1 };
        let mut topo = Topology::init(3, 0).unwrap();
        let handles: Vec<_> = topo
            .drain(..)
            .enumerate()
            .map(|(rank, t)| {
                thread::spawn(move || {
                    let layout = BlockLayout::for_rank(spec, rank, 3).unwrap();
                    let mut block = Block::zeros(layout);
                    let mut idx = layout.first_row * spec.n1 * spec.n2;
                    for k in layout.interior_range_k() {
                        for j in layout.interior_range_j() {
                            for i in layout.interior_range_i() {
                                block.set(0, i, j, k, idx as f64);
                                idx += 1;
                            }
                        }
                    }

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
                    gather_variable(&t, &block, 0, "u", GridExtent::Inner, target).unwrap();
                    ds
                })
            })
            .collect();
        let results: Vec<Option<InMemoryDataset>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ds = results.into_iter().find_map(|d| d).unwrap();
        let handle_vals: Vec<f64> = {
            let mut ds = ds;
            let h = ds.lookup_var("u").unwrap();
            let n = spec.n1 * spec.n2 * spec.n3_total;
            let mut buf = vec![0.0; n];
            ds.read_var_slab(h, &[0, 0, 0], &[spec.n3_total, spec.n2, spec.n1], &mut buf).unwrap();
            buf
        };
        for (idx, &v) in handle_vals.iter().enumerate() {
            assert_eq!(v, idx as f64);
        }
    }
}
