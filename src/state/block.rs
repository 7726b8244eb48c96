//! Per-worker block storage (spec §3): the flat array of `V` variables,
//! `bc`-thick ghost layers included, that a worker exclusively owns for
//! the lifetime of the simulation.

use ndarray::Array1;

use crate::grid::layout::BlockLayout;

/// One worker's slice of the grid: `V` consecutive padded arrays.
#[derive(Debug, Clone)]
pub struct Block {
    pub layout: BlockLayout,
    pub data: Array1<f64>,
}

impl Block {
    pub fn zeros(layout: BlockLayout) -> Self {
        let data = Array1::zeros(layout.block_volume());
        Self { layout, data }
    }

    #[inline]
    pub fn get(&self, variable: usize, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.layout.offset(variable, i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, variable: usize, i: usize, j: usize, k: usize, value: f64) {
        let off = self.layout.offset(variable, i, j, k);
        self.data[off] = value;
    }

    /// Borrow the whole variable's padded sub-array as a flat slice for
    /// ghost-slab packing.
    pub fn variable_slice(&self, variable: usize) -> &[f64] {
        let per_var = self.layout.var_volume();
        let start = variable * per_var;
        &self.data.as_slice().expect("contiguous")[start..start + per_var]
    }

    pub fn variable_slice_mut(&mut self, variable: usize) -> &mut [f64] {
        let per_var = self.layout.var_volume();
        let start = variable * per_var;
        &mut self.data.as_slice_mut().expect("contiguous")[start..start + per_var]
    }

    /// Replace just the interior cells of one variable, in row-major
    /// (k, j, i) order, leaving ghost cells untouched. Used by the
    /// initial-condition formula evaluator and by dataset scatter.
    pub fn fill_interior(&mut self, variable: usize, values: impl Iterator<Item = f64>) {
        let mut values = values;
        for k in self.layout.interior_range_k() {
            for j in self.layout.interior_range_j() {
                for i in self.layout.interior_range_i() {
                    let v = values.next().expect("enough interior values supplied");
                    self.set(variable, i, j, k, v);
                }
            }
        }
    }

    /// Read the interior cells of one variable in the same order
    /// `fill_interior` expects, for dataset gather.
    pub fn interior_iter(&self, variable: usize) -> impl Iterator<Item = f64> + '_ {
        self.layout.interior_range_k().flat_map(move |k| {
            self.layout.interior_range_j().flat_map(move |j| {
                self.layout
                    .interior_range_i()
                    .map(move |i| self.get(variable, i, j, k))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::layout::GridSpec;

    #[test]
    fn fill_and_read_interior_round_trips() {
        let spec = GridSpec { n1: 3, n2: 3, n3_total: 3, bc: 1, num_vars: 1 };
        let layout = BlockLayout::for_rank(spec, 0, 1).unwrap();
        let mut block = Block::zeros(layout);
        let values: Vec<f64> = (0..27).map(|x| x as f64).collect();
        block.fill_interior(0, values.iter().copied());
        let read: Vec<f64> = block.interior_iter(0).collect();
        assert_eq!(read, values);
    }
}
