//! State Layout (spec §4.2, §3): divides the inner grid along the third
//! axis into per-worker blocks flanked by ghost layers, and defines the
//! addressing used by every other component.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Geometry shared by every worker: the whole-grid extents, ghost
/// thickness, and number of scalar variables per cell. Serializable so a
/// parameter record carrying it can be broadcast as the single opaque
/// blob spec §4.6 DISTRIBUTE describes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub n1: usize,
    pub n2: usize,
    pub n3_total: usize,
    pub bc: usize,
    pub num_vars: usize,
}

impl GridSpec {
    pub fn validate(&self) -> CoreResult<()> {
        if self.n1 == 0 || self.n2 == 0 || self.n3_total == 0 {
            return Err(CoreError::Configuration("grid extents must be positive".into()));
        }
        if self.bc == 0 {
            return Err(CoreError::Configuration("bc must be >= 1".into()));
        }
        if self.num_vars == 0 {
            return Err(CoreError::Configuration("num_vars must be >= 1".into()));
        }
        Ok(())
    }
}

/// Per-worker block geometry derived from [`GridSpec`] and a rank count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockLayout {
    pub spec: GridSpec,
    pub rank: usize,
    pub rank_count: usize,
    /// Depth of this worker's slice of the inner grid along axis 3.
    pub n3: usize,
    /// Offset of this worker's slice within the whole inner grid.
    pub first_row: usize,
    /// Stored array extents, including ghost layers on every face.
    pub n1_padded: usize,
    pub n2_padded: usize,
    pub n3_padded: usize,
}

impl BlockLayout {
    /// `n3(r) = floor(n3_total / rank_count) + (1 if r < n3_total mod rank_count else 0)`,
    /// tiled contiguously.
    pub fn for_rank(spec: GridSpec, rank: usize, rank_count: usize) -> CoreResult<Self> {
        spec.validate()?;
        if rank_count == 0 || rank >= rank_count {
            return Err(CoreError::Configuration(format!(
                "rank {rank} out of range for {rank_count} workers"
            )));
        }

        let base = spec.n3_total / rank_count;
        let remainder = spec.n3_total % rank_count;
        let n3 = base + usize::from(rank < remainder);

        let mut first_row = 0usize;
        for r in 0..rank {
            first_row += base + usize::from(r < remainder);
        }

        if n3 < spec.bc {
            return Err(CoreError::Configuration(format!(
                "rank {rank}'s block depth {n3} is smaller than the ghost thickness {}",
                spec.bc
            )));
        }

        Ok(Self {
            spec,
            rank,
            rank_count,
            n3,
            first_row,
            n1_padded: spec.n1 + 2 * spec.bc,
            n2_padded: spec.n2 + 2 * spec.bc,
            n3_padded: n3 + 2 * spec.bc,
        })
    }

    /// Scalar count of a single variable's padded array.
    pub fn var_volume(&self) -> usize {
        self.n1_padded * self.n2_padded * self.n3_padded
    }

    /// Scalar count of the whole block (all variables).
    pub fn block_volume(&self) -> usize {
        self.var_volume() * self.spec.num_vars
    }

    /// Flat offset of cell `(variable, i, j, k)` in block-local padded
    /// coordinates; row-major over (third, second, first).
    #[inline]
    pub fn offset(&self, variable: usize, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(variable < self.spec.num_vars);
        debug_assert!(i < self.n1_padded && j < self.n2_padded && k < self.n3_padded);
        let per_var = self.var_volume();
        variable * per_var + k * self.n1_padded * self.n2_padded + j * self.n1_padded + i
    }

    pub fn bc(&self) -> usize {
        self.spec.bc
    }

    /// `true` if this worker owns the first slice of the whole grid (its
    /// front face, at k = bc, is an outer boundary, not a neighbor
    /// exchange).
    pub fn is_first(&self) -> bool {
        self.rank == 0
    }

    /// `true` if this worker owns the last slice of the whole grid.
    pub fn is_last(&self) -> bool {
        self.rank + 1 == self.rank_count
    }

    /// Range of interior indices along each axis (`bc..extent-bc`).
    pub fn interior_range_i(&self) -> std::ops::Range<usize> {
        self.spec.bc..self.n1_padded - self.spec.bc
    }
    pub fn interior_range_j(&self) -> std::ops::Range<usize> {
        self.spec.bc..self.n2_padded - self.spec.bc
    }
    pub fn interior_range_k(&self) -> std::ops::Range<usize> {
        self.spec.bc..self.n3_padded - self.spec.bc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GridSpec {
        GridSpec { n1: 4, n2: 4, n3_total: 10, bc: 1, num_vars: 2 }
    }

    #[test]
    fn tiles_contiguously() {
        let rank_count = 3;
        let mut total = 0;
        let mut expected_first_row = 0;
        for r in 0..rank_count {
            let bl = BlockLayout::for_rank(spec(), r, rank_count).unwrap();
            assert_eq!(bl.first_row, expected_first_row);
            expected_first_row += bl.n3;
            total += bl.n3;
        }
        assert_eq!(total, spec().n3_total);
    }

    #[test]
    fn remainder_goes_to_low_ranks() {
        // 10 / 3 = 3 remainder 1: rank 0 gets 4, ranks 1 and 2 get 3.
        let depths: Vec<usize> = (0..3)
            .map(|r| BlockLayout::for_rank(spec(), r, 3).unwrap().n3)
            .collect();
        assert_eq!(depths, vec![4, 3, 3]);
    }

    #[test]
    fn rejects_block_thinner_than_ghost() {
        let tiny = GridSpec { n1: 2, n2: 2, n3_total: 3, bc: 2, num_vars: 1 };
        // 3 ranks -> depths [1,1,1], all < bc=2.
        assert!(BlockLayout::for_rank(tiny, 0, 3).is_err());
    }

    #[test]
    fn offset_is_row_major_third_second_first() {
        let bl = BlockLayout::for_rank(spec(), 0, 1).unwrap();
        let o0 = bl.offset(0, 0, 0, 0);
        let o1 = bl.offset(0, 1, 0, 0);
        assert_eq!(o1, o0 + 1);
        let o2 = bl.offset(0, 0, 1, 0);
        assert_eq!(o2, o0 + bl.n1_padded);
        let o3 = bl.offset(0, 0, 0, 1);
        assert_eq!(o3, o0 + bl.n1_padded * bl.n2_padded);
    }
}
