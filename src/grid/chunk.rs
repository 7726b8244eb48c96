//! Chunk list (spec §3): the sparse description of interior storage the
//! integrator operates on without owning it.

use crate::error::{CoreError, CoreResult};
use crate::grid::layout::BlockLayout;

/// A contiguous slice of per-worker storage treated as a unit by the
/// integrator. `weight` scales the slice's contribution to the error norm
/// (spec §4.3's per-chunk error weighting).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunk {
    pub offset: usize,
    pub length: usize,
    pub weight: f64,
}

/// Strictly ordered, non-overlapping chunks whose union is exactly the
/// interior of the block across all variables.
#[derive(Debug, Clone, Default)]
pub struct ChunkList {
    chunks: Vec<Chunk>,
}

impl ChunkList {
    /// Default chunk list: one chunk per interior row (fixed `i`, `j`
    /// swept; actually one row along axis 1 for fixed (variable, j, k)),
    /// weight 1.0, as described in spec §4.2.
    pub fn default_for(layout: &BlockLayout) -> Self {
        let mut chunks = Vec::new();
        let i_range = layout.interior_range_i();
        let row_len = i_range.end - i_range.start;
        for variable in 0..layout.spec.num_vars {
            for k in layout.interior_range_k() {
                for j in layout.interior_range_j() {
                    let offset = layout.offset(variable, i_range.start, j, k);
                    chunks.push(Chunk { offset, length: row_len, weight: 1.0 });
                }
            }
        }
        chunks.sort_by_key(|c| c.offset);
        Self { chunks }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn total_len(&self) -> usize {
        self.chunks.iter().map(|c| c.length).sum()
    }

    /// Split `data` into one exclusive mutable sub-slice per chunk, in
    /// order. Sound without `unsafe`: chunks are validated strictly
    /// ordered and non-overlapping, so repeated `split_at_mut` carves out
    /// disjoint windows of the same backing slice. Lets the integrator
    /// hand each chunk to a different rayon task for its inner element
    /// loop while writing back into one shared array (spec §4.3
    /// "concurrency inside one step").
    pub fn disjoint_mut_slices<'a>(&self, data: &'a mut [f64]) -> Vec<&'a mut [f64]> {
        let mut out = Vec::with_capacity(self.chunks.len());
        let mut rest = data;
        let mut cursor = 0usize;
        for c in &self.chunks {
            let gap = c.offset - cursor;
            let (_, r) = rest.split_at_mut(gap);
            let (piece, r2) = r.split_at_mut(c.length);
            out.push(piece);
            rest = r2;
            cursor = c.offset + c.length;
        }
        out
    }

    /// Replace the chunk list, e.g. with one returned by a rebalancing
    /// hook (spec §9 design note: the protocol is defined to allow future
    /// extension; the initial implementation always returns the same
    /// list).
    pub fn set(&mut self, chunks: Vec<Chunk>) -> CoreResult<()> {
        Self::validate_ordering(&chunks)?;
        self.chunks = chunks;
        Ok(())
    }

    fn validate_ordering(chunks: &[Chunk]) -> CoreResult<()> {
        let mut last_end: Option<usize> = None;
        for c in chunks {
            if c.length == 0 {
                return Err(CoreError::Configuration("chunk with zero length".into()));
            }
            if let Some(end) = last_end {
                if c.offset < end {
                    return Err(CoreError::Configuration(
                        "chunks must be strictly ordered by offset and non-overlapping".into(),
                    ));
                }
            }
            last_end = Some(c.offset + c.length);
        }
        Ok(())
    }

    /// Verify the union of chunks equals exactly the interior cells of
    /// `layout` across all variables (spec §4.2 construction invariant).
    pub fn validate_covers_interior(&self, layout: &BlockLayout) -> CoreResult<()> {
        Self::validate_ordering(&self.chunks)?;
        let mut covered = vec![false; layout.block_volume()];
        for c in &self.chunks {
            for off in c.offset..c.offset + c.length {
                if off >= covered.len() {
                    return Err(CoreError::Configuration("chunk extends past block storage".into()));
                }
                covered[off] = true;
            }
        }

        for variable in 0..layout.spec.num_vars {
            for k in layout.interior_range_k() {
                for j in layout.interior_range_j() {
                    for i in layout.interior_range_i() {
                        let off = layout.offset(variable, i, j, k);
                        if !covered[off] {
                            return Err(CoreError::Configuration(
                                "chunk union does not cover all interior cells".into(),
                            ));
                        }
                        covered[off] = false; // consume; any leftover `true` means extra coverage
                    }
                }
            }
        }
        if covered.iter().any(|&c| c) {
            return Err(CoreError::Configuration(
                "chunk union covers cells outside the interior".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::layout::GridSpec;

    #[test]
    fn default_chunk_list_covers_interior_exactly() {
        let spec = GridSpec { n1: 3, n2: 3, n3_total: 9, bc: 1, num_vars: 2 };
        let layout = BlockLayout::for_rank(spec, 1, 3).unwrap();
        let chunks = ChunkList::default_for(&layout);
        chunks.validate_covers_interior(&layout).unwrap();
    }

    #[test]
    fn rejects_overlapping_chunks() {
        let mut list = ChunkList::default();
        let result = list.set(vec![
            Chunk { offset: 0, length: 4, weight: 1.0 },
            Chunk { offset: 2, length: 4, weight: 1.0 },
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn disjoint_mut_slices_cover_and_dont_alias() {
        let mut list = ChunkList::default();
        list.set(vec![
            Chunk { offset: 1, length: 2, weight: 1.0 },
            Chunk { offset: 5, length: 3, weight: 1.0 },
        ])
        .unwrap();
        let mut data = vec![0.0; 10];
        {
            let slices = list.disjoint_mut_slices(&mut data);
            assert_eq!(slices.len(), 2);
            slices[0][0] = 1.0;
            slices[0][1] = 2.0;
            slices[1][0] = 3.0;
            slices[1][1] = 4.0;
            slices[1][2] = 5.0;
        }
        assert_eq!(data, vec![0.0, 1.0, 2.0, 0.0, 0.0, 3.0, 4.0, 5.0, 0.0, 0.0]);
    }
}
