//! Active-block lists and precomputed neighbor tables.

use crate::block::BlockKey;
use crate::grid::BlockGrid;
use crate::voxel::VoxelRecord;

/// Linear slot count of the 3×3×3 neighborhood, including self.
pub const NEIGHBOR_COUNT: usize = 27;

/// The subset of blocks a kernel launch operates on, with a precomputed
/// 3×3×3 neighbor table per block.
///
/// Extraction kernels constantly step across block boundaries; resolving
/// those steps through one table lookup instead of a hash probe keeps the
/// inner loops branch-light. The neighborhood is linearized as
/// `(dx+1) + 3*(dy+1) + 9*(dz+1)` with self at slot 13.
///
/// The table indexes blocks two ways:
/// - *active index*: position in the active list (the kernel workload axis)
/// - *block address*: position in the grid's block buffer
///
/// `inv_indices` maps address → active index so cross-block walks can land
/// back in workload space.
///
/// # Example
///
/// ```
/// use fusion_voxel::{ActiveBlocks, BlockGrid, BlockKey, TsdfVoxel};
///
/// let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
/// grid.allocate(BlockKey::new(0, 0, 0));
/// grid.allocate(BlockKey::new(1, 0, 0));
///
/// let active = ActiveBlocks::all(&grid);
/// let slot = ActiveBlocks::nb_slot(1, 0, 0);
/// assert_eq!(active.neighbor(0, slot), Some(1));
/// assert_eq!(active.neighbor(1, slot), None); // (2,0,0) not allocated
/// ```
#[derive(Debug, Clone)]
pub struct ActiveBlocks {
    indices: Vec<usize>,
    inv_indices: Vec<i64>,
    nb_indices: Vec<usize>,
    nb_masks: Vec<bool>,
}

impl ActiveBlocks {
    /// Builds the active list and neighbor table for the given block
    /// addresses.
    #[must_use]
    pub fn new<V: VoxelRecord>(grid: &BlockGrid<V>, indices: Vec<usize>) -> Self {
        let mut inv_indices = vec![-1_i64; grid.block_count()];
        for (active_idx, &addr) in indices.iter().enumerate() {
            #[allow(clippy::cast_possible_wrap)]
            {
                inv_indices[addr] = active_idx as i64;
            }
        }

        let mut nb_indices = vec![0_usize; indices.len() * NEIGHBOR_COUNT];
        let mut nb_masks = vec![false; indices.len() * NEIGHBOR_COUNT];
        for (active_idx, &addr) in indices.iter().enumerate() {
            let key = grid.key(addr);
            for dz in -1_i32..=1 {
                for dy in -1_i32..=1 {
                    for dx in -1_i32..=1 {
                        let slot = Self::nb_slot(dx, dy, dz);
                        if let Some(nb_addr) = grid.find(key + BlockKey::new(dx, dy, dz)) {
                            nb_indices[active_idx * NEIGHBOR_COUNT + slot] = nb_addr;
                            nb_masks[active_idx * NEIGHBOR_COUNT + slot] = true;
                        }
                    }
                }
            }
        }

        Self {
            indices,
            inv_indices,
            nb_indices,
            nb_masks,
        }
    }

    /// Builds an active list covering every allocated block.
    #[must_use]
    pub fn all<V: VoxelRecord>(grid: &BlockGrid<V>) -> Self {
        Self::new(grid, (0..grid.block_count()).collect())
    }

    /// Linearizes a neighborhood offset with each component in `{-1, 0, 1}`.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn nb_slot(dx: i32, dy: i32, dz: i32) -> usize {
        ((dx + 1) + 3 * (dy + 1) + 9 * (dz + 1)) as usize
    }

    /// Number of active blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the active list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The block addresses in the active list, in workload order.
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// The block address of the active block at `active_idx`.
    #[must_use]
    pub fn block_address(&self, active_idx: usize) -> usize {
        self.indices[active_idx]
    }

    /// The active index of the block at `addr`, if it is in the list.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn active_of(&self, addr: usize) -> Option<usize> {
        match self.inv_indices.get(addr) {
            Some(&i) if i >= 0 => Some(i as usize),
            _ => None,
        }
    }

    /// The block address of the neighbor at `slot` of the active block at
    /// `active_idx`, or `None` if that neighbor block is not allocated.
    #[must_use]
    pub fn neighbor(&self, active_idx: usize, slot: usize) -> Option<usize> {
        if self.nb_masks[active_idx * NEIGHBOR_COUNT + slot] {
            Some(self.nb_indices[active_idx * NEIGHBOR_COUNT + slot])
        } else {
            None
        }
    }
}
