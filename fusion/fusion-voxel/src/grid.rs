//! The sparse voxel block grid.

use fusion_camera::{invert_rigid, CameraIntrinsics, DepthImage, FrameTransform, Matrix4};
use hashbrown::{HashMap, HashSet};
use rayon::prelude::*;

use crate::block::{BlockKey, VoxelIndexer};
use crate::error::GridError;
use crate::voxel::VoxelRecord;

/// A sparse TSDF grid: fixed-size cubic blocks in one contiguous buffer,
/// addressed through a key → address hash map.
///
/// Block addresses are stable for the lifetime of the grid (blocks are never
/// freed), so neighbor tables and active lists built from them stay valid
/// until the next allocation. Kernels treat the map as read-only; all
/// allocation happens before a kernel launch.
///
/// # Example
///
/// ```
/// use fusion_voxel::{BlockGrid, BlockKey, TsdfVoxel};
///
/// let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
/// let addr = grid.allocate(BlockKey::new(1, 0, -1));
///
/// assert_eq!(grid.find(BlockKey::new(1, 0, -1)), Some(addr));
/// assert_eq!(grid.find(BlockKey::new(0, 0, 0)), None);
/// ```
#[derive(Debug, Clone)]
pub struct BlockGrid<V: VoxelRecord> {
    resolution: usize,
    voxel_size: f32,
    voxels: Vec<V>,
    keys: Vec<BlockKey>,
    map: HashMap<BlockKey, usize>,
}

impl<V: VoxelRecord> BlockGrid<V> {
    /// Creates an empty grid with the given block resolution and metric
    /// voxel size.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidResolution`] for a zero resolution and
    /// [`GridError::InvalidVoxelSize`] for a non-positive or non-finite
    /// voxel size.
    pub fn new(resolution: usize, voxel_size: f32) -> Result<Self, GridError> {
        if resolution == 0 {
            return Err(GridError::InvalidResolution(resolution));
        }
        if voxel_size <= 0.0 || !voxel_size.is_finite() {
            return Err(GridError::InvalidVoxelSize(voxel_size));
        }
        Ok(Self {
            resolution,
            voxel_size,
            voxels: Vec::new(),
            keys: Vec::new(),
            map: HashMap::new(),
        })
    }

    /// Block resolution `R`.
    #[must_use]
    pub const fn resolution(&self) -> usize {
        self.resolution
    }

    /// Metric voxel edge length.
    #[must_use]
    pub const fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    /// Metric block edge length, `R * voxel_size`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn block_size(&self) -> f32 {
        self.resolution as f32 * self.voxel_size
    }

    /// The intra-block index arithmetic for this grid.
    #[must_use]
    pub const fn indexer(&self) -> VoxelIndexer {
        VoxelIndexer::new(self.resolution)
    }

    /// Number of allocated blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.keys.len()
    }

    /// All allocated block keys, indexed by block address.
    #[must_use]
    pub fn keys(&self) -> &[BlockKey] {
        &self.keys
    }

    /// Allocates the block at `key`, zero-initialized, and returns its
    /// address. Allocating an existing key returns the existing address.
    pub fn allocate(&mut self, key: BlockKey) -> usize {
        if let Some(&addr) = self.map.get(&key) {
            return addr;
        }
        let addr = self.keys.len();
        let voxel_count = self.indexer().voxel_count();
        self.voxels.resize(self.voxels.len() + voxel_count, V::default());
        self.keys.push(key);
        self.map.insert(key, addr);
        addr
    }

    /// Looks up the address of the block at `key`.
    #[must_use]
    pub fn find(&self, key: BlockKey) -> Option<usize> {
        self.map.get(&key).copied()
    }

    /// The key of the block at `addr`.
    #[must_use]
    pub fn key(&self, addr: usize) -> BlockKey {
        self.keys[addr]
    }

    /// The voxel record at `(xv, yv, zv)` in the block at `addr`.
    #[must_use]
    pub fn voxel(&self, addr: usize, xv: usize, yv: usize, zv: usize) -> &V {
        let idx = self.indexer();
        &self.voxels[addr * idx.voxel_count() + idx.linear(xv, yv, zv)]
    }

    /// Mutable access to one voxel record.
    pub fn voxel_mut(&mut self, addr: usize, xv: usize, yv: usize, zv: usize) -> &mut V {
        let idx = self.indexer();
        &mut self.voxels[addr * idx.voxel_count() + idx.linear(xv, yv, zv)]
    }

    /// The full voxel slice of the block at `addr`, in x-fastest order.
    #[must_use]
    pub fn block(&self, addr: usize) -> &[V] {
        let n = self.indexer().voxel_count();
        &self.voxels[addr * n..(addr + 1) * n]
    }

    /// Parallel mutable iteration over all allocated blocks as
    /// `(address, key, voxels)`.
    ///
    /// Each block is visited by exactly one rayon task, which is what makes
    /// per-voxel integration race-free: a voxel has a single writer per
    /// launch.
    pub fn par_blocks_mut(
        &mut self,
    ) -> impl IndexedParallelIterator<Item = (usize, BlockKey, &mut [V])> + '_ {
        let n = self.indexer().voxel_count();
        let keys = &self.keys;
        self.voxels
            .par_chunks_mut(n)
            .enumerate()
            .map(move |(addr, block)| (addr, keys[addr], block))
    }

    /// Allocates every block whose truncation band is touched by a posed
    /// depth frame and returns their addresses (the active list for the
    /// subsequent integration).
    ///
    /// Each valid depth sample is unprojected into world space; all blocks
    /// overlapping the axis-aligned cube of half-extent `sdf_trunc` around
    /// the point are allocated. `extrinsics` maps world to camera
    /// coordinates, as everywhere else in the pipeline.
    #[allow(clippy::cast_precision_loss)]
    pub fn touch(
        &mut self,
        depth: &DepthImage,
        intrinsics: &CameraIntrinsics,
        extrinsics: &Matrix4<f32>,
        depth_scale: f32,
        depth_max: f32,
        sdf_trunc: f32,
    ) -> Vec<usize> {
        let pose = invert_rigid(extrinsics);
        let c2w = FrameTransform::new(intrinsics, &pose);
        let block_size = self.block_size();

        let mut touched: HashSet<BlockKey> = HashSet::new();
        for v in 0..depth.height() {
            for u in 0..depth.width() {
                let d = depth.sample(u as f32, v as f32) / depth_scale;
                if d <= 0.0 || d > depth_max {
                    continue;
                }
                let (xc, yc, zc) = c2w.unproject(u as f32, v as f32, d);
                let (x, y, z) = c2w.rigid_transform(xc, yc, zc);

                let lo = BlockKey::containing(x - sdf_trunc, y - sdf_trunc, z - sdf_trunc, block_size);
                let hi = BlockKey::containing(x + sdf_trunc, y + sdf_trunc, z + sdf_trunc, block_size);
                for bz in lo.z..=hi.z {
                    for by in lo.y..=hi.y {
                        for bx in lo.x..=hi.x {
                            touched.insert(BlockKey::new(bx, by, bz));
                        }
                    }
                }
            }
        }

        let mut active: Vec<usize> = touched.into_iter().map(|key| self.allocate(key)).collect();
        active.sort_unstable();
        active
    }
}
