//! Block keys and intra-block index arithmetic.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A discrete 3D coordinate identifying one voxel block in world-block
/// space.
///
/// Uses `i32` coordinates so the grid origin can sit anywhere in the world;
/// blocks extend symmetrically into negative space.
///
/// # Example
///
/// ```
/// use fusion_voxel::BlockKey;
///
/// let key = BlockKey::new(-2, 0, 5);
/// assert_eq!(key + BlockKey::new(1, 1, 1), BlockKey::new(-1, 1, 6));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockKey {
    /// X block coordinate.
    pub x: i32,
    /// Y block coordinate.
    pub y: i32,
    /// Z block coordinate.
    pub z: i32,
}

impl BlockKey {
    /// Creates a new block key.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The key at the origin.
    #[must_use]
    pub const fn origin() -> Self {
        Self::new(0, 0, 0)
    }

    /// Returns the key as an array.
    #[must_use]
    pub const fn as_array(self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }

    /// Returns the block key containing a world-space point, given the
    /// metric edge length of one block.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn containing(x: f32, y: f32, z: f32, block_size: f32) -> Self {
        Self::new(
            (x / block_size).floor() as i32,
            (y / block_size).floor() as i32,
            (z / block_size).floor() as i32,
        )
    }
}

impl From<[i32; 3]> for BlockKey {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl std::ops::Add for BlockKey {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(
            self.x.wrapping_add(other.x),
            self.y.wrapping_add(other.y),
            self.z.wrapping_add(other.z),
        )
    }
}

impl std::ops::Sub for BlockKey {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(
            self.x.wrapping_sub(other.x),
            self.y.wrapping_sub(other.y),
            self.z.wrapping_sub(other.z),
        )
    }
}

/// Index arithmetic for one cubic block of resolution `R`.
///
/// Voxels are stored x-fastest: `(xv, yv, zv)` ↔ `xv + R*yv + R²*zv`. Every
/// kernel decomposes its linear workload index through this type, so the
/// ordering is defined exactly once.
#[derive(Debug, Clone, Copy)]
pub struct VoxelIndexer {
    resolution: usize,
}

impl VoxelIndexer {
    /// Creates an indexer for blocks of the given resolution.
    #[must_use]
    pub const fn new(resolution: usize) -> Self {
        Self { resolution }
    }

    /// Block resolution `R`.
    #[must_use]
    pub const fn resolution(&self) -> usize {
        self.resolution
    }

    /// Number of voxels per block, `R³`.
    #[must_use]
    pub const fn voxel_count(&self) -> usize {
        self.resolution * self.resolution * self.resolution
    }

    /// Decomposes a linear voxel index into `(xv, yv, zv)`.
    #[must_use]
    pub const fn coord(&self, linear: usize) -> (usize, usize, usize) {
        let xv = linear % self.resolution;
        let yv = (linear / self.resolution) % self.resolution;
        let zv = linear / (self.resolution * self.resolution);
        (xv, yv, zv)
    }

    /// Composes `(xv, yv, zv)` into a linear voxel index.
    #[must_use]
    pub const fn linear(&self, xv: usize, yv: usize, zv: usize) -> usize {
        xv + self.resolution * yv + self.resolution * self.resolution * zv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_arithmetic() {
        let a = BlockKey::new(1, -2, 3);
        let b = BlockKey::new(-1, 2, -3);
        assert_eq!(a + b, BlockKey::origin());
        assert_eq!(a - a, BlockKey::origin());
    }

    #[test]
    fn containing_floors_toward_negative() {
        let block_size = 0.4; // 8 voxels * 0.05 m
        assert_eq!(
            BlockKey::containing(0.1, 0.1, 0.1, block_size),
            BlockKey::new(0, 0, 0)
        );
        assert_eq!(
            BlockKey::containing(-0.1, 0.5, 0.0, block_size),
            BlockKey::new(-1, 1, 0)
        );
    }

    #[test]
    fn indexer_round_trip() {
        let idx = VoxelIndexer::new(8);
        for linear in 0..idx.voxel_count() {
            let (x, y, z) = idx.coord(linear);
            assert_eq!(idx.linear(x, y, z), linear);
        }
    }

    #[test]
    fn indexer_is_x_fastest() {
        let idx = VoxelIndexer::new(4);
        assert_eq!(idx.coord(0), (0, 0, 0));
        assert_eq!(idx.coord(1), (1, 0, 0));
        assert_eq!(idx.coord(4), (0, 1, 0));
        assert_eq!(idx.coord(16), (0, 0, 1));
    }
}
