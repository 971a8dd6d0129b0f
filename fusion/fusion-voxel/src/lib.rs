//! Sparse TSDF voxel block grid.
//!
//! The surface representation behind RGB-D fusion: a truncated signed
//! distance field stored in fixed-size cubic blocks, allocated sparsely and
//! keyed by integer block coordinates.
//!
//! - [`TsdfVoxel`] / [`ColoredTsdfVoxel`] - Per-voxel records with
//!   weighted-average integration
//! - [`VoxelRecord`] - The record interface every kernel is generic over
//! - [`BlockKey`] - Integer 3-vector identifying a block in world-block space
//! - [`VoxelIndexer`] - Linear workload index ↔ voxel coordinate arithmetic
//! - [`BlockGrid`] - Contiguous block buffer + key → address hash map
//! - [`ActiveBlocks`] - Active-block list with precomputed 3×3×3 neighbor
//!   tables
//! - [`GridHandle`] - Tagged dispatch between the two record variants,
//!   driven by element byte size
//!
//! # Layout
//!
//! A block of resolution `R` holds `R³` voxels in x-fastest order:
//! voxel `(xv, yv, zv)` sits at linear index `xv + R*yv + R²*zv`. The world
//! coordinate of that voxel in block `(bx, by, bz)` is
//! `(bx*R + xv, by*R + yv, bz*R + zv)` in voxel units, scaled by the voxel
//! size into meters.
//!
//! All four fusion kernels traverse this layout; the arithmetic lives here
//! once so they cannot disagree.
//!
//! # Example
//!
//! ```
//! use fusion_voxel::{BlockGrid, BlockKey, TsdfVoxel, VoxelRecord};
//!
//! let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
//! let addr = grid.allocate(BlockKey::new(0, 0, 0));
//!
//! grid.voxel_mut(addr, 1, 2, 3).integrate(0.5, f32::MAX);
//! assert!(grid.voxel(addr, 1, 2, 3).weight() > 0.0);
//! ```

// Safety: Deny unwrap/expect in library code. Tests may use them.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod active;
mod block;
mod error;
mod grid;
mod handle;
mod voxel;

pub use active::{ActiveBlocks, NEIGHBOR_COUNT};
pub use block::{BlockKey, VoxelIndexer};
pub use error::GridError;
pub use grid::BlockGrid;
pub use handle::GridHandle;
pub use voxel::{ColoredTsdfVoxel, TsdfVoxel, VoxelRecord};
