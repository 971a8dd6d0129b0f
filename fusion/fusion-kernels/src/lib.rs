//! Data-parallel kernels over the sparse TSDF block grid.
//!
//! Four tightly coupled passes share the block layout, indexing, and sign
//! conventions defined in `fusion-voxel`:
//!
//! - [`integrate`] - Fuse a posed depth (+ optional color) frame into the
//!   TSDF
//! - [`extract_surface_points`] - Zero-crossing scan producing an oriented
//!   point cloud
//! - [`extract_surface_mesh`] - Block-aware Marching Cubes producing a
//!   watertight triangle mesh
//! - [`estimate_range`] + [`ray_cast`] - Synthesize depth/vertex/color/
//!   normal images from the volume under a camera pose
//!
//! Every kernel is a rayon launch over an integer workload range; tasks
//! never block, and cross-task communication goes exclusively through the
//! documented atomics (slot counters, scratch marks, range min/max). Voxel
//! state is written only by [`integrate`]; everything else reads.
//!
//! # Example
//!
//! ```
//! use fusion_camera::{CameraIntrinsics, DepthImage};
//! use fusion_kernels::{integrate, IntegrateConfig};
//! use fusion_voxel::{BlockGrid, TsdfVoxel};
//! use nalgebra::Matrix4;
//!
//! let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
//! let depth = DepthImage::from_f32(4, 4, vec![0.5; 16]).unwrap();
//! let intrinsics = CameraIntrinsics::new(2.0, 2.0, 2.0, 2.0, 4, 4);
//!
//! let config = IntegrateConfig {
//!     depth_scale: 1.0,
//!     sdf_trunc: 0.04,
//!     ..IntegrateConfig::default()
//! };
//! let active = grid.touch(&depth, &intrinsics, &Matrix4::identity(), 1.0, 3.0, 0.04);
//! integrate(
//!     &mut grid,
//!     &active,
//!     &depth,
//!     None,
//!     &intrinsics,
//!     &Matrix4::identity(),
//!     &config,
//! )
//! .unwrap();
//! ```

// Safety: Deny unwrap/expect in library code. Tests may use them.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod config;
mod error;
mod integrate;
mod mesh;
mod points;
mod range;
mod raycast;
mod sample;
mod slots;
pub mod tables;

pub use config::{ExtractConfig, IntegrateConfig, RangeConfig, RayCastConfig};
pub use error::KernelError;
pub use integrate::integrate;
pub use mesh::{extract_surface_mesh, SurfaceMesh};
pub use points::{extract_surface_points, SurfacePointCloud};
pub use range::{estimate_range, RangeMap};
pub use raycast::{ray_cast, RayCastMaps, RayCastRequest};
