//! Error types for kernel launches.

/// Errors that abort a kernel launch.
///
/// Per-task failures (out-of-image projections, invalid depth samples,
/// missing neighbor blocks, insufficient weight) are not errors; those tasks
/// skip and the launch continues.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum KernelError {
    /// An input image does not match the camera's declared dimensions.
    #[error("image is {actual_width}x{actual_height}, camera expects {width}x{height}")]
    ImageSizeMismatch {
        /// Width declared by the intrinsics.
        width: usize,
        /// Height declared by the intrinsics.
        height: usize,
        /// Actual image width.
        actual_width: usize,
        /// Actual image height.
        actual_height: usize,
    },

    /// The per-voxel mesh scratch structure could not be allocated.
    #[error(
        "unable to allocate the mesh scratch structure for Marching Cubes with \
         {blocks} active voxel blocks; consider a larger voxel size \
         (currently {voxel_size}) for TSDF integration"
    )]
    MeshScratchAllocation {
        /// Number of active blocks in the failed request.
        blocks: usize,
        /// Current metric voxel size.
        voxel_size: f32,
    },
}
