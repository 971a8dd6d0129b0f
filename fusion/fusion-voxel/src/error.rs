//! Error types for the sparse voxel grid.

/// Errors that can occur when building or dispatching over a block grid.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GridError {
    /// Block resolution must be at least 1.
    #[error("block resolution must be positive, got {0}")]
    InvalidResolution(usize),

    /// Voxel size must be positive and finite.
    #[error("voxel size must be positive and finite, got {0}")]
    InvalidVoxelSize(f32),

    /// The element byte size matches no known voxel record layout.
    #[error(
        "no voxel record layout with element byte size {byte_size} \
         (expected 8 for TSDF-only or 20 for TSDF+color)"
    )]
    UnsupportedVoxelLayout {
        /// The unmatched element byte size.
        byte_size: usize,
    },
}
