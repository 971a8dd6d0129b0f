//! Byte-size driven dispatch between voxel record variants.

use crate::error::GridError;
use crate::grid::BlockGrid;
use crate::voxel::{ColoredTsdfVoxel, TsdfVoxel, VoxelRecord};

/// A block grid with the voxel record variant resolved at runtime.
///
/// Callers that receive an opaque voxel buffer (a serialized volume, a
/// bindings layer) know only the element byte size; this handle turns that
/// byte size into the right concrete grid once, at the boundary, so the
/// kernels themselves stay generic and monomorphized.
///
/// # Example
///
/// ```
/// use fusion_voxel::{GridHandle, VoxelRecord, TsdfVoxel};
///
/// let handle = GridHandle::with_element_size(8, 0.05, TsdfVoxel::BYTE_SIZE).unwrap();
/// assert!(!handle.has_color());
/// ```
#[derive(Debug, Clone)]
pub enum GridHandle {
    /// TSDF-only records.
    Tsdf(BlockGrid<TsdfVoxel>),
    /// TSDF + RGB records.
    Colored(BlockGrid<ColoredTsdfVoxel>),
}

impl GridHandle {
    /// Creates an empty grid whose record variant matches the given element
    /// byte size.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::UnsupportedVoxelLayout`] if the byte size
    /// matches neither record variant, and propagates the parameter checks
    /// of [`BlockGrid::new`].
    pub fn with_element_size(
        resolution: usize,
        voxel_size: f32,
        byte_size: usize,
    ) -> Result<Self, GridError> {
        match byte_size {
            TsdfVoxel::BYTE_SIZE => Ok(Self::Tsdf(BlockGrid::new(resolution, voxel_size)?)),
            ColoredTsdfVoxel::BYTE_SIZE => {
                Ok(Self::Colored(BlockGrid::new(resolution, voxel_size)?))
            }
            _ => Err(GridError::UnsupportedVoxelLayout { byte_size }),
        }
    }

    /// Whether the underlying records carry color.
    #[must_use]
    pub const fn has_color(&self) -> bool {
        match self {
            Self::Tsdf(_) => TsdfVoxel::HAS_COLOR,
            Self::Colored(_) => ColoredTsdfVoxel::HAS_COLOR,
        }
    }

    /// Block resolution `R` of the underlying grid.
    #[must_use]
    pub const fn resolution(&self) -> usize {
        match self {
            Self::Tsdf(g) => g.resolution(),
            Self::Colored(g) => g.resolution(),
        }
    }

    /// Metric voxel size of the underlying grid.
    #[must_use]
    pub const fn voxel_size(&self) -> f32 {
        match self {
            Self::Tsdf(g) => g.voxel_size(),
            Self::Colored(g) => g.voxel_size(),
        }
    }
}
