//! Kernel launch parameters.

/// Parameters for TSDF integration.
#[derive(Debug, Clone, Copy)]
pub struct IntegrateConfig {
    /// Divisor converting raw depth samples to meters (1000 for millimeter
    /// sensors).
    pub depth_scale: f32,
    /// Depth samples beyond this range (meters) are rejected.
    pub depth_max: f32,
    /// Truncation distance in meters; SDF values are clamped to this and
    /// normalized by it.
    pub sdf_trunc: f32,
    /// Upper bound on the accumulated voxel weight. The default leaves
    /// weights unclamped; long-running reconstructions should cap this so
    /// the surface can still adapt to new observations.
    pub max_weight: f32,
}

impl Default for IntegrateConfig {
    fn default() -> Self {
        Self {
            depth_scale: 1000.0,
            depth_max: 3.0,
            sdf_trunc: 0.04,
            max_weight: f32::MAX,
        }
    }
}

/// Parameters for surface point and mesh extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractConfig {
    /// Minimum accumulated weight for a voxel to participate in extraction.
    pub weight_threshold: f32,
    /// Caller-provided upper bound on the emitted point count. When absent,
    /// a separate sizing pass runs first (slower but exact).
    pub estimated_point_count: Option<usize>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            weight_threshold: 3.0,
            estimated_point_count: None,
        }
    }
}

/// Parameters for range estimation.
#[derive(Debug, Clone, Copy)]
pub struct RangeConfig {
    /// Downsampling factor between the output image and the range map.
    pub down_factor: usize,
    /// Near bound of the marching interval in meters.
    pub depth_min: f32,
    /// Far bound of the marching interval in meters.
    pub depth_max: f32,
    /// Capacity of the fragment buffer. Overflowing it produces a truncated
    /// (conservatively empty) range map and a diagnostic; retry with a
    /// larger buffer.
    pub fragment_capacity: usize,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            down_factor: 8,
            depth_min: 0.1,
            depth_max: 3.0,
            fragment_capacity: 65535,
        }
    }
}

/// Parameters for ray casting.
#[derive(Debug, Clone, Copy)]
pub struct RayCastConfig {
    /// Multiplier converting metric ray depth back to sensor units in the
    /// synthesized depth map.
    pub depth_scale: f32,
    /// Marching starts at this depth (meters) unless a range map tightens
    /// it.
    pub depth_min: f32,
    /// Marching never reports surfaces beyond this depth.
    pub depth_max: f32,
    /// Truncation distance used to scale marching steps.
    pub sdf_trunc: f32,
    /// Hard bound on marching iterations per ray.
    pub max_steps: usize,
    /// Minimum voxel weight for a zero crossing to count as surface.
    pub weight_threshold: f32,
}

impl Default for RayCastConfig {
    fn default() -> Self {
        Self {
            depth_scale: 1000.0,
            depth_min: 0.1,
            depth_max: 3.0,
            sdf_trunc: 0.04,
            max_steps: 100,
            weight_threshold: 3.0,
        }
    }
}
