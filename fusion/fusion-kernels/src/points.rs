//! Surface point cloud extraction.

use std::sync::atomic::{AtomicUsize, Ordering};

use fusion_voxel::{ActiveBlocks, BlockGrid, VoxelRecord};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::ExtractConfig;
use crate::error::KernelError;
use crate::sample::{normal_at, voxel_at};
use crate::slots::SlotWriter;

/// An oriented, optionally colored surface point cloud.
#[derive(Debug, Clone, Default)]
pub struct SurfacePointCloud {
    /// Point positions in meters.
    pub points: Vec<Point3<f32>>,
    /// Unit surface normals, one per point.
    pub normals: Vec<Vector3<f32>>,
    /// Linear RGB in `[0, 1]`, one per point; present iff the voxel record
    /// stores color.
    pub colors: Option<Vec<[f32; 3]>>,
}

impl SurfacePointCloud {
    /// Number of extracted points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the cloud is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Extracts the zero level set of the TSDF as a point cloud.
///
/// A voxel with sufficient weight emits a point on each positive axis
/// (+x/+y/+z) where its TSDF strictly changes sign against the neighbor
/// voxel, positioned by linear interpolation along the shared edge. Normals
/// come from the interpolated central-difference gradient, colors (for
/// colored records) from channel-wise interpolation.
///
/// When [`ExtractConfig::estimated_point_count`] is unset, a sizing pass
/// runs first to count crossings exactly; providing an estimate skips that
/// pass, and points past the estimate are dropped with a diagnostic rather
/// than written out of bounds.
///
/// # Errors
///
/// Currently infallible for any well-formed grid; the `Result` keeps the
/// launch signature uniform across kernels.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::too_many_lines
)]
pub fn extract_surface_points<V: VoxelRecord>(
    grid: &BlockGrid<V>,
    active: &ActiveBlocks,
    config: &ExtractConfig,
) -> Result<SurfacePointCloud, KernelError> {
    let resolution = grid.resolution();
    let resolution3 = grid.indexer().voxel_count();
    let indexer = grid.indexer();
    let voxel_size = grid.voxel_size();
    let n = active.len() * resolution3;
    let weight_threshold = config.weight_threshold;

    let valid_size = match config.estimated_point_count {
        Some(estimate) => estimate,
        None => {
            warn!(
                "no estimated point cloud size provided, using a 2-pass \
                 extraction; surface extraction could be slow"
            );
            let count = AtomicUsize::new(0);
            (0..n).into_par_iter().for_each(|workload_idx| {
                let active_idx = workload_idx / resolution3;
                let addr = active.block_address(active_idx);
                let (xv, yv, zv) = indexer.coord(workload_idx % resolution3);

                let voxel = grid.voxel(addr, xv, yv, zv);
                if voxel.weight() <= weight_threshold {
                    return;
                }
                let tsdf_o = voxel.tsdf();

                for axis in 0..3 {
                    #[allow(clippy::cast_possible_wrap)]
                    let neighbor = voxel_at(
                        grid,
                        active,
                        active_idx,
                        xv as i32 + i32::from(axis == 0),
                        yv as i32 + i32::from(axis == 1),
                        zv as i32 + i32::from(axis == 2),
                    );
                    let Some(neighbor) = neighbor else { continue };
                    if neighbor.weight() > weight_threshold && neighbor.tsdf() * tsdf_o < 0.0 {
                        count.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
            count.into_inner()
        }
    };

    let mut points = vec![Point3::origin(); valid_size];
    let mut normals = vec![Vector3::zeros(); valid_size];
    let mut colors = if V::HAS_COLOR {
        vec![[0.0_f32; 3]; valid_size]
    } else {
        Vec::new()
    };

    let counter = AtomicUsize::new(0);
    let dropped = AtomicUsize::new(0);
    {
        let point_writer = SlotWriter::new(&mut points);
        let normal_writer = SlotWriter::new(&mut normals);
        let color_writer = SlotWriter::new(&mut colors);

        (0..n).into_par_iter().for_each(|workload_idx| {
            let active_idx = workload_idx / resolution3;
            let addr = active.block_address(active_idx);
            let key = grid.key(addr);
            let (xv, yv, zv) = indexer.coord(workload_idx % resolution3);

            let voxel = grid.voxel(addr, xv, yv, zv);
            if voxel.weight() <= weight_threshold {
                return;
            }
            let tsdf_o = voxel.tsdf();

            #[allow(clippy::cast_possible_wrap)]
            let (xo, yo, zo) = (xv as i32, yv as i32, zv as i32);
            let x = (key.x * resolution as i32 + xo) as f32;
            let y = (key.y * resolution as i32 + yo) as f32;
            let z = (key.z * resolution as i32 + zo) as f32;

            let no = normal_at(grid, active, active_idx, xo, yo, zo);

            for axis in 0..3 {
                let step = (
                    i32::from(axis == 0),
                    i32::from(axis == 1),
                    i32::from(axis == 2),
                );
                let neighbor =
                    voxel_at(grid, active, active_idx, xo + step.0, yo + step.1, zo + step.2);
                let Some(neighbor) = neighbor else { continue };
                if neighbor.weight() <= weight_threshold || neighbor.tsdf() * tsdf_o >= 0.0 {
                    continue;
                }

                let ratio = -tsdf_o / (neighbor.tsdf() - tsdf_o);
                let idx = counter.fetch_add(1, Ordering::Relaxed);
                if idx >= valid_size {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }

                let point = Point3::new(
                    voxel_size * (x + ratio * step.0 as f32),
                    voxel_size * (y + ratio * step.1 as f32),
                    voxel_size * (z + ratio * step.2 as f32),
                );
                // SAFETY: idx was uniquely claimed above and bounds-checked.
                unsafe { point_writer.write(idx, point) };

                let ni = normal_at(
                    grid,
                    active,
                    active_idx,
                    xo + step.0,
                    yo + step.1,
                    zo + step.2,
                );
                let nx = (1.0 - ratio) * no[0] + ratio * ni[0];
                let ny = (1.0 - ratio) * no[1] + ratio * ni[1];
                let nz = (1.0 - ratio) * no[2] + ratio * ni[2];
                let norm = (nx * nx + ny * ny + nz * nz).sqrt() + 1e-5;
                // SAFETY: same unique idx as above.
                unsafe { normal_writer.write(idx, Vector3::new(nx / norm, ny / norm, nz / norm)) };

                if V::HAS_COLOR {
                    let co = voxel.color();
                    let ci = neighbor.color();
                    let rgb = [
                        ((1.0 - ratio) * co[0] + ratio * ci[0]) / 255.0,
                        ((1.0 - ratio) * co[1] + ratio * ci[1]) / 255.0,
                        ((1.0 - ratio) * co[2] + ratio * ci[2]) / 255.0,
                    ];
                    // SAFETY: same unique idx as above.
                    unsafe { color_writer.write(idx, rgb) };
                }
            }
        });
    }

    let emitted = counter.into_inner().min(valid_size);
    let dropped = dropped.into_inner();
    if dropped > 0 {
        warn!(
            dropped,
            estimate = valid_size,
            "point cloud larger than the provided estimate; increase it to keep all points"
        );
    }
    info!(count = emitted, "surface points extracted");

    points.truncate(emitted);
    normals.truncate(emitted);
    colors.truncate(emitted);

    Ok(SurfacePointCloud {
        points,
        normals,
        colors: V::HAS_COLOR.then_some(colors),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_voxel::{BlockKey, TsdfVoxel};

    /// Grid with a synthetic planar zero crossing between zv = 1 and zv = 2.
    fn plane_grid() -> BlockGrid<TsdfVoxel> {
        let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
        let addr = grid.allocate(BlockKey::origin());
        for zv in 0..8 {
            for yv in 0..8 {
                for xv in 0..8 {
                    let voxel = grid.voxel_mut(addr, xv, yv, zv);
                    voxel.tsdf = if zv <= 1 { 0.5 } else { -0.5 };
                    voxel.weight = 1.0;
                }
            }
        }
        grid
    }

    #[test]
    fn plane_emits_one_point_per_column() {
        let grid = plane_grid();
        let active = ActiveBlocks::all(&grid);
        let config = ExtractConfig {
            weight_threshold: 0.0,
            estimated_point_count: None,
        };
        let cloud = extract_surface_points(&grid, &active, &config).unwrap();

        // One +z crossing per (x, y) column
        assert_eq!(cloud.len(), 64);
        for p in &cloud.points {
            // Crossing halfway between zv = 1 and zv = 2
            approx::assert_relative_eq!(p.z, 0.075, epsilon = 1e-6);
        }
    }

    #[test]
    fn normals_point_into_negative_gradient_side() {
        let grid = plane_grid();
        let active = ActiveBlocks::all(&grid);
        let config = ExtractConfig {
            weight_threshold: 0.0,
            estimated_point_count: None,
        };
        let cloud = extract_surface_points(&grid, &active, &config).unwrap();
        assert_eq!(cloud.normals.len(), cloud.len());
        // Interior columns have a clean -z gradient
        let interior = cloud
            .points
            .iter()
            .zip(&cloud.normals)
            .find(|(p, _)| p.x > 0.1 && p.x < 0.3 && p.y > 0.1 && p.y < 0.3);
        let (_, n) = interior.unwrap();
        assert!(n.z < -0.9, "normal should point along -z, got {n:?}");
    }

    #[test]
    fn estimate_caps_output() {
        let grid = plane_grid();
        let active = ActiveBlocks::all(&grid);
        let config = ExtractConfig {
            weight_threshold: 0.0,
            estimated_point_count: Some(10),
        };
        let cloud = extract_surface_points(&grid, &active, &config).unwrap();
        assert_eq!(cloud.len(), 10);
    }

    #[test]
    fn rerun_is_deterministic_as_multiset() {
        let grid = plane_grid();
        let active = ActiveBlocks::all(&grid);
        let config = ExtractConfig {
            weight_threshold: 0.0,
            estimated_point_count: None,
        };
        let sort = |mut v: Vec<Point3<f32>>| {
            v.sort_by(|a, b| {
                (a.x, a.y, a.z)
                    .partial_cmp(&(b.x, b.y, b.z))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            v
        };
        let a = sort(extract_surface_points(&grid, &active, &config).unwrap().points);
        let b = sort(extract_surface_points(&grid, &active, &config).unwrap().points);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_grid_emits_nothing() {
        let grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
        let active = ActiveBlocks::all(&grid);
        let cloud =
            extract_surface_points(&grid, &active, &ExtractConfig::default()).unwrap();
        assert!(cloud.is_empty());
    }

    #[test]
    fn weight_threshold_filters_voxels() {
        let mut grid = plane_grid();
        // Re-mark every voxel as barely observed
        for zv in 0..8 {
            for yv in 0..8 {
                for xv in 0..8 {
                    grid.voxel_mut(0, xv, yv, zv).weight = 0.5;
                }
            }
        }
        let active = ActiveBlocks::all(&grid);
        let config = ExtractConfig {
            weight_threshold: 1.0,
            estimated_point_count: None,
        };
        let cloud = extract_surface_points(&grid, &active, &config).unwrap();
        assert!(cloud.is_empty());
    }
}
