//! Ray casting: synthesizing images from the TSDF volume.

use fusion_camera::{invert_rigid, CameraIntrinsics, FrameTransform, Matrix4};
use fusion_voxel::{BlockGrid, BlockKey, VoxelRecord};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::warn;

use crate::config::RayCastConfig;
use crate::error::KernelError;
use crate::range::RangeMap;
use crate::sample::{corner_offset, trilinear_weight, voxel_at_point, voxel_at_wrapped};
use crate::slots::SlotWriter;

/// Which output maps a ray cast should produce.
#[derive(Debug, Clone, Copy)]
pub struct RayCastRequest {
    /// Synthesize a vertex (world position) map.
    pub vertex: bool,
    /// Synthesize a depth map in sensor units.
    pub depth: bool,
    /// Synthesize a color map (meaningful for colored records only).
    pub color: bool,
    /// Synthesize a camera-frame normal map.
    pub normal: bool,
}

impl Default for RayCastRequest {
    fn default() -> Self {
        Self {
            vertex: true,
            depth: true,
            color: true,
            normal: true,
        }
    }
}

impl RayCastRequest {
    const fn any(&self) -> bool {
        self.vertex || self.depth || self.color || self.normal
    }
}

/// The synthesized image maps of one ray cast.
///
/// Every requested map is a row-major `width * height` buffer; pixels whose
/// ray found no surface stay at zero.
#[derive(Debug, Clone, Default)]
pub struct RayCastMaps {
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// World-space surface positions.
    pub vertex: Option<Vec<Point3<f32>>>,
    /// Depth in sensor units (`t * depth_scale`).
    pub depth: Option<Vec<f32>>,
    /// Trilinearly interpolated linear RGB in `[0, 1]`.
    pub color: Option<Vec<[f32; 3]>>,
    /// Camera-frame unit surface normals.
    pub normal: Option<Vec<Vector3<f32>>>,
}

impl RayCastMaps {
    /// Linear buffer index of pixel `(x, y)`.
    #[must_use]
    pub const fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }
}

/// Marches one ray per output pixel through the sparse volume and shades
/// the first zero crossing.
///
/// Rays start at `depth_min` (tightened per pixel when a [`RangeMap`] is
/// supplied) and advance by `max(voxel_size, tsdf * sdf_trunc)`, skipping a
/// whole block when the current position is unallocated. A crossing from
/// positive to non-positive TSDF at sufficient weight is localized by
/// linear interpolation in `t`; depth and vertex outputs come directly from
/// the intersection, color and normals from trilinear interpolation over
/// the surrounding eight voxels (normals rotated into the camera frame).
///
/// `pose` maps camera to world coordinates. With no requested output the
/// call warns and returns empty maps.
///
/// # Errors
///
/// Currently infallible for any well-formed grid; the `Result` keeps the
/// launch signature uniform across kernels.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]
pub fn ray_cast<V: VoxelRecord>(
    grid: &BlockGrid<V>,
    intrinsics: &CameraIntrinsics,
    pose: &Matrix4<f32>,
    width: usize,
    height: usize,
    request: &RayCastRequest,
    range: Option<&RangeMap>,
    config: &RayCastConfig,
) -> Result<RayCastMaps, KernelError> {
    if !request.any() {
        warn!("no output requested for ray casting, exit");
        return Ok(RayCastMaps {
            width,
            height,
            ..RayCastMaps::default()
        });
    }

    let c2w = FrameTransform::new(intrinsics, pose);
    let w2c = FrameTransform::new(intrinsics, &invert_rigid(pose));

    let voxel_size = grid.voxel_size();
    let block_size = grid.block_size();

    let mut vertex_buf = request
        .vertex
        .then(|| vec![Point3::origin(); width * height]);
    let mut depth_buf = request.depth.then(|| vec![0.0_f32; width * height]);
    let mut color_buf = request.color.then(|| vec![[0.0_f32; 3]; width * height]);
    let mut normal_buf = request
        .normal
        .then(|| vec![Vector3::zeros(); width * height]);

    {
        let vertex_writer = vertex_buf.as_deref_mut().map(SlotWriter::new);
        let depth_writer = depth_buf.as_deref_mut().map(SlotWriter::new);
        let color_writer = color_buf.as_deref_mut().map(SlotWriter::new);
        let normal_writer = normal_buf.as_deref_mut().map(SlotWriter::new);

        // Camera origin in world space
        let (x_o, y_o, z_o) = c2w.rigid_transform(0.0, 0.0, 0.0);

        (0..width * height).into_par_iter().for_each(|pixel| {
            let y = pixel / width;
            let x = pixel % width;

            // Ray direction scaled so t measures camera-frame depth
            let (x_c, y_c, z_c) = c2w.unproject(x as f32, y as f32, 1.0);
            let (x_g, y_g, z_g) = c2w.rigid_transform(x_c, y_c, z_c);
            let dir = Vector3::new(x_g - x_o, y_g - y_o, z_g - z_o);

            let (mut t, t_stop) = match range {
                Some(range) => {
                    let (z_min, z_max) = range.bounds_for_pixel(x, y);
                    if z_min > z_max {
                        return; // no block projects onto this pixel
                    }
                    (z_min.max(config.depth_min), z_max)
                }
                None => (config.depth_min, config.depth_max),
            };

            let mut t_prev = t;
            let mut tsdf_prev = 1.0_f32;

            for _ in 0..config.max_steps {
                if t > t_stop {
                    break;
                }
                let p = Point3::new(x_o, y_o, z_o) + t * dir;
                let Some(voxel) = voxel_at_point(grid, p.x, p.y, p.z) else {
                    t_prev = t;
                    t += block_size;
                    continue;
                };

                let tsdf = voxel.tsdf();
                let weight = voxel.weight();

                if tsdf_prev > 0.0 && weight >= config.weight_threshold && tsdf <= 0.0 {
                    let t_intersect =
                        (t * tsdf_prev - t_prev * tsdf) / (tsdf_prev - tsdf);
                    let p = Point3::new(x_o, y_o, z_o) + t_intersect * dir;

                    if let Some(writer) = &depth_writer {
                        // SAFETY: each pixel index is written by its own task.
                        unsafe { writer.write(pixel, t_intersect * config.depth_scale) };
                    }
                    if let Some(writer) = &vertex_writer {
                        // SAFETY: as above.
                        unsafe { writer.write(pixel, p) };
                    }

                    if request.color || request.normal {
                        shade_trilinear(
                            grid,
                            &w2c,
                            p,
                            voxel_size,
                            block_size,
                            pixel,
                            color_writer.as_ref(),
                            normal_writer.as_ref(),
                        );
                    }
                    break;
                }

                tsdf_prev = tsdf;
                t_prev = t;
                t += (tsdf * config.sdf_trunc).max(voxel_size);
            }
        });
    }

    Ok(RayCastMaps {
        width,
        height,
        vertex: vertex_buf,
        depth: depth_buf,
        color: color_buf,
        normal: normal_buf,
    })
}

/// Trilinear color and normal shading around an intersection point.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::too_many_arguments
)]
fn shade_trilinear<V: VoxelRecord>(
    grid: &BlockGrid<V>,
    w2c: &FrameTransform,
    p: Point3<f32>,
    voxel_size: f32,
    block_size: f32,
    pixel: usize,
    color_writer: Option<&SlotWriter<'_, [f32; 3]>>,
    normal_writer: Option<&SlotWriter<'_, Vector3<f32>>>,
) {
    let key = BlockKey::containing(p.x, p.y, p.z, block_size);
    let Some(addr) = grid.find(key) else { return };

    let x_v = (p.x - key.x as f32 * block_size) / voxel_size;
    let y_v = (p.y - key.y as f32 * block_size) / voxel_size;
    let z_v = (p.z - key.z as f32 * block_size) / voxel_size;

    let x_f = x_v.floor() as i32;
    let y_f = y_v.floor() as i32;
    let z_f = z_v.floor() as i32;

    let rx = x_v - x_f as f32;
    let ry = y_v - y_f as f32;
    let rz = z_v - z_f as f32;

    let mut color = [0.0_f32; 3];
    let mut normal = [0.0_f32; 3];
    let mut color_weight = 0.0_f32;
    let mut normal_weight = 0.0_f32;

    for k in 0..8 {
        let (dx, dy, dz) = corner_offset(k);
        let ratio = trilinear_weight(k, rx, ry, rz);
        let corner = (x_f + dx, y_f + dy, z_f + dz);

        if color_writer.is_some() {
            let voxel = voxel_at_wrapped(grid, key, addr, corner.0, corner.1, corner.2);
            if let Some(voxel) = voxel {
                if voxel.weight() > 0.0 {
                    let c = voxel.color();
                    color_weight += ratio;
                    color[0] += ratio * c[0];
                    color[1] += ratio * c[1];
                    color[2] += ratio * c[2];
                }
            }
        }

        if normal_writer.is_some() {
            for dim in 0..3 {
                let step = (
                    i32::from(dim == 0),
                    i32::from(dim == 1),
                    i32::from(dim == 2),
                );
                let plus = voxel_at_wrapped(
                    grid,
                    key,
                    addr,
                    corner.0 + step.0,
                    corner.1 + step.1,
                    corner.2 + step.2,
                );
                let minus = voxel_at_wrapped(
                    grid,
                    key,
                    addr,
                    corner.0 - step.0,
                    corner.1 - step.1,
                    corner.2 - step.2,
                );

                let mut valid = false;
                if let Some(v) = plus {
                    if v.weight() > 0.0 {
                        normal[dim] += ratio * v.tsdf() / (2.0 * voxel_size);
                        valid = true;
                    }
                }
                if let Some(v) = minus {
                    if v.weight() > 0.0 {
                        normal[dim] -= ratio * v.tsdf() / (2.0 * voxel_size);
                        valid = true;
                    }
                }
                if valid {
                    normal_weight += ratio;
                }
            }
        }
    }

    if let Some(writer) = color_writer {
        if color_weight > 0.0 {
            let scale = color_weight * 255.0;
            // SAFETY: each pixel index is written by its own task.
            unsafe {
                writer.write(
                    pixel,
                    [color[0] / scale, color[1] / scale, color[2] / scale],
                );
            }
        }
    }

    if let Some(writer) = normal_writer {
        if normal_weight > 0.0 {
            let nx = normal[0] / normal_weight;
            let ny = normal[1] / normal_weight;
            let nz = normal[2] / normal_weight;
            let norm = (nx * nx + ny * ny + nz * nz).sqrt();
            if norm > 0.0 {
                let (cx, cy, cz) = w2c.rotate(nx / norm, ny / norm, nz / norm);
                // SAFETY: each pixel index is written by its own task.
                unsafe { writer.write(pixel, Vector3::new(cx, cy, cz)) };
            }
        }
    }
}
