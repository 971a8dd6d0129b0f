//! Projected block range estimation for bounded ray marching.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use fusion_camera::{invert_rigid, CameraIntrinsics, FrameTransform, Matrix4};
use fusion_voxel::{BlockGrid, VoxelRecord};
use rayon::prelude::*;
use tracing::error;

use crate::config::RangeConfig;
use crate::error::KernelError;
use crate::slots::SlotWriter;

/// Edge length of one rendering fragment in downsampled pixels.
const FRAGMENT_SIZE: usize = 16;

/// A per-pixel `(z_min, z_max)` map at downsampled resolution, bounding the
/// depth interval a ray must march through.
///
/// Pixels covered by no block keep the deliberately inverted initialization
/// `(depth_max, depth_min)`, which callers can use to skip the ray
/// entirely.
#[derive(Debug, Clone)]
pub struct RangeMap {
    width: usize,
    height: usize,
    down_factor: usize,
    data: Vec<[f32; 2]>,
}

impl RangeMap {
    /// Width of the downsampled map.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Height of the downsampled map.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Downsampling factor relative to the full-resolution image.
    #[must_use]
    pub const fn down_factor(&self) -> usize {
        self.down_factor
    }

    /// The `(z_min, z_max)` interval at downsampled pixel `(u, v)`.
    #[must_use]
    pub fn get(&self, u: usize, v: usize) -> (f32, f32) {
        let [lo, hi] = self.data[v * self.width + u];
        (lo, hi)
    }

    /// The `(z_min, z_max)` interval covering full-resolution pixel
    /// `(x, y)`.
    #[must_use]
    pub fn bounds_for_pixel(&self, x: usize, y: usize) -> (f32, f32) {
        let u = (x / self.down_factor).min(self.width.saturating_sub(1));
        let v = (y / self.down_factor).min(self.height.saturating_sub(1));
        self.get(u, v)
    }
}

/// One 16×16 tile of a block's projected bounding rectangle.
#[derive(Debug, Clone, Copy, Default)]
struct Fragment {
    z_min: f32,
    z_max: f32,
    v_min: i32,
    u_min: i32,
    v_max: i32,
    u_max: i32,
}

/// Estimates per-pixel depth ranges by splatting the projected bounding
/// rectangles of all allocated blocks into a downsampled map.
///
/// Three passes: project the 8 corners of every block and cut the clipped
/// rectangle into 16×16 fragments; initialize the map to the inverted
/// interval `(depth_max, depth_min)`; accumulate each fragment pixel with
/// atomic float min/max (bit-pattern comparisons, valid because depth
/// values are non-negative).
///
/// Overflowing the fragment buffer drops the excess fragments and logs an
/// error; the resulting map is usable but may be missing blocks, and the
/// caller should retry with a larger [`RangeConfig::fragment_capacity`].
///
/// `pose` maps camera to world coordinates.
///
/// # Errors
///
/// Currently infallible for any well-formed grid; the `Result` keeps the
/// launch signature uniform across kernels.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
pub fn estimate_range<V: VoxelRecord>(
    grid: &BlockGrid<V>,
    intrinsics: &CameraIntrinsics,
    pose: &Matrix4<f32>,
    width: usize,
    height: usize,
    config: &RangeConfig,
) -> Result<RangeMap, KernelError> {
    let down_factor = config.down_factor.max(1);
    let w_down = width / down_factor;
    let h_down = height / down_factor;
    let block_size = grid.block_size();
    let w2c = FrameTransform::new(intrinsics, &invert_rigid(pose));

    // Pass 0: cut every block's projected rectangle into fragments.
    let mut fragments = vec![Fragment::default(); config.fragment_capacity];
    let frag_counter = AtomicUsize::new(0);
    {
        let frag_writer = SlotWriter::new(&mut fragments);

        grid.keys().par_iter().for_each(|key| {
            let mut u_min = w_down as i32 - 1;
            let mut v_min = h_down as i32 - 1;
            let mut u_max = 0_i32;
            let mut v_max = 0_i32;
            let mut z_min = config.depth_max;
            let mut z_max = config.depth_min;

            // Project the 8 block corners into the downsampled image
            for i in 0..8 {
                let xw = (key.x + i32::from(i & 1 > 0)) as f32 * block_size;
                let yw = (key.y + i32::from(i & 2 > 0)) as f32 * block_size;
                let zw = (key.z + i32::from(i & 4 > 0)) as f32 * block_size;

                let (xc, yc, zc) = w2c.rigid_transform(xw, yw, zw);
                if zc <= 0.0 {
                    continue;
                }
                let (u, v) = w2c.project(xc, yc, zc);
                let u = u / down_factor as f32;
                let v = v / down_factor as f32;

                v_min = v_min.min(v.floor() as i32);
                v_max = v_max.max(v.ceil() as i32);
                u_min = u_min.min(u.floor() as i32);
                u_max = u_max.max(u.ceil() as i32);
                z_min = z_min.min(zc);
                z_max = z_max.max(zc);
            }

            v_min = v_min.max(0);
            v_max = v_max.min(h_down as i32 - 1);
            u_min = u_min.max(0);
            u_max = u_max.min(w_down as i32 - 1);
            if v_min >= v_max || u_min >= u_max || z_min >= z_max {
                return;
            }

            let frag_v_count =
                ((v_max - v_min + 1) as f32 / FRAGMENT_SIZE as f32).ceil() as i32;
            let frag_u_count =
                ((u_max - u_min + 1) as f32 / FRAGMENT_SIZE as f32).ceil() as i32;

            for frag_v in 0..frag_v_count {
                for frag_u in 0..frag_u_count {
                    let idx = frag_counter.fetch_add(1, Ordering::Relaxed);
                    if idx >= frag_writer.len() {
                        continue;
                    }
                    let tile_v = v_min + frag_v * FRAGMENT_SIZE as i32;
                    let tile_u = u_min + frag_u * FRAGMENT_SIZE as i32;
                    let fragment = Fragment {
                        z_min,
                        z_max,
                        v_min: tile_v,
                        u_min: tile_u,
                        v_max: (tile_v + FRAGMENT_SIZE as i32 - 1).min(v_max),
                        u_max: (tile_u + FRAGMENT_SIZE as i32 - 1).min(u_max),
                    };
                    // SAFETY: idx is uniquely claimed and bounds-checked.
                    unsafe { frag_writer.write(idx, fragment) };
                }
            }
        });
    }

    let claimed = frag_counter.into_inner();
    let frag_count = claimed.min(config.fragment_capacity);
    if claimed > config.fragment_capacity {
        error!(
            claimed,
            capacity = config.fragment_capacity,
            "fragment buffer overflow; range map may be incomplete, retry with a larger capacity"
        );
    }

    // Pass 1: inverted initialization, so min/max accumulation shrinks
    // toward the true interval.
    let cells: Vec<[AtomicU32; 2]> = (0..w_down * h_down)
        .map(|_| {
            [
                AtomicU32::new(config.depth_max.to_bits()),
                AtomicU32::new(config.depth_min.to_bits()),
            ]
        })
        .collect();

    // Pass 2: accumulate fragment ranges per covered pixel.
    let tile_area = FRAGMENT_SIZE * FRAGMENT_SIZE;
    (0..frag_count * tile_area).into_par_iter().for_each(|workload_idx| {
        let fragment = &fragments[workload_idx / tile_area];
        let local = workload_idx % tile_area;
        let dv = (local / FRAGMENT_SIZE) as i32;
        let du = (local % FRAGMENT_SIZE) as i32;

        let v = fragment.v_min + dv;
        let u = fragment.u_min + du;
        if v > fragment.v_max || u > fragment.u_max {
            return;
        }

        let cell = &cells[v as usize * w_down + u as usize];
        // IEEE-754 ordering matches integer ordering for non-negative
        // floats, so bit-pattern min/max converge to the float extrema.
        cell[0].fetch_min(fragment.z_min.to_bits(), Ordering::Relaxed);
        cell[1].fetch_max(fragment.z_max.to_bits(), Ordering::Relaxed);
    });

    let data = cells
        .into_iter()
        .map(|[lo, hi]| {
            [
                f32::from_bits(lo.into_inner()),
                f32::from_bits(hi.into_inner()),
            ]
        })
        .collect();

    Ok(RangeMap {
        width: w_down,
        height: h_down,
        down_factor,
        data,
    })
}
