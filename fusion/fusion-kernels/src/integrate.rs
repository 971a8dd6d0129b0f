//! TSDF integration of posed RGB-D frames.

use fusion_camera::{CameraIntrinsics, ColorImage, DepthImage, FrameTransform, Matrix4};
use fusion_voxel::{BlockGrid, VoxelRecord};
use rayon::prelude::*;

use crate::config::IntegrateConfig;
use crate::error::KernelError;

/// Fuses a depth frame (and optionally a registered color frame) into the
/// TSDF volume.
///
/// One task per voxel of each active block. Each voxel is projected into
/// the camera; voxels that land on a valid depth sample within the
/// truncation band fold the observation into their record with a weighted
/// running average. Projection failures of any kind skip the voxel without
/// diagnostics.
///
/// `active` lists the block addresses touched by this frame (usually the
/// return value of [`BlockGrid::touch`]); `extrinsics` maps world to camera
/// coordinates. Blocks are partitioned across tasks, so every voxel has
/// exactly one writer and no synchronization is needed on the records.
///
/// # Errors
///
/// Returns [`KernelError::ImageSizeMismatch`] if the depth or color buffer
/// does not match the intrinsics' dimensions.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn integrate<V: VoxelRecord>(
    grid: &mut BlockGrid<V>,
    active: &[usize],
    depth: &DepthImage,
    color: Option<&ColorImage>,
    intrinsics: &CameraIntrinsics,
    extrinsics: &Matrix4<f32>,
    config: &IntegrateConfig,
) -> Result<(), KernelError> {
    if depth.width() != intrinsics.width || depth.height() != intrinsics.height {
        return Err(KernelError::ImageSizeMismatch {
            width: intrinsics.width,
            height: intrinsics.height,
            actual_width: depth.width(),
            actual_height: depth.height(),
        });
    }
    if let Some(color) = color {
        if color.width() != intrinsics.width || color.height() != intrinsics.height {
            return Err(KernelError::ImageSizeMismatch {
                width: intrinsics.width,
                height: intrinsics.height,
                actual_width: color.width(),
                actual_height: color.height(),
            });
        }
    }

    // Voxel-grid coordinates go straight to metric camera space.
    let transform = FrameTransform::with_scale(intrinsics, extrinsics, grid.voxel_size());
    let resolution = grid.resolution();
    let indexer = grid.indexer();

    let mut is_active = vec![false; grid.block_count()];
    for &addr in active {
        is_active[addr] = true;
    }

    grid.par_blocks_mut()
        .filter(|(addr, _, _)| is_active[*addr])
        .for_each(|(_, key, block)| {
            for (voxel_idx, voxel) in block.iter_mut().enumerate() {
                let (xv, yv, zv) = indexer.coord(voxel_idx);

                // World coordinate in voxel units
                let x = (key.x * resolution as i32) as f32 + xv as f32;
                let y = (key.y * resolution as i32) as f32 + yv as f32;
                let z = (key.z * resolution as i32) as f32 + zv as f32;

                let (xc, yc, zc) = transform.rigid_transform(x, y, z);
                let (u, v) = transform.project(xc, yc, zc);
                if !depth.contains(u, v) {
                    continue;
                }

                let d = depth.sample(u, v) / config.depth_scale;
                let sdf = d - zc;
                if d <= 0.0 || d > config.depth_max || zc <= 0.0 || sdf < -config.sdf_trunc {
                    continue;
                }
                let sdf = sdf.min(config.sdf_trunc) / config.sdf_trunc;

                if let Some(color) = color {
                    voxel.integrate_colored(sdf, color.sample(u, v), config.max_weight);
                } else {
                    voxel.integrate(sdf, config.max_weight);
                }
            }
        });

    Ok(())
}
