//! Shared voxel lookup and normal estimation helpers.
//!
//! Every kernel that walks across block boundaries does it through one of
//! two paths:
//!
//! - [`voxel_at`] resolves an offset of up to one block through the
//!   precomputed 27-entry neighbor table (extraction kernels);
//! - [`voxel_at_wrapped`] wraps the voxel coordinate modulo the resolution
//!   and steps to the adjacent block with a fresh hash probe (ray casting,
//!   which has no active list).
//!
//! Both agree on the wrap arithmetic, so the kernels cannot diverge on
//! which voxel a coordinate names.

use fusion_voxel::{ActiveBlocks, BlockGrid, BlockKey, VoxelRecord};

/// Resolves voxel offset `(xo, yo, zo)` relative to the active block at
/// `active_idx`, stepping into an adjacent block via the neighbor table if
/// the offset leaves `[0, R)` on any axis.
///
/// Supports offsets up to one block out on each axis. Returns `None` when
/// the neighbor block is not allocated.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub(crate) fn voxel_at<'a, V: VoxelRecord>(
    grid: &'a BlockGrid<V>,
    active: &ActiveBlocks,
    active_idx: usize,
    xo: i32,
    yo: i32,
    zo: i32,
) -> Option<&'a V> {
    let r = grid.resolution() as i32;
    let xn = (xo + r) % r;
    let yn = (yo + r) % r;
    let zn = (zo + r) % r;

    let dx = (xo - xn) / r;
    let dy = (yo - yn) / r;
    let dz = (zo - zn) / r;

    let addr = if dx == 0 && dy == 0 && dz == 0 {
        active.block_address(active_idx)
    } else {
        active.neighbor(active_idx, ActiveBlocks::nb_slot(dx, dy, dz))?
    };
    Some(grid.voxel(addr, xn as usize, yn as usize, zn as usize))
}

/// Resolves voxel offset `(xv, yv, zv)` relative to the block at
/// `(key, addr)`, wrapping modulo the resolution and probing the hash map
/// for the adjacent block when the offset leaves `[0, R)`.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub(crate) fn voxel_at_wrapped<'a, V: VoxelRecord>(
    grid: &'a BlockGrid<V>,
    key: BlockKey,
    addr: usize,
    xv: i32,
    yv: i32,
    zv: i32,
) -> Option<&'a V> {
    let r = grid.resolution() as i32;
    let xn = (xv + r) % r;
    let yn = (yv + r) % r;
    let zn = (zv + r) % r;

    let dx = (xv - xn) / r;
    let dy = (yv - yn) / r;
    let dz = (zv - zn) / r;

    let addr = if dx == 0 && dy == 0 && dz == 0 {
        addr
    } else {
        grid.find(key + BlockKey::new(dx, dy, dz))?
    };
    Some(grid.voxel(addr, xn as usize, yn as usize, zn as usize))
}

/// Looks up the voxel containing world point `(x, y, z)` with two probes:
/// block key by flooring against the block size, then the voxel offset
/// inside that block. Returns `None` when the block is unallocated.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub(crate) fn voxel_at_point<'a, V: VoxelRecord>(
    grid: &'a BlockGrid<V>,
    x: f32,
    y: f32,
    z: f32,
) -> Option<&'a V> {
    let block_size = grid.block_size();
    let key = BlockKey::containing(x, y, z, block_size);
    let addr = grid.find(key)?;

    let voxel_size = grid.voxel_size();
    let last = grid.resolution() - 1;
    let xv = (((x - key.x as f32 * block_size) / voxel_size) as usize).min(last);
    let yv = (((y - key.y as f32 * block_size) / voxel_size) as usize).min(last);
    let zv = (((z - key.z as f32 * block_size) / voxel_size) as usize).min(last);
    Some(grid.voxel(addr, xv, yv, zv))
}

/// Central-difference surface normal at voxel offset `(xo, yo, zo)` of an
/// active block: `n_dim = (tsdf(+1) - tsdf(-1)) / (2 * voxel_size)`.
///
/// An axis whose either neighbor is unallocated contributes zero.
pub(crate) fn normal_at<V: VoxelRecord>(
    grid: &BlockGrid<V>,
    active: &ActiveBlocks,
    active_idx: usize,
    xo: i32,
    yo: i32,
    zo: i32,
) -> [f32; 3] {
    let denom = 2.0 * grid.voxel_size();
    let mut n = [0.0_f32; 3];
    for dim in 0..3 {
        let step = [i32::from(dim == 0), i32::from(dim == 1), i32::from(dim == 2)];
        let plus = voxel_at(grid, active, active_idx, xo + step[0], yo + step[1], zo + step[2]);
        let minus = voxel_at(grid, active, active_idx, xo - step[0], yo - step[1], zo - step[2]);
        if let (Some(p), Some(m)) = (plus, minus) {
            n[dim] = (p.tsdf() - m.tsdf()) / denom;
        }
    }
    n
}

/// The trilinear corner weight for corner `k` of the unit cube at
/// fractional offset `(rx, ry, rz)`.
pub(crate) fn trilinear_weight(k: usize, rx: f32, ry: f32, rz: f32) -> f32 {
    let fx = if k & 1 > 0 { rx } else { 1.0 - rx };
    let fy = if k & 2 > 0 { ry } else { 1.0 - ry };
    let fz = if k & 4 > 0 { rz } else { 1.0 - rz };
    fx * fy * fz
}

/// Unit-cube corner offset for trilinear corner `k`.
pub(crate) const fn corner_offset(k: usize) -> (i32, i32, i32) {
    (
        (k & 1 != 0) as i32,
        (k & 2 != 0) as i32,
        (k & 4 != 0) as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use fusion_voxel::TsdfVoxel;

    fn grid_with_pair() -> (BlockGrid<TsdfVoxel>, ActiveBlocks) {
        let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(4, 0.1).unwrap();
        grid.allocate(BlockKey::new(0, 0, 0));
        grid.allocate(BlockKey::new(1, 0, 0));
        grid.voxel_mut(0, 3, 0, 0).tsdf = 0.25;
        grid.voxel_mut(1, 0, 0, 0).tsdf = -0.5;
        let active = ActiveBlocks::all(&grid);
        (grid, active)
    }

    #[test]
    fn in_block_lookup() {
        let (grid, active) = grid_with_pair();
        let v = voxel_at(&grid, &active, 0, 3, 0, 0).unwrap();
        assert_relative_eq!(v.tsdf, 0.25);
    }

    #[test]
    fn cross_block_lookup_wraps() {
        let (grid, active) = grid_with_pair();
        // Offset 4 in a resolution-4 block is voxel 0 of the +x neighbor
        let v = voxel_at(&grid, &active, 0, 4, 0, 0).unwrap();
        assert_relative_eq!(v.tsdf, -0.5);
    }

    #[test]
    fn missing_neighbor_is_none() {
        let (grid, active) = grid_with_pair();
        assert!(voxel_at(&grid, &active, 0, -1, 0, 0).is_none());
        assert!(voxel_at(&grid, &active, 1, 4, 0, 0).is_none());
    }

    #[test]
    fn wrapped_lookup_agrees_with_table_lookup() {
        let (grid, active) = grid_with_pair();
        let via_table = voxel_at(&grid, &active, 0, 4, 0, 0).unwrap();
        let via_probe = voxel_at_wrapped(&grid, BlockKey::new(0, 0, 0), 0, 4, 0, 0).unwrap();
        assert_relative_eq!(via_table.tsdf, via_probe.tsdf);
    }

    #[test]
    fn point_lookup_two_probe() {
        let (grid, _) = grid_with_pair();
        // Voxel (3,0,0) of block 0 spans [0.3, 0.4) on x
        let v = voxel_at_point(&grid, 0.35, 0.05, 0.05).unwrap();
        assert_relative_eq!(v.tsdf, 0.25);
        // Block (0,0,-1) unallocated
        assert!(voxel_at_point(&grid, 0.05, 0.05, -0.05).is_none());
    }

    #[test]
    fn trilinear_weights_partition_unity() {
        let (rx, ry, rz) = (0.3_f32, 0.7, 0.1);
        let total: f32 = (0..8).map(|k| trilinear_weight(k, rx, ry, rz)).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn normal_points_along_gradient() {
        let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(4, 0.1).unwrap();
        grid.allocate(BlockKey::new(0, 0, 0));
        // tsdf increases with x around (1,1,1)
        grid.voxel_mut(0, 0, 1, 1).tsdf = -0.2;
        grid.voxel_mut(0, 2, 1, 1).tsdf = 0.2;
        let active = ActiveBlocks::all(&grid);
        let n = normal_at(&grid, &active, 0, 1, 1, 1);
        assert_relative_eq!(n[0], 2.0, epsilon = 1e-5);
        assert_relative_eq!(n[1], 0.0);
        assert_relative_eq!(n[2], 0.0);
    }
}
