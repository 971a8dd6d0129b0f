//! End-to-end reconstruction scenarios across kernel boundaries.

use fusion_camera::{CameraIntrinsics, DepthImage};
use fusion_kernels::{
    estimate_range, extract_surface_mesh, extract_surface_points, integrate, ray_cast,
    ExtractConfig, IntegrateConfig, RangeConfig, RayCastConfig, RayCastRequest,
};
use fusion_voxel::{ActiveBlocks, BlockGrid, BlockKey, TsdfVoxel, VoxelRecord};
use nalgebra::Matrix4;

/// The 4x4 constant-depth frame used by the integration scenarios.
fn flat_frame() -> (DepthImage, CameraIntrinsics) {
    let depth = DepthImage::from_f32(4, 4, vec![0.5; 16]).unwrap();
    let intrinsics = CameraIntrinsics::new(2.0, 2.0, 2.0, 2.0, 4, 4);
    (depth, intrinsics)
}

fn integrate_config() -> IntegrateConfig {
    IntegrateConfig {
        depth_scale: 1.0,
        depth_max: 3.0,
        sdf_trunc: 0.04,
        max_weight: f32::MAX,
    }
}

/// Fills a grid with the TSDF of a sphere centered at the origin, sampled
/// at voxel lattice points, with unit weight everywhere.
fn sphere_volume(radius: f32, sdf_trunc: f32) -> BlockGrid<TsdfVoxel> {
    let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.02).unwrap();
    for bz in -1..1 {
        for by in -1..1 {
            for bx in -1..1 {
                grid.allocate(BlockKey::new(bx, by, bz));
            }
        }
    }
    for addr in 0..grid.block_count() {
        let key = grid.key(addr);
        for zv in 0..8 {
            for yv in 0..8 {
                for xv in 0..8 {
                    let x = (key.x * 8 + xv as i32) as f32 * 0.02;
                    let y = (key.y * 8 + yv as i32) as f32 * 0.02;
                    let z = (key.z * 8 + zv as i32) as f32 * 0.02;
                    let r = (x * x + y * y + z * z).sqrt();
                    let voxel = grid.voxel_mut(addr, xv, yv, zv);
                    voxel.tsdf = ((radius - r) / sdf_trunc).clamp(-1.0, 1.0);
                    voxel.weight = 1.0;
                }
            }
        }
    }
    grid
}

// Scenario A: integrating a single flat frame populates exactly the
// truncation band of the observed block.
#[test]
fn single_frame_populates_truncation_band() {
    let (depth, intrinsics) = flat_frame();
    let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
    // The 0.5 m surface band lives in the second block along z
    let addr = grid.allocate(BlockKey::new(0, 0, 1));
    integrate(
        &mut grid,
        &[addr],
        &depth,
        None,
        &intrinsics,
        &Matrix4::identity(),
        &integrate_config(),
    )
    .unwrap();

    let mut band_hits = 0;
    for zv in 0..8 {
        for yv in 0..8 {
            for xv in 0..8 {
                let voxel = grid.voxel(addr, xv, yv, zv);
                let zc = (8 + zv as i32) as f32 * 0.05;
                if zc > 0.54 {
                    assert_eq!(voxel.weight, 0.0, "voxel beyond the band at zc = {zc}");
                } else if voxel.weight > 0.0 {
                    assert_eq!(voxel.weight, 1.0);
                    assert!(voxel.tsdf >= -1.0 && voxel.tsdf <= 1.0);
                    if (zc - 0.5).abs() < 1e-4 {
                        assert!(voxel.tsdf.abs() < 1e-4, "surface voxel tsdf = {}", voxel.tsdf);
                        band_hits += 1;
                    }
                }
            }
        }
    }
    assert!(band_hits > 0, "no voxel landed on the surface");
}

// Scenario B: a planar TSDF meshes into a flat quadrilateral patch.
#[test]
fn planar_tsdf_meshes_flat() {
    let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
    let addr = grid.allocate(BlockKey::origin());
    for zv in 0..8 {
        for yv in 0..8 {
            for xv in 0..8 {
                let zw = zv as f32 * 0.05;
                let voxel = grid.voxel_mut(addr, xv, yv, zv);
                voxel.tsdf = if zw < 0.1 { 1.0 } else { -1.0 };
                voxel.weight = 1.0;
            }
        }
    }

    let active = ActiveBlocks::all(&grid);
    let config = ExtractConfig {
        weight_threshold: 0.0,
        estimated_point_count: None,
    };
    let mesh = extract_surface_mesh(&grid, &active, &config).unwrap();

    assert!(mesh.triangle_count() >= 2);
    for vertex in &mesh.vertices {
        assert!(
            (vertex.z - 0.1).abs() <= 0.05,
            "vertex z = {} off the plane",
            vertex.z
        );
    }
}

// Scenario C: every extracted sphere point lies within one voxel of the
// sphere surface.
#[test]
fn sphere_points_lie_on_the_sphere() {
    let grid = sphere_volume(0.2, 0.08);
    let active = ActiveBlocks::all(&grid);
    let config = ExtractConfig {
        weight_threshold: 0.0,
        estimated_point_count: None,
    };
    let cloud = extract_surface_points(&grid, &active, &config).unwrap();

    assert!(!cloud.is_empty());
    for p in &cloud.points {
        let r = (p.x * p.x + p.y * p.y + p.z * p.z).sqrt();
        assert!((r - 0.2).abs() < 0.02, "point at radius {r}");
    }
}

// Scenario D: ray casting the integrated volume reproduces the input depth
// where the surface was observed, inside the estimated range bounds.
#[test]
fn ray_cast_agrees_with_integration() {
    let (depth, intrinsics) = flat_frame();
    let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
    let active = grid.touch(&depth, &intrinsics, &Matrix4::identity(), 1.0, 3.0, 0.04);
    integrate(
        &mut grid,
        &active,
        &depth,
        None,
        &intrinsics,
        &Matrix4::identity(),
        &integrate_config(),
    )
    .unwrap();

    let range = estimate_range(
        &grid,
        &intrinsics,
        &Matrix4::identity(),
        4,
        4,
        &RangeConfig {
            down_factor: 2,
            depth_min: 0.1,
            depth_max: 3.0,
            fragment_capacity: 65535,
        },
    )
    .unwrap();

    let config = RayCastConfig {
        depth_scale: 1.0,
        depth_min: 0.1,
        depth_max: 3.0,
        sdf_trunc: 0.04,
        max_steps: 200,
        weight_threshold: 0.5,
    };
    let maps = ray_cast(
        &grid,
        &intrinsics,
        &Matrix4::identity(),
        4,
        4,
        &RayCastRequest::default(),
        Some(&range),
        &config,
    )
    .unwrap();

    let rendered = maps.depth.as_ref().unwrap();
    let mut hits = 0;
    for y in 0..4 {
        for x in 0..4 {
            let d = rendered[maps.index(x, y)];
            if d > 0.0 {
                hits += 1;
                assert!((d - 0.5).abs() < 0.05, "pixel ({x},{y}) depth {d}");

                let (z_min, z_max) = range.bounds_for_pixel(x, y);
                assert!(
                    d >= z_min - 1e-5 && d <= z_max + 1e-5,
                    "depth {d} outside range [{z_min}, {z_max}]"
                );
            }
        }
    }
    assert!(hits > 0, "no ray found the integrated surface");
}

// Scenario E: a plane spanning a block boundary meshes without seams.
#[test]
fn mesh_is_seamless_across_block_boundaries() {
    let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
    for key in [BlockKey::new(0, 0, 0), BlockKey::new(1, 0, 0)] {
        let addr = grid.allocate(key);
        for zv in 0..8 {
            for yv in 0..8 {
                for xv in 0..8 {
                    let zw = zv as f32 * 0.05;
                    let voxel = grid.voxel_mut(addr, xv, yv, zv);
                    voxel.tsdf = if zw < 0.12 { 1.0 } else { -1.0 };
                    voxel.weight = 1.0;
                }
            }
        }
    }

    let active = ActiveBlocks::all(&grid);
    let config = ExtractConfig {
        weight_threshold: 0.0,
        estimated_point_count: None,
    };
    let mesh = extract_surface_mesh(&grid, &active, &config).unwrap();
    assert!(mesh.triangle_count() > 0);

    // Triangles exist on both sides of the x = 0.4 boundary and share the
    // seam vertices instead of duplicating them.
    let mut left = 0;
    let mut right = 0;
    let mut seam_vertices = 0;
    for tri in &mesh.triangles {
        let cx = tri
            .iter()
            .map(|&v| mesh.vertices[v as usize].x)
            .sum::<f32>()
            / 3.0;
        if cx < 0.4 {
            left += 1;
        } else {
            right += 1;
        }
    }
    for v in &mesh.vertices {
        if (v.x - 0.35).abs() < 1e-5 {
            seam_vertices += 1;
        }
    }
    assert!(left > 0 && right > 0, "mesh did not cross the boundary");
    assert!(seam_vertices > 0);

    // Every vertex id referenced by a triangle is valid
    let vcount = mesh.vertex_count() as u32;
    for tri in &mesh.triangles {
        assert!(tri.iter().all(|&v| v < vcount));
    }
}

// Scenario F: rays through unallocated space terminate with zeroed output.
#[test]
fn empty_space_skip_terminates() {
    let grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
    let intrinsics = CameraIntrinsics::new(50.0, 50.0, 16.0, 16.0, 32, 32);

    let range = estimate_range(
        &grid,
        &intrinsics,
        &Matrix4::identity(),
        32,
        32,
        &RangeConfig::default(),
    )
    .unwrap();

    let maps = ray_cast(
        &grid,
        &intrinsics,
        &Matrix4::identity(),
        32,
        32,
        &RayCastRequest::default(),
        Some(&range),
        &RayCastConfig::default(),
    )
    .unwrap();

    assert!(maps.depth.as_ref().unwrap().iter().all(|&d| d == 0.0));
    assert!(maps
        .vertex
        .as_ref()
        .unwrap()
        .iter()
        .all(|v| v.x == 0.0 && v.y == 0.0 && v.z == 0.0));
}

// Colored records run the same pipeline end to end.
#[test]
fn colored_pipeline_round_trip() {
    use fusion_camera::ColorImage;
    use fusion_voxel::ColoredTsdfVoxel;

    // 0.52 m sits between voxel planes, so the TSDF strictly changes sign
    let depth = DepthImage::from_f32(4, 4, vec![0.52; 16]).unwrap();
    let intrinsics = CameraIntrinsics::new(2.0, 2.0, 2.0, 2.0, 4, 4);
    let color = ColorImage::new(4, 4, vec![128.0; 4 * 4 * 3]).unwrap();
    let mut grid: BlockGrid<ColoredTsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
    let active = grid.touch(&depth, &intrinsics, &Matrix4::identity(), 1.0, 3.0, 0.04);
    integrate(
        &mut grid,
        &active,
        &depth,
        Some(&color),
        &intrinsics,
        &Matrix4::identity(),
        &integrate_config(),
    )
    .unwrap();

    assert!(ColoredTsdfVoxel::HAS_COLOR);
    let active = ActiveBlocks::all(&grid);
    let cloud = extract_surface_points(
        &grid,
        &active,
        &ExtractConfig {
            weight_threshold: 0.5,
            estimated_point_count: None,
        },
    )
    .unwrap();

    assert!(!cloud.is_empty());
    let colors = cloud.colors.as_ref().unwrap();
    assert_eq!(colors.len(), cloud.len());
    for rgb in colors {
        // 128/255 everywhere the surface was observed
        for channel in rgb {
            assert!((channel - 128.0 / 255.0).abs() < 1e-3);
        }
    }
}
