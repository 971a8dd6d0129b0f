//! Block-aware Marching Cubes surface mesh extraction.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use fusion_voxel::{ActiveBlocks, BlockGrid, VoxelRecord};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::info;

use crate::config::ExtractConfig;
use crate::error::KernelError;
use crate::sample::{normal_at, voxel_at};
use crate::slots::SlotWriter;
use crate::tables::{EDGE_SHIFTS, EDGE_TABLE, TRI_COUNT, TRI_TABLE, VTX_SHIFTS};

/// An indexed triangle mesh extracted from the TSDF zero level set.
///
/// Faces use counter-clockwise winding viewed from outside the surface.
#[derive(Debug, Clone, Default)]
pub struct SurfaceMesh {
    /// Vertex positions in meters.
    pub vertices: Vec<Point3<f32>>,
    /// Triangles as vertex indices.
    pub triangles: Vec<[u32; 3]>,
    /// Unit vertex normals.
    pub normals: Vec<Vector3<f32>>,
    /// Linear RGB in `[0, 1]` per vertex; present iff the voxel record
    /// stores color.
    pub colors: Option<Vec<[f32; 3]>>,
}

impl SurfaceMesh {
    /// Number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }
}

/// Per-voxel mesh scratch: one vertex slot per owned edge (x, y, z) plus
/// the cube configuration index.
///
/// Edge slots hold 0 (no vertex), -1 (vertex pending) or an assigned vertex
/// id. The pending marks race across blocks in pass 0, but every writer
/// stores the same -1, so relaxed atomics are all that is needed.
struct MeshScratch {
    fields: Vec<[AtomicI32; 4]>,
}

impl MeshScratch {
    fn new(voxel_count: usize, blocks: usize, voxel_size: f32) -> Result<Self, KernelError> {
        let mut fields = Vec::new();
        fields
            .try_reserve_exact(voxel_count)
            .map_err(|_| KernelError::MeshScratchAllocation { blocks, voxel_size })?;
        fields.resize_with(voxel_count, || {
            [
                AtomicI32::new(0),
                AtomicI32::new(0),
                AtomicI32::new(0),
                AtomicI32::new(0),
            ]
        });
        Ok(Self { fields })
    }

    fn edge(&self, voxel: usize, axis: usize) -> &AtomicI32 {
        &self.fields[voxel][axis]
    }

    fn table_idx(&self, voxel: usize) -> usize {
        #[allow(clippy::cast_sign_loss)]
        {
            self.fields[voxel][3].load(Ordering::Relaxed) as usize
        }
    }
}

/// Locates the voxel owning `edge` of the cube anchored at active voxel
/// `(active_idx, xv, yv, zv)`, stepping into the neighbor block when the
/// owner lies across the boundary. Returns the owner's scratch index and
/// the scratch field axis.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn edge_owner(
    active: &ActiveBlocks,
    resolution: usize,
    active_idx: usize,
    xv: usize,
    yv: usize,
    zv: usize,
    edge: usize,
) -> Option<(usize, usize)> {
    let r = resolution as i32;
    let xe = xv as i32 + EDGE_SHIFTS[edge][0];
    let ye = yv as i32 + EDGE_SHIFTS[edge][1];
    let ze = zv as i32 + EDGE_SHIFTS[edge][2];
    let axis = EDGE_SHIFTS[edge][3] as usize;

    let dxb = xe / r;
    let dyb = ye / r;
    let dzb = ze / r;

    let owner_active = if dxb == 0 && dyb == 0 && dzb == 0 {
        active_idx
    } else {
        let nb_addr = active.neighbor(active_idx, ActiveBlocks::nb_slot(dxb, dyb, dzb))?;
        active.active_of(nb_addr)?
    };

    let r3 = resolution * resolution * resolution;
    let linear = (xe - dxb * r) as usize
        + resolution * (ye - dyb * r) as usize
        + resolution * resolution * (ze - dzb * r) as usize;
    Some((owner_active * r3 + linear, axis))
}

/// Extracts a triangle mesh from the TSDF with block-aware Marching Cubes.
///
/// Four passes over a shared per-voxel scratch structure:
///
/// 0. classify each cube against [`EDGE_TABLE`] and mark every crossed
///    edge's owner slot pending;
/// 1. count pending slots to size the vertex buffers;
/// 2. claim vertex ids, interpolate positions/normals/colors along each
///    owned edge;
/// 3. walk [`TRI_TABLE`] per cube and connect the stored vertex ids into
///    triangles, reversing the listed order for outward-facing winding.
///
/// Cubes whose corners are incomplete (unallocated neighbor, weight at or
/// below the threshold) are skipped entirely, so partial observations never
/// produce geometry.
///
/// # Errors
///
/// Returns [`KernelError::MeshScratchAllocation`] when the scratch
/// structure (16 bytes per active voxel) cannot be reserved; retry with a
/// larger voxel size or fewer active blocks.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::too_many_lines
)]
pub fn extract_surface_mesh<V: VoxelRecord>(
    grid: &BlockGrid<V>,
    active: &ActiveBlocks,
    config: &ExtractConfig,
) -> Result<SurfaceMesh, KernelError> {
    let resolution = grid.resolution();
    let resolution3 = grid.indexer().voxel_count();
    let indexer = grid.indexer();
    let voxel_size = grid.voxel_size();
    let n = active.len() * resolution3;
    let weight_threshold = config.weight_threshold;

    let scratch = MeshScratch::new(n, active.len(), voxel_size)?;

    // Pass 0: classify cubes, mark crossed edges pending on their owners.
    (0..n).into_par_iter().for_each(|workload_idx| {
        let active_idx = workload_idx / resolution3;
        let (xv, yv, zv) = indexer.coord(workload_idx % resolution3);

        let mut table_idx = 0_usize;
        for (corner, shift) in VTX_SHIFTS.iter().enumerate() {
            #[allow(clippy::cast_possible_wrap)]
            let voxel = voxel_at(
                grid,
                active,
                active_idx,
                xv as i32 + shift[0],
                yv as i32 + shift[1],
                zv as i32 + shift[2],
            );
            let Some(voxel) = voxel else { return };
            if voxel.weight() <= weight_threshold {
                return;
            }
            if voxel.tsdf() < 0.0 {
                table_idx |= 1 << corner;
            }
        }

        #[allow(clippy::cast_possible_wrap)]
        scratch.fields[workload_idx][3].store(table_idx as i32, Ordering::Relaxed);
        if table_idx == 0 || table_idx == 255 {
            return;
        }

        let edges = EDGE_TABLE[table_idx];
        for edge in 0..12 {
            if edges & (1 << edge) == 0 {
                continue;
            }
            if let Some((owner, axis)) =
                edge_owner(active, resolution, active_idx, xv, yv, zv, edge)
            {
                scratch.edge(owner, axis).store(-1, Ordering::Relaxed);
            }
        }
    });

    // Pass 1: size the vertex buffers.
    let vertex_count = AtomicUsize::new(0);
    (0..n).into_par_iter().for_each(|workload_idx| {
        let pending = (0..3)
            .filter(|&axis| scratch.edge(workload_idx, axis).load(Ordering::Relaxed) == -1)
            .count();
        if pending > 0 {
            vertex_count.fetch_add(pending, Ordering::Relaxed);
        }
    });
    let total_vertices = vertex_count.into_inner();
    info!(count = total_vertices, "mesh vertices counted");

    let mut vertices = vec![Point3::origin(); total_vertices];
    let mut normals = vec![Vector3::zeros(); total_vertices];
    let mut colors = if V::HAS_COLOR {
        vec![[0.0_f32; 3]; total_vertices]
    } else {
        Vec::new()
    };

    // Pass 2: claim vertex ids and interpolate along each owned edge.
    let claimed = AtomicUsize::new(0);
    {
        let vertex_writer = SlotWriter::new(&mut vertices);
        let normal_writer = SlotWriter::new(&mut normals);
        let color_writer = SlotWriter::new(&mut colors);

        (0..n).into_par_iter().for_each(|workload_idx| {
            let pending: Vec<usize> = (0..3)
                .filter(|&axis| scratch.edge(workload_idx, axis).load(Ordering::Relaxed) == -1)
                .collect();
            if pending.is_empty() {
                return;
            }

            let active_idx = workload_idx / resolution3;
            let addr = active.block_address(active_idx);
            let key = grid.key(addr);
            let (xv, yv, zv) = indexer.coord(workload_idx % resolution3);
            #[allow(clippy::cast_possible_wrap)]
            let (xo, yo, zo) = (xv as i32, yv as i32, zv as i32);

            let voxel = grid.voxel(addr, xv, yv, zv);
            let tsdf_o = voxel.tsdf();
            let no = normal_at(grid, active, active_idx, xo, yo, zo);

            #[allow(clippy::cast_possible_wrap)]
            let x = (key.x * resolution as i32 + xo) as f32;
            #[allow(clippy::cast_possible_wrap)]
            let y = (key.y * resolution as i32 + yo) as f32;
            #[allow(clippy::cast_possible_wrap)]
            let z = (key.z * resolution as i32 + zo) as f32;

            for axis in pending {
                let step = (
                    i32::from(axis == 0),
                    i32::from(axis == 1),
                    i32::from(axis == 2),
                );
                let endpoint =
                    voxel_at(grid, active, active_idx, xo + step.0, yo + step.1, zo + step.2);
                let Some(endpoint) = endpoint else { continue };
                let ratio = -tsdf_o / (endpoint.tsdf() - tsdf_o);

                let idx = claimed.fetch_add(1, Ordering::Relaxed);
                #[allow(clippy::cast_possible_wrap)]
                scratch.edge(workload_idx, axis).store(idx as i32, Ordering::Relaxed);

                let position = Point3::new(
                    voxel_size * (x + ratio * step.0 as f32),
                    voxel_size * (y + ratio * step.1 as f32),
                    voxel_size * (z + ratio * step.2 as f32),
                );
                // SAFETY: idx is uniquely claimed; pass 1 sized the buffer
                // to the exact pending-slot count.
                unsafe { vertex_writer.write(idx, position) };

                let ne = normal_at(
                    grid,
                    active,
                    active_idx,
                    xo + step.0,
                    yo + step.1,
                    zo + step.2,
                );
                let nx = (1.0 - ratio) * no[0] + ratio * ne[0];
                let ny = (1.0 - ratio) * no[1] + ratio * ne[1];
                let nz = (1.0 - ratio) * no[2] + ratio * ne[2];
                let norm = (nx * nx + ny * ny + nz * nz).sqrt() + 1e-5;
                // SAFETY: same unique idx.
                unsafe {
                    normal_writer.write(idx, Vector3::new(nx / norm, ny / norm, nz / norm));
                }

                if V::HAS_COLOR {
                    let co = voxel.color();
                    let ce = endpoint.color();
                    let rgb = [
                        ((1.0 - ratio) * co[0] + ratio * ce[0]) / 255.0,
                        ((1.0 - ratio) * co[1] + ratio * ce[1]) / 255.0,
                        ((1.0 - ratio) * co[2] + ratio * ce[2]) / 255.0,
                    ];
                    // SAFETY: same unique idx.
                    unsafe { color_writer.write(idx, rgb) };
                }
            }
        });
    }

    // Pass 3: connect vertex ids into triangles.
    let mut triangles = vec![[0_u32; 3]; total_vertices * 3];
    let triangle_count = AtomicUsize::new(0);
    {
        let triangle_writer = SlotWriter::new(&mut triangles);

        (0..n).into_par_iter().for_each(|workload_idx| {
            let table_idx = scratch.table_idx(workload_idx);
            if TRI_COUNT[table_idx] == 0 {
                return;
            }

            let active_idx = workload_idx / resolution3;
            let (xv, yv, zv) = indexer.coord(workload_idx % resolution3);

            for tri in TRI_TABLE[table_idx].chunks_exact(3) {
                if tri[0] == -1 {
                    return;
                }

                let mut ids = [0_u32; 3];
                let mut complete = true;
                for (vertex, &edge) in tri.iter().enumerate() {
                    #[allow(clippy::cast_sign_loss)]
                    let owner = edge_owner(
                        active,
                        resolution,
                        active_idx,
                        xv,
                        yv,
                        zv,
                        edge as usize,
                    );
                    let vid = owner
                        .map(|(voxel, axis)| scratch.edge(voxel, axis).load(Ordering::Relaxed));
                    match vid {
                        #[allow(clippy::cast_sign_loss)]
                        Some(vid) if vid >= 0 => ids[2 - vertex] = vid as u32,
                        _ => {
                            complete = false;
                            break;
                        }
                    }
                }
                if !complete {
                    continue;
                }

                let idx = triangle_count.fetch_add(1, Ordering::Relaxed);
                if idx < triangle_writer.len() {
                    // SAFETY: idx is uniquely claimed and bounds-checked.
                    unsafe { triangle_writer.write(idx, ids) };
                }
            }
        });
    }

    let total_triangles = triangle_count.into_inner().min(triangles.len());
    triangles.truncate(total_triangles);
    info!(count = total_triangles, "mesh triangles connected");

    Ok(SurfaceMesh {
        vertices,
        triangles,
        normals,
        colors: V::HAS_COLOR.then_some(colors),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_voxel::{BlockKey, TsdfVoxel};
    use std::collections::HashMap;

    fn record_edge(counts: &mut HashMap<(u32, u32), usize>, a: u32, b: u32) {
        let key = if a < b { (a, b) } else { (b, a) };
        *counts.entry(key).or_insert(0) += 1;
    }

    fn fill_plane(grid: &mut BlockGrid<TsdfVoxel>, addr: usize, plane_z: f32) {
        let key = grid.key(addr);
        let s = grid.voxel_size();
        let r = grid.resolution();
        for zv in 0..r {
            for yv in 0..r {
                for xv in 0..r {
                    let zw = (key.z * r as i32 + zv as i32) as f32 * s;
                    let voxel = grid.voxel_mut(addr, xv, yv, zv);
                    voxel.tsdf = if zw < plane_z { 1.0 } else { -1.0 };
                    voxel.weight = 1.0;
                }
            }
        }
    }

    fn extract(grid: &BlockGrid<TsdfVoxel>) -> SurfaceMesh {
        let active = ActiveBlocks::all(grid);
        let config = ExtractConfig {
            weight_threshold: 0.0,
            estimated_point_count: None,
        };
        extract_surface_mesh(grid, &active, &config).unwrap()
    }

    #[test]
    fn planar_surface_produces_planar_quad_mesh() {
        let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
        let addr = grid.allocate(BlockKey::origin());
        fill_plane(&mut grid, addr, 0.1);

        let mesh = extract(&grid);
        assert!(mesh.triangle_count() >= 2);
        for vertex in &mesh.vertices {
            assert!(
                (vertex.z - 0.1).abs() <= 0.05 + 1e-6,
                "vertex off the plane: {vertex:?}"
            );
        }
    }

    #[test]
    fn triangles_reference_valid_vertices() {
        let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
        let addr = grid.allocate(BlockKey::origin());
        fill_plane(&mut grid, addr, 0.1);

        let mesh = extract(&grid);
        let vcount = u32::try_from(mesh.vertex_count()).unwrap();
        for tri in &mesh.triangles {
            for &vid in tri {
                assert!(vid < vcount);
            }
        }
        assert_eq!(mesh.normals.len(), mesh.vertex_count());
    }

    #[test]
    fn plane_across_block_boundary_is_seamless() {
        let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
        for key in [
            BlockKey::new(0, 0, 0),
            BlockKey::new(1, 0, 0),
            BlockKey::new(0, 1, 0),
            BlockKey::new(1, 1, 0),
        ] {
            let addr = grid.allocate(key);
            fill_plane(&mut grid, addr, 0.1);
        }

        let mesh = extract(&grid);
        assert!(mesh.triangle_count() > 0);

        // No duplicated vertices at the boundary
        let mut seen = std::collections::HashSet::new();
        for v in &mesh.vertices {
            let quantized = (
                (v.x * 1e4).round() as i64,
                (v.y * 1e4).round() as i64,
                (v.z * 1e4).round() as i64,
            );
            assert!(seen.insert(quantized), "duplicate vertex at {v:?}");
        }

        // Interior edges referenced exactly twice: no cracks along the seam
        let mut edges = HashMap::new();
        for tri in &mesh.triangles {
            record_edge(&mut edges, tri[0], tri[1]);
            record_edge(&mut edges, tri[1], tri[2]);
            record_edge(&mut edges, tri[2], tri[0]);
        }
        let boundary = edges.values().filter(|&&c| c == 1).count();
        let interior = edges.values().filter(|&&c| c == 2).count();
        assert!(interior > 0);
        // An open planar patch has a single rectangular rim
        assert!(boundary < mesh.triangle_count() * 3 / 2);
    }

    #[test]
    fn empty_grid_produces_empty_mesh() {
        let grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
        let mesh = extract(&grid);
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.triangle_count(), 0);
    }

    #[test]
    fn winding_faces_away_from_negative_side() {
        let mut grid: BlockGrid<TsdfVoxel> = BlockGrid::new(8, 0.05).unwrap();
        let addr = grid.allocate(BlockKey::origin());
        fill_plane(&mut grid, addr, 0.1);

        let mesh = extract(&grid);
        // Outside (positive tsdf) is below the plane, so faces wind to
        // point their geometric normal along -z.
        for tri in &mesh.triangles {
            let a = mesh.vertices[tri[0] as usize];
            let b = mesh.vertices[tri[1] as usize];
            let c = mesh.vertices[tri[2] as usize];
            let n = (b - a).cross(&(c - a));
            assert!(n.z < 0.0, "face normal flipped: {n:?}");
        }
    }
}
