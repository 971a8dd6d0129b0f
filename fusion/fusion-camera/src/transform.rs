//! Rigid transform + projection indexer.

use nalgebra::{Matrix3, Matrix4, Vector3};

use crate::intrinsics::CameraIntrinsics;

/// A combined rigid transform and pinhole projection.
///
/// This is the single arithmetic helper shared by every fusion kernel: it
/// carries the linear and translational parts of a 4×4 extrinsic matrix
/// together with the camera intrinsics, plus an optional uniform scale that
/// converts voxel units to meters before the rigid part is applied.
///
/// Keeping one indexer per (intrinsics, extrinsics) pair means all kernels
/// agree on the projection conventions; a kernel never composes matrices on
/// its own.
///
/// # Example
///
/// ```
/// use fusion_camera::{CameraIntrinsics, FrameTransform};
/// use nalgebra::Matrix4;
///
/// let intr = CameraIntrinsics::new(2.0, 2.0, 2.0, 2.0, 4, 4);
/// // Voxel units: 0.05 m per voxel
/// let t = FrameTransform::with_scale(&intr, &Matrix4::identity(), 0.05);
///
/// let (xc, yc, zc) = t.rigid_transform(10.0, 0.0, 10.0);
/// assert!((xc - 0.5).abs() < 1e-6);
/// assert!((zc - 0.5).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FrameTransform {
    rotation: Matrix3<f32>,
    translation: Vector3<f32>,
    intrinsics: CameraIntrinsics,
    scale: f32,
}

impl FrameTransform {
    /// Creates a transform indexer from intrinsics and a 4×4 extrinsic
    /// matrix (world → camera), with no unit scale.
    #[must_use]
    pub fn new(intrinsics: &CameraIntrinsics, extrinsics: &Matrix4<f32>) -> Self {
        Self::with_scale(intrinsics, extrinsics, 1.0)
    }

    /// Creates a transform indexer whose input coordinates are multiplied by
    /// `scale` before the rigid part is applied.
    ///
    /// Integration uses this with `scale = voxel_size` so that voxel-grid
    /// coordinates transform directly into metric camera space.
    #[must_use]
    pub fn with_scale(
        intrinsics: &CameraIntrinsics,
        extrinsics: &Matrix4<f32>,
        scale: f32,
    ) -> Self {
        Self {
            rotation: extrinsics.fixed_view::<3, 3>(0, 0).into_owned(),
            translation: extrinsics.fixed_view::<3, 1>(0, 3).into_owned(),
            intrinsics: *intrinsics,
            scale,
        }
    }

    /// Applies the full rigid transform: `R * (scale * p) + t`.
    #[must_use]
    pub fn rigid_transform(&self, x: f32, y: f32, z: f32) -> (f32, f32, f32) {
        let p = self.rotation * (Vector3::new(x, y, z) * self.scale) + self.translation;
        (p.x, p.y, p.z)
    }

    /// Applies only the rotational part, without scale or translation.
    ///
    /// Used to carry directions (ray directions, normals) across frames.
    #[must_use]
    pub fn rotate(&self, x: f32, y: f32, z: f32) -> (f32, f32, f32) {
        let p = self.rotation * Vector3::new(x, y, z);
        (p.x, p.y, p.z)
    }

    /// Projects a camera-space point to pixel coordinates.
    #[must_use]
    pub fn project(&self, x: f32, y: f32, z: f32) -> (f32, f32) {
        self.intrinsics.project(x, y, z)
    }

    /// Unprojects a pixel at depth `z` to a camera-space point.
    #[must_use]
    pub fn unproject(&self, u: f32, v: f32, z: f32) -> (f32, f32, f32) {
        self.intrinsics.unproject(u, v, z)
    }

    /// Returns the intrinsics this indexer was built with.
    #[must_use]
    pub const fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }
}

/// Inverts a rigid 4×4 transform exactly: `[R | t]⁻¹ = [Rᵀ | −Rᵀ t]`.
///
/// Cheaper and numerically tighter than a general matrix inverse, and the
/// extrinsic/pose matrices the kernels consume are rigid by construction.
#[must_use]
pub fn invert_rigid(m: &Matrix4<f32>) -> Matrix4<f32> {
    let r = m.fixed_view::<3, 3>(0, 0).transpose();
    let t = -r * m.fixed_view::<3, 1>(0, 3);
    let mut out = Matrix4::identity();
    out.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
    out.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn test_extrinsics() -> Matrix4<f32> {
        let rot = Rotation3::from_euler_angles(0.1, -0.2, 0.3);
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(rot.matrix());
        m[(0, 3)] = 0.5;
        m[(1, 3)] = -0.25;
        m[(2, 3)] = 1.0;
        m
    }

    #[test]
    fn identity_transform_is_identity() {
        let intr = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        let t = FrameTransform::new(&intr, &Matrix4::identity());
        let (x, y, z) = t.rigid_transform(1.0, 2.0, 3.0);
        assert_relative_eq!(x, 1.0);
        assert_relative_eq!(y, 2.0);
        assert_relative_eq!(z, 3.0);
    }

    #[test]
    fn scale_applied_before_rigid_part() {
        let intr = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        let mut ext = Matrix4::identity();
        ext[(2, 3)] = 1.0;
        let t = FrameTransform::with_scale(&intr, &ext, 0.1);
        let (_, _, z) = t.rigid_transform(0.0, 0.0, 5.0);
        // 5 voxels * 0.1 m + 1 m offset
        assert_relative_eq!(z, 1.5);
    }

    #[test]
    fn rotate_ignores_translation() {
        let intr = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        let t = FrameTransform::new(&intr, &test_extrinsics());
        let (x, y, z) = t.rotate(0.0, 0.0, 0.0);
        assert_relative_eq!(x, 0.0);
        assert_relative_eq!(y, 0.0);
        assert_relative_eq!(z, 0.0);
    }

    #[test]
    fn invert_rigid_round_trip() {
        let ext = test_extrinsics();
        let inv = invert_rigid(&ext);
        let prod = ext * inv;
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(prod[(i, j)], expected, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn rigid_then_inverse_returns_point() {
        let intr = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        let ext = test_extrinsics();
        let fwd = FrameTransform::new(&intr, &ext);
        let bwd = FrameTransform::new(&intr, &invert_rigid(&ext));

        let (xc, yc, zc) = fwd.rigid_transform(0.3, -0.7, 2.0);
        let (x, y, z) = bwd.rigid_transform(xc, yc, zc);
        assert_relative_eq!(x, 0.3, epsilon = 1e-5);
        assert_relative_eq!(y, -0.7, epsilon = 1e-5);
        assert_relative_eq!(z, 2.0, epsilon = 1e-5);
    }
}
