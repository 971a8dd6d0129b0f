//! Pinhole camera intrinsics.

use nalgebra::Matrix3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Camera intrinsic parameters (pinhole model, no distortion).
///
/// Projects a 3D point `[X, Y, Z]` in camera coordinates to 2D pixel
/// coordinates:
///
/// ```text
/// u = fx * X/Z + cx
/// v = fy * Y/Z + cy
/// ```
///
/// The fusion kernels rectify frames upstream, so no distortion model is
/// carried here.
///
/// # Example
///
/// ```
/// use fusion_camera::CameraIntrinsics;
///
/// let intr = CameraIntrinsics::new(525.0, 525.0, 319.5, 239.5, 640, 480);
/// let (u, v) = intr.project(0.0, 0.0, 1.0);
/// assert!((u - 319.5).abs() < 1e-6);
/// assert!((v - 239.5).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    /// Focal length in pixels (x direction).
    pub fx: f32,
    /// Focal length in pixels (y direction).
    pub fy: f32,
    /// Principal point x-coordinate in pixels.
    pub cx: f32,
    /// Principal point y-coordinate in pixels.
    pub cy: f32,
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
}

impl CameraIntrinsics {
    /// Creates new intrinsics from focal lengths and principal point.
    #[must_use]
    pub const fn new(fx: f32, fy: f32, cx: f32, cy: f32, width: usize, height: usize) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    /// Creates intrinsics from a 3×3 calibration matrix.
    ///
    /// Reads `fx`, `fy` from the diagonal and `cx`, `cy` from the last
    /// column; skew is ignored.
    #[must_use]
    pub fn from_matrix(k: &Matrix3<f32>, width: usize, height: usize) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)], width, height)
    }

    /// Returns the 3×3 calibration matrix.
    #[must_use]
    pub fn matrix(&self) -> Matrix3<f32> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Projects a camera-space point to pixel coordinates.
    ///
    /// No bounds or cheirality check is performed; callers reject `z <= 0`
    /// before projecting.
    #[must_use]
    pub fn project(&self, x: f32, y: f32, z: f32) -> (f32, f32) {
        (self.fx * x / z + self.cx, self.fy * y / z + self.cy)
    }

    /// Unprojects a pixel at depth `z` to a camera-space point.
    #[must_use]
    pub fn unproject(&self, u: f32, v: f32, z: f32) -> (f32, f32, f32) {
        ((u - self.cx) * z / self.fx, (v - self.cy) * z / self.fy, z)
    }

    /// Checks that a float pixel coordinate lies inside the image rectangle.
    ///
    /// The valid range is `[0, dim - 1]` inclusive on each axis, so a
    /// truncating lookup at an in-bounds coordinate can never index past the
    /// buffer.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn contains(&self, u: f32, v: f32) -> bool {
        u >= 0.0 && v >= 0.0 && u <= (self.width - 1) as f32 && v <= (self.height - 1) as f32
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn project_principal_point() {
        let intr = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0, 640, 480);
        let (u, v) = intr.project(0.0, 0.0, 2.0);
        assert_relative_eq!(u, 320.0);
        assert_relative_eq!(v, 240.0);
    }

    #[test]
    fn project_unproject_round_trip() {
        let intr = CameraIntrinsics::new(525.0, 525.0, 319.5, 239.5, 640, 480);
        let (u, v) = intr.project(0.3, -0.2, 1.7);
        let (x, y, z) = intr.unproject(u, v, 1.7);
        assert_relative_eq!(x, 0.3, epsilon = 1e-5);
        assert_relative_eq!(y, -0.2, epsilon = 1e-5);
        assert_relative_eq!(z, 1.7);
    }

    #[test]
    fn matrix_round_trip() {
        let intr = CameraIntrinsics::new(525.0, 520.0, 319.5, 239.5, 640, 480);
        let k = intr.matrix();
        let back = CameraIntrinsics::from_matrix(&k, 640, 480);
        assert_eq!(intr, back);
    }

    #[test]
    fn contains_bounds() {
        let intr = CameraIntrinsics::new(500.0, 500.0, 2.0, 2.0, 4, 4);
        assert!(intr.contains(0.0, 0.0));
        assert!(intr.contains(3.0, 3.0));
        assert!(intr.contains(2.9, 0.5));
        assert!(!intr.contains(3.1, 0.0));
        assert!(!intr.contains(-0.1, 0.0));
        assert!(!intr.contains(0.0, 4.0));
    }
}
