//! Camera geometry for RGB-D volumetric fusion.
//!
//! This crate provides the camera-side building blocks consumed by the fusion
//! kernels:
//!
//! - [`CameraIntrinsics`] - Pinhole projection model (`f32`)
//! - [`FrameTransform`] - Combined rigid transform + projection indexer
//! - [`DepthImage`] - Depth frame buffer (`f32` or `u16` samples)
//! - [`ColorImage`] - Planar RGB frame buffer
//!
//! # Conventions
//!
//! All arithmetic is single-precision: the fusion kernels run millions of
//! projections per frame and match the precision of the voxel payload.
//!
//! Extrinsic matrices are 4×4 rigid transforms mapping **world to camera**
//! coordinates; poses (camera to world) are their inverses. Pixel lookups
//! truncate the projected float coordinate toward zero rather than rounding,
//! so a projection at `u = 3.9` samples column 3. See [`DepthImage::sample`].
//!
//! # Example
//!
//! ```
//! use fusion_camera::{CameraIntrinsics, FrameTransform};
//! use nalgebra::Matrix4;
//!
//! let intrinsics = CameraIntrinsics::new(525.0, 525.0, 319.5, 239.5, 640, 480);
//! let transform = FrameTransform::new(&intrinsics, &Matrix4::identity());
//!
//! let (xc, yc, zc) = transform.rigid_transform(0.1, 0.2, 1.5);
//! let (u, v) = transform.project(xc, yc, zc);
//! assert!(u > 0.0 && v > 0.0);
//! ```

// Safety: Deny unwrap/expect in library code. Tests may use them.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod error;
mod image;
mod intrinsics;
mod transform;

pub use error::CameraError;
pub use image::{ColorImage, DepthImage};
pub use intrinsics::CameraIntrinsics;
pub use transform::{invert_rigid, FrameTransform};

// Re-export nalgebra types used in public signatures
pub use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
