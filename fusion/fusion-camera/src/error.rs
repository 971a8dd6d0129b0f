//! Error types for camera buffers.

/// Errors that can occur when constructing camera-side buffers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CameraError {
    /// The pixel buffer length does not match the declared dimensions.
    #[error("image buffer has {actual} elements, expected {expected} for {width}x{height}")]
    BufferSizeMismatch {
        /// Expected element count.
        expected: usize,
        /// Actual element count.
        actual: usize,
        /// Image width in pixels.
        width: usize,
        /// Image height in pixels.
        height: usize,
    },

    /// An image dimension is zero.
    #[error("invalid image dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Image width in pixels.
        width: usize,
        /// Image height in pixels.
        height: usize,
    },
}
