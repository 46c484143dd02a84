//! Pinhole camera model.
//!
//! Intrinsics are carried as the flat `(fx, fy, cx, cy)` tuple and expanded
//! into 4×4 projection / inverse-projection matrices on demand, so the same
//! construction works at full resolution and at every pyramid level.

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics: focal lengths and principal point in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl CameraIntrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Intrinsics for an image downscaled by `factor` (all four parameters
    /// shrink linearly with resolution).
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            fx: self.fx / factor,
            fy: self.fy / factor,
            cx: self.cx / factor,
            cy: self.cy / factor,
        }
    }

    /// 4×4 projection matrix K mapping camera-space points to homogeneous
    /// pixel coordinates.
    ///
    /// ```text
    /// | fx  0  cx  0 |
    /// |  0 fy  cy  0 |
    /// |  0  0   1  0 |
    /// |  0  0   0  1 |
    /// ```
    #[rustfmt::skip]
    pub fn camera_matrix(&self) -> Matrix4<f32> {
        Matrix4::new(
            self.fx, 0.0,     self.cx, 0.0,
            0.0,     self.fy, self.cy, 0.0,
            0.0,     0.0,     1.0,     0.0,
            0.0,     0.0,     0.0,     1.0,
        )
    }

    /// Inverse projection K⁻¹ mapping homogeneous pixels `[x, y, 1]` to
    /// camera-space rays.
    ///
    /// ```text
    /// | 1/fx    0  -cx/fx  0 |
    /// |    0 1/fy  -cy/fy  0 |
    /// |    0    0       1  0 |
    /// |    0    0       0  1 |
    /// ```
    #[rustfmt::skip]
    pub fn inverse_camera_matrix(&self) -> Matrix4<f32> {
        Matrix4::new(
            1.0 / self.fx, 0.0,           -self.cx / self.fx, 0.0,
            0.0,           1.0 / self.fy, -self.cy / self.fy, 0.0,
            0.0,           0.0,           1.0,                0.0,
            0.0,           0.0,           0.0,                1.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    use crate::geometry::ops::rotate;

    #[test]
    fn projection_inverse_round_trip() {
        let cam = CameraIntrinsics::new(531.15, 531.15, 320.0, 240.0);
        let k = cam.camera_matrix();
        let inv_k = cam.inverse_camera_matrix();

        // Unproject a pixel at depth z, reproject, recover the pixel.
        for &(x, y, z) in &[(10.0f32, 20.0f32, 1.0f32), (320.0, 240.0, 2.5), (639.0, 479.0, 0.7)] {
            let ray = rotate(&inv_k, &Vector3::new(x, y, 1.0));
            let vertex = ray * z;
            let projected = rotate(&k, &vertex);
            assert_relative_eq!(projected.x / projected.z, x, epsilon = 1e-3);
            assert_relative_eq!(projected.y / projected.z, y, epsilon = 1e-3);
        }
    }

    #[test]
    fn scaling_halves_all_parameters() {
        let cam = CameraIntrinsics::new(531.15, 531.15, 320.0, 240.0);
        let half = cam.scaled(2.0);
        assert_relative_eq!(half.fx, 265.575);
        assert_relative_eq!(half.cx, 160.0);
        assert_relative_eq!(half.cy, 120.0);
    }

    #[test]
    fn inverse_matrix_is_inverse() {
        let cam = CameraIntrinsics::new(525.0, 525.0, 319.5, 239.5);
        let product = cam.camera_matrix() * cam.inverse_camera_matrix();
        assert_relative_eq!(product, Matrix4::identity(), epsilon = 1e-5);
    }
}
