//! Per-pixel geometry kernels: unprojection, normal estimation, and the
//! rigid-transform helpers they share.
//!
//! All image-sized kernels here are embarrassingly parallel and run one
//! rayon task per row.

use nalgebra::{Matrix4, Vector3};
use rayon::prelude::*;

use crate::imaging::image::Image;

/// Sentinel stored in the first component of a normal that could not be
/// estimated (missing depth in the neighborhood, degenerate gradient).
pub const INVALID: f32 = -2.0;

/// Apply only the rotation block (top-left 3×3) of `m` to `v`.
///
/// Used for directions and normals, and for matrices that are not rigid
/// transforms at all (K, K⁻¹), where the fourth column must be ignored.
#[inline]
pub fn rotate(m: &Matrix4<f32>, v: &Vector3<f32>) -> Vector3<f32> {
    Vector3::new(
        m[(0, 0)] * v.x + m[(0, 1)] * v.y + m[(0, 2)] * v.z,
        m[(1, 0)] * v.x + m[(1, 1)] * v.y + m[(1, 2)] * v.z,
        m[(2, 0)] * v.x + m[(2, 1)] * v.y + m[(2, 2)] * v.z,
    )
}

/// Apply the full rigid transform `m` to the point `p`: rotation block
/// followed by the translation column.
#[inline]
pub fn rigid_transform(m: &Matrix4<f32>, p: &Vector3<f32>) -> Vector3<f32> {
    rotate(m, p) + translation(m)
}

/// Translation column of a 4×4 transform.
#[inline]
pub fn translation(m: &Matrix4<f32>) -> Vector3<f32> {
    Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
}

/// Inverse of a rigid transform, computed as `[Rᵗ | -Rᵗ t]` rather than by
/// general matrix inversion.
pub fn rigid_inverse(m: &Matrix4<f32>) -> Matrix4<f32> {
    let mut inv = Matrix4::identity();
    for r in 0..3 {
        for c in 0..3 {
            inv[(r, c)] = m[(c, r)];
        }
    }
    let t = translation(m);
    let ti = -rotate(&inv, &t);
    inv[(0, 3)] = ti.x;
    inv[(1, 3)] = ti.y;
    inv[(2, 3)] = ti.z;
    inv
}

/// Unproject a depth map into a vertex map: `vertex = z · K⁻¹ [x, y, 1]`.
/// Pixels with depth ≤ 0 produce the zero vector, which marks "no
/// geometry" for the downstream kernels.
pub fn depth_to_vertices(
    vertices: &mut Image<Vector3<f32>>,
    depths: &Image<f32>,
    inv_k: &Matrix4<f32>,
) {
    let width = vertices.width();
    vertices
        .as_mut_slice()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let depth = depths.get(x, y);
                *out = if depth > 0.0 {
                    rotate(inv_k, &Vector3::new(x as f32, y as f32, 1.0)) * depth
                } else {
                    Vector3::zeros()
                };
            }
        });
}

/// Estimate per-pixel normals by central differences over the vertex map.
///
/// Neighbors are clamped at the image border. If any of the four
/// neighbors has zero depth the normal is marked invalid, and that
/// invalidity propagates through tracking and raycasting.
pub fn vertices_to_normals(normals: &mut Image<Vector3<f32>>, vertices: &Image<Vector3<f32>>) {
    let width = normals.width();
    let height = normals.height();
    normals
        .as_mut_slice()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let left = vertices.get(x.saturating_sub(1), y);
                let right = vertices.get((x + 1).min(width - 1), y);
                let up = vertices.get(x, y.saturating_sub(1));
                let down = vertices.get(x, (y + 1).min(height - 1));

                let missing = left.z == 0.0 || right.z == 0.0 || up.z == 0.0 || down.z == 0.0;
                *out = if missing {
                    Vector3::new(INVALID, 0.0, 0.0)
                } else {
                    let dxv = right - left;
                    let dyv = down - up;
                    dyv.cross(&dxv).normalize()
                };
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::geometry::camera::CameraIntrinsics;

    fn test_camera() -> CameraIntrinsics {
        CameraIntrinsics::new(265.575, 265.575, 160.0, 120.0)
    }

    #[test]
    fn unprojection_recovers_pixel() {
        let cam = test_camera();
        let mut depths = Image::filled(8, 8, 0.0f32);
        depths.set(3, 5, 1.5);
        let mut vertices = Image::filled(8, 8, Vector3::zeros());
        depth_to_vertices(&mut vertices, &depths, &cam.inverse_camera_matrix());

        let v = vertices.get(3, 5);
        assert_relative_eq!(v.z, 1.5, epsilon = 1e-6);
        let projected = rotate(&cam.camera_matrix(), &v);
        assert_relative_eq!(projected.x / projected.z, 3.0, epsilon = 1e-4);
        assert_relative_eq!(projected.y / projected.z, 5.0, epsilon = 1e-4);
    }

    #[test]
    fn zero_depth_yields_zero_vertex() {
        let cam = test_camera();
        let depths = Image::filled(4, 4, 0.0f32);
        let mut vertices = Image::filled(4, 4, Vector3::new(1.0, 1.0, 1.0));
        depth_to_vertices(&mut vertices, &depths, &cam.inverse_camera_matrix());
        assert_eq!(vertices.get(2, 2), Vector3::zeros());
    }

    #[test]
    fn plane_normals_face_camera() {
        let cam = test_camera();
        let depths = Image::filled(16, 16, 2.0f32);
        let mut vertices = Image::filled(16, 16, Vector3::zeros());
        let mut normals = Image::filled(16, 16, Vector3::zeros());
        depth_to_vertices(&mut vertices, &depths, &cam.inverse_camera_matrix());
        vertices_to_normals(&mut normals, &vertices);

        let n = normals.get(8, 8);
        assert_relative_eq!(n.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(n.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(n.z, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn missing_neighbor_invalidates_normal() {
        let cam = test_camera();
        let mut depths = Image::filled(8, 8, 1.0f32);
        depths.set(4, 3, 0.0);
        let mut vertices = Image::filled(8, 8, Vector3::zeros());
        let mut normals = Image::filled(8, 8, Vector3::zeros());
        depth_to_vertices(&mut vertices, &depths, &cam.inverse_camera_matrix());
        vertices_to_normals(&mut normals, &vertices);

        // Every pixel with (4, 3) among its four neighbors is invalid.
        assert_eq!(normals.get(3, 3).x, INVALID);
        assert_eq!(normals.get(5, 3).x, INVALID);
        assert_eq!(normals.get(4, 2).x, INVALID);
        assert_eq!(normals.get(4, 4).x, INVALID);
        // A pixel two columns away is unaffected.
        assert!(normals.get(6, 3).x != INVALID);
    }

    #[test]
    fn rigid_inverse_undoes_transform() {
        use crate::geometry::se3::se3_exp;
        use nalgebra::Vector6;

        let pose = se3_exp(&Vector6::new(0.1, -0.2, 0.3, 0.05, -0.02, 0.1));
        let p = Vector3::new(0.4, 0.5, 2.0);
        let back = rigid_transform(&rigid_inverse(&pose), &rigid_transform(&pose, &p));
        assert_relative_eq!(back, p, epsilon = 1e-5);
    }
}
