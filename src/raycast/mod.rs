//! Surface extraction by ray casting the TSDF volume.
//!
//! Produces the reference view's vertex and normal maps: for each output
//! pixel a ray is intersected with the volume box, marched to the zero
//! crossing of the distance field, and the surface normal is read off the
//! field's gradient.

use nalgebra::{Matrix4, Vector3, Vector4};
use rayon::prelude::*;

use crate::geometry::ops::{rotate, translation, INVALID};
use crate::imaging::image::Image;
use crate::volume::TsdfVolume;

/// Below this sampled distance the march switches from the coarse to the
/// fine step, anticipating the zero crossing.
const NEAR_SURFACE: f32 = 0.8;

/// Cast one ray through pixel `(x, y)`.
///
/// `view` is the raycast pose: camera pose composed with the inverse
/// projection, so that `rotate(view, [x, y, 1])` is the ray direction and
/// the translation column is the ray origin. Returns the world-space hit
/// in xyz and the ray parameter in w; a result with `w ≤ 0` means no hit.
#[allow(clippy::too_many_arguments)]
pub fn raycast_point(
    volume: &TsdfVolume,
    x: usize,
    y: usize,
    view: &Matrix4<f32>,
    near_plane: f32,
    far_plane: f32,
    small_step: f32,
    large_step: f32,
) -> Vector4<f32> {
    let origin = translation(view);
    let direction = rotate(view, &Vector3::new(x as f32, y as f32, 1.0));

    // Slab intersection with the volume's axis-aligned box [0, dims].
    let dims = volume.dims();
    let inv_r = Vector3::new(1.0 / direction.x, 1.0 / direction.y, 1.0 / direction.z);
    let tbot = -inv_r.component_mul(&origin);
    let ttop = inv_r.component_mul(&(dims - origin));

    let tmin = tbot.inf(&ttop);
    let tmax = tbot.sup(&ttop);

    let tnear = tmin.max().max(near_plane);
    let tfar = tmax.min().min(far_plane);

    if tnear < tfar {
        let mut t = tnear;
        let mut step = large_step;

        let mut pos = origin + direction * t;
        let mut previous = volume.interp(&pos);

        if previous > 0.0 {
            let mut current = 0.0;
            while t < tfar {
                pos = origin + direction * t;
                current = volume.interp(&pos);
                if current < 0.0 {
                    break;
                }
                if current < NEAR_SURFACE {
                    step = small_step;
                }
                previous = current;
                t += step;
            }

            if current < 0.0 {
                // Linear zero-crossing refinement between the last two
                // samples.
                t += step * current / (previous - current);
                pos = origin + direction * t;
                return Vector4::new(pos.x, pos.y, pos.z, t);
            }
        }
    }
    Vector4::zeros()
}

/// Raycast the whole output view.
///
/// On a hit the vertex map receives the world-space surface point and the
/// normal map the normalized volume gradient; misses and degenerate
/// gradients write the invalid-normal sentinel and a zero vertex.
#[allow(clippy::too_many_arguments)]
pub fn raycast(
    vertices: &mut Image<Vector3<f32>>,
    normals: &mut Image<Vector3<f32>>,
    volume: &TsdfVolume,
    view: &Matrix4<f32>,
    near_plane: f32,
    far_plane: f32,
    large_step: f32,
    small_step: f32,
) {
    let width = vertices.width();
    vertices
        .as_mut_slice()
        .par_chunks_mut(width)
        .zip(normals.as_mut_slice().par_chunks_mut(width))
        .enumerate()
        .for_each(|(y, (vertex_row, normal_row))| {
            for x in 0..width {
                let hit = raycast_point(
                    volume, x, y, view, near_plane, far_plane, small_step, large_step,
                );

                if hit.w > 0.0 {
                    let position = Vector3::new(hit.x, hit.y, hit.z);
                    let gradient = volume.grad(&position);
                    vertex_row[x] = position;
                    normal_row[x] = if gradient.norm() != 0.0 {
                        gradient.normalize()
                    } else {
                        Vector3::new(INVALID, 0.0, 0.0)
                    };
                } else {
                    vertex_row[x] = Vector3::zeros();
                    normal_row[x] = Vector3::new(INVALID, 0.0, 0.0);
                }
            }
        });
}
