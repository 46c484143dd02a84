//! TSDF fusion: folds one filtered depth frame into the volume.

use nalgebra::{Matrix4, Vector3};
use rayon::prelude::*;

use crate::geometry::ops::{rigid_transform, rotate};
use crate::imaging::image::Image;
use crate::volume::{decode, encode, TsdfVolume};

/// Voxels closer to the camera than this are never updated.
const NEAR_PLANE: f32 = 1e-4;

/// Fuse `depth` (meters) into `volume`.
///
/// `inv_track` maps world points into the camera frame of the depth image;
/// `k` is the projection matrix at the depth image's resolution. Walks
/// each voxel column along z, carrying the camera-space position and its
/// projection by constant per-step deltas instead of re-applying the
/// transforms. Each accepted voxel gets the weighted running-average
/// update with truncation band `mu` and weight cap `max_weight`.
///
/// Columns are independent, so the outer loop is a parallel iteration
/// over contiguous column slices.
pub fn integrate(
    volume: &mut TsdfVolume,
    depth: &Image<f32>,
    inv_track: &Matrix4<f32>,
    k: &Matrix4<f32>,
    mu: f32,
    max_weight: f32,
) {
    let size = volume.size();
    let dims = volume.dims();
    let pitch_z = dims.z / size[2] as f32;

    // Stepping one voxel along volume z is a constant delta in camera
    // space, and therefore also in (pre-division) projected space.
    let step = Vector3::new(0.0, 0.0, pitch_z);
    let pos_delta = rotate(inv_track, &step);
    let camera_delta = rotate(k, &pos_delta);

    let width = depth.width();
    let height = depth.height();

    // Column origins depend on volume geometry only; capture them before
    // splitting the storage into per-column slices.
    let origin = |x: usize, y: usize| {
        Vector3::new(
            (x as f32 + 0.5) * dims.x / size[0] as f32,
            (y as f32 + 0.5) * dims.y / size[1] as f32,
            0.5 * pitch_z,
        )
    };

    volume
        .as_mut_slice()
        .par_chunks_mut(size[2])
        .enumerate()
        .for_each(|(column, voxels)| {
            let x = column % size[0];
            let y = column / size[0];

            let mut pos = rigid_transform(inv_track, &origin(x, y));
            let mut camera = rigid_transform(k, &pos);

            for voxel in voxels.iter_mut() {
                let (p, c) = (pos, camera);
                pos += pos_delta;
                camera += camera_delta;

                if p.z < NEAR_PLANE {
                    continue;
                }

                let px = c.x / c.z + 0.5;
                let py = c.y / c.z + 0.5;
                if px < 0.0 || px > (width - 1) as f32 || py < 0.0 || py > (height - 1) as f32 {
                    continue;
                }

                let measured = depth.get(px as usize, py as usize);
                if measured == 0.0 {
                    continue;
                }

                // Plane-perpendicular depth error rescaled to distance
                // along the viewing ray.
                let diff = (measured - c.z)
                    * (1.0 + (p.x / p.z).powi(2) + (p.y / p.z).powi(2)).sqrt();

                if diff > -mu {
                    let sdf = (diff / mu).min(1.0);
                    let (d, w) = decode(*voxel);
                    let fused = ((w * d + sdf) / (w + 1.0)).clamp(-1.0, 1.0);
                    let new_weight = (w + 1.0).min(max_weight);
                    *voxel = encode(fused, new_weight);
                }
            }
        });
}
