//! Projective data association and the Gauss-Newton accumulator.
//!
//! One ICP iteration has three dense stages: `track_pose` classifies every
//! pixel of the live view against the reference view and emits a
//! point-to-plane residual row for the accepted ones; `reduce` folds all
//! rows into the packed 32-float normal-equation accumulator; the solve
//! (see [`super::solve`]) turns that into a twist. `estimate_new_pose`
//! composes the twist onto the working pose and reports convergence.

use nalgebra::{Matrix4, Vector3, Vector6};
use rayon::prelude::*;
use tracing::warn;

use crate::geometry::ops::{rigid_transform, rotate, INVALID};
use crate::geometry::se3::se3_exp;
use crate::imaging::image::Image;
use crate::tracking::result::TrackingResult;
use crate::tracking::solve::solve_damped;

/// Length of the packed reduction accumulator:
/// `[Σe², Σe·Jᵢ (6), upper triangle of JᵗJ (21), 4 outcome counters]`.
pub const REDUCE_LEN: usize = 32;

/// Index of the first outcome counter within the accumulator.
const INFO: usize = 28;
/// Index of the first JᵗJ entry.
const JTJ: usize = 7;

/// Number of pixels per parallel reduction chunk.
const REDUCE_CHUNK: usize = 8 * 1024;

/// Per-pixel classification outcome of projective data association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOutcome {
    /// The live pixel carries no usable geometry.
    NoInput,
    /// Projection lands outside the reference image.
    NotInImage,
    /// The reference pixel carries no usable geometry.
    NoCorrespondence,
    /// Euclidean distance between the pair exceeds the threshold.
    TooFar,
    /// Normal agreement below the threshold.
    WrongNormal,
    /// Accepted correspondence; the row carries a residual.
    Valid,
}

/// One pixel's contribution to the Gauss-Newton system: the 6-component
/// Jacobian row `[n | p × n]`, the signed point-to-plane error, and the
/// classification outcome.
#[derive(Debug, Clone, Copy)]
pub struct TrackRow {
    pub jacobian: [f32; 6],
    pub error: f32,
    pub outcome: PixelOutcome,
}

impl TrackRow {
    pub fn rejected(outcome: PixelOutcome) -> Self {
        Self {
            jacobian: [0.0; 6],
            error: 0.0,
            outcome,
        }
    }
}

/// Classify every live pixel against the reference view.
///
/// `current_pose` maps live camera space to world; `view` projects world
/// points into the reference image (`K · referencePose⁻¹`). The reference
/// view is always at full processing resolution regardless of which
/// pyramid level the live maps come from.
#[allow(clippy::too_many_arguments)]
pub fn track_pose(
    results: &mut Image<TrackRow>,
    vertices: &Image<Vector3<f32>>,
    normals: &Image<Vector3<f32>>,
    ref_vertices: &Image<Vector3<f32>>,
    ref_normals: &Image<Vector3<f32>>,
    current_pose: &Matrix4<f32>,
    view: &Matrix4<f32>,
    distance_threshold: f32,
    normal_threshold: f32,
) {
    let width = results.width();
    let ref_width = ref_vertices.width();
    let ref_height = ref_vertices.height();

    results
        .as_mut_slice()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let normal = normals.get(x, y);
                if normal.x == INVALID {
                    *out = TrackRow::rejected(PixelOutcome::NoInput);
                    continue;
                }

                let projected_vertex = rigid_transform(current_pose, &vertices.get(x, y));
                let projected_pos = rigid_transform(view, &projected_vertex);
                let px = projected_pos.x / projected_pos.z + 0.5;
                let py = projected_pos.y / projected_pos.z + 0.5;

                if px < 0.0 || px > (ref_width - 1) as f32 || py < 0.0 || py > (ref_height - 1) as f32
                {
                    *out = TrackRow::rejected(PixelOutcome::NotInImage);
                    continue;
                }

                let rx = px as usize;
                let ry = py as usize;
                let ref_normal = ref_normals.get(rx, ry);
                if ref_normal.x == INVALID {
                    *out = TrackRow::rejected(PixelOutcome::NoCorrespondence);
                    continue;
                }

                let diff = ref_vertices.get(rx, ry) - projected_vertex;
                if diff.norm() > distance_threshold {
                    *out = TrackRow::rejected(PixelOutcome::TooFar);
                    continue;
                }

                let projected_normal = rotate(current_pose, &normal);
                if projected_normal.dot(&ref_normal) < normal_threshold {
                    *out = TrackRow::rejected(PixelOutcome::WrongNormal);
                    continue;
                }

                let b = projected_vertex.cross(&ref_normal);
                *out = TrackRow {
                    jacobian: [ref_normal.x, ref_normal.y, ref_normal.z, b.x, b.y, b.z],
                    error: ref_normal.dot(&diff),
                    outcome: PixelOutcome::Valid,
                };
            }
        });
}

#[inline]
fn accumulate(sums: &mut [f32; REDUCE_LEN], row: &TrackRow) {
    match row.outcome {
        PixelOutcome::Valid => {}
        PixelOutcome::TooFar => {
            sums[INFO + 1] += 1.0;
            return;
        }
        PixelOutcome::WrongNormal => {
            sums[INFO + 2] += 1.0;
            return;
        }
        _ => {
            sums[INFO + 3] += 1.0;
            return;
        }
    }

    let j = &row.jacobian;
    let e = row.error;

    sums[0] += e * e;
    for i in 0..6 {
        sums[i + 1] += e * j[i];
    }

    // Upper triangle of JᵗJ, row-major.
    let mut slot = JTJ;
    for r in 0..6 {
        for c in r..6 {
            sums[slot] += j[r] * j[c];
            slot += 1;
        }
    }

    sums[INFO] += 1.0;
}

fn add(mut a: [f32; REDUCE_LEN], b: [f32; REDUCE_LEN]) -> [f32; REDUCE_LEN] {
    for i in 0..REDUCE_LEN {
        a[i] += b[i];
    }
    a
}

/// Sequential fold of all rows into the packed accumulator.
pub fn reduce_sequential(rows: &Image<TrackRow>) -> [f32; REDUCE_LEN] {
    let mut sums = [0.0f32; REDUCE_LEN];
    for row in rows.as_slice() {
        accumulate(&mut sums, row);
    }
    sums
}

/// Parallel chunked fold. The accumulation is commutative and
/// associative, so any chunking yields the same result up to float
/// rounding.
pub fn reduce(rows: &Image<TrackRow>) -> [f32; REDUCE_LEN] {
    rows.as_slice()
        .par_chunks(REDUCE_CHUNK)
        .map(|chunk| {
            let mut sums = [0.0f32; REDUCE_LEN];
            for row in chunk {
                accumulate(&mut sums, row);
            }
            sums
        })
        .reduce(|| [0.0f32; REDUCE_LEN], add)
}

/// Solve the reduced system and compose the resulting twist onto the
/// working pose.
///
/// Populates `result` with the error, the outcome counters, the solved
/// twist, and the new pose. Returns `true` when the twist magnitude is
/// below `icp_threshold`, i.e. this level has converged.
///
/// If the SVD fails to converge the iteration is an explicit no-op: the
/// twist is zeroed, the pose passes through unchanged, and the failure is
/// logged. (The solve then reports convergence, ending the level with the
/// last successfully updated pose.)
pub fn estimate_new_pose(
    result: &mut TrackingResult,
    sums: &[f32; REDUCE_LEN],
    pose: &Matrix4<f32>,
    icp_threshold: f32,
) -> bool {
    result.error = sums[0];
    result.valid = sums[INFO];
    result.too_far = sums[INFO + 1];
    result.wrong_normal = sums[INFO + 2];
    result.other = sums[INFO + 3];

    result.twist = match solve_damped(sums) {
        Some(twist) => twist,
        None => {
            warn!("ICP normal-equation SVD failed to converge; skipping pose update");
            Vector6::zeros()
        }
    };

    result.pose = se3_exp(&result.twist) * pose;

    result.twist.norm() < icp_threshold
}
