//! Depth preprocessing kernels: unit conversion, edge-preserving
//! smoothing, and the robust half-resolution downsample that builds the
//! ICP pyramid.
//!
//! Contracts follow the classic dense-fusion front end: zero depth means
//! "no measurement" everywhere, and every kernel preserves that.

use rayon::prelude::*;

use crate::imaging::image::Image;

/// 1D Gaussian coefficients for the bilateral filter's spatial term,
/// evaluated at integer offsets `-radius..=radius`.
pub fn gaussian_coefficients(radius: i32, delta: f32) -> Vec<f32> {
    (-radius..=radius)
        .map(|x| (-(x * x) as f32 / (2.0 * delta * delta)).exp())
        .collect()
}

/// Convert raw millimeter depth to meters while subsampling by an integer
/// factor: `out(x, y) = in(x·s, y·s) / 1000`.
pub fn mm_to_meters(out: &mut Image<f32>, input: &Image<f32>, scale: usize) {
    let width = out.width();
    out.as_mut_slice()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row.iter_mut().enumerate() {
                *value = input.get(x * scale, y * scale) * 1e-3;
            }
        });
}

/// Edge-preserving bilateral filter over a metric depth map.
///
/// Each output pixel is a normalized sum of its neighborhood weighted by
/// the spatial Gaussian and by similarity in depth (`exp(-Δ²/2eδ²)`).
/// Pixels with zero depth stay zero, and zero-depth neighbors do not
/// contribute.
pub fn bilateral_filter(
    out: &mut Image<f32>,
    input: &Image<f32>,
    gaussian: &[f32],
    e_delta: f32,
    radius: i32,
) {
    let width = out.width() as i32;
    let height = out.height() as i32;
    let inv_sigma_sq = 1.0 / (2.0 * e_delta * e_delta);

    out.as_mut_slice()
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as i32;
            for (x, value) in row.iter_mut().enumerate() {
                let x = x as i32;
                let center = input.get(x as usize, y as usize);
                if center == 0.0 {
                    *value = 0.0;
                    continue;
                }

                let mut sum = 0.0f32;
                let mut total = 0.0f32;
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let px = (x + dx).clamp(0, width - 1) as usize;
                        let py = (y + dy).clamp(0, height - 1) as usize;
                        let current = input.get(px, py);
                        if current > 0.0 {
                            let diff = current - center;
                            let factor = gaussian[(dx + radius) as usize]
                                * gaussian[(dy + radius) as usize]
                                * (-(diff * diff) * inv_sigma_sq).exp();
                            sum += factor * current;
                            total += factor;
                        }
                    }
                }
                *value = sum / total;
            }
        });
}

/// Downsample a depth map to half resolution, averaging only neighbors
/// within `e_delta` of the block's reference sample. This keeps depth
/// discontinuities sharp instead of smearing foreground into background.
pub fn half_sample_robust(out: &mut Image<f32>, input: &Image<f32>, e_delta: f32, radius: i32) {
    let out_width = out.width();
    let in_width = input.width() as i32;
    let in_height = input.height() as i32;

    out.as_mut_slice()
        .par_chunks_mut(out_width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row.iter_mut().enumerate() {
                let cx = (x * 2) as i32;
                let cy = (y * 2) as i32;
                let center = input.get(cx as usize, cy as usize);

                let mut sum = 0.0f32;
                let mut count = 0.0f32;
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let px = (cx + dx).clamp(0, in_width - 1) as usize;
                        let py = (cy + dy).clamp(0, in_height - 1) as usize;
                        let current = input.get(px, py);
                        if (current - center).abs() < e_delta {
                            sum += current;
                            count += 1.0;
                        }
                    }
                }
                *value = sum / count;
            }
        });
}
