//! The 6×6 damped normal-equation solve.
//!
//! Reconstructs `C = JᵗJ` and `b = JᵗE` from the packed reduction
//! accumulator and solves `C x = b` through a condition-clamped SVD
//! pseudo-inverse.

use nalgebra::{Matrix6, Vector6};

use crate::tracking::icp::REDUCE_LEN;

/// Singular values smaller than `σ₀ / CONDITION` are zeroed in the
/// pseudo-inverse.
const CONDITION: f32 = 1e6;

const SVD_MAX_ITERATIONS: usize = 250;

/// Rebuild the symmetric 6×6 matrix from its packed row-major upper
/// triangle (21 values), mirroring across the diagonal.
pub fn make_jtj(packed: &[f32; 21]) -> Matrix6<f32> {
    let mut m = Matrix6::zeros();
    let mut slot = 0;
    for r in 0..6 {
        for c in r..6 {
            m[(r, c)] = packed[slot];
            slot += 1;
        }
    }
    for r in 1..6 {
        for c in 0..r {
            m[(r, c)] = m[(c, r)];
        }
    }
    m
}

/// Solve the packed system. `values` is the full 32-float reduction
/// accumulator: `b` comes from slots 1..=6 and `C` from slots 7..=27.
///
/// Returns `None` when the SVD does not converge — the caller decides
/// what a skipped iteration means.
pub fn solve_damped(values: &[f32; REDUCE_LEN]) -> Option<Vector6<f32>> {
    let b = Vector6::new(values[1], values[2], values[3], values[4], values[5], values[6]);

    let mut packed = [0.0f32; 21];
    packed.copy_from_slice(&values[7..28]);
    let c = make_jtj(&packed);

    let svd = c.try_svd(true, true, f32::EPSILON, SVD_MAX_ITERATIONS)?;
    let u = svd.u?;
    let v_t = svd.v_t?;
    let s = &svd.singular_values;

    // Damped pseudo-inverse of the diagonal: clamp the condition number.
    let s0 = s[0];
    let mut t = u.transpose() * b;
    for i in 0..6 {
        t[i] *= if s[i] * CONDITION <= s0 { 0.0 } else { 1.0 / s[i] };
    }

    Some(v_t.transpose() * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reconstruction_is_symmetric() {
        let mut packed = [0.0f32; 21];
        for (i, value) in packed.iter_mut().enumerate() {
            *value = (i as f32 + 1.0) * 0.37;
        }
        let m = make_jtj(&packed);
        assert_relative_eq!(m, m.transpose(), epsilon = 1e-6);
        // Spot-check the packing order: row 0 fills first, diagonal next
        // row starts at slot 6.
        assert_relative_eq!(m[(0, 5)], packed[5]);
        assert_relative_eq!(m[(1, 1)], packed[6]);
        assert_relative_eq!(m[(5, 5)], packed[20]);
    }

    #[test]
    fn solves_identity_system() {
        let mut values = [0.0f32; REDUCE_LEN];
        // b = [1..6], C = I.
        for i in 0..6 {
            values[1 + i] = (i + 1) as f32;
        }
        let mut slot = 7;
        for r in 0..6 {
            for c in r..6 {
                values[slot] = if r == c { 1.0 } else { 0.0 };
                slot += 1;
            }
        }
        let x = solve_damped(&values).unwrap();
        for i in 0..6 {
            assert_relative_eq!(x[i], (i + 1) as f32, epsilon = 1e-4);
        }
    }

    #[test]
    fn damping_suppresses_rank_deficient_directions() {
        let mut values = [0.0f32; REDUCE_LEN];
        // C = diag(1, 1, 1, 1, 1, 1e-8): far beyond the condition clamp.
        let diag = [1.0f32, 1.0, 1.0, 1.0, 1.0, 1e-8];
        let mut slot = 7;
        for r in 0..6 {
            for c in r..6 {
                values[slot] = if r == c { diag[r] } else { 0.0 };
                slot += 1;
            }
        }
        for i in 0..6 {
            values[1 + i] = 1.0;
        }
        let x = solve_damped(&values).unwrap();
        // Well-conditioned directions solve exactly; the collapsed one is
        // zeroed instead of exploding to 1e8.
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(x[5], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn zero_system_yields_zero_twist() {
        let values = [0.0f32; REDUCE_LEN];
        let x = solve_damped(&values).unwrap();
        assert_eq!(x, Vector6::zeros());
    }
}
