//! SE(3) Lie group utilities for incremental pose updates.
//!
//! Provides skew-symmetric matrix construction and the closed-form
//! exponential map (Rodrigues rotation plus the V integration matrix) used
//! to turn a solved 6-vector twist into a rigid 4×4 delta transform.
//!
//! Twist layout: `[v | ω]` — translation components first, rotation last,
//! matching the Jacobian row layout of the ICP residual.

use nalgebra::{Matrix3, Matrix4, Vector3, Vector6};

/// Below this squared angle the trigonometric coefficients switch to their
/// Taylor expansions.
const SMALL_ANGLE_SQ: f32 = 1e-8;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
#[rustfmt::skip]
pub fn skew(v: &Vector3<f32>) -> Matrix3<f32> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Exponential map from a twist `[v | ω]` to a rigid transform.
///
/// ```text
/// R = I + A [ω]× + B [ω]×²            (Rodrigues)
/// t = v + B (ω × v) + C (ω × (ω × v)) (V-matrix applied to v)
/// A = sin θ / θ,  B = (1 − cos θ)/θ²,  C = (1 − A)/θ²
/// ```
///
/// Small angles use the series `A ≈ 1 − θ²/6`, `B ≈ 1/2`.
pub fn se3_exp(twist: &Vector6<f32>) -> Matrix4<f32> {
    let v = Vector3::new(twist[0], twist[1], twist[2]);
    let w = Vector3::new(twist[3], twist[4], twist[5]);

    let theta_sq = w.dot(&w);
    let cross = w.cross(&v);

    let (a, b, t) = if theta_sq < SMALL_ANGLE_SQ {
        let a = 1.0 - theta_sq / 6.0;
        (a, 0.5, v + 0.5 * cross)
    } else {
        let theta = theta_sq.sqrt();
        let (a, b, c) = if theta_sq < 1e-6 {
            let c = (1.0 - theta_sq / 20.0) / 6.0;
            (1.0 - theta_sq * c, 0.5 - theta_sq / 24.0, c)
        } else {
            let inv_theta = 1.0 / theta;
            let a = theta.sin() * inv_theta;
            let b = (1.0 - theta.cos()) * inv_theta * inv_theta;
            (a, b, (1.0 - a) * inv_theta * inv_theta)
        };
        (a, b, v + b * cross + c * w.cross(&cross))
    };

    let wx = skew(&w);
    let rotation = Matrix3::identity() + a * wx + b * wx * wx;

    let mut m = Matrix4::identity();
    for r in 0..3 {
        for c in 0..3 {
            m[(r, c)] = rotation[(r, c)];
        }
        m[(r, 3)] = t[r];
    }
    m
}
