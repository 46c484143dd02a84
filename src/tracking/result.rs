//! Tracking results and diagnostics structures.
//!
//! One `TrackingResult` describes the latest ICP iteration: the summed
//! squared error, how the pixels classified, the solved twist, and the
//! pose it produces. The orchestrator reads it for the acceptance test;
//! the benchmark harness reads it for telemetry.

use nalgebra::{Matrix4, Vector6};

/// Outcome of one ICP iteration.
#[derive(Debug, Clone)]
pub struct TrackingResult {
    /// Sum of squared point-to-plane errors over accepted pixels.
    pub error: f32,
    /// Pixel counts per classification outcome.
    pub valid: f32,
    pub too_far: f32,
    pub wrong_normal: f32,
    pub other: f32,
    /// Solved 6-parameter twist.
    pub twist: Vector6<f32>,
    /// Working pose after composing the twist.
    pub pose: Matrix4<f32>,
}

impl TrackingResult {
    pub fn new() -> Self {
        Self {
            error: 0.0,
            valid: 0.0,
            too_far: 0.0,
            wrong_normal: 0.0,
            other: 0.0,
            twist: Vector6::zeros(),
            pose: Matrix4::identity(),
        }
    }

    /// Root of the mean squared error over the full image.
    pub fn rsme(&self, pixels: usize) -> f32 {
        (self.error / pixels as f32).sqrt()
    }

    /// Fraction of pixels with an accepted correspondence.
    pub fn tracked_fraction(&self, pixels: usize) -> f32 {
        self.valid / pixels as f32
    }
}

impl Default for TrackingResult {
    fn default() -> Self {
        Self::new()
    }
}
