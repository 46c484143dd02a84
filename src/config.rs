//! Immutable per-run configuration.
//!
//! All tunable parameters of the fusion pipeline live here: camera
//! intrinsics, volume geometry, truncation band, ICP thresholds and
//! per-level iteration budgets, integration cadence. The struct is built
//! once (from defaults or a JSON file) and handed to the pipeline, which
//! derives every buffer shape from it. There is no global mutable state.

use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::{Matrix4, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::geometry::camera::CameraIntrinsics;
use crate::geometry::se3::se3_exp;

/// Flat parameter set for one pipeline run.
///
/// Defaults match the classic 640×480 Kinect setup: half-resolution
/// processing, a 5 m cube discretized into 256³ voxels, and a three-level
/// ICP pyramid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KinfuConfig {
    /// Depth camera intrinsics at full input resolution.
    pub camera: CameraIntrinsics,
    /// Raw depth input resolution.
    pub input_width: usize,
    pub input_height: usize,
    /// Integer subsampling factor applied to the raw input.
    pub scale: usize,

    /// Voxel counts per axis.
    pub volume_size: [usize; 3],
    /// Physical volume extent in meters per axis.
    pub volume_dims: [f32; 3],

    /// Raycast clipping planes in meters.
    pub near_plane: f32,
    pub far_plane: f32,

    /// TSDF truncation band in meters.
    pub mu: f32,
    /// Cap on the per-voxel accumulated weight.
    pub max_weight: f32,

    /// Bilateral filter: spatial radius in pixels, spatial sigma, and
    /// range sigma (also reused as the pyramid edge threshold).
    pub bilateral_radius: i32,
    pub bilateral_delta: f32,
    pub e_delta: f32,

    /// ICP correspondence rejection thresholds.
    pub distance_threshold: f32,
    pub normal_threshold: f32,
    /// Minimum fraction of valid pixels for a pose to be accepted.
    pub tracking_threshold: f32,
    /// Maximum RSME for a pose to be accepted.
    pub rsme_threshold: f32,
    /// Twist-magnitude convergence threshold for a single ICP iteration.
    pub icp_threshold: f32,

    /// ICP iteration budget per pyramid level, finest first. The length
    /// of this vector is the number of pyramid levels.
    pub pyramid_iterations: Vec<usize>,

    /// Integrate every n-th tracked frame.
    pub integration_rate: u64,
    /// Render the scene view every n-th frame (benchmark harness only).
    pub rendering_rate: u64,

    /// Initial camera position as a fraction of the volume extent per
    /// axis. The default starts centered in x/y on the volume's front
    /// face, looking down +z.
    pub initial_position_factors: [f32; 3],
}

impl Default for KinfuConfig {
    fn default() -> Self {
        Self {
            camera: CameraIntrinsics::new(531.15, 531.15, 320.0, 240.0),
            input_width: 640,
            input_height: 480,
            scale: 2,
            volume_size: [256, 256, 256],
            volume_dims: [5.0, 5.0, 5.0],
            near_plane: 0.4,
            far_plane: 4.0,
            mu: 0.1,
            max_weight: 100.0,
            bilateral_radius: 2,
            bilateral_delta: 4.0,
            e_delta: 0.1,
            distance_threshold: 0.1,
            normal_threshold: 0.8,
            tracking_threshold: 0.15,
            rsme_threshold: 2e-2,
            icp_threshold: 1e-5,
            pyramid_iterations: vec![10, 5, 4],
            integration_rate: 1,
            rendering_rate: 4,
            initial_position_factors: [0.5, 0.5, 0.0],
        }
    }
}

impl KinfuConfig {
    /// Load a configuration from a JSON file. Missing fields fall back
    /// to their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config {}", path.as_ref().display()))?;
        let config: Self = serde_json::from_str(&text).context("parsing config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency before any buffer is allocated.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.scale >= 1, "scale must be at least 1");
        anyhow::ensure!(
            self.input_width % self.scale == 0 && self.input_height % self.scale == 0,
            "input resolution {}x{} is not divisible by scale {}",
            self.input_width,
            self.input_height,
            self.scale
        );
        anyhow::ensure!(
            self.volume_size.iter().all(|&n| n >= 2),
            "volume size must be at least 2 voxels per axis"
        );
        anyhow::ensure!(
            self.volume_dims.iter().all(|&d| d > 0.0),
            "volume dimensions must be positive"
        );
        anyhow::ensure!(
            !self.pyramid_iterations.is_empty(),
            "at least one pyramid level is required"
        );
        let levels = self.pyramid_iterations.len();
        anyhow::ensure!(
            self.scaled_width() >> (levels - 1) > 0 && self.scaled_height() >> (levels - 1) > 0,
            "too many pyramid levels for a {}x{} image",
            self.scaled_width(),
            self.scaled_height()
        );
        anyhow::ensure!(self.mu > 0.0, "mu must be positive");
        anyhow::ensure!(self.integration_rate >= 1, "integration rate must be at least 1");
        Ok(())
    }

    /// Processing resolution after subsampling.
    pub fn scaled_width(&self) -> usize {
        self.input_width / self.scale
    }

    pub fn scaled_height(&self) -> usize {
        self.input_height / self.scale
    }

    /// Intrinsics at processing resolution.
    pub fn scaled_camera(&self) -> CameraIntrinsics {
        self.camera.scaled(self.scale as f32)
    }

    pub fn volume_dims_vec(&self) -> Vector3<f32> {
        Vector3::new(self.volume_dims[0], self.volume_dims[1], self.volume_dims[2])
    }

    /// World-space position of the camera at frame zero.
    pub fn initial_position(&self) -> Vector3<f32> {
        Vector3::new(
            self.initial_position_factors[0] * self.volume_dims[0],
            self.initial_position_factors[1] * self.volume_dims[1],
            self.initial_position_factors[2] * self.volume_dims[2],
        )
    }

    /// Initial camera pose: a pure translation into the volume.
    pub fn initial_pose(&self) -> Matrix4<f32> {
        let p = self.initial_position();
        let twist = Vector6::new(p.x, p.y, p.z, 0.0, 0.0, 0.0);
        se3_exp(&twist)
    }

    /// Fine raycast step: one voxel of the smallest pitch.
    pub fn small_step(&self) -> f32 {
        let min_dim = self.volume_dims.iter().cloned().fold(f32::INFINITY, f32::min);
        let max_size = self.volume_size.iter().cloned().max().unwrap_or(1);
        min_dim / max_size as f32
    }

    /// Coarse raycast step: three quarters of the truncation band.
    pub fn large_step(&self) -> f32 {
        0.75 * self.mu
    }
}
