//! Frame orchestrator: owns all persistent state and sequences the
//! per-frame pipeline.
//!
//! One `Pipeline` holds the current and reference views, the TSDF volume,
//! and the ICP pyramid buffers, all shaped from an immutable
//! [`KinfuConfig`]. `process_frame` runs preprocess → track → integrate →
//! raycast with the bootstrap/cadence policy, and returns a per-frame
//! timing and telemetry record.

use std::time::Instant;

use anyhow::Result;
use nalgebra::{Matrix4, Vector3};
use tracing::{debug, info};

use crate::config::KinfuConfig;
use crate::geometry::camera::CameraIntrinsics;
use crate::geometry::ops::{
    depth_to_vertices, rigid_inverse, translation, vertices_to_normals,
};
use crate::imaging::image::Image;
use crate::imaging::kernels::{
    bilateral_filter, gaussian_coefficients, half_sample_robust, mm_to_meters,
};
use crate::raycast::raycast;
use crate::tracking::icp::{estimate_new_pose, reduce, track_pose, PixelOutcome, TrackRow};
use crate::tracking::result::TrackingResult;
use crate::tracking::state::PipelineState;
use crate::volume::{integrate, TsdfVolume};

/// A tracked observation: vertex map, normal map, and the pose they were
/// acquired (or raycast) under.
#[derive(Debug, Clone)]
pub struct View {
    pub vertices: Image<Vector3<f32>>,
    pub normals: Image<Vector3<f32>>,
    pub pose: Matrix4<f32>,
}

impl View {
    fn new(width: usize, height: usize, pose: Matrix4<f32>) -> Self {
        Self {
            vertices: Image::filled(width, height, Vector3::zeros()),
            normals: Image::filled(width, height, Vector3::zeros()),
            pose,
        }
    }
}

/// Per-frame timing breakdown and telemetry, consumed by the benchmark
/// harness.
#[derive(Debug, Clone)]
pub struct FrameStats {
    pub frame: u64,
    /// Filled in by the caller that owns the frame source.
    pub acquisition_s: f64,
    pub preprocessing_s: f64,
    pub tracking_s: f64,
    pub integration_s: f64,
    pub raycasting_s: f64,
    pub total_s: f64,
    /// Tracked camera position in world coordinates.
    pub position: Vector3<f32>,
    pub tracked: bool,
    pub integrated: bool,
}

/// The dense fusion pipeline.
pub struct Pipeline {
    config: KinfuConfig,

    // Camera matrices at processing resolution.
    k: Matrix4<f32>,
    scaled_inv_k: Matrix4<f32>,

    gaussian: Vec<f32>,
    scaled_depth: Image<f32>,
    filtered_depth: Image<f32>,

    pyramid_depths: Vec<Image<f32>>,
    pyramid_vertices: Vec<Image<Vector3<f32>>>,
    pyramid_normals: Vec<Image<Vector3<f32>>>,
    pyramid_rows: Vec<Image<TrackRow>>,

    current_view: View,
    reference_view: View,
    volume: TsdfVolume,

    tracking_result: TrackingResult,
    state: PipelineState,
    frames: u64,
}

impl Pipeline {
    pub fn new(config: KinfuConfig) -> Result<Self> {
        config.validate()?;

        let width = config.scaled_width();
        let height = config.scaled_height();
        let scaled_camera = config.scaled_camera();
        let levels = config.pyramid_iterations.len();

        info!(width, height, levels, "configuring fusion pipeline");
        info!(
            volume_size = ?config.volume_size,
            volume_dims = ?config.volume_dims,
            "allocating volume"
        );

        let mut pyramid_depths = Vec::with_capacity(levels);
        let mut pyramid_vertices = Vec::with_capacity(levels);
        let mut pyramid_normals = Vec::with_capacity(levels);
        let mut pyramid_rows = Vec::with_capacity(levels);
        for level in 0..levels {
            let w = width >> level;
            let h = height >> level;
            debug!(level, w, h, "pyramid level");
            pyramid_depths.push(Image::filled(w, h, 0.0f32));
            pyramid_vertices.push(Image::filled(w, h, Vector3::zeros()));
            pyramid_normals.push(Image::filled(w, h, Vector3::zeros()));
            pyramid_rows.push(Image::filled(w, h, TrackRow::rejected(PixelOutcome::NoInput)));
        }

        let initial_pose = config.initial_pose();

        Ok(Self {
            k: scaled_camera.camera_matrix(),
            scaled_inv_k: scaled_camera.inverse_camera_matrix(),
            gaussian: gaussian_coefficients(config.bilateral_radius, config.bilateral_delta),
            scaled_depth: Image::filled(width, height, 0.0),
            filtered_depth: Image::filled(width, height, 0.0),
            pyramid_depths,
            pyramid_vertices,
            pyramid_normals,
            pyramid_rows,
            current_view: View::new(width, height, initial_pose),
            reference_view: View::new(width, height, Matrix4::identity()),
            volume: TsdfVolume::new(config.volume_size, config.volume_dims_vec()),
            tracking_result: TrackingResult::new(),
            state: PipelineState::Bootstrapping,
            frames: 0,
            config,
        })
    }

    /// Reinitialize the volume, both views, the pyramids, and the frame
    /// counter from the held configuration. The configuration itself is
    /// untouched.
    pub fn reset(&mut self) {
        info!("resetting fusion pipeline");
        self.volume.reset();
        self.current_view.vertices.fill(Vector3::zeros());
        self.current_view.normals.fill(Vector3::zeros());
        self.current_view.pose = self.config.initial_pose();
        self.reference_view.vertices.fill(Vector3::zeros());
        self.reference_view.normals.fill(Vector3::zeros());
        self.reference_view.pose = Matrix4::identity();
        for level in 0..self.pyramid_depths.len() {
            self.pyramid_depths[level].fill(0.0);
            self.pyramid_vertices[level].fill(Vector3::zeros());
            self.pyramid_normals[level].fill(Vector3::zeros());
            self.pyramid_rows[level].fill(TrackRow::rejected(PixelOutcome::NoInput));
        }
        self.tracking_result = TrackingResult::new();
        self.state = PipelineState::Bootstrapping;
        self.frames = 0;
    }

    /// Process one raw depth frame (sensor units, full input resolution).
    pub fn process_frame(&mut self, raw_depth: &Image<f32>) -> Result<FrameStats> {
        anyhow::ensure!(
            raw_depth.width() == self.config.input_width
                && raw_depth.height() == self.config.input_height,
            "depth frame is {}x{}, expected {}x{}",
            raw_depth.width(),
            raw_depth.height(),
            self.config.input_width,
            self.config.input_height
        );

        let t0 = Instant::now();
        self.preprocess(raw_depth);
        let t1 = Instant::now();

        let tracked = self.estimate_pose();
        let t2 = Instant::now();

        let integrated = (tracked && self.frames % self.config.integration_rate == 0)
            || self.frames <= PipelineState::BOOTSTRAP_FRAMES;
        if integrated {
            self.integrate();
        }
        let t3 = Instant::now();

        if self.frames >= PipelineState::BOOTSTRAP_FRAMES {
            self.update_reference_view();
        }
        let t4 = Instant::now();

        let stats = FrameStats {
            frame: self.frames,
            acquisition_s: 0.0,
            preprocessing_s: (t1 - t0).as_secs_f64(),
            tracking_s: (t2 - t1).as_secs_f64(),
            integration_s: (t3 - t2).as_secs_f64(),
            raycasting_s: (t4 - t3).as_secs_f64(),
            total_s: (t4 - t0).as_secs_f64(),
            position: translation(&self.current_view.pose),
            tracked,
            integrated,
        };

        debug!(
            frame = self.frames,
            tracked, integrated, "frame processed"
        );

        self.frames += 1;
        self.state = PipelineState::of_frame(self.frames);
        Ok(stats)
    }

    /// Scale to meters and bilateral-filter the incoming depth.
    fn preprocess(&mut self, raw_depth: &Image<f32>) {
        mm_to_meters(&mut self.scaled_depth, raw_depth, self.config.scale);
        bilateral_filter(
            &mut self.filtered_depth,
            &self.scaled_depth,
            &self.gaussian,
            self.config.e_delta,
            self.config.bilateral_radius,
        );
    }

    /// Coarse-to-fine ICP against the reference view. Returns whether the
    /// tracked pose met the acceptance thresholds and was adopted.
    fn estimate_pose(&mut self) -> bool {
        let config = &self.config;
        let levels = config.pyramid_iterations.len();

        // Rebuild the pyramid from the filtered level 0 downward.
        self.pyramid_depths[0].copy_from(&self.filtered_depth);
        for level in 1..levels {
            let (finer, coarser) = self.pyramid_depths.split_at_mut(level);
            half_sample_robust(&mut coarser[0], &finer[level - 1], config.e_delta * 3.0, 1);
        }

        let scaled_camera = config.scaled_camera();
        for level in 0..levels {
            let cam: CameraIntrinsics = scaled_camera.scaled((1u32 << level) as f32);
            depth_to_vertices(
                &mut self.pyramid_vertices[level],
                &self.pyramid_depths[level],
                &cam.inverse_camera_matrix(),
            );
            vertices_to_normals(&mut self.pyramid_normals[level], &self.pyramid_vertices[level]);
        }

        // Project world points into the reference view's pixel grid.
        let project_reference = self.k * rigid_inverse(&self.reference_view.pose);

        let mut pose = self.current_view.pose;
        for level in (0..levels).rev() {
            for _ in 0..config.pyramid_iterations[level] {
                track_pose(
                    &mut self.pyramid_rows[level],
                    &self.pyramid_vertices[level],
                    &self.pyramid_normals[level],
                    &self.reference_view.vertices,
                    &self.reference_view.normals,
                    &pose,
                    &project_reference,
                    config.distance_threshold,
                    config.normal_threshold,
                );

                let sums = reduce(&self.pyramid_rows[level]);
                let converged =
                    estimate_new_pose(&mut self.tracking_result, &sums, &pose, config.icp_threshold);
                pose = self.tracking_result.pose;
                if converged {
                    break;
                }
            }
        }

        let pixels = config.scaled_width() * config.scaled_height();
        let tracked = self.tracking_result.rsme(pixels) < config.rsme_threshold
            && self.tracking_result.tracked_fraction(pixels) >= config.tracking_threshold;
        if tracked {
            self.current_view.pose = self.tracking_result.pose;
        }
        tracked
    }

    /// Fuse the scaled depth frame into the volume under the current pose.
    fn integrate(&mut self) {
        let inv_track = rigid_inverse(&self.current_view.pose);
        integrate(
            &mut self.volume,
            &self.scaled_depth,
            &inv_track,
            &self.k,
            self.config.mu,
            self.config.max_weight,
        );
    }

    /// Raycast the volume from the current pose into the reference view.
    fn update_reference_view(&mut self) {
        self.reference_view.pose = self.current_view.pose;
        let view = self.current_view.pose * self.scaled_inv_k;
        raycast(
            &mut self.reference_view.vertices,
            &mut self.reference_view.normals,
            &self.volume,
            &view,
            self.config.near_plane,
            self.config.far_plane,
            self.config.large_step(),
            self.config.small_step(),
        );
    }

    pub fn config(&self) -> &KinfuConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn current_pose(&self) -> &Matrix4<f32> {
        &self.current_view.pose
    }

    pub fn tracking_result(&self) -> &TrackingResult {
        &self.tracking_result
    }

    pub fn volume(&self) -> &TsdfVolume {
        &self.volume
    }

    pub fn reference_view(&self) -> &View {
        &self.reference_view
    }
}
