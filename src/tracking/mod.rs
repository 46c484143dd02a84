//! Coarse-to-fine ICP pose tracking.

pub mod icp;
pub mod result;
pub mod solve;
pub mod state;

pub use icp::{estimate_new_pose, reduce, reduce_sequential, track_pose, PixelOutcome, TrackRow};
pub use result::TrackingResult;
pub use state::PipelineState;
