//! Geometry utilities: camera model, per-pixel kernels, SE(3) transforms.

pub mod camera;
pub mod ops;
pub mod se3;

pub use camera::CameraIntrinsics;
pub use ops::{rigid_inverse, rigid_transform, rotate, translation, INVALID};
pub use se3::se3_exp;
