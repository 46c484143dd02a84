//! Image container and depth preprocessing kernels.

pub mod image;
pub mod kernels;

pub use image::Image;
pub use kernels::{bilateral_filter, gaussian_coefficients, half_sample_robust, mm_to_meters};
