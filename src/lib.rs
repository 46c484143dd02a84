pub mod config;
pub mod device;
pub mod geometry;
pub mod imaging;
pub mod pipeline;
pub mod raycast;
pub mod tracking;
pub mod volume;
