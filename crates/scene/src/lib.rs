//! Camera and sky state fed to the cloud passes.
//!
//! - Orbit camera with current and previous snapshots
//! - Scene clock and sun position

pub mod camera;
pub mod sky;

pub use camera::{CameraParamsUbo, CameraUbo, Direction, OrbitCamera};
pub use sky::{SkyClock, TimeUbo};
