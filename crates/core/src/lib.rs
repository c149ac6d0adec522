//! Core utilities shared by the cloud renderer crates.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Compile-time renderer configuration

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::RendererConfig;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FrameTime, Timer};
