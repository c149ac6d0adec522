//! Platform layer for the cloud renderer.
//!
//! - Window management via winit
//! - Mouse drag tracking
//! - Vulkan surface creation

mod input;
mod window;

pub use input::{Drag, InputState, KeyCode, MouseButton, ORBIT_SENSITIVITY, ZOOM_SENSITIVITY};
pub use window::{Surface, Window, is_renderable_size};

pub use winit::event::{ElementState, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
