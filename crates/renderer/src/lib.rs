//! Volumetric cloud frame orchestration.
//!
//! This crate turns the RHI into a cloud renderer:
//! - Binding layer: fixed set-layout shapes, a tallied descriptor pool and
//!   layout validation before every bind
//! - Pass programs for the light grid, the raymarch schedules, reprojection
//!   and the fullscreen composite
//! - The frame loop and the Vulkan [`Renderer`] that implements its stages
//! - The egui parameter panel and the painter that draws it

pub mod assets;
pub mod binding;
pub mod dispatch;
pub mod error;
pub mod frame_loop;
pub mod frame_resources;
pub mod overlay;
pub mod pass;
pub mod pingpong;
pub mod quad;
pub mod renderer;
pub mod ubo;
pub mod ui;

pub use binding::{BindingPlan, BindingRegistry, BindingSlot, LayoutShape, PoolCapacity};
pub use error::{BindingError, RendererError, RendererResult};
pub use frame_loop::{
    CameraSource, FrameLoop, FrameSnapshot, FrameStages, MAX_FRAMES_IN_FLIGHT, SceneClock,
    TickOutcome,
};
pub use pingpong::{FrameParity, PingPong};
pub use renderer::Renderer;
pub use ui::{CloudModel, Overlay, OverlayFrame, ParameterPanel, UiParams};
