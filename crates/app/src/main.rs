//! Volumetric cloud renderer - main entry point.
//!
//! Opens the window, builds the renderer and runs one frame per redraw.
//! Window events reach the egui parameter panel first; whatever it does not
//! consume drives the orbit camera and the panel's shortcuts.

use std::process::ExitCode;

use anyhow::{Context, Result};
use egui_winit::egui;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use cloud_core::RendererConfig;
use cloud_platform::{Drag, InputState, KeyCode, MouseButton, Window};
use cloud_renderer::{FrameLoop, FrameSnapshot, Overlay, ParameterPanel, Renderer, TickOutcome};
use cloud_scene::{Direction, OrbitCamera, SkyClock};

/// What a key press does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    /// Move the pivot at the panel's camera speed.
    Move(Direction),
    /// One orbit step.
    Rotate(Direction),
    Quit,
    /// Anything else goes to the parameter panel.
    Panel(KeyCode),
}

fn map_key(key: KeyCode) -> KeyAction {
    match key {
        KeyCode::KeyW => KeyAction::Move(Direction::Forward),
        KeyCode::KeyS => KeyAction::Move(Direction::Backward),
        KeyCode::KeyA => KeyAction::Move(Direction::Left),
        KeyCode::KeyD => KeyAction::Move(Direction::Right),
        KeyCode::Digit1 => KeyAction::Move(Direction::Up),
        KeyCode::Digit2 => KeyAction::Move(Direction::Down),
        KeyCode::ArrowLeft => KeyAction::Rotate(Direction::Left),
        KeyCode::ArrowRight => KeyAction::Rotate(Direction::Right),
        KeyCode::ArrowUp => KeyAction::Rotate(Direction::Up),
        KeyCode::ArrowDown => KeyAction::Rotate(Direction::Down),
        KeyCode::Escape => KeyAction::Quit,
        other => KeyAction::Panel(other),
    }
}

/// Input that moves the camera or triggers shortcuts. Releases always get
/// through so a drag started on the scene cannot stick.
fn is_scene_input(event: &WindowEvent) -> bool {
    match event {
        WindowEvent::KeyboardInput { .. } | WindowEvent::CursorMoved { .. } => true,
        WindowEvent::MouseInput { state, .. } => state.is_pressed(),
        _ => false,
    }
}

fn apply_drag(camera: &mut OrbitCamera, drag: Drag) {
    match drag {
        Drag::Orbit { dx, dy } => camera.advance_orbit(dx, dy, 0.0),
        Drag::Zoom { dz } => camera.advance_orbit(0.0, 0.0, dz),
    }
}

/// Everything that exists once the window is open.
///
/// The renderer is declared first so it drops before the window it
/// presents to.
struct Running {
    renderer: Renderer,
    egui_state: egui_winit::State,
    window: Window,
    camera: OrbitCamera,
    clock: SkyClock,
    panel: ParameterPanel,
    frames: FrameLoop,
}

impl Running {
    fn new(event_loop: &ActiveEventLoop, config: &RendererConfig) -> Result<Self> {
        let window = Window::new(event_loop, config.width, config.height, &config.title)
            .context("Failed to create window")?;
        let camera = OrbitCamera::new(window.aspect_ratio());
        let clock = SkyClock::new();
        let panel = ParameterPanel::default();

        let initial = FrameSnapshot::capture(&camera, &clock, panel.params());
        let renderer =
            Renderer::new(&window, config, &initial).context("Failed to initialize renderer")?;
        let egui_state = egui_winit::State::new(
            panel.context().clone(),
            egui::ViewportId::ROOT,
            window.inner(),
            Some(window.inner().scale_factor() as f32),
            None,
            None,
        );

        let running = Self {
            renderer,
            egui_state,
            window,
            camera,
            clock,
            panel,
            frames: FrameLoop::new(),
        };
        running.update_title(config);
        Ok(running)
    }

    fn update_title(&self, config: &RendererConfig) {
        self.window
            .set_title(&format!("{} | {}", config.title, self.panel.summary()));
    }

    fn redraw(&mut self, config: &RendererConfig) -> Result<()> {
        let before = self.panel.params();
        let input = self.egui_state.take_egui_input(self.window.inner());
        let output = self.panel.run(input);
        self.egui_state.handle_platform_output(self.window.inner(), output);
        if self.panel.params() != before {
            self.update_title(config);
        }

        let Self {
            renderer,
            camera,
            clock,
            panel,
            frames,
            ..
        } = self;
        let outcome = frames
            .tick(renderer, camera, clock, panel)
            .context("Frame failed")?;
        if outcome != TickOutcome::Presented {
            debug!("Frame {}: {:?}", frames.frame(), outcome);
        }
        Ok(())
    }

    /// Feeds `event` to egui. Returns `true` when the panel consumed it.
    fn on_egui_event(&mut self, event: &WindowEvent) -> bool {
        self.egui_state.on_window_event(self.window.inner(), event).consumed
    }

    fn on_resized(&mut self, width: u32, height: u32) {
        if self.window.resize(width, height) {
            self.camera.set_aspect(self.window.aspect_ratio());
            self.renderer.request_resize(width, height);
        }
    }
}

struct App {
    config: RendererConfig,
    running: Option<Running>,
    input: InputState,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            running: None,
            input: InputState::new(),
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{:#}", e);
        self.failure = Some(e);
        event_loop.exit();
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        match map_key(key) {
            KeyAction::Move(direction) => {
                let speed = running.panel.params().camera_speed;
                running.camera.advance_position(direction, speed);
            }
            KeyAction::Rotate(direction) => running.camera.rotate(direction),
            KeyAction::Quit => {
                info!("Escape pressed, shutting down");
                event_loop.exit();
            }
            KeyAction::Panel(key) => {
                if running.panel.handle_key(key) {
                    running.update_title(&self.config);
                }
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        match Running::new(event_loop, &self.config) {
            Ok(running) => {
                info!("Initialization complete, entering main loop");
                self.running = Some(running);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let consumed = self
            .running
            .as_mut()
            .is_some_and(|running| running.on_egui_event(&event));
        if consumed && is_scene_input(&event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(running) = self.running.as_mut() {
                    running.on_resized(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(running) = self.running.as_mut()
                    && let Err(e) = running.redraw(&self.config)
                {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && let PhysicalKey::Code(key) = event.physical_key
                {
                    self.on_key(event_loop, key);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if let Some(button) = MouseButton::from_winit(button) {
                    match state {
                        ElementState::Pressed => self.input.on_mouse_pressed(button),
                        ElementState::Released => self.input.on_mouse_released(button),
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let drag = self
                    .input
                    .on_cursor_moved(position.x as f32, position.y as f32);
                if let (Some(drag), Some(running)) = (drag, self.running.as_mut()) {
                    apply_drag(&mut running.camera, drag);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = &self.running {
            running.window.request_redraw();
        }
    }
}

fn run() -> Result<()> {
    let config = RendererConfig::default();
    config.validate().context("Invalid renderer configuration")?;

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Tear the renderer down before reporting.
    app.running = None;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    cloud_core::init_logging();
    info!("Starting cloud renderer");

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_keys() {
        assert_eq!(map_key(KeyCode::KeyW), KeyAction::Move(Direction::Forward));
        assert_eq!(map_key(KeyCode::KeyS), KeyAction::Move(Direction::Backward));
        assert_eq!(map_key(KeyCode::KeyA), KeyAction::Move(Direction::Left));
        assert_eq!(map_key(KeyCode::KeyD), KeyAction::Move(Direction::Right));
        assert_eq!(map_key(KeyCode::Digit1), KeyAction::Move(Direction::Up));
        assert_eq!(map_key(KeyCode::Digit2), KeyAction::Move(Direction::Down));
    }

    #[test]
    fn test_arrows_rotate_and_escape_quits() {
        assert_eq!(map_key(KeyCode::ArrowLeft), KeyAction::Rotate(Direction::Left));
        assert_eq!(map_key(KeyCode::ArrowDown), KeyAction::Rotate(Direction::Down));
        assert_eq!(map_key(KeyCode::Escape), KeyAction::Quit);
    }

    #[test]
    fn test_other_keys_reach_the_panel() {
        assert_eq!(map_key(KeyCode::F1), KeyAction::Panel(KeyCode::F1));
        assert_eq!(map_key(KeyCode::KeyQ), KeyAction::Panel(KeyCode::KeyQ));
    }

    #[test]
    fn test_panel_can_swallow_presses_but_not_releases() {
        let device_id = unsafe { winit::event::DeviceId::dummy() };
        let button = winit::event::MouseButton::Left;
        let press = WindowEvent::MouseInput {
            device_id,
            state: ElementState::Pressed,
            button,
        };
        let release = WindowEvent::MouseInput {
            device_id,
            state: ElementState::Released,
            button,
        };
        assert!(is_scene_input(&press));
        assert!(!is_scene_input(&release));
        assert!(!is_scene_input(&WindowEvent::CloseRequested));
        assert!(!is_scene_input(&WindowEvent::RedrawRequested));
    }

    #[test]
    fn test_drags_move_the_camera() {
        let mut camera = OrbitCamera::new(16.0 / 9.0);
        let radius = camera.radius();
        apply_drag(&mut camera, Drag::Zoom { dz: 2.0 });
        assert_eq!(camera.radius(), radius - 2.0);

        let (theta, phi) = camera.angles();
        apply_drag(&mut camera, Drag::Orbit { dx: 3.0, dy: -1.0 });
        assert_eq!(camera.angles(), (theta + 3.0, phi - 1.0));
    }
}
