//! Mouse drag tracking for camera control.

pub use winit::keyboard::KeyCode;

/// Degrees of orbit per pixel of left-drag.
pub const ORBIT_SENSITIVITY: f32 = 0.5;
/// Zoom distance per pixel of right-drag.
pub const ZOOM_SENSITIVITY: f32 = 0.05;

/// Mouse buttons the renderer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
}

impl MouseButton {
    /// Maps a winit button; other buttons are ignored.
    pub fn from_winit(button: winit::event::MouseButton) -> Option<Self> {
        match button {
            winit::event::MouseButton::Left => Some(MouseButton::Left),
            winit::event::MouseButton::Right => Some(MouseButton::Right),
            _ => None,
        }
    }
}

/// Camera motion produced by a drag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Drag {
    /// Yaw and pitch deltas in degrees.
    Orbit { dx: f32, dy: f32 },
    /// Distance to move toward the pivot.
    Zoom { dz: f32 },
}

/// Tracks pressed buttons and the last cursor position.
///
/// Left drag orbits and takes precedence over right drag, which zooms.
/// Deltas are measured from the previous position, so moving the cursor
/// right or down yields negative values.
#[derive(Debug, Default)]
pub struct InputState {
    left_down: bool,
    right_down: bool,
    cursor: (f32, f32),
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A press anchors the drag at the current cursor position.
    pub fn on_mouse_pressed(&mut self, button: MouseButton) {
        match button {
            MouseButton::Left => self.left_down = true,
            MouseButton::Right => self.right_down = true,
        }
    }

    pub fn on_mouse_released(&mut self, button: MouseButton) {
        match button {
            MouseButton::Left => self.left_down = false,
            MouseButton::Right => self.right_down = false,
        }
    }

    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        match button {
            MouseButton::Left => self.left_down,
            MouseButton::Right => self.right_down,
        }
    }

    /// Moves the cursor and returns the drag it produced, if any.
    pub fn on_cursor_moved(&mut self, x: f32, y: f32) -> Option<Drag> {
        let (prev_x, prev_y) = self.cursor;
        self.cursor = (x, y);
        if self.left_down {
            Some(Drag::Orbit {
                dx: (prev_x - x) * ORBIT_SENSITIVITY,
                dy: (prev_y - y) * ORBIT_SENSITIVITY,
            })
        } else if self.right_down {
            Some(Drag::Zoom {
                dz: (prev_y - y) * ZOOM_SENSITIVITY,
            })
        } else {
            None
        }
    }

    pub fn cursor_position(&self) -> (f32, f32) {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hover_produces_no_drag() {
        let mut input = InputState::new();
        assert_eq!(input.on_cursor_moved(10.0, 10.0), None);
        assert_eq!(input.cursor_position(), (10.0, 10.0));
    }

    #[test]
    fn test_left_drag_orbits_at_half_sensitivity() {
        let mut input = InputState::new();
        input.on_cursor_moved(100.0, 100.0);
        input.on_mouse_pressed(MouseButton::Left);
        assert_eq!(
            input.on_cursor_moved(90.0, 104.0),
            Some(Drag::Orbit { dx: 5.0, dy: -2.0 })
        );

        input.on_mouse_released(MouseButton::Left);
        assert!(!input.is_mouse_pressed(MouseButton::Left));
        assert_eq!(input.on_cursor_moved(0.0, 0.0), None);
    }

    #[test]
    fn test_right_drag_zooms_on_vertical_motion() {
        let mut input = InputState::new();
        input.on_cursor_moved(50.0, 200.0);
        input.on_mouse_pressed(MouseButton::Right);
        match input.on_cursor_moved(80.0, 180.0) {
            Some(Drag::Zoom { dz }) => assert!((dz - 1.0).abs() < 1e-6),
            other => panic!("expected zoom, got {:?}", other),
        }
    }

    #[test]
    fn test_left_drag_wins_over_right() {
        let mut input = InputState::new();
        input.on_mouse_pressed(MouseButton::Right);
        input.on_mouse_pressed(MouseButton::Left);
        assert!(matches!(
            input.on_cursor_moved(-2.0, 0.0),
            Some(Drag::Orbit { .. })
        ));
    }

    #[test]
    fn test_middle_button_is_ignored() {
        assert_eq!(
            MouseButton::from_winit(winit::event::MouseButton::Middle),
            None
        );
        assert_eq!(
            MouseButton::from_winit(winit::event::MouseButton::Right),
            Some(MouseButton::Right)
        );
    }
}
