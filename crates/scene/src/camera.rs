//! Orbit camera used by the cloud passes.
//!
//! The camera orbits a fixed pivot above the cloud layer. It keeps the
//! snapshot uploaded this frame and the one uploaded last frame, which the
//! reprojection pass needs to find where a pixel was a frame ago.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use tracing::debug;

/// Vertical field of view in degrees.
pub const FOV_Y_DEGREES: f32 = 45.0;
pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 100.0;
/// Number of sub-pixel jitter positions cycled by the far-field pass.
pub const PIXEL_OFFSET_PERIOD: u32 = 16;
/// Orbit radius bounds.
pub const MIN_RADIUS: f32 = 1.0;
pub const MAX_RADIUS: f32 = 50.0;
/// Degrees turned by one arrow-key press.
pub const ROTATE_STEP_DEGREES: f32 = 2.0;

const DEFAULT_PIVOT: Vec3 = Vec3::new(100.0, 300.0, 100.0);

/// View, projection and eye position as uploaded to the camera buffers.
///
/// 144 bytes: `view` at 0, `proj` at 64, `position` at 128.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraUbo {
    pub view: Mat4,
    pub proj: Mat4,
    pub position: Vec4,
}

/// Projection parameters the raymarch passes use to build view rays.
///
/// 16 bytes; `pixel_offset` is in `[0, 16)`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraParamsUbo {
    pub half_tan_fov: f32,
    pub aspect_ratio: f32,
    pub pixel_offset: u32,
    pub _pad: u32,
}

/// Direction of a keyboard move or rotate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
}

/// Camera orbiting a pivot at radius `r`, yaw `theta` and pitch `phi`.
///
/// Angles are in degrees.
#[derive(Clone, Debug)]
pub struct OrbitCamera {
    pivot: Vec3,
    r: f32,
    theta: f32,
    phi: f32,
    aspect: f32,
    current: CameraUbo,
    previous: CameraUbo,
    pixel_offset: u32,
}

impl OrbitCamera {
    /// Creates a camera looking straight down from the default pivot.
    pub fn new(aspect: f32) -> Self {
        let mut camera = Self {
            pivot: DEFAULT_PIVOT,
            r: 10.0,
            theta: 0.0,
            phi: -90.0,
            aspect,
            current: CameraUbo::zeroed(),
            previous: CameraUbo::zeroed(),
            pixel_offset: 0,
        };
        camera.current.proj = camera.projection_matrix();
        camera.rebuild_view();
        camera.previous = camera.current;
        camera
    }

    /// Snapshot for the current frame.
    #[inline]
    pub fn snapshot(&self) -> CameraUbo {
        self.current
    }

    /// Snapshot that was current one frame ago.
    #[inline]
    pub fn previous_snapshot(&self) -> CameraUbo {
        self.previous
    }

    pub fn params(&self) -> CameraParamsUbo {
        CameraParamsUbo {
            half_tan_fov: (FOV_Y_DEGREES * 0.5).to_radians().tan(),
            aspect_ratio: self.aspect,
            pixel_offset: self.pixel_offset,
            _pad: 0,
        }
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.r
    }

    /// Yaw and pitch in degrees.
    #[inline]
    pub fn angles(&self) -> (f32, f32) {
        (self.theta, self.phi)
    }

    #[inline]
    pub fn pivot(&self) -> Vec3 {
        self.pivot
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.current.position.truncate()
    }

    /// Adds to yaw and pitch and pulls the camera `dz` toward the pivot.
    ///
    /// The radius is clamped to `[MIN_RADIUS, MAX_RADIUS]`.
    pub fn advance_orbit(&mut self, dx: f32, dy: f32, dz: f32) {
        self.theta += dx;
        self.phi += dy;
        self.r = (self.r - dz).clamp(MIN_RADIUS, MAX_RADIUS);
        self.rebuild_view();
    }

    /// Moves the pivot `speed` units along the camera's own axes.
    pub fn advance_position(&mut self, direction: Direction, speed: f32) {
        let rotation = self.rotation();
        let right = rotation.transform_vector3(Vec3::X);
        let up = rotation.transform_vector3(Vec3::Y);
        let back = rotation.transform_vector3(Vec3::Z);
        let step = match direction {
            Direction::Forward => -back,
            Direction::Backward => back,
            Direction::Left => -right,
            Direction::Right => right,
            Direction::Up => up,
            Direction::Down => -up,
        };
        self.pivot += step * speed;
        self.rebuild_view();
    }

    /// Turns the camera by one arrow-key step.
    pub fn rotate(&mut self, direction: Direction) {
        let (dx, dy) = match direction {
            Direction::Left => (ROTATE_STEP_DEGREES, 0.0),
            Direction::Right => (-ROTATE_STEP_DEGREES, 0.0),
            Direction::Up => (0.0, ROTATE_STEP_DEGREES),
            Direction::Down => (0.0, -ROTATE_STEP_DEGREES),
            Direction::Forward | Direction::Backward => return,
        };
        self.advance_orbit(dx, dy, 0.0);
    }

    /// Makes the current snapshot the previous one.
    pub fn commit_previous_snapshot(&mut self) {
        self.previous = self.current;
    }

    /// Steps the sub-pixel jitter, wrapping at [`PIXEL_OFFSET_PERIOD`].
    pub fn advance_pixel_offset(&mut self) {
        self.pixel_offset = (self.pixel_offset + 1) % PIXEL_OFFSET_PERIOD;
    }

    /// Rebuilds the projection for a new window aspect.
    pub fn set_aspect(&mut self, aspect: f32) {
        debug!("Camera aspect {:.3} -> {:.3}", self.aspect, aspect);
        self.aspect = aspect;
        self.current.proj = self.projection_matrix();
    }

    fn rotation(&self) -> Mat4 {
        Mat4::from_rotation_y(self.theta.to_radians()) * Mat4::from_rotation_x(self.phi.to_radians())
    }

    fn rebuild_view(&mut self) {
        let transform = Mat4::from_translation(self.pivot)
            * self.rotation()
            * Mat4::from_translation(Vec3::new(0.0, 0.0, self.r));
        self.current.view = transform.inverse();
        self.current.position = transform * Vec4::new(0.0, 0.0, 0.0, 1.0);
    }

    /// Perspective projection with the Vulkan Y flip.
    fn projection_matrix(&self) -> Mat4 {
        let mut proj = Mat4::perspective_rh(
            FOV_Y_DEGREES.to_radians(),
            self.aspect,
            NEAR_PLANE,
            FAR_PLANE,
        );
        proj.y_axis.y *= -1.0;
        proj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq_vec3(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-3
    }

    #[test]
    fn test_ubo_layouts() {
        assert_eq!(std::mem::size_of::<CameraUbo>(), 144);
        assert_eq!(std::mem::offset_of!(CameraUbo, proj), 64);
        assert_eq!(std::mem::offset_of!(CameraUbo, position), 128);
        assert_eq!(std::mem::size_of::<CameraParamsUbo>(), 16);
        assert_eq!(std::mem::offset_of!(CameraParamsUbo, pixel_offset), 8);
    }

    #[test]
    fn test_initial_camera_looks_down_on_pivot() {
        let camera = OrbitCamera::new(16.0 / 9.0);
        assert_eq!(camera.radius(), 10.0);
        assert_eq!(camera.angles(), (0.0, -90.0));

        // Pitch -90 turns the +Z offset into +Y: 10 units above the pivot.
        assert!(approx_eq_vec3(
            camera.position(),
            Vec3::new(100.0, 310.0, 100.0)
        ));
        let pivot_in_view = camera.snapshot().view.transform_point3(camera.pivot());
        assert!(approx_eq_vec3(pivot_in_view, Vec3::new(0.0, 0.0, -10.0)));
        assert_eq!(camera.previous_snapshot(), camera.snapshot());
    }

    #[test]
    fn test_projection_is_y_flipped() {
        let camera = OrbitCamera::new(1.0);
        assert!(camera.snapshot().proj.y_axis.y < 0.0);
        let params = camera.params();
        assert!((params.half_tan_fov - 22.5f32.to_radians().tan()).abs() < 1e-6);
        assert_eq!(params.aspect_ratio, 1.0);
    }

    #[test]
    fn test_radius_clamps() {
        let mut camera = OrbitCamera::new(1.0);
        camera.advance_orbit(0.0, 0.0, 100.0);
        assert_eq!(camera.radius(), MIN_RADIUS);
        camera.advance_orbit(0.0, 0.0, -100.0);
        assert_eq!(camera.radius(), MAX_RADIUS);
        camera.advance_orbit(5.0, -3.0, 0.0);
        assert_eq!(camera.angles(), (5.0, -93.0));
    }

    #[test]
    fn test_pixel_offset_wraps() {
        let mut camera = OrbitCamera::new(1.0);
        for _ in 0..PIXEL_OFFSET_PERIOD - 1 {
            camera.advance_pixel_offset();
        }
        assert_eq!(camera.params().pixel_offset, 15);
        camera.advance_pixel_offset();
        assert_eq!(camera.params().pixel_offset, 0);
    }

    #[test]
    fn test_commit_copies_current_into_previous() {
        let mut camera = OrbitCamera::new(1.0);
        let before = camera.snapshot();
        camera.advance_orbit(10.0, 0.0, 0.0);
        assert_eq!(camera.previous_snapshot(), before);
        assert_ne!(camera.snapshot(), before);

        camera.commit_previous_snapshot();
        assert_eq!(camera.previous_snapshot(), camera.snapshot());
    }

    #[test]
    fn test_advance_position_moves_pivot() {
        let mut camera = OrbitCamera::new(1.0);
        let start = camera.pivot();
        camera.advance_position(Direction::Right, 2.0);
        assert!(approx_eq_vec3(camera.pivot(), start + Vec3::new(2.0, 0.0, 0.0)));
        camera.advance_position(Direction::Left, 2.0);
        assert!(approx_eq_vec3(camera.pivot(), start));

        // Looking down, "forward" is world -Y.
        camera.advance_position(Direction::Forward, 1.0);
        assert!(approx_eq_vec3(camera.pivot(), start - Vec3::Y));
    }

    #[test]
    fn test_set_aspect_keeps_view() {
        let mut camera = OrbitCamera::new(1.0);
        let view = camera.snapshot().view;
        camera.set_aspect(2.0);
        assert_eq!(camera.snapshot().view, view);
        assert_eq!(camera.params().aspect_ratio, 2.0);
    }
}
