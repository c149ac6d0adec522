//! Scene clock and sun position.

use std::f32::consts::TAU;

use bytemuck::{Pod, Zeroable};
use cloud_core::{FrameTime, Timer};
use glam::Vec3;

/// Length of a full day-night cycle in seconds.
pub const ONE_DAY: f32 = 30.0;
/// Distance of the sun from the origin in world units.
pub const SUN_DISTANCE: f32 = 400_000.0;
/// Fixed azimuth tilt of the sun's orbit. The value 45 is taken as radians.
pub const SUN_AZIMUTH: f32 = 45.0;

/// Time and sun position uploaded to the scene buffer.
///
/// 20 bytes, all `f32`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TimeUbo {
    pub delta: f32,
    pub total: f32,
    pub sun_x: f32,
    pub sun_y: f32,
    pub sun_z: f32,
}

impl TimeUbo {
    #[inline]
    pub fn sun_position(&self) -> Vec3 {
        Vec3::new(self.sun_x, self.sun_y, self.sun_z)
    }
}

/// Sun position for elevation angle `theta` (radians).
pub fn sun_position(theta: f32) -> Vec3 {
    Vec3::new(
        -SUN_DISTANCE * theta.cos() * SUN_AZIMUTH.sin(),
        SUN_DISTANCE * theta.cos() * SUN_AZIMUTH.cos(),
        -SUN_DISTANCE * theta.sin(),
    )
}

/// Sun elevation in radians: the custom angle when given, otherwise the
/// position within the current day.
pub fn sun_angle(total: f32, custom_angle_degrees: Option<f32>) -> f32 {
    match custom_angle_degrees {
        Some(degrees) => degrees.to_radians(),
        None => total.rem_euclid(ONE_DAY) / ONE_DAY * TAU,
    }
}

/// Wall clock that advances the time snapshot once per frame.
#[derive(Debug)]
pub struct SkyClock {
    timer: Timer,
    time: TimeUbo,
    theta: f32,
}

impl SkyClock {
    pub fn new() -> Self {
        let mut clock = Self {
            timer: Timer::new(),
            time: TimeUbo::default(),
            theta: 0.0,
        };
        clock.apply(
            FrameTime {
                delta: 0.0,
                total: 0.0,
            },
            None,
        );
        clock
    }

    /// Snapshot for the current frame.
    #[inline]
    pub fn snapshot(&self) -> TimeUbo {
        self.time
    }

    /// Current sun elevation in degrees.
    #[inline]
    pub fn sun_angle_degrees(&self) -> f32 {
        self.theta.to_degrees()
    }

    /// Samples the wall clock and moves the sun.
    ///
    /// With `use_custom_sun_angle` the sun sits at `custom_angle_degrees`
    /// and the day cycle is ignored.
    pub fn advance_time(&mut self, use_custom_sun_angle: bool, custom_angle_degrees: f32) {
        let frame = self.timer.tick();
        let custom = use_custom_sun_angle.then_some(custom_angle_degrees);
        self.apply(frame, custom);
    }

    fn apply(&mut self, frame: FrameTime, custom_angle_degrees: Option<f32>) {
        self.theta = sun_angle(frame.total, custom_angle_degrees);
        let sun = sun_position(self.theta);
        self.time = TimeUbo {
            delta: frame.delta,
            total: frame.total,
            sun_x: sun.x,
            sun_y: sun.y,
            sun_z: sun.z,
        };
    }
}

impl Default for SkyClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq_vec3(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1.0
    }

    #[test]
    fn test_time_ubo_layout() {
        assert_eq!(std::mem::size_of::<TimeUbo>(), 20);
        assert_eq!(std::mem::offset_of!(TimeUbo, sun_z), 16);
    }

    #[test]
    fn test_sun_at_start_of_day() {
        let theta = sun_angle(0.0, None);
        assert_eq!(theta, 0.0);
        // sin(45 rad) = 0.8509, cos(45 rad) = 0.5253
        assert!(approx_eq_vec3(
            sun_position(theta),
            Vec3::new(-340_361.4, 210_128.78, 0.0)
        ));
        assert!(approx_eq_vec3(
            SkyClock::new().snapshot().sun_position(),
            Vec3::new(-340_361.4, 210_128.78, 0.0)
        ));
    }

    #[test]
    fn test_sun_at_quarter_day() {
        let theta = sun_angle(ONE_DAY / 4.0, None);
        assert!((theta - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
        assert!(approx_eq_vec3(
            sun_position(theta),
            Vec3::new(0.0, 0.0, -SUN_DISTANCE)
        ));
    }

    #[test]
    fn test_day_wraps() {
        let a = sun_angle(ONE_DAY * 2.0 + 1.0, None);
        let b = sun_angle(1.0, None);
        assert!((a - b).abs() < 1e-4);
    }

    #[test]
    fn test_custom_angle_overrides_clock() {
        assert_eq!(sun_angle(7.0, Some(90.0)), 90f32.to_radians());

        let mut clock = SkyClock::new();
        clock.advance_time(true, 180.0);
        assert!((clock.sun_angle_degrees() - 180.0).abs() < 1e-3);
        let sun = clock.snapshot().sun_position();
        assert!(sun.y < 0.0);
        assert!(clock.snapshot().total >= clock.snapshot().delta);
    }
}
