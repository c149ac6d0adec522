//! Presentation loop.
//!
//! [`FrameLoop::tick`] drives one frame through a [`FrameStages`]
//! implementation in a fixed order:
//!
//! 0. skip the frame while the surface has no area
//! 1. wait for the slot's in-flight fence
//! 2. upload the camera, scene and UI snapshots
//! 3. submit compute
//! 4. acquire a swapchain image; an out-of-date swapchain is rebuilt and the
//!    rest of the frame is skipped
//! 5. record and submit graphics
//! 6. present, rebuilding when the swapchain went stale
//! 7. advance the frame counter
//! 8. advance the clock and commit the camera's previous snapshot
//!
//! Step 8 runs on skipped frames too, so the scene keeps moving while the
//! window is being resized or sits minimized.

use cloud_scene::{CameraParamsUbo, CameraUbo, OrbitCamera, SkyClock, TimeUbo};
use tracing::{debug, warn};

use crate::pingpong::FrameParity;
use crate::ui::{CloudModel, Overlay, UiParams};

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Source of the camera uniforms.
pub trait CameraSource {
    fn snapshot(&self) -> CameraUbo;
    fn previous_snapshot(&self) -> CameraUbo;
    fn params(&self) -> CameraParamsUbo;
    /// Makes the current view the one the next frame reprojects from.
    fn commit_previous_snapshot(&mut self);
    fn advance_pixel_offset(&mut self);
}

impl CameraSource for OrbitCamera {
    fn snapshot(&self) -> CameraUbo {
        OrbitCamera::snapshot(self)
    }

    fn previous_snapshot(&self) -> CameraUbo {
        OrbitCamera::previous_snapshot(self)
    }

    fn params(&self) -> CameraParamsUbo {
        OrbitCamera::params(self)
    }

    fn commit_previous_snapshot(&mut self) {
        OrbitCamera::commit_previous_snapshot(self)
    }

    fn advance_pixel_offset(&mut self) {
        OrbitCamera::advance_pixel_offset(self)
    }
}

/// Source of the scene time uniform.
pub trait SceneClock {
    fn snapshot(&self) -> TimeUbo;
    fn advance_time(&mut self, use_custom_sun_angle: bool, custom_angle_degrees: f32);
}

impl SceneClock for SkyClock {
    fn snapshot(&self) -> TimeUbo {
        SkyClock::snapshot(self)
    }

    fn advance_time(&mut self, use_custom_sun_angle: bool, custom_angle_degrees: f32) {
        SkyClock::advance_time(self, use_custom_sun_angle, custom_angle_degrees)
    }
}

/// Everything uploaded into a frame slot's uniform buffers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameSnapshot {
    pub camera: CameraUbo,
    pub previous_camera: CameraUbo,
    pub camera_params: CameraParamsUbo,
    pub time: TimeUbo,
    pub ui: UiParams,
}

impl FrameSnapshot {
    pub fn capture(camera: &dyn CameraSource, clock: &dyn SceneClock, ui: UiParams) -> Self {
        Self {
            camera: camera.snapshot(),
            previous_camera: camera.previous_snapshot(),
            camera_params: camera.params(),
            time: clock.snapshot(),
            ui,
        }
    }
}

/// Result of presenting an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Presented, but the swapchain must be rebuilt before the next frame.
    NeedsRebuild,
}

/// GPU side of one frame, split at the points where the loop decides.
pub trait FrameStages {
    type Error;

    /// `false` while the surface is zero-sized and no frame can be built.
    fn surface_ready(&mut self) -> Result<bool, Self::Error>;

    /// Blocks until the GPU has finished the slot's previous frame.
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), Self::Error>;

    fn upload(&mut self, slot: usize, snapshot: &FrameSnapshot) -> Result<(), Self::Error>;

    /// Records and submits the compute schedule for `model`.
    fn submit_compute(
        &mut self,
        slot: usize,
        parity: FrameParity,
        model: CloudModel,
    ) -> Result<(), Self::Error>;

    /// Returns `None` when the swapchain is out of date.
    fn acquire(&mut self, slot: usize) -> Result<Option<u32>, Self::Error>;

    /// Records the composite and overlay into `image` and submits them.
    fn submit_graphics(
        &mut self,
        slot: usize,
        image: u32,
        parity: FrameParity,
        overlay: &mut dyn Overlay,
    ) -> Result<(), Self::Error>;

    fn present(&mut self, slot: usize, image: u32) -> Result<PresentStatus, Self::Error>;

    /// Recreates the swapchain and everything sized from it.
    fn rebuild(&mut self) -> Result<(), Self::Error>;
}

/// How a tick ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Presented,
    PresentedAndRebuilt,
    /// The swapchain was out of date at acquire; nothing was presented.
    SkippedOutOfDate,
    /// The surface has no area; no stage ran.
    SkippedMinimized,
}

/// Frame counter and the tick sequence.
#[derive(Debug, Default)]
pub struct FrameLoop {
    frame: u64,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self { frame: 0 }
    }

    /// Completed frames so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn slot(&self) -> usize {
        (self.frame % MAX_FRAMES_IN_FLIGHT as u64) as usize
    }

    pub fn parity(&self) -> FrameParity {
        FrameParity::from_frame(self.frame)
    }

    pub fn tick<S: FrameStages>(
        &mut self,
        stages: &mut S,
        camera: &mut dyn CameraSource,
        clock: &mut dyn SceneClock,
        overlay: &mut dyn Overlay,
    ) -> Result<TickOutcome, S::Error> {
        let ui = overlay.params();
        let outcome = self.run_frame(stages, &*camera, &*clock, overlay, ui)?;
        update_uniform_buffers(camera, clock, &ui);
        Ok(outcome)
    }

    fn run_frame<S: FrameStages>(
        &mut self,
        stages: &mut S,
        camera: &dyn CameraSource,
        clock: &dyn SceneClock,
        overlay: &mut dyn Overlay,
        ui: UiParams,
    ) -> Result<TickOutcome, S::Error> {
        if !stages.surface_ready()? {
            return Ok(TickOutcome::SkippedMinimized);
        }

        let slot = self.slot();
        let parity = self.parity();

        stages.wait_for_slot(slot)?;
        stages.upload(slot, &FrameSnapshot::capture(camera, clock, ui))?;
        stages.submit_compute(slot, parity, ui.cloud_model)?;

        let Some(image) = stages.acquire(slot)? else {
            warn!("Swapchain out of date at acquire, rebuilding");
            stages.rebuild()?;
            return Ok(TickOutcome::SkippedOutOfDate);
        };

        stages.submit_graphics(slot, image, parity, overlay)?;
        let status = stages.present(slot, image)?;

        self.frame += 1;

        match status {
            PresentStatus::Presented => Ok(TickOutcome::Presented),
            PresentStatus::NeedsRebuild => {
                debug!("Rebuilding after present of frame {}", self.frame);
                stages.rebuild()?;
                Ok(TickOutcome::PresentedAndRebuilt)
            }
        }
    }
}

fn update_uniform_buffers(
    camera: &mut dyn CameraSource,
    clock: &mut dyn SceneClock,
    ui: &UiParams,
) {
    clock.advance_time(ui.sun.use_custom_angle, ui.sun.angle_degrees);
    camera.commit_previous_snapshot();
    camera.advance_pixel_offset();
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use bytemuck::Zeroable;

    use super::*;
    use crate::ui::OverlayFrame;

    #[derive(Clone, Debug, PartialEq)]
    enum Event {
        SurfaceCheck,
        Wait(usize),
        Upload(usize),
        Compute(usize, FrameParity, CloudModel),
        Acquire(usize),
        Graphics(usize, u32, FrameParity),
        Present(usize, u32),
        Rebuild,
        AdvanceTime,
        Commit,
        PixelOffset,
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct RecordingStages {
        log: Log,
        /// Results of successive acquires.
        acquires: Vec<Option<u32>>,
        presents: Vec<PresentStatus>,
        uploads: Vec<FrameSnapshot>,
        /// Surface readiness per tick; ready once exhausted.
        surface: Vec<bool>,
    }

    impl RecordingStages {
        fn new(log: &Log, acquires: Vec<Option<u32>>, presents: Vec<PresentStatus>) -> Self {
            Self {
                log: log.clone(),
                acquires,
                presents,
                uploads: Vec::new(),
                surface: Vec::new(),
            }
        }

        /// Events without the per-tick surface checks.
        fn stage_events(events: &[Event]) -> Vec<Event> {
            events
                .iter()
                .filter(|event| **event != Event::SurfaceCheck)
                .cloned()
                .collect()
        }
    }

    impl FrameStages for RecordingStages {
        type Error = String;

        fn surface_ready(&mut self) -> Result<bool, String> {
            self.log.borrow_mut().push(Event::SurfaceCheck);
            if self.surface.is_empty() {
                Ok(true)
            } else {
                Ok(self.surface.remove(0))
            }
        }

        fn wait_for_slot(&mut self, slot: usize) -> Result<(), String> {
            self.log.borrow_mut().push(Event::Wait(slot));
            Ok(())
        }

        fn upload(&mut self, slot: usize, snapshot: &FrameSnapshot) -> Result<(), String> {
            self.log.borrow_mut().push(Event::Upload(slot));
            self.uploads.push(*snapshot);
            Ok(())
        }

        fn submit_compute(
            &mut self,
            slot: usize,
            parity: FrameParity,
            model: CloudModel,
        ) -> Result<(), String> {
            self.log.borrow_mut().push(Event::Compute(slot, parity, model));
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> Result<Option<u32>, String> {
            self.log.borrow_mut().push(Event::Acquire(slot));
            Ok(self.acquires.remove(0))
        }

        fn submit_graphics(
            &mut self,
            slot: usize,
            image: u32,
            parity: FrameParity,
            _overlay: &mut dyn Overlay,
        ) -> Result<(), String> {
            self.log.borrow_mut().push(Event::Graphics(slot, image, parity));
            Ok(())
        }

        fn present(&mut self, slot: usize, image: u32) -> Result<PresentStatus, String> {
            self.log.borrow_mut().push(Event::Present(slot, image));
            Ok(self.presents.remove(0))
        }

        fn rebuild(&mut self) -> Result<(), String> {
            self.log.borrow_mut().push(Event::Rebuild);
            Ok(())
        }
    }

    struct RecordingCamera {
        log: Log,
        offset: u32,
    }

    impl CameraSource for RecordingCamera {
        fn snapshot(&self) -> CameraUbo {
            CameraUbo::zeroed()
        }

        fn previous_snapshot(&self) -> CameraUbo {
            CameraUbo::zeroed()
        }

        fn params(&self) -> CameraParamsUbo {
            CameraParamsUbo {
                pixel_offset: self.offset,
                ..Default::default()
            }
        }

        fn commit_previous_snapshot(&mut self) {
            self.log.borrow_mut().push(Event::Commit);
        }

        fn advance_pixel_offset(&mut self) {
            self.log.borrow_mut().push(Event::PixelOffset);
            self.offset = (self.offset + 1) % 16;
        }
    }

    struct RecordingClock {
        log: Log,
    }

    impl SceneClock for RecordingClock {
        fn snapshot(&self) -> TimeUbo {
            TimeUbo::zeroed()
        }

        fn advance_time(&mut self, _use_custom_sun_angle: bool, _custom_angle_degrees: f32) {
            self.log.borrow_mut().push(Event::AdvanceTime);
        }
    }

    struct NullOverlay(UiParams);

    impl Overlay for NullOverlay {
        fn params(&self) -> UiParams {
            self.0
        }

        fn take_frame(&mut self) -> OverlayFrame {
            OverlayFrame::default()
        }
    }

    fn position(events: &[Event], wanted: &Event) -> usize {
        events
            .iter()
            .position(|event| event == wanted)
            .unwrap_or_else(|| panic!("{:?} not recorded", wanted))
    }

    #[test]
    fn test_three_ticks_with_a_skipped_frame() {
        let log: Log = Rc::default();
        let mut stages = RecordingStages::new(
            &log,
            vec![Some(0), None, Some(1)],
            vec![PresentStatus::Presented, PresentStatus::Presented],
        );
        let mut camera = RecordingCamera {
            log: log.clone(),
            offset: 0,
        };
        let mut clock = RecordingClock { log: log.clone() };
        let mut overlay = NullOverlay(UiParams::default());
        let mut frames = FrameLoop::new();

        let mut ticks = Vec::new();
        for _ in 0..3 {
            let start = log.borrow().len();
            let outcome = frames
                .tick(&mut stages, &mut camera, &mut clock, &mut overlay)
                .unwrap();
            ticks.push((outcome, RecordingStages::stage_events(&log.borrow()[start..])));
        }

        assert_eq!(ticks[0].0, TickOutcome::Presented);
        assert_eq!(ticks[1].0, TickOutcome::SkippedOutOfDate);
        assert_eq!(ticks[2].0, TickOutcome::Presented);
        assert_eq!(frames.frame(), 2);

        let split = CloudModel::Split;
        assert_eq!(
            ticks[0].1,
            vec![
                Event::Wait(0),
                Event::Upload(0),
                Event::Compute(0, FrameParity::Even, split),
                Event::Acquire(0),
                Event::Graphics(0, 0, FrameParity::Even),
                Event::Present(0, 0),
                Event::AdvanceTime,
                Event::Commit,
                Event::PixelOffset,
            ]
        );
        // The skipped frame keeps its slot and parity for the retry.
        assert_eq!(
            ticks[1].1,
            vec![
                Event::Wait(1),
                Event::Upload(1),
                Event::Compute(1, FrameParity::Odd, split),
                Event::Acquire(1),
                Event::Rebuild,
                Event::AdvanceTime,
                Event::Commit,
                Event::PixelOffset,
            ]
        );
        assert_eq!(ticks[2].1[2], Event::Compute(1, FrameParity::Odd, split));

        for (_, events) in &ticks {
            let commit = position(events, &Event::Commit);
            let compute = events
                .iter()
                .position(|event| matches!(event, Event::Compute(..)))
                .unwrap();
            assert!(compute < commit);
            if let Some(graphics) = events
                .iter()
                .position(|event| matches!(event, Event::Graphics(..)))
            {
                assert!(graphics < commit);
            }
        }

        // Each upload sees the pixel offset advanced by the previous tick.
        let offsets: Vec<u32> = stages
            .uploads
            .iter()
            .map(|snapshot| snapshot.camera_params.pixel_offset)
            .collect();
        assert_eq!(offsets, vec![0, 1, 2]);
    }

    #[test]
    fn test_stale_present_rebuilds_after_counting_the_frame() {
        let log: Log = Rc::default();
        let mut stages =
            RecordingStages::new(&log, vec![Some(2)], vec![PresentStatus::NeedsRebuild]);
        let mut camera = RecordingCamera {
            log: log.clone(),
            offset: 0,
        };
        let mut clock = RecordingClock { log: log.clone() };
        let mut overlay = NullOverlay(UiParams {
            cloud_model: CloudModel::Legacy,
            ..Default::default()
        });
        let mut frames = FrameLoop::new();

        let outcome = frames
            .tick(&mut stages, &mut camera, &mut clock, &mut overlay)
            .unwrap();
        assert_eq!(outcome, TickOutcome::PresentedAndRebuilt);
        assert_eq!(frames.frame(), 1);
        assert_eq!(frames.parity(), FrameParity::Odd);

        let events = log.borrow();
        assert!(events.contains(&Event::Compute(0, FrameParity::Even, CloudModel::Legacy)));
        assert!(position(&events, &Event::Present(0, 2)) < position(&events, &Event::Rebuild));
        assert!(position(&events, &Event::Rebuild) < position(&events, &Event::Commit));
    }

    #[test]
    fn test_minimized_surface_skips_every_stage() {
        let log: Log = Rc::default();
        let mut stages = RecordingStages::new(&log, vec![Some(0)], vec![PresentStatus::Presented]);
        stages.surface = vec![false, false, true];
        let mut camera = RecordingCamera {
            log: log.clone(),
            offset: 0,
        };
        let mut clock = RecordingClock { log: log.clone() };
        let mut overlay = NullOverlay(UiParams::default());
        let mut frames = FrameLoop::new();

        for _ in 0..2 {
            let start = log.borrow().len();
            let outcome = frames
                .tick(&mut stages, &mut camera, &mut clock, &mut overlay)
                .unwrap();
            assert_eq!(outcome, TickOutcome::SkippedMinimized);
            assert_eq!(
                log.borrow()[start..].to_vec(),
                vec![
                    Event::SurfaceCheck,
                    Event::AdvanceTime,
                    Event::Commit,
                    Event::PixelOffset,
                ]
            );
        }
        assert_eq!(frames.frame(), 0);
        assert!(stages.uploads.is_empty());

        // Restored: the first real frame still runs in slot 0.
        let outcome = frames
            .tick(&mut stages, &mut camera, &mut clock, &mut overlay)
            .unwrap();
        assert_eq!(outcome, TickOutcome::Presented);
        assert_eq!(frames.frame(), 1);
        let events = log.borrow();
        assert!(events.contains(&Event::Wait(0)));
        assert!(events.contains(&Event::Graphics(0, 0, FrameParity::Even)));
    }

    #[test]
    fn test_slots_cycle_with_completed_frames() {
        let mut frames = FrameLoop::new();
        let mut slots = Vec::new();
        for _ in 0..4 {
            slots.push((frames.slot(), frames.parity()));
            frames.frame += 1;
        }
        assert_eq!(
            slots,
            vec![
                (0, FrameParity::Even),
                (1, FrameParity::Odd),
                (0, FrameParity::Even),
                (1, FrameParity::Odd),
            ]
        );
    }
}
