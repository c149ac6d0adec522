//! Debug parameter panel.
//!
//! The panel holds the user-tunable cloud parameters. They are edited from an
//! egui window or from keyboard shortcuts, and summarized in the window title.
//! [`ParameterPanel::run`] builds the egui frame; the tessellated output is
//! handed to the renderer through [`Overlay::take_frame`].

use cloud_platform::KeyCode;
use tracing::info;

/// Which raymarch schedule the compute frame runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CloudModel {
    /// Half-resolution near field, then full-resolution far field.
    #[default]
    Split,
    /// Single full-resolution raymarch through the modeling volumes.
    Legacy,
}

impl CloudModel {
    pub fn as_u32(self) -> u32 {
        match self {
            CloudModel::Split => 0,
            CloudModel::Legacy => 1,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            CloudModel::Split => CloudModel::Legacy,
            CloudModel::Legacy => CloudModel::Split,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CloudModel::Split => "split",
            CloudModel::Legacy => "legacy",
        }
    }
}

/// Manual sun placement; host-side only.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SunControl {
    pub use_custom_angle: bool,
    pub angle_degrees: f32,
}

impl Default for SunControl {
    fn default() -> Self {
        Self {
            use_custom_angle: false,
            angle_degrees: 45.0,
        }
    }
}

/// User-tunable parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UiParams {
    pub far_clip: f32,
    pub transmittance_cutoff: f32,
    pub tiling_frequency: f32,
    pub animation_speed: f32,
    pub godrays: bool,
    pub godray_exposure: f32,
    pub sky_turbidity: f32,
    pub cloud_model: CloudModel,
    pub camera_speed: f32,
    pub sun: SunControl,
}

impl Default for UiParams {
    fn default() -> Self {
        Self {
            far_clip: 40_000.0,
            transmittance_cutoff: 0.01,
            tiling_frequency: 1.0,
            animation_speed: 1.0,
            godrays: true,
            godray_exposure: 0.5,
            sky_turbidity: 2.0,
            cloud_model: CloudModel::Split,
            camera_speed: 5.0,
            sun: SunControl::default(),
        }
    }
}

const FAR_CLIP_STEP: f32 = 5_000.0;
const EXPOSURE_STEP: f32 = 0.05;
const TURBIDITY_STEP: f32 = 0.25;
const SUN_ANGLE_STEP: f32 = 5.0;

/// Tessellated overlay output of one UI frame.
pub struct OverlayFrame {
    pub primitives: Vec<egui::ClippedPrimitive>,
    /// Texture changes since the last frame was taken.
    pub textures: egui::TexturesDelta,
    pub pixels_per_point: f32,
}

impl Default for OverlayFrame {
    fn default() -> Self {
        Self {
            primitives: Vec::new(),
            textures: egui::TexturesDelta::default(),
            pixels_per_point: 1.0,
        }
    }
}

/// Debug overlay drawn on top of the composite.
pub trait Overlay {
    /// Parameters uploaded this tick.
    fn params(&self) -> UiParams;

    /// Hands over what to paint this tick.
    fn take_frame(&mut self) -> OverlayFrame;
}

/// Parameter panel drawn with egui.
pub struct ParameterPanel {
    params: UiParams,
    ctx: egui::Context,
    visible: bool,
    primitives: Vec<egui::ClippedPrimitive>,
    textures: egui::TexturesDelta,
    pixels_per_point: f32,
}

impl Default for ParameterPanel {
    fn default() -> Self {
        Self::new(UiParams::default())
    }
}

impl ParameterPanel {
    pub fn new(params: UiParams) -> Self {
        Self {
            params,
            ctx: egui::Context::default(),
            visible: true,
            primitives: Vec::new(),
            textures: egui::TexturesDelta::default(),
            pixels_per_point: 1.0,
        }
    }

    pub fn params_mut(&mut self) -> &mut UiParams {
        &mut self.params
    }

    /// Context the window integration feeds input into.
    pub fn context(&self) -> &egui::Context {
        &self.ctx
    }

    /// Runs one UI frame and tessellates it.
    ///
    /// Texture updates accumulate until [`Overlay::take_frame`], so a frame
    /// skipped by the loop loses no font atlas upload.
    pub fn run(&mut self, input: egui::RawInput) -> egui::PlatformOutput {
        let ctx = self.ctx.clone();
        let visible = self.visible;
        let params = &mut self.params;
        let output = ctx.run(input, |ctx| {
            if visible {
                show_parameters(ctx, params);
            }
        });

        self.textures.append(output.textures_delta);
        self.pixels_per_point = output.pixels_per_point;
        self.primitives = ctx.tessellate(output.shapes, output.pixels_per_point);
        output.platform_output
    }

    /// Applies a shortcut. Returns `false` for keys the panel ignores.
    ///
    /// | Key | Effect |
    /// |---|---|
    /// | F1 | toggle cloud model |
    /// | F2 | toggle godrays |
    /// | F3/F4 | godray exposure down/up |
    /// | F5/F6 | sky turbidity down/up |
    /// | F7/F8 | far clip down/up |
    /// | F9 | toggle manual sun angle |
    /// | F10/F11 | sun angle down/up |
    /// | F12 | show or hide the panel |
    pub fn handle_key(&mut self, key: KeyCode) -> bool {
        let p = &mut self.params;
        match key {
            KeyCode::F1 => p.cloud_model = p.cloud_model.toggled(),
            KeyCode::F2 => p.godrays = !p.godrays,
            KeyCode::F3 => p.godray_exposure = (p.godray_exposure - EXPOSURE_STEP).max(0.0),
            KeyCode::F4 => p.godray_exposure = (p.godray_exposure + EXPOSURE_STEP).min(1.0),
            KeyCode::F5 => p.sky_turbidity = (p.sky_turbidity - TURBIDITY_STEP).max(1.0),
            KeyCode::F6 => p.sky_turbidity = (p.sky_turbidity + TURBIDITY_STEP).min(10.0),
            KeyCode::F7 => p.far_clip = (p.far_clip - FAR_CLIP_STEP).max(FAR_CLIP_STEP),
            KeyCode::F8 => p.far_clip += FAR_CLIP_STEP,
            KeyCode::F9 => p.sun.use_custom_angle = !p.sun.use_custom_angle,
            KeyCode::F10 => {
                p.sun.angle_degrees = (p.sun.angle_degrees - SUN_ANGLE_STEP).rem_euclid(360.0)
            }
            KeyCode::F11 => {
                p.sun.angle_degrees = (p.sun.angle_degrees + SUN_ANGLE_STEP).rem_euclid(360.0)
            }
            KeyCode::F12 => self.visible = !self.visible,
            _ => return false,
        }
        info!("Parameters: {}", self.summary());
        true
    }

    /// One-line description for the window title.
    pub fn summary(&self) -> String {
        let p = &self.params;
        let sun = if p.sun.use_custom_angle {
            format!("{:.0}°", p.sun.angle_degrees)
        } else {
            "cycle".to_string()
        };
        format!(
            "model {} | godrays {} ({:.2}) | turbidity {:.2} | far {:.0} | sun {}",
            p.cloud_model.name(),
            if p.godrays { "on" } else { "off" },
            p.godray_exposure,
            p.sky_turbidity,
            p.far_clip,
            sun
        )
    }
}

impl Overlay for ParameterPanel {
    fn params(&self) -> UiParams {
        self.params
    }

    fn take_frame(&mut self) -> OverlayFrame {
        OverlayFrame {
            primitives: std::mem::take(&mut self.primitives),
            textures: std::mem::take(&mut self.textures),
            pixels_per_point: self.pixels_per_point,
        }
    }
}

fn show_parameters(ctx: &egui::Context, p: &mut UiParams) {
    egui::Window::new("Clouds")
        .default_pos([16.0, 16.0])
        .resizable(false)
        .show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label("Model");
                ui.radio_value(&mut p.cloud_model, CloudModel::Split, CloudModel::Split.name());
                ui.radio_value(&mut p.cloud_model, CloudModel::Legacy, CloudModel::Legacy.name());
            });
            ui.add(egui::Slider::new(&mut p.far_clip, FAR_CLIP_STEP..=200_000.0).text("Far clip"));
            ui.add(
                egui::Slider::new(&mut p.transmittance_cutoff, 0.0..=0.5)
                    .text("Transmittance cutoff"),
            );
            ui.add(egui::Slider::new(&mut p.tiling_frequency, 0.1..=4.0).text("Tiling"));
            ui.add(egui::Slider::new(&mut p.animation_speed, 0.0..=10.0).text("Animation speed"));
            ui.add(egui::Slider::new(&mut p.camera_speed, 0.5..=50.0).text("Camera speed"));

            ui.separator();
            ui.checkbox(&mut p.godrays, "Godrays");
            ui.add_enabled(
                p.godrays,
                egui::Slider::new(&mut p.godray_exposure, 0.0..=1.0).text("Exposure"),
            );
            ui.add(egui::Slider::new(&mut p.sky_turbidity, 1.0..=10.0).text("Turbidity"));

            ui.separator();
            ui.checkbox(&mut p.sun.use_custom_angle, "Manual sun");
            ui.add_enabled(
                p.sun.use_custom_angle,
                egui::Slider::new(&mut p.sun.angle_degrees, 0.0..=360.0).text("Sun angle"),
            );
        });
}
