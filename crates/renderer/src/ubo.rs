//! Uniform buffer object layouts.
//!
//! All structs are `#[repr(C)]` and match the std140 blocks declared in the
//! shaders. Camera and time layouts come from `cloud_scene`; the parameter
//! block is filled from the overlay each tick.

use bytemuck::{Pod, Zeroable};

pub use cloud_scene::{CameraParamsUbo, CameraUbo, TimeUbo};

use crate::ui::UiParams;

/// User-tunable parameters as seen by the shaders.
///
/// 48 bytes: nine scalars followed by padding to a 16-byte multiple.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UiParamsUbo {
    pub far_clip: f32,
    pub transmittance_cutoff: f32,
    pub tiling_frequency: f32,
    pub animation_speed: f32,
    pub godrays: u32,
    pub godray_exposure: f32,
    pub sky_turbidity: f32,
    pub cloud_model: u32,
    pub camera_speed: f32,
    pub _pad: [u32; 3],
}

impl From<&UiParams> for UiParamsUbo {
    fn from(params: &UiParams) -> Self {
        Self {
            far_clip: params.far_clip,
            transmittance_cutoff: params.transmittance_cutoff,
            tiling_frequency: params.tiling_frequency,
            animation_speed: params.animation_speed,
            godrays: params.godrays as u32,
            godray_exposure: params.godray_exposure,
            sky_turbidity: params.sky_turbidity,
            cloud_model: params.cloud_model.as_u32(),
            camera_speed: params.camera_speed,
            _pad: [0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    use crate::ui::CloudModel;

    #[test]
    fn test_ubo_sizes() {
        assert_eq!(size_of::<CameraUbo>(), 144);
        assert_eq!(size_of::<CameraParamsUbo>(), 16);
        assert_eq!(size_of::<TimeUbo>(), 20);
        assert_eq!(size_of::<UiParamsUbo>(), 48);
    }

    #[test]
    fn test_ui_params_offsets() {
        assert_eq!(offset_of!(UiParamsUbo, godrays), 16);
        assert_eq!(offset_of!(UiParamsUbo, cloud_model), 28);
        assert_eq!(offset_of!(UiParamsUbo, camera_speed), 32);
    }

    #[test]
    fn test_ui_params_copy_verbatim() {
        let params = UiParams {
            godrays: true,
            cloud_model: CloudModel::Legacy,
            far_clip: 1234.0,
            ..UiParams::default()
        };
        let ubo = UiParamsUbo::from(&params);
        assert_eq!(ubo.godrays, 1);
        assert_eq!(ubo.cloud_model, CloudModel::Legacy.as_u32());
        assert_eq!(ubo.far_clip, 1234.0);
        assert_eq!(ubo.camera_speed, params.camera_speed);
        assert_eq!(ubo._pad, [0; 3]);
    }
}
