//! Physical device selection.
//!
//! A device qualifies when it offers Vulkan 1.3, sampler anisotropy and queue
//! families for graphics, compute and presentation. The cloud passes run on a
//! compute queue that is separate from graphics when the hardware has one.

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Resolved queue family indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Picks families from the device's family list.
    ///
    /// Compute and transfer prefer families without graphics support and fall
    /// back to the graphics family. `supports_present` is asked per family
    /// index. Returns `None` when graphics or present is missing.
    pub fn choose(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;
        let mut async_compute = None;
        let mut any_compute = None;
        let mut dedicated_transfer = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }
            let flags = family.queue_flags;
            let is_graphics = flags.contains(vk::QueueFlags::GRAPHICS);
            let is_compute = flags.contains(vk::QueueFlags::COMPUTE);

            if is_graphics && graphics.is_none() {
                graphics = Some(index);
            }
            if is_compute {
                any_compute.get_or_insert(index);
                if !is_graphics {
                    async_compute.get_or_insert(index);
                }
            }
            if flags.contains(vk::QueueFlags::TRANSFER) && !is_graphics && !is_compute {
                dedicated_transfer.get_or_insert(index);
            }
            if present.is_none() && supports_present(index) {
                present = Some(index);
            }
        }

        let graphics = graphics?;
        Some(Self {
            graphics,
            present: present?,
            compute: async_compute.or(any_compute).unwrap_or(graphics),
            transfer: dedicated_transfer.unwrap_or(graphics),
        })
    }

    /// Distinct families, graphics first, for queue creation.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        for family in [self.present, self.compute, self.transfer] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    /// Families that touch images written by compute and read by graphics.
    ///
    /// A single entry means the images can use exclusive sharing.
    pub fn render_families(&self) -> Vec<u32> {
        if self.graphics == self.compute {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.compute]
        }
    }

    /// Whether compute work runs on its own queue family.
    #[inline]
    pub fn has_async_compute(&self) -> bool {
        self.compute != self.graphics
    }
}

/// Information about the selected GPU.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Total size of device-local heaps in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps_as_slice()
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field(
                "api_version",
                &format!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the highest scoring suitable GPU.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] when no device meets the requirements.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let selected = devices
        .into_iter()
        .filter_map(|device| inspect_device(instance, device, surface, surface_loader))
        .map(|info| {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) scored {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            (info, score)
        })
        .max_by_key(|(_, score)| *score)
        .map(|(info, _)| info);

    let Some(info) = selected else {
        warn!("No GPU offers Vulkan 1.3 with graphics, compute and present queues");
        return Err(RhiError::NoSuitableGpu);
    };

    info!(
        "Selected GPU '{}' ({}), queues {:?}",
        info.device_name(),
        info.device_type_name(),
        info.queue_families
    );
    Ok(info)
}

fn inspect_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let name = properties
        .device_name_as_c_str()
        .unwrap_or(c"Unknown")
        .to_owned();

    if !meets_api_version(properties.api_version) {
        debug!("GPU {:?} skipped: Vulkan 1.3 not supported", name);
        return None;
    }
    if features.sampler_anisotropy == vk::FALSE {
        debug!("GPU {:?} skipped: no sampler anisotropy", name);
        return None;
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let Some(queue_families) = QueueFamilies::choose(&families, |index| unsafe {
        surface_loader
            .get_physical_device_surface_support(device, index, surface)
            .unwrap_or(false)
    }) else {
        debug!("GPU {:?} skipped: missing graphics or present queue", name);
        return None;
    };

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
    })
}

fn meets_api_version(version: u32) -> bool {
    (vk::api_version_major(version), vk::api_version_minor(version)) >= (1, 3)
}

fn rate_device(info: &PhysicalDeviceInfo) -> u64 {
    let type_score = match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        _ => 1,
    };
    let vram_mb = (info.device_local_memory() / (1024 * 1024)).min(16_000);
    let async_bonus = if info.queue_families.has_async_compute() {
        500
    } else {
        0
    };
    type_score + vram_mb + async_bonus + u64::from(info.properties.limits.max_image_dimension3_d)
}

/// Returns whether `format` supports `features` with optimal tiling.
pub fn supports_optimal_format(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    format: vk::Format,
    features: vk::FormatFeatureFlags,
) -> bool {
    let properties = unsafe { instance.get_physical_device_format_properties(device, format) };
    properties.optimal_tiling_features.contains(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_universal_family() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let chosen = QueueFamilies::choose(&families, |_| true).unwrap();
        assert_eq!(chosen.graphics, 0);
        assert_eq!(chosen.compute, 0);
        assert_eq!(chosen.transfer, 0);
        assert!(!chosen.has_async_compute());
        assert_eq!(chosen.unique(), vec![0]);
        assert_eq!(chosen.render_families(), vec![0]);
    }

    #[test]
    fn test_prefers_dedicated_compute_and_transfer() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let chosen = QueueFamilies::choose(&families, |index| index == 0).unwrap();
        assert_eq!(chosen.compute, 1);
        assert_eq!(chosen.transfer, 2);
        assert!(chosen.has_async_compute());
        assert_eq!(chosen.unique(), vec![0, 1, 2]);
        assert_eq!(chosen.render_families(), vec![0, 1]);
    }

    #[test]
    fn test_missing_present_is_rejected() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        assert!(QueueFamilies::choose(&families, |_| false).is_none());
    }

    #[test]
    fn test_empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let chosen = QueueFamilies::choose(&families, |_| true).unwrap();
        assert_eq!(chosen.graphics, 1);
        assert_eq!(chosen.present, 1);
    }

    #[test]
    fn test_api_version_gate() {
        assert!(meets_api_version(vk::API_VERSION_1_3));
        assert!(meets_api_version(vk::make_api_version(0, 1, 4, 0)));
        assert!(!meets_api_version(vk::API_VERSION_1_2));
    }
}
