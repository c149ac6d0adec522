//! Compute dispatch sizing.

use ash::vk;

/// Local size (x and y) of the screen-space cloud passes.
pub const CLOUD_WORKGROUP: u32 = 32;
/// Local size (x, y and z) of the light-grid pass.
pub const LIGHT_GRID_WORKGROUP: u32 = 8;

/// Fewest groups of `workgroup` invocations that cover `extent`.
#[inline]
pub fn workgroup_count(extent: u32, workgroup: u32) -> u32 {
    extent.div_ceil(workgroup)
}

/// Group counts passed to `vkCmdDispatch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchSize {
    /// Covers a 2D image with square workgroups.
    pub fn for_extent_2d(extent: vk::Extent2D, workgroup: u32) -> Self {
        Self {
            x: workgroup_count(extent.width, workgroup),
            y: workgroup_count(extent.height, workgroup),
            z: 1,
        }
    }

    /// Covers a volume with cubic workgroups.
    pub fn for_extent_3d(extent: vk::Extent3D, workgroup: u32) -> Self {
        Self {
            x: workgroup_count(extent.width, workgroup),
            y: workgroup_count(extent.height, workgroup),
            z: workgroup_count(extent.depth, workgroup),
        }
    }
}

/// Half-resolution extent used by the near-field pass, at least 1×1.
pub fn half_extent(extent: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: (extent.width / 2).max(1),
        height: (extent.height / 2).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(extent: u32, workgroup: u32) {
        let groups = workgroup_count(extent, workgroup);
        assert!(groups * workgroup >= extent, "{} / {}", extent, workgroup);
        if groups > 0 {
            assert!((groups - 1) * workgroup < extent, "{} / {}", extent, workgroup);
        }
    }

    #[test]
    fn test_known_counts() {
        assert_eq!(workgroup_count(1920, 32), 60);
        assert_eq!(workgroup_count(1921, 32), 61);
        assert_eq!(workgroup_count(1080, 32), 34);
        assert_eq!(workgroup_count(512, 8), 64);
        assert_eq!(workgroup_count(64, 8), 8);
    }

    #[test]
    fn test_counts_cover_exactly() {
        let extents = [1, 7, 31, 32, 33, 540, 719, 720, 960, 1080, 1279, 1920, 2561];
        for extent in extents {
            for workgroup in [1, 8, 16, 32] {
                assert_covers(extent, workgroup);
            }
        }
    }

    #[test]
    fn test_light_grid_dispatch() {
        let size = DispatchSize::for_extent_3d(
            vk::Extent3D {
                width: 512,
                height: 512,
                depth: 64,
            },
            LIGHT_GRID_WORKGROUP,
        );
        assert_eq!(size, DispatchSize { x: 64, y: 64, z: 8 });
    }

    #[test]
    fn test_half_extent_never_zero() {
        let extent = vk::Extent2D {
            width: 1,
            height: 1081,
        };
        assert_eq!(
            half_extent(extent),
            vk::Extent2D {
                width: 1,
                height: 540
            }
        );
        let near = DispatchSize::for_extent_2d(
            half_extent(vk::Extent2D {
                width: 1920,
                height: 1080,
            }),
            CLOUD_WORKGROUP,
        );
        assert_eq!(near, DispatchSize { x: 30, y: 17, z: 1 });
    }
}
