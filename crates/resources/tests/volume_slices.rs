//! Loads PNG slices written to a temporary directory.

use std::path::{Path, PathBuf};

use cloud_resources::{
    ResourceError, VolumeDims, load_texture_2d, load_volume_slices, slice_path,
};
use image::{Rgba, RgbaImage};

/// Temporary directory removed when dropped, including after a failed
/// assertion.
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "cloud_resources_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    fn join(&self, file: &str) -> PathBuf {
        self.0.join(file)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn write_slice(path: &Path, width: u32, height: u32, value: u8) {
    let image = RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]));
    image.save(path).unwrap();
}

#[test]
fn test_volume_slices_stack_in_z_order() {
    let dir = ScratchDir::new("stack");
    let prefix = dir.join("lowRes");
    for z in 0..4 {
        write_slice(&slice_path(&prefix, z), 8, 8, z as u8 * 10);
    }

    let volume = load_volume_slices(
        &prefix,
        VolumeDims {
            width: 8,
            height: 8,
            depth: 4,
        },
    )
    .unwrap();

    assert!(volume.is_volume());
    assert_eq!((volume.width, volume.height, volume.depth), (8, 8, 4));
    assert_eq!(volume.pixels.len(), 8 * 8 * 4 * 4);
    for z in 0..4 {
        assert_eq!(volume.pixels[z * volume.slice_len()], z as u8 * 10);
    }
}

#[test]
fn test_slice_size_mismatch_is_an_error() {
    let dir = ScratchDir::new("mismatch");
    let prefix = dir.join("hiRes");
    write_slice(&slice_path(&prefix, 0), 4, 4, 0);
    write_slice(&slice_path(&prefix, 1), 4, 2, 0);

    let result = load_volume_slices(&prefix, VolumeDims::cube(4).with_depth(2));
    assert!(matches!(
        result,
        Err(ResourceError::SliceSizeMismatch {
            actual_height: 2,
            ..
        })
    ));
}

#[test]
fn test_missing_slice_is_an_error() {
    let dir = ScratchDir::new("missing");
    let prefix = dir.join("detail");
    write_slice(&slice_path(&prefix, 0), 2, 2, 0);

    let result = load_volume_slices(&prefix, VolumeDims::cube(2));
    assert!(matches!(result, Err(ResourceError::FileNotFound(_))));
}

#[test]
fn test_scratch_dir_is_removed_on_drop() {
    let path = {
        let dir = ScratchDir::new("cleanup");
        write_slice(&dir.join("slice.png"), 2, 2, 0);
        dir.0.clone()
    };
    assert!(!path.exists());
}

#[test]
fn test_texture_2d_loads_as_rgba() {
    let dir = ScratchDir::new("weather");
    let path = dir.join("weather.png");
    write_slice(&path, 16, 8, 200);

    let texture = load_texture_2d(&path).unwrap();
    assert!(!texture.is_volume());
    assert_eq!((texture.width, texture.height), (16, 8));
    assert_eq!(texture.pixels.len(), 16 * 8 * 4);
    assert_eq!(&texture.pixels[..4], &[200, 200, 200, 255]);
}
