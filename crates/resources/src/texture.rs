//! PNG decoding into RGBA8 texel buffers.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ResourceError, ResourceResult};

/// Bytes per RGBA8 texel.
const TEXEL_SIZE: usize = 4;

/// Decoded texels, rows then slices, RGBA8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    /// 1 for 2D textures.
    pub depth: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    #[inline]
    pub fn is_volume(&self) -> bool {
        self.depth > 1
    }

    /// Size in bytes of one z-slice.
    #[inline]
    pub fn slice_len(&self) -> usize {
        self.width as usize * self.height as usize * TEXEL_SIZE
    }
}

/// Declared size of a sliced volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeDims {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl VolumeDims {
    pub const fn cube(size: u32) -> Self {
        Self {
            width: size,
            height: size,
            depth: size,
        }
    }

    pub const fn with_depth(self, depth: u32) -> Self {
        Self { depth, ..self }
    }
}

/// Loads one image as RGBA8.
///
/// # Errors
///
/// Returns [`ResourceError::FileNotFound`] for a missing file and
/// [`ResourceError::Image`] when decoding fails.
pub fn load_texture_2d(path: &Path) -> ResourceResult<TextureData> {
    let rgba = decode_rgba(path)?;
    let (width, height) = rgba.dimensions();
    info!("Loaded texture {:?} ({}x{})", path, width, height);
    Ok(TextureData {
        width,
        height,
        depth: 1,
        pixels: rgba.into_raw(),
    })
}

/// Path of slice `z` of the volume at `prefix`: `{prefix}{z}.png`.
pub fn slice_path(prefix: &Path, z: u32) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!("{z}.png"));
    PathBuf::from(name)
}

/// Loads `dims.depth` slices named `{prefix}{z}.png` into one volume.
///
/// Slice `z` lands at byte offset `z * width * height * 4`.
///
/// # Errors
///
/// Fails when a slice is missing, cannot be decoded, or is not
/// `dims.width` x `dims.height`.
pub fn load_volume_slices(prefix: &Path, dims: VolumeDims) -> ResourceResult<TextureData> {
    if dims.width == 0 || dims.height == 0 || dims.depth == 0 {
        return Err(ResourceError::EmptyVolume(prefix.display().to_string()));
    }

    let slice_len = dims.width as usize * dims.height as usize * TEXEL_SIZE;
    let mut pixels = Vec::with_capacity(slice_len * dims.depth as usize);

    for z in 0..dims.depth {
        let path = slice_path(prefix, z);
        let rgba = decode_rgba(&path)?;
        let (width, height) = rgba.dimensions();
        if width != dims.width || height != dims.height {
            return Err(ResourceError::SliceSizeMismatch {
                path,
                expected_width: dims.width,
                expected_height: dims.height,
                actual_width: width,
                actual_height: height,
            });
        }
        pixels.extend_from_slice(rgba.as_raw());
    }

    info!(
        "Loaded volume {:?} ({}x{}x{})",
        prefix, dims.width, dims.height, dims.depth
    );
    Ok(TextureData {
        width: dims.width,
        height: dims.height,
        depth: dims.depth,
        pixels,
    })
}

fn decode_rgba(path: &Path) -> ResourceResult<image::RgbaImage> {
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }
    debug!("Decoding {:?}", path);
    let decoded = image::open(path).map_err(|source| ResourceError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(decoded.into_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_path_appends_index() {
        let path = slice_path(Path::new("images/noise/lowRes"), 12);
        assert_eq!(path, PathBuf::from("images/noise/lowRes12.png"));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = load_texture_2d(Path::new("does/not/exist.png"));
        assert!(matches!(result, Err(ResourceError::FileNotFound(_))));
    }

    #[test]
    fn test_zero_depth_volume_is_rejected() {
        let dims = VolumeDims {
            width: 4,
            height: 4,
            depth: 0,
        };
        let result = load_volume_slices(Path::new("noise"), dims);
        assert!(matches!(result, Err(ResourceError::EmptyVolume(_))));
    }
}
