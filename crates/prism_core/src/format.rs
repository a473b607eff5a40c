//! Pixel formats of render-target images.

use serde::{Deserialize, Serialize};

/// Storage format of a render-target image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Four 32-bit float channels (positions, normals, HDR color)
    Rgba32Float,
    /// Four 8-bit unorm channels (albedo, emissive)
    Rgba8Unorm,
    /// One 8-bit unorm channel (metalness, roughness, refractive index)
    R8Unorm,
    /// One 32-bit float channel (distances)
    R32Float,
    /// Depth buffer
    Depth32Float,
}

impl PixelFormat {
    /// Bytes one texel occupies in device memory.
    pub fn bytes_per_texel(self) -> usize {
        match self {
            PixelFormat::Rgba32Float => 16,
            PixelFormat::Rgba8Unorm => 4,
            PixelFormat::R8Unorm => 1,
            PixelFormat::R32Float | PixelFormat::Depth32Float => 4,
        }
    }

    /// Number of meaningful channels.
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgba32Float | PixelFormat::Rgba8Unorm => 4,
            _ => 1,
        }
    }

    /// Whether values are stored as 8-bit normalized integers.
    pub fn is_unorm8(self) -> bool {
        matches!(self, PixelFormat::Rgba8Unorm | PixelFormat::R8Unorm)
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
