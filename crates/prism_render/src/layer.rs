//! Per-bounce G-buffer bundles and bounce-tree paths.

use prism_core::{DebugBuffer, PixelFormat, RenderResult};

use crate::render_targets::{RenderTarget, RenderTargetManager};

/// Refractive indices representable in the 8-bit refractive-index buffers.
pub const IOR_RANGE: (f32, f32) = (1.0, 3.0);

/// Pack a refractive index into [0, 1] for an 8-bit buffer.
pub fn encode_ior(ior: f32) -> f32 {
    ((ior - IOR_RANGE.0) / (IOR_RANGE.1 - IOR_RANGE.0)).clamp(0.0, 1.0)
}

/// Inverse of [`encode_ior`].
pub fn decode_ior(encoded: f32) -> f32 {
    IOR_RANGE.0 + encoded * (IOR_RANGE.1 - IOR_RANGE.0)
}

/// The images of one bounce-tree node.
///
/// Node 0 is the primary camera layer and is the only node with a depth
/// buffer. Position `w` is 1 for hits and 0 for misses; normal `w` is 1 for
/// front-face hits and -1 for back-face hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerRenderTargets {
    pub ray_origin: RenderTarget,
    pub ray_direction: RenderTarget,
    /// Cumulative weight of this layer in the final image (rgb) and the
    /// roughness of the surface the rays left from (a)
    pub contribution: RenderTarget,
    pub hit_position: RenderTarget,
    pub hit_normal: RenderTarget,
    /// Albedo (rgb) and opacity (a)
    pub hit_albedo: RenderTarget,
    pub hit_metalness: RenderTarget,
    pub hit_roughness: RenderTarget,
    pub hit_refractive_index: RenderTarget,
    /// Refractive index of the medium the rays travel through
    pub current_refractive_index: RenderTarget,
    pub hit_emissive: RenderTarget,
    pub hit_distance: RenderTarget,
    pub hit_distance_filtered: RenderTarget,
    /// Path length from the camera to the hit
    pub hit_distance_to_camera: RenderTarget,
    pub hit_shaded: RenderTarget,
    pub depth: Option<RenderTarget>,
}

impl LayerRenderTargets {
    /// Lease a full bundle at the frame resolution.
    pub fn lease(
        targets: &mut RenderTargetManager,
        width: u32,
        height: u32,
        with_depth: bool,
    ) -> RenderResult<Self> {
        let mut lease = |format| targets.lease(format, width, height);
        Ok(Self {
            ray_origin: lease(PixelFormat::Rgba32Float)?,
            ray_direction: lease(PixelFormat::Rgba32Float)?,
            contribution: lease(PixelFormat::Rgba32Float)?,
            hit_position: lease(PixelFormat::Rgba32Float)?,
            hit_normal: lease(PixelFormat::Rgba32Float)?,
            hit_albedo: lease(PixelFormat::Rgba8Unorm)?,
            hit_metalness: lease(PixelFormat::R8Unorm)?,
            hit_roughness: lease(PixelFormat::R8Unorm)?,
            hit_refractive_index: lease(PixelFormat::R8Unorm)?,
            current_refractive_index: lease(PixelFormat::R32Float)?,
            hit_emissive: lease(PixelFormat::Rgba8Unorm)?,
            hit_distance: lease(PixelFormat::R32Float)?,
            hit_distance_filtered: lease(PixelFormat::R32Float)?,
            hit_distance_to_camera: lease(PixelFormat::R32Float)?,
            hit_shaded: lease(PixelFormat::Rgba32Float)?,
            depth: if with_depth {
                Some(lease(PixelFormat::Depth32Float)?)
            } else {
                None
            },
        })
    }

    /// The image behind a named debug buffer, if this layer has one.
    pub fn buffer(&self, buffer: DebugBuffer) -> Option<RenderTarget> {
        Some(match buffer {
            DebugBuffer::RayOrigin => self.ray_origin,
            DebugBuffer::RayDirection => self.ray_direction,
            DebugBuffer::Contribution => self.contribution,
            DebugBuffer::HitPosition => self.hit_position,
            DebugBuffer::HitNormal => self.hit_normal,
            DebugBuffer::HitAlbedo => self.hit_albedo,
            DebugBuffer::HitMetalness => self.hit_metalness,
            DebugBuffer::HitRoughness => self.hit_roughness,
            DebugBuffer::HitRefractiveIndex => self.hit_refractive_index,
            DebugBuffer::CurrentRefractiveIndex => self.current_refractive_index,
            DebugBuffer::HitEmissive => self.hit_emissive,
            DebugBuffer::HitDistance => self.hit_distance,
            DebugBuffer::HitDistanceFiltered => self.hit_distance_filtered,
            DebugBuffer::HitDistanceToCamera => self.hit_distance_to_camera,
            DebugBuffer::HitShaded => self.hit_shaded,
            DebugBuffer::Depth => return self.depth,
            _ => return None,
        })
    }
}

/// Branches taken from the primary layer to a bounce-tree node
/// (`true` = reflection, `false` = refraction).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BouncePath(Vec<bool>);

impl BouncePath {
    /// The primary layer.
    pub fn root() -> Self {
        Self::default()
    }

    /// This path extended by one branch.
    pub fn with(&self, reflection: bool) -> Self {
        let mut branches = self.0.clone();
        branches.push(reflection);
        Self(branches)
    }

    pub fn level(&self) -> u32 {
        self.0.len() as u32
    }

    /// Refraction branches along the path.
    pub fn refraction_level(&self) -> u32 {
        self.0.iter().filter(|&&b| !b).count() as u32
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

impl From<Vec<bool>> for BouncePath {
    fn from(branches: Vec<bool>) -> Self {
        Self(branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ior_encoding() {
        for ior in [1.0, 1.33, 1.5, 2.42] {
            assert!((decode_ior(encode_ior(ior)) - ior).abs() < 1e-5);
        }
        assert_eq!(encode_ior(0.5), 0.0);
    }

    #[test]
    fn test_layers_never_share_images() {
        let mut targets = RenderTargetManager::default();
        let layers: Vec<_> = (0..6)
            .map(|i| LayerRenderTargets::lease(&mut targets, 4, 4, i == 0).unwrap())
            .collect();

        // Each lease holds its own pooled image.
        assert_eq!(targets.live_leases(), 16 + 5 * 15);
        assert_eq!(targets.pooled_count(), targets.live_leases());
        let normals: HashSet<_> = layers.iter().map(|l| l.hit_normal.slot()).collect();
        assert_eq!(normals.len(), layers.len());
    }

    #[test]
    fn test_depth_only_on_primary() {
        let mut targets = RenderTargetManager::default();
        let bounce = LayerRenderTargets::lease(&mut targets, 2, 2, false).unwrap();
        assert!(bounce.buffer(DebugBuffer::Depth).is_none());
        assert!(bounce.buffer(DebugBuffer::ShadowMask).is_none());
        assert_eq!(bounce.buffer(DebugBuffer::HitNormal), Some(bounce.hit_normal));
    }

    #[test]
    fn test_bounce_path_levels() {
        let path = BouncePath::root().with(true).with(false).with(false);
        assert_eq!(path.level(), 3);
        assert_eq!(path.refraction_level(), 2);
        assert_eq!(path.as_slice(), &[true, false, false]);
    }
}
