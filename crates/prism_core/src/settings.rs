//! Render settings consulted every frame.
//!
//! Settings are an explicit read-only value passed into every stage that
//! needs them. Missing JSON fields fall back to `Default`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// Upper bound on the distance-to-occluder reduction pyramid.
pub const MAX_REDUCTION_LEVELS: u32 = 4;

/// How the shadow blur convolution is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowBlurStrategy {
    /// Single 2-D pass
    #[default]
    TwoDimensional,
    /// Horizontal pass followed by a vertical pass
    Separable,
}

/// Named image a debug view can expose instead of the composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugBuffer {
    /// Full pipeline, composited accumulator
    #[default]
    Final,
    RayOrigin,
    RayDirection,
    Contribution,
    HitPosition,
    HitNormal,
    HitAlbedo,
    HitMetalness,
    HitRoughness,
    HitRefractiveIndex,
    CurrentRefractiveIndex,
    HitEmissive,
    HitDistance,
    HitDistanceFiltered,
    HitDistanceToCamera,
    HitShaded,
    Depth,
    /// Hard (r) and soft (g) occlusion of the selected light
    ShadowOcclusion,
    DistanceToOccluder,
    DistanceToOccluderReduced,
    DistanceToOccluderSearched,
    ShadowMask,
}

impl DebugBuffer {
    /// Whether the buffer belongs to the per-light shadow pipeline.
    pub fn is_shadow_buffer(self) -> bool {
        matches!(
            self,
            DebugBuffer::ShadowOcclusion
                | DebugBuffer::DistanceToOccluder
                | DebugBuffer::DistanceToOccluderReduced
                | DebugBuffer::DistanceToOccluderSearched
                | DebugBuffer::ShadowMask
        )
    }

    /// Whether the buffer only exists once a layer has been shaded.
    pub fn needs_shading(self) -> bool {
        self == DebugBuffer::HitShaded || self.is_shadow_buffer()
    }
}

/// Which bounce-tree node and image the caller wants to see.
///
/// The path lists the branch taken at each depth (`true` = reflection);
/// the empty path is the primary camera layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugView {
    pub path: Vec<bool>,
    pub buffer: DebugBuffer,
    /// Shadow-casting light (scene light index) for shadow buffers
    pub light_index: usize,
}

impl DebugView {
    /// The normal full pipeline.
    pub fn is_final(&self) -> bool {
        self.buffer == DebugBuffer::Final
    }
}

/// Soft shadow pipeline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    /// Jittered rays per pixel for the soft occlusion estimate
    pub soft_samples: u32,
    /// Occluder search radius (pixels) for texels that are in shadow
    pub search_radius_shadow_side: u32,
    /// Occluder search radius (pixels) for lit texels near a shadow
    pub search_radius_light_side: u32,
    /// Texel step of the search at full resolution
    pub search_step: u32,
    /// Largest penumbra blur radius in pixels
    pub max_blur_radius: u32,
    /// Levels of the min-reduction pyramid (at most `MAX_REDUCTION_LEVELS`)
    pub reduction_levels: u32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            soft_samples: 8,
            search_radius_shadow_side: 4,
            search_radius_light_side: 8,
            search_step: 2,
            max_blur_radius: 8,
            reduction_levels: 3,
        }
    }
}

/// Glossy filtering applied when compositing bounces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlossySettings {
    /// Pixels of blur per unit of roughness * hit distance / camera distance
    pub scale: f32,
    pub max_radius: u32,
}

impl Default for GlossySettings {
    fn default() -> Self {
        Self {
            scale: 24.0,
            max_radius: 6,
        }
    }
}

/// Per-frame render configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub reflections_enabled: bool,
    pub refractions_enabled: bool,
    /// Layers including the primary camera layer
    pub max_level_count: u32,
    pub debug_view: DebugView,
    pub shadow_blur: ShadowBlurStrategy,
    pub shadow: ShadowSettings,
    pub glossy: GlossySettings,
    /// HDR color of rays that escape the scene
    pub background: [f32; 3],
    pub exposure: f32,
    pub antialiasing: bool,
    pub light_markers: bool,
    pub selection_emissive: [f32; 3],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            reflections_enabled: true,
            refractions_enabled: true,
            max_level_count: 3,
            debug_view: DebugView::default(),
            shadow_blur: ShadowBlurStrategy::default(),
            shadow: ShadowSettings::default(),
            glossy: GlossySettings::default(),
            background: [0.05, 0.06, 0.08],
            exposure: 1.0,
            antialiasing: true,
            light_markers: false,
            selection_emissive: [0.3, 0.2, 0.0],
        }
    }
}

impl RenderSettings {
    /// Parse settings from a JSON document and validate them.
    pub fn from_json_str(json: &str) -> RenderResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> RenderResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_json_str(&text)?;
        log::info!("Loaded render settings from {}", path.as_ref().display());
        Ok(settings)
    }

    /// Reject settings no frame can be rendered with.
    pub fn validate(&self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::Config(format!(
                "output resolution {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.max_level_count == 0 {
            return Err(RenderError::Config(
                "max_level_count must include the primary layer".into(),
            ));
        }
        if self.shadow.reduction_levels > MAX_REDUCTION_LEVELS {
            return Err(RenderError::Config(format!(
                "reduction_levels {} exceeds {}",
                self.shadow.reduction_levels, MAX_REDUCTION_LEVELS
            )));
        }
        if self.shadow.search_step == 0 {
            return Err(RenderError::Config("search_step must be positive".into()));
        }
        Ok(())
    }

    /// Deepest bounce level the traversal may produce.
    pub fn max_bounce_level(&self) -> u32 {
        self.max_level_count.saturating_sub(1)
    }

    /// Whether a branch is enabled (`true` = reflection).
    pub fn branch_enabled(&self, reflection: bool) -> bool {
        if reflection {
            self.reflections_enabled
        } else {
            self.refractions_enabled
        }
    }
}
