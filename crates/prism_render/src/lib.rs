//! PRISM Render - hybrid deferred + ray-traced reflection/refraction layers
//!
//! The primary camera layer is rasterized into a G-buffer, then a binary
//! tree of reflection and refraction bounces is ray traced from it. Every
//! layer is lit with direct lighting and per-light soft shadows and blended
//! into an HDR accumulator.
//!
//! Images live on the CPU and are leased from a [`RenderTargetManager`]
//! pool keyed by format and size; kernels run row-parallel with rayon.

pub mod compositor;
pub mod frame;
pub mod image;
pub mod layer;
pub mod output;
pub mod profiler;
pub mod rasterizer;
pub mod raytrace;
pub mod reduction;
pub mod render_targets;
pub mod renderer;
pub mod shading;
pub mod shadow;
pub mod shadow_map;
pub mod trace;
pub mod traversal;

pub use frame::{FrameContext, FrameStats};
pub use image::{Image, NO_DISTANCE};
pub use layer::{BouncePath, LayerRenderTargets};
pub use output::Output;
pub use profiler::{
    LogProfiler, NullProfiler, ProfileEvent, ProfileScope, Profiler, RecordingProfiler, StageType, SubEvent,
};
pub use rasterizer::{DeferredRasterizer, Drawable};
pub use raytrace::RaytraceStage;
pub use render_targets::{CpuAllocator, ImageAllocator, RenderTarget, RenderTargetManager, TargetKey};
pub use renderer::{FrameImage, Renderer};
pub use shading::ShadingStage;
pub use shadow::{ShadowOutcome, ShadowStage};
pub use shadow_map::{attach_shadow_maps, render_shadow_map};
pub use trace::{Hit, TraceScene};
pub use traversal::{FrameScene, LayerTraversal, TraversalFrame};
