//! PRISM Core - scene data model shared by the renderer and the CLI.
//!
//! This crate provides:
//!
//! - **Scene types**: `Mesh`, `Material`, `Model`, `Actor`, `Light`, `Scene`
//! - **Settings**: the per-frame `RenderSettings` threaded through every stage
//! - **Errors**: the `RenderError` taxonomy used across the workspace

pub mod error;
pub mod format;
pub mod light;
pub mod mesh;
pub mod scene;
pub mod settings;

// Re-export commonly used types
pub use error::{RenderError, RenderResult};
pub use format::PixelFormat;
pub use light::{Light, LightCommon, LightPartition, PointLight, ShadowMap, SpotLight};
pub use mesh::Mesh;
pub use scene::{Actor, BlockActor, Material, Model, ModelLibrary, Scene, Selection, SkeletonActor};
pub use settings::{
    DebugBuffer, DebugView, GlossySettings, RenderSettings, ShadowBlurStrategy, ShadowSettings,
};
