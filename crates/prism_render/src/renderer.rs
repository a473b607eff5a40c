//! Frame driver.
//!
//! `Renderer` owns the render-target pool and the stages, draws the primary
//! layer, shades it, walks the bounce tree and hands back the selected
//! image. Any fatal stage error aborts the whole frame.

use prism_core::{
    DebugBuffer, Material, Mesh, PixelFormat, RenderError, RenderResult, RenderSettings, Scene, Selection,
};
use prism_math::{Camera, Mat4, Vec3};

use crate::compositor::init_accumulator;
use crate::frame::{FrameContext, FrameStats};
use crate::image::Image;
use crate::layer::LayerRenderTargets;
use crate::output::Output;
use crate::profiler::{NullProfiler, ProfileEvent, Profiler, StageType};
use crate::rasterizer::{DeferredRasterizer, Drawable};
use crate::raytrace::RaytraceStage;
use crate::render_targets::{CpuAllocator, ImageAllocator, RenderTargetManager};
use crate::shading::ShadingStage;
use crate::trace::TraceScene;
use crate::traversal::{FrameScene, LayerTraversal, TraversalFrame};

/// Radius of the marker drawn at each light.
const LIGHT_MARKER_RADIUS: f32 = 0.08;

/// Padding applied around selection volumes.
const SELECTION_PADDING: f32 = 1.02;

/// A finished frame copied out of the pool.
#[derive(Debug, Clone)]
pub struct FrameImage {
    pub buffer: DebugBuffer,
    pub image: Image,
}

pub struct Renderer {
    settings: RenderSettings,
    targets: RenderTargetManager,
    profiler: Box<dyn Profiler>,
    rasterizer: DeferredRasterizer,
    shading: ShadingStage,
    raytrace: RaytraceStage,
    initialized: bool,
    frame_open: bool,
    stats: FrameStats,
    light_marker: Mesh,
    last_frame: Option<FrameImage>,
    dropped_frames: u64,
}

impl Renderer {
    /// Create a renderer with the CPU image allocator.
    pub fn new(settings: RenderSettings) -> RenderResult<Self> {
        Self::with_allocator(settings, Box::new(CpuAllocator::new()))
    }

    pub fn with_allocator(settings: RenderSettings, allocator: Box<dyn ImageAllocator>) -> RenderResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            targets: RenderTargetManager::new(allocator),
            profiler: Box::new(NullProfiler),
            rasterizer: DeferredRasterizer::new(),
            shading: ShadingStage::new(),
            raytrace: RaytraceStage::new(),
            initialized: false,
            frame_open: false,
            stats: FrameStats::default(),
            light_marker: Mesh::octahedron(LIGHT_MARKER_RADIUS),
            last_frame: None,
            dropped_frames: 0,
        })
    }

    pub fn with_profiler(mut self, profiler: Box<dyn Profiler>) -> Self {
        self.profiler = profiler;
        self
    }

    /// One-time stage setup; required before the first frame.
    pub fn initialize(&mut self) {
        self.rasterizer.initialize();
        self.shading.initialize(&self.settings);
        self.raytrace.initialize();
        self.initialized = true;
        log::debug!(
            "Renderer initialized at {}x{}, {} layers",
            self.settings.width,
            self.settings.height,
            self.settings.max_level_count
        );
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Replace the settings used from the next frame on.
    pub fn set_settings(&mut self, settings: RenderSettings) -> RenderResult<()> {
        settings.validate()?;
        self.settings = settings;
        if self.initialized {
            self.shading.initialize(&self.settings);
        }
        Ok(())
    }

    /// Counters of the last submitted frame.
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn targets(&self) -> &RenderTargetManager {
        &self.targets
    }

    /// Render one frame and return the image the caller should see.
    ///
    /// `Output::Final` is the composited accumulator; a debug view returns
    /// the buffer it names. Returned handles stay valid until
    /// [`Renderer::end_frame`] or the next call.
    pub fn render_scene(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        wireframe: bool,
        selection: &Selection,
        selection_volume_mesh: Option<&Mesh>,
    ) -> RenderResult<Output> {
        if !self.initialized {
            return Err(RenderError::NotInitialized("renderer"));
        }
        if self.frame_open {
            self.end_frame();
        }
        self.frame_open = true;
        self.stats = FrameStats::default();

        let settings = &self.settings;
        let mut ctx = FrameContext::new(settings, &mut self.targets, &*self.profiler, &mut self.stats);
        let _frame = ctx.scope(ProfileEvent::new(StageType::Frame));

        let resolved = scene.resolved_actors();
        let trace = TraceScene::build(&resolved);
        let partition = scene.partition_lights();
        log::trace!(
            "Frame: {} actors, {} triangles, {} shadowed + {} unshadowed lights",
            resolved.len(),
            trace.triangle_count(),
            partition.shadow_casting.len(),
            partition.non_shadow_casting.len()
        );

        let primary = LayerRenderTargets::lease(ctx.targets, settings.width, settings.height, true)?;
        let accumulator = ctx.lease(PixelFormat::Rgba32Float)?;

        // Primary pass
        let view = camera.view_matrix();
        self.rasterizer.clear(&mut ctx, &primary, camera)?;
        let selection_emissive = Vec3::from(settings.selection_emissive);
        for (index, actor, model) in &resolved {
            let extra = if selection.contains(*index) {
                selection_emissive
            } else {
                Vec3::ZERO
            };
            self.rasterizer.render(
                &mut ctx,
                &primary,
                camera,
                Drawable::Actor {
                    actor,
                    model: model.as_ref(),
                },
                &actor.pose(),
                &view,
                actor.skeleton_pose(),
                extra,
                wireframe,
            )?;
        }
        if settings.light_markers {
            for light in scene.lights.iter().filter(|l| l.common().enabled) {
                let common = light.common();
                let material = Material::emissive(common.color);
                self.rasterizer.render(
                    &mut ctx,
                    &primary,
                    camera,
                    Drawable::Mesh {
                        mesh: &self.light_marker,
                        material: &material,
                    },
                    &Mat4::from_translation(common.position),
                    &view,
                    None,
                    Vec3::ZERO,
                    false,
                )?;
            }
        }
        if let Some(volume) = selection_volume_mesh {
            let material = Material::emissive(selection_emissive);
            for index in selection.iter() {
                let Some(bounds) = scene.actor_bounds(index) else {
                    log::warn!("No selection volume for actor {index}: model not loaded");
                    continue;
                };
                let half = (bounds.extent() * 0.5 * SELECTION_PADDING).max(Vec3::splat(1.0e-3));
                let pose = Mat4::from_translation(bounds.centroid()) * Mat4::from_scale(half);
                self.rasterizer.render(
                    &mut ctx,
                    &primary,
                    camera,
                    Drawable::Mesh {
                        mesh: volume,
                        material: &material,
                    },
                    &pose,
                    &view,
                    None,
                    Vec3::ZERO,
                    true,
                )?;
            }
        }
        self.raytrace.filter_hit_distance(&mut ctx, &primary)?;

        // Primary layer debug views
        let debug = &settings.debug_view;
        let matched = !debug.is_final() && debug.path.is_empty();
        if matched && !debug.buffer.needs_shading() {
            if let Some(target) = primary.buffer(debug.buffer) {
                return Ok(Output::Buffer {
                    buffer: debug.buffer,
                    target,
                });
            }
        }

        let shadow_debug = (matched && debug.buffer.is_shadow_buffer()).then_some((debug.buffer, debug.light_index));
        let output = self
            .shading
            .shade_layer(&mut ctx, &primary, &scene.lights, &partition, &trace, camera, shadow_debug)?;
        if !output.is_empty() {
            return Ok(output);
        }
        if matched && debug.buffer == DebugBuffer::HitShaded {
            return Ok(Output::Buffer {
                buffer: DebugBuffer::HitShaded,
                target: primary.hit_shaded,
            });
        }
        init_accumulator(&mut ctx, accumulator, primary.hit_shaded)?;

        let traversal = LayerTraversal {
            shading: &self.shading,
            raytrace: &self.raytrace,
            scene: FrameScene {
                trace: &trace,
                lights: &scene.lights,
                partition: &partition,
                camera,
            },
        };
        let mut frame = TraversalFrame::new(primary, accumulator);
        let output = traversal.descend_from_primary(&mut ctx, &mut frame)?;

        ctx.stats.leased_targets = ctx.targets.live_leases();
        log::debug!(
            "Frame submitted: {} layers, {} leases, {} dispatches, {} composite writes",
            frame.layers.len(),
            ctx.stats.leased_targets,
            ctx.stats.dispatches,
            ctx.stats.composite_writes
        );
        if output.is_empty() {
            Ok(Output::Final(accumulator))
        } else {
            Ok(output)
        }
    }

    /// Copy the image an output refers to out of the pool.
    pub fn read_output(&self, output: &Output) -> RenderResult<Option<FrameImage>> {
        let (Some(target), Some(buffer)) = (output.target(), output.buffer()) else {
            return Ok(None);
        };
        Ok(Some(FrameImage {
            buffer,
            image: self.targets.image(target)?.clone(),
        }))
    }

    /// Return every lease of the frame to the pool.
    pub fn end_frame(&mut self) {
        self.targets.end_frame();
        self.frame_open = false;
    }

    /// Render, read back and end a frame.
    ///
    /// A fatal error drops the frame: it is logged, the pool is reset and
    /// the last good frame is returned again.
    pub fn render_frame(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        wireframe: bool,
        selection: &Selection,
        selection_volume_mesh: Option<&Mesh>,
    ) -> Option<&FrameImage> {
        let result = self
            .render_scene(scene, camera, wireframe, selection, selection_volume_mesh)
            .and_then(|output| self.read_output(&output));
        self.end_frame();
        match result {
            Ok(Some(frame)) => self.last_frame = Some(frame),
            Ok(None) => {}
            Err(err) => {
                self.dropped_frames += 1;
                log::error!("Dropped frame: {err}");
            }
        }
        self.last_frame.as_ref()
    }

    /// The most recent frame `render_frame` completed.
    pub fn last_frame(&self) -> Option<&FrameImage> {
        self.last_frame.as_ref()
    }
}
