//! Recursive walk of the reflection/refraction bounce tree.
//!
//! Every node is produced from its parent by the raytrace stage, shaded,
//! and blended into the accumulator before its children are visited.
//! Reflection children are always visited before refraction children. A
//! debug view that names a node's buffer stops the walk at that node.

use prism_core::{DebugBuffer, Light, LightPartition, RenderResult};
use prism_math::{Camera, UVec2};

use crate::compositor::{combine, CombineInputs};
use crate::frame::FrameContext;
use crate::layer::{BouncePath, LayerRenderTargets};
use crate::output::Output;
use crate::profiler::{ProfileEvent, StageType};
use crate::raytrace::RaytraceStage;
use crate::render_targets::RenderTarget;
use crate::shading::ShadingStage;
use crate::trace::TraceScene;

/// Read-only scene state of a frame.
#[derive(Clone, Copy)]
pub struct FrameScene<'a> {
    pub trace: &'a TraceScene,
    pub lights: &'a [Light],
    pub partition: &'a LightPartition,
    pub camera: &'a Camera,
}

/// Layers and accumulator of the frame being rendered.
///
/// Layers are pushed in visit order; index 0 is the primary layer. They
/// stay leased until the frame ends, so no two nodes share an image.
#[derive(Debug)]
pub struct TraversalFrame {
    pub layers: Vec<LayerRenderTargets>,
    pub accumulator: RenderTarget,
}

impl TraversalFrame {
    pub fn new(primary: LayerRenderTargets, accumulator: RenderTarget) -> Self {
        Self {
            layers: vec![primary],
            accumulator,
        }
    }

    pub fn primary(&self) -> &LayerRenderTargets {
        &self.layers[0]
    }
}

/// Drives the stages over the bounce tree.
pub struct LayerTraversal<'a> {
    pub shading: &'a ShadingStage,
    pub raytrace: &'a RaytraceStage,
    pub scene: FrameScene<'a>,
}

impl LayerTraversal<'_> {
    /// Visit both subtrees of the primary layer.
    pub fn descend_from_primary(
        &self,
        ctx: &mut FrameContext<'_>,
        frame: &mut TraversalFrame,
    ) -> RenderResult<Output> {
        let _scope = ctx.scope(ProfileEvent::new(StageType::Traversal));
        let root = BouncePath::root();
        let chain = [0];
        for reflection in [true, false] {
            let output = self.render_reflections_refractions(ctx, frame, reflection, 0, &root, &chain)?;
            if !output.is_empty() {
                return Ok(output);
            }
        }
        Ok(Output::Empty)
    }

    /// Produce the node reached from `parent` by one branch and walk its
    /// subtree.
    ///
    /// * `parent` - index of the parent layer in `frame.layers`
    /// * `path` - branches taken to reach `parent`; the new node sits one
    ///   level deeper (1 = first bounce)
    /// * `refraction_chain` - the primary layer followed by every refraction
    ///   node on the path to `parent`, used to find the medium a ray returns
    ///   to when it leaves an object
    ///
    /// Returns a non-empty output when a debug view matched in the subtree.
    pub fn render_reflections_refractions(
        &self,
        ctx: &mut FrameContext<'_>,
        frame: &mut TraversalFrame,
        reflection_first: bool,
        parent: usize,
        path: &BouncePath,
        refraction_chain: &[usize],
    ) -> RenderResult<Output> {
        let settings = ctx.settings;
        let level = path.level() + 1;
        if level > settings.max_bounce_level() || !settings.branch_enabled(reflection_first) {
            return Ok(Output::Empty);
        }

        let refraction_level = path.refraction_level();
        let path = path.with(reflection_first);
        ctx.stats.visited_paths.push(path.as_slice().to_vec());

        let parent_layer = frame.layers[parent];
        let layer = LayerRenderTargets::lease(ctx.targets, settings.width, settings.height, false)?;
        frame.layers.push(layer);
        let node = frame.layers.len() - 1;

        let scene = &self.scene;
        if level == 1 {
            self.raytrace.generate_first_bounce(
                ctx,
                reflection_first,
                &parent_layer,
                &layer,
                scene.trace,
                scene.camera,
            )?;
        } else {
            let history = refraction_level
                .checked_sub(1)
                .and_then(|i| refraction_chain.get(i as usize))
                .map(|&i| frame.layers[i]);
            self.raytrace.generate_nth_bounce(
                ctx,
                reflection_first,
                &parent_layer,
                history.as_ref(),
                &layer,
                scene.trace,
            )?;
        }
        self.raytrace.filter_hit_distance(ctx, &layer)?;

        let debug = &settings.debug_view;
        let matched = !debug.is_final() && debug.path.as_slice() == path.as_slice();
        if matched && !debug.buffer.needs_shading() {
            if let Some(target) = layer.buffer(debug.buffer) {
                return Ok(Output::Buffer {
                    buffer: debug.buffer,
                    target,
                });
            }
        }

        let shadow_debug = (matched && debug.buffer.is_shadow_buffer()).then_some((debug.buffer, debug.light_index));
        let output = self.shading.shade_layer(
            ctx,
            &layer,
            scene.lights,
            scene.partition,
            scene.trace,
            scene.camera,
            shadow_debug,
        )?;
        if !output.is_empty() {
            return Ok(output);
        }
        if matched && debug.buffer == DebugBuffer::HitShaded {
            return Ok(Output::Buffer {
                buffer: DebugBuffer::HitShaded,
                target: layer.hit_shaded,
            });
        }

        let size = UVec2::new(settings.width, settings.height);
        let inputs = CombineInputs {
            color: layer.hit_shaded,
            contribution: layer.contribution,
            parent_normal: parent_layer.hit_normal,
            parent_position: parent_layer.hit_position,
            parent_depth: frame.primary().depth,
            blended_hit_distance: layer.hit_distance_filtered,
            camera_position: scene.camera.position,
            contribution_fill: size,
            color_fill: size,
        };
        combine(ctx, frame.accumulator, &inputs)?;

        let mut child_chain = refraction_chain.to_vec();
        if !reflection_first {
            child_chain.push(node);
        }
        for reflection in [true, false] {
            let output = self.render_reflections_refractions(ctx, frame, reflection, node, &path, &child_chain)?;
            if !output.is_empty() {
                return Ok(output);
            }
        }
        Ok(Output::Empty)
    }
}
