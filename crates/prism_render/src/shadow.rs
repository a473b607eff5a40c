//! Soft shadows for one shadow-casting light on one layer.
//!
//! Trace hard and soft occlusion towards the light, reduce the raw
//! distance-to-occluder buffer into a small min pyramid, search it for the
//! nearest occluder around each texel, turn that distance into a penumbra
//! radius and blur the occlusion with it. The result is a visibility mask
//! (1 = lit) consumed by shading.

use prism_core::settings::MAX_REDUCTION_LEVELS;
use prism_core::{
    DebugBuffer, Light, PixelFormat, RenderError, RenderResult, ShadowBlurStrategy, ShadowMap,
    ShadowSettings,
};
use prism_math::{Camera, IVec2, Interval, Ray, UVec2, Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::frame::FrameContext;
use crate::image::{is_valid_distance, update_many, Image, NO_DISTANCE};
use crate::layer::LayerRenderTargets;
use crate::output::Output;
use crate::profiler::{ProfileEvent, StageType, SubEvent};
use crate::reduction::{min_valid_window, reduce_min_with_rejection, reduced_dimensions};
use crate::render_targets::RenderTarget;
use crate::trace::TraceScene;

const JITTER_SEED: u64 = 0x5EED_5AD0;

/// Light distance below which a shadow-map texel does not occlude.
const SHADOW_MAP_BIAS: f32 = 0.02;

/// What the shadow pipeline hands back to shading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowOutcome {
    /// Visibility mask to shade with
    Mask(RenderTarget),
    /// A debug view selected one of the intermediate buffers
    Debug(Output),
}

/// Per-light shadow pipeline.
#[derive(Debug, Default)]
pub struct ShadowStage {
    jitter: Option<Vec<Vec2>>,
}

impl ShadowStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the soft-shadow sample pattern.
    pub fn initialize(&mut self, settings: &ShadowSettings) {
        let mut rng = StdRng::seed_from_u64(JITTER_SEED);
        let pattern = (0..settings.soft_samples)
            .map(|_| loop {
                let p = Vec2::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
                if p.length_squared() <= 1.0 {
                    break p;
                }
            })
            .collect();
        self.jitter = Some(pattern);
    }

    pub fn is_initialized(&self) -> bool {
        self.jitter.is_some()
    }

    /// Produce the visibility mask of `light` for `layer`.
    ///
    /// `debug` names a shadow buffer to return instead of finishing the
    /// pipeline. Intermediate images are released before returning a mask.
    /// Spot lights without a shadow map fail with `MissingResource` before
    /// any work is issued.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        ctx: &mut FrameContext<'_>,
        layer: &LayerRenderTargets,
        trace: &TraceScene,
        camera: &Camera,
        light_index: usize,
        light: &Light,
        debug: Option<DebugBuffer>,
    ) -> RenderResult<ShadowOutcome> {
        let jitter = self.jitter.as_deref().ok_or(RenderError::NotInitialized("shadow stage"))?;
        let occluders = match light {
            Light::Point(_) => Occluders::Rays { trace, jitter },
            Light::Spot(spot) => match &spot.shadow_map {
                Some(map) => Occluders::Map(map),
                None => {
                    return Err(RenderError::MissingResource(format!(
                        "shadow map of spot light {light_index}"
                    )))
                }
            },
        };
        let frame_settings = ctx.settings;
        let settings = &frame_settings.shadow;
        let debug_hit = |buffer: DebugBuffer, target: RenderTarget| {
            (debug == Some(buffer)).then_some(ShadowOutcome::Debug(Output::Buffer { buffer, target }))
        };

        // Trace
        let occlusion = ctx.lease(PixelFormat::Rgba32Float)?;
        let distance = ctx.lease(PixelFormat::R32Float)?;
        {
            let _scope = ctx.scope(ProfileEvent::new(StageType::ShadowTrace).light(light_index));
            ctx.dispatch_many([occlusion, distance], |targets, outputs| {
                let position = targets.image(layer.hit_position)?;
                let normal = targets.image(layer.hit_normal)?;
                update_many(outputs, |x, y, _| {
                    let p = position.load(x, y);
                    if p.w < 0.5 {
                        return [Vec4::ZERO, Vec4::splat(NO_DISTANCE)];
                    }
                    let n = normal.load(x, y);
                    let facing = n.truncate() * n.w.signum();
                    let sample = occluders.sample(light, p.truncate(), facing);
                    [
                        Vec4::new(sample.hard, sample.soft, 0.0, 0.0),
                        Vec4::splat(sample.distance),
                    ]
                });
                Ok(())
            })?;
        }
        if let Some(outcome) = debug_hit(DebugBuffer::ShadowOcclusion, occlusion)
            .or_else(|| debug_hit(DebugBuffer::DistanceToOccluder, distance))
        {
            return Ok(outcome);
        }

        // Reduce
        let mut pyramid = vec![distance];
        {
            let _scope = ctx.scope(ProfileEvent::new(StageType::ShadowReduction).light(light_index));
            let mut dimensions = UVec2::new(frame_settings.width, frame_settings.height);
            for _ in 0..settings.reduction_levels.min(MAX_REDUCTION_LEVELS) {
                dimensions = reduced_dimensions(dimensions);
                let level = ctx.targets.lease(PixelFormat::R32Float, dimensions.x, dimensions.y)?;
                let source = pyramid[pyramid.len() - 1];
                ctx.dispatch(level, |targets, out| {
                    reduce_min_with_rejection(targets.image(source)?, out);
                    Ok(())
                })?;
                pyramid.push(level);
            }
        }
        if let Some(outcome) = debug_hit(DebugBuffer::DistanceToOccluderReduced, pyramid[pyramid.len() - 1]) {
            return Ok(outcome);
        }

        // Search
        let searched = ctx.lease(PixelFormat::R32Float)?;
        {
            let _scope = ctx.scope(ProfileEvent::new(StageType::ShadowSearch).light(light_index));
            let pyramid = &pyramid;
            ctx.dispatch(searched, |targets, out| {
                let levels = pyramid
                    .iter()
                    .map(|&level| targets.image(level))
                    .collect::<RenderResult<Vec<_>>>()?;
                let occlusion = targets.image(occlusion)?;
                let position = targets.image(layer.hit_position)?;
                out.fill_par(|x, y| {
                    if position.load(x, y).w < 0.5 {
                        return Vec4::splat(NO_DISTANCE);
                    }
                    let umbra = occlusion.load_x(x, y) > 0.5;
                    Vec4::splat(search_occluder(&levels, settings, UVec2::new(x, y), umbra))
                });
                Ok(())
            })?;
        }
        if let Some(outcome) = debug_hit(DebugBuffer::DistanceToOccluderSearched, searched) {
            return Ok(outcome);
        }

        // Blur
        let radius = ctx.lease(PixelFormat::R32Float)?;
        let blurred = ctx.lease(PixelFormat::Rgba32Float)?;
        let mask = ctx.lease(PixelFormat::R32Float)?;
        let mut temporaries = vec![occlusion, radius, blurred, searched];
        temporaries.extend(pyramid);
        {
            let _scope = ctx.scope(ProfileEvent::new(StageType::ShadowBlur).light(light_index));
            {
                let _sub = ctx.scope(
                    ProfileEvent::new(StageType::ShadowBlur)
                        .light(light_index)
                        .sub(SubEvent::BlurRadius),
                );
                let light_position = light.common().position;
                let light_radius = light.common().radius;
                let (max_radius, height) = (settings.max_blur_radius as f32, frame_settings.height);
                ctx.dispatch(radius, |targets, out| {
                    let searched = targets.image(searched)?;
                    let position = targets.image(layer.hit_position)?;
                    let to_camera = targets.image(layer.hit_distance_to_camera)?;
                    out.fill_par(|x, y| {
                        let d_occ = searched.load_x(x, y);
                        if !is_valid_distance(d_occ) {
                            return Vec4::ZERO;
                        }
                        let d_light = position.load(x, y).truncate().distance(light_position);
                        let footprint = camera.pixel_footprint(to_camera.load_x(x, y).max(0.0), height);
                        Vec4::splat(penumbra_radius(d_occ, d_light, light_radius, footprint, max_radius))
                    });
                    Ok(())
                })?;
            }

            match frame_settings.shadow_blur {
                ShadowBlurStrategy::TwoDimensional => {
                    ctx.dispatch(blurred, |targets, out| {
                        blur_2d(targets.image(occlusion)?, targets.image(radius)?, out);
                        Ok(())
                    })?;
                }
                ShadowBlurStrategy::Separable => {
                    let horizontal = ctx.lease(PixelFormat::Rgba32Float)?;
                    temporaries.push(horizontal);
                    {
                        let _sub = ctx.scope(
                            ProfileEvent::new(StageType::ShadowBlur)
                                .light(light_index)
                                .sub(SubEvent::HorizontalPass),
                        );
                        ctx.dispatch(horizontal, |targets, out| {
                            blur_pass(targets.image(occlusion)?, targets.image(radius)?, out, IVec2::X);
                            Ok(())
                        })?;
                    }
                    let _sub = ctx.scope(
                        ProfileEvent::new(StageType::ShadowBlur)
                            .light(light_index)
                            .sub(SubEvent::VerticalPass),
                    );
                    ctx.dispatch(blurred, |targets, out| {
                        blur_pass(targets.image(horizontal)?, targets.image(radius)?, out, IVec2::Y);
                        Ok(())
                    })?;
                }
            }

            ctx.dispatch(mask, |targets, out| {
                let blurred = targets.image(blurred)?;
                out.fill_par(|x, y| Vec4::splat(1.0 - blurred.load(x, y).y.clamp(0.0, 1.0)));
                Ok(())
            })?;
        }
        if let Some(outcome) = debug_hit(DebugBuffer::ShadowMask, mask) {
            return Ok(outcome);
        }

        for target in temporaries {
            ctx.targets.release(target)?;
        }
        Ok(ShadowOutcome::Mask(mask))
    }
}

/// Occlusion of one receiver towards a light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcclusionSample {
    /// 1 when the center of the light is blocked
    pub hard: f32,
    /// Blocked fraction of the light's disk
    pub soft: f32,
    /// Distance from the receiver to the nearest occluder, or `NO_DISTANCE`
    pub distance: f32,
}

impl OcclusionSample {
    const BLOCKED: Self = Self {
        hard: 1.0,
        soft: 1.0,
        distance: NO_DISTANCE,
    };
}

enum Occluders<'a> {
    Rays { trace: &'a TraceScene, jitter: &'a [Vec2] },
    Map(&'a ShadowMap),
}

impl Occluders<'_> {
    fn sample(&self, light: &Light, point: Vec3, normal: Vec3) -> OcclusionSample {
        let common = light.common();
        let to_light = common.position - point;
        let d_light = to_light.length();
        if d_light <= f32::EPSILON {
            return OcclusionSample {
                hard: 0.0,
                soft: 0.0,
                distance: NO_DISTANCE,
            };
        }
        let dir = to_light / d_light;
        let (axis, cone_min_dot) = light.cone();
        if !prism_core::light::inside_cone(axis, cone_min_dot, -dir) {
            return OcclusionSample::BLOCKED;
        }

        match self {
            Occluders::Rays { trace, jitter } => {
                let blocked = |target: Vec3| {
                    let offset = target - point;
                    let length = offset.length();
                    let ray = Ray::leaving_surface(point, normal, offset / length);
                    trace.occluder_distance(&ray, Interval::new(0.0, length - prism_math::RAY_EPSILON))
                };
                let center = blocked(common.position);
                let mut distance = center.unwrap_or(NO_DISTANCE);
                let hard = if center.is_some() { 1.0 } else { 0.0 };
                if jitter.is_empty() || common.radius <= 0.0 {
                    return OcclusionSample {
                        hard,
                        soft: hard,
                        distance,
                    };
                }

                let (tangent, bitangent) = orthonormal_basis(dir);
                let mut hits = 0;
                for s in *jitter {
                    let target = common.position + (tangent * s.x + bitangent * s.y) * common.radius;
                    if let Some(t) = blocked(target) {
                        hits += 1;
                        distance = crate::reduction::min_valid(distance, t);
                    }
                }
                OcclusionSample {
                    hard,
                    soft: hits as f32 / jitter.len() as f32,
                    distance,
                }
            }
            Occluders::Map(map) => {
                let Some(uv) = map.project(point) else {
                    return OcclusionSample::BLOCKED;
                };
                let texel = 1.0 / map.resolution as f32;
                let occluder_at = |uv: Vec2| {
                    let stored = map.distance_at(uv.clamp(Vec2::ZERO, Vec2::ONE));
                    (stored < d_light - SHADOW_MAP_BIAS).then_some(d_light - stored)
                };

                let center = occluder_at(uv);
                let mut distance = center.unwrap_or(NO_DISTANCE);
                let mut hits = 0;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        if let Some(d) = occluder_at(uv + Vec2::new(dx as f32, dy as f32) * texel) {
                            hits += 1;
                            distance = crate::reduction::min_valid(distance, d);
                        }
                    }
                }
                OcclusionSample {
                    hard: if center.is_some() { 1.0 } else { 0.0 },
                    soft: hits as f32 / 9.0,
                    distance,
                }
            }
        }
    }
}

fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let helper = if n.x.abs() > 0.9 { Vec3::Y } else { Vec3::X };
    let tangent = n.cross(helper).normalize();
    (tangent, n.cross(tangent))
}

/// Nearest occluder around `pixel`, searched on the pyramid level matching
/// the search step.
///
/// Texels in the umbra search the shadow-side radius, lit texels the wider
/// light-side radius.
pub fn search_occluder(levels: &[&Image], settings: &ShadowSettings, pixel: UVec2, umbra: bool) -> f32 {
    if levels.is_empty() {
        return NO_DISTANCE;
    }
    let radius = if umbra {
        settings.search_radius_shadow_side
    } else {
        settings.search_radius_light_side
    };
    let step = settings.search_step.max(1);
    let level = (step.ilog2() as usize).min(levels.len() - 1);
    let scale = 1u32 << level;
    let window = radius.div_ceil(scale) as i32;
    let center = (pixel / scale).as_ivec2();
    min_valid_window(levels[level], center, window)
}

/// Penumbra radius in pixels for a receiver `d_light` from the light with
/// its nearest occluder `d_occ` away.
pub fn penumbra_radius(d_occ: f32, d_light: f32, light_radius: f32, pixel_footprint: f32, max_radius: f32) -> f32 {
    let gap = (d_light - d_occ).max(1.0e-3);
    let world = d_occ * light_radius / gap;
    if pixel_footprint <= 0.0 {
        return max_radius;
    }
    (world / pixel_footprint).clamp(0.0, max_radius)
}

#[inline]
fn tent(d: i32, r: i32) -> f32 {
    1.0 - d.abs() as f32 / (r + 1) as f32
}

/// Single-pass blur with a square tent kernel sized per texel.
pub fn blur_2d(source: &Image, radius: &Image, out: &mut Image) {
    out.fill_par(|x, y| {
        let r = radius.load_x(x, y).round() as i32;
        let (x, y) = (x as i32, y as i32);
        let mut sum = Vec4::ZERO;
        let mut weight = 0.0;
        for dy in -r..=r {
            for dx in -r..=r {
                let w = tent(dx, r) * tent(dy, r);
                sum += source.load_clamped(x + dx, y + dy) * w;
                weight += w;
            }
        }
        sum / weight
    });
}

/// One axis of the separable blur.
pub fn blur_pass(source: &Image, radius: &Image, out: &mut Image, axis: IVec2) {
    out.fill_par(|x, y| {
        let r = radius.load_x(x, y).round() as i32;
        let p = IVec2::new(x as i32, y as i32);
        let mut sum = Vec4::ZERO;
        let mut weight = 0.0;
        for d in -r..=r {
            let q = p + axis * d;
            let w = tent(d, r);
            sum += source.load_clamped(q.x, q.y) * w;
            weight += w;
        }
        sum / weight
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(width: u32, height: u32, seed: u64) -> Image {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut image = Image::new(PixelFormat::Rgba32Float, width, height);
        for y in 0..height {
            for x in 0..width {
                image.store(x, y, Vec4::new(rng.gen(), rng.gen(), 0.0, 0.0));
            }
        }
        image
    }

    #[test]
    fn test_separable_matches_2d_for_uniform_radius() {
        let source = noise(17, 11, 3);
        for r in [0.0, 1.0, 3.0] {
            let mut radius = Image::new(PixelFormat::R32Float, 17, 11);
            radius.clear(Vec4::splat(r));

            let mut single = Image::new(PixelFormat::Rgba32Float, 17, 11);
            blur_2d(&source, &radius, &mut single);

            let mut horizontal = Image::new(PixelFormat::Rgba32Float, 17, 11);
            let mut separable = Image::new(PixelFormat::Rgba32Float, 17, 11);
            blur_pass(&source, &radius, &mut horizontal, IVec2::X);
            blur_pass(&horizontal, &radius, &mut separable, IVec2::Y);

            for (a, b) in single.texels().iter().zip(separable.texels()) {
                assert!((*a - *b).abs().max_element() < 1e-5, "radius {r}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_zero_radius_blur_is_identity() {
        let source = noise(5, 4, 9);
        let radius = Image::new(PixelFormat::R32Float, 5, 4);
        let mut out = Image::new(PixelFormat::Rgba32Float, 5, 4);
        blur_2d(&source, &radius, &mut out);
        assert_eq!(out.texels(), source.texels());
    }

    #[test]
    fn test_penumbra_grows_with_occluder_distance() {
        let near = penumbra_radius(0.1, 5.0, 0.5, 0.01, 64.0);
        let far = penumbra_radius(2.0, 5.0, 0.5, 0.01, 64.0);
        assert!(far > near);
        assert_eq!(penumbra_radius(4.9, 5.0, 0.5, 0.01, 8.0), 8.0);
        assert_eq!(penumbra_radius(1.0, 5.0, 0.0, 0.01, 8.0), 0.0);
    }

    #[test]
    fn test_search_uses_level_of_step() {
        let settings = ShadowSettings {
            search_radius_shadow_side: 2,
            search_radius_light_side: 4,
            search_step: 2,
            ..Default::default()
        };
        let mut base = Image::new(PixelFormat::R32Float, 8, 8);
        base.clear(Vec4::splat(NO_DISTANCE));
        let mut coarse = Image::new(PixelFormat::R32Float, 4, 4);
        coarse.clear(Vec4::splat(NO_DISTANCE));
        coarse.store(3, 0, Vec4::splat(1.5));

        let levels = [&base, &coarse];
        // Level 1 texel (3, 0) is 2 coarse texels from (1, 0): within the
        // light-side window but outside the shadow-side one.
        assert_eq!(search_occluder(&levels, &settings, UVec2::new(2, 0), false), 1.5);
        assert_eq!(search_occluder(&levels, &settings, UVec2::new(2, 0), true), NO_DISTANCE);
    }

    #[test]
    fn test_run_requires_initialization() {
        use crate::frame::FrameStats;
        use crate::profiler::NullProfiler;
        use crate::render_targets::RenderTargetManager;
        use prism_core::{PointLight, RenderSettings};

        let settings = RenderSettings {
            width: 2,
            height: 2,
            ..Default::default()
        };
        let mut targets = RenderTargetManager::default();
        let mut stats = FrameStats::default();
        let mut ctx = FrameContext::new(&settings, &mut targets, &NullProfiler, &mut stats);
        let layer = LayerRenderTargets::lease(ctx.targets, 2, 2, true).unwrap();
        let light = Light::Point(PointLight::new(Vec3::Y, Vec3::ONE));

        let mut stage = ShadowStage::new();
        assert!(!stage.is_initialized());
        let result = stage.run(&mut ctx, &layer, &TraceScene::default(), &Camera::default(), 0, &light, None);
        assert!(matches!(result, Err(RenderError::NotInitialized(_))));

        stage.initialize(&settings.shadow);
        assert!(stage.is_initialized());
    }
}
