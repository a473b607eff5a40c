//! Blending of bounce layers into the frame accumulator.

use prism_core::{GlossySettings, RenderResult};
use prism_math::{IVec2, UVec2, Vec3, Vec4};

use crate::frame::FrameContext;
use crate::image::{is_valid_distance, Image};
use crate::profiler::{ProfileEvent, StageType};
use crate::render_targets::RenderTarget;

/// Exponent applied to normal similarity in the glossy filter.
const NORMAL_POWER: i32 = 8;

/// Images one bounce contributes through.
#[derive(Debug, Clone, Copy)]
pub struct CombineInputs {
    /// Shaded color of the bounce layer
    pub color: RenderTarget,
    /// Cumulative weight (rgb) and parent roughness (a)
    pub contribution: RenderTarget,
    pub parent_normal: RenderTarget,
    pub parent_position: RenderTarget,
    /// Primary depth; texels at depth 1 hold no geometry
    pub parent_depth: Option<RenderTarget>,
    /// Sample-rejected hit distance of the bounce
    pub blended_hit_distance: RenderTarget,
    pub camera_position: Vec3,
    /// Region of the contribution image holding valid texels
    pub contribution_fill: UVec2,
    /// Region of the color image holding valid texels
    pub color_fill: UVec2,
}

/// Seed the accumulator with the shaded primary layer.
pub fn init_accumulator(
    ctx: &mut FrameContext<'_>,
    accumulator: RenderTarget,
    primary: RenderTarget,
) -> RenderResult<()> {
    let _scope = ctx.scope(ProfileEvent::new(StageType::Combine));
    ctx.copy(primary, accumulator)?;
    ctx.stats.composite_writes += 1;
    Ok(())
}

/// Add one bounce to the accumulator.
///
/// `accumulator += contribution.rgb * glossy(color)`, where the glossy
/// filter is a bilateral window whose radius grows with the parent's
/// roughness and the bounce distance relative to the camera distance.
pub fn combine(ctx: &mut FrameContext<'_>, accumulator: RenderTarget, inputs: &CombineInputs) -> RenderResult<()> {
    let _scope = ctx.scope(ProfileEvent::new(StageType::Combine));
    let glossy = ctx.settings.glossy.clone();
    ctx.dispatch(accumulator, |targets, out| {
        let sources = Sources {
            color: targets.image(inputs.color)?,
            contribution: targets.image(inputs.contribution)?,
            normal: targets.image(inputs.parent_normal)?,
            position: targets.image(inputs.parent_position)?,
            depth: inputs.parent_depth.map(|d| targets.image(d)).transpose()?,
            hit_distance: targets.image(inputs.blended_hit_distance)?,
        };
        let size = out.dimensions();
        out.update_par(|x, y, acc| {
            let c = sources.contribution.sample_fill(x, y, size, inputs.contribution_fill);
            if c.truncate().max_element() <= 0.0 {
                return acc;
            }
            let color = sources.glossy(x, y, size, c.w, inputs, &glossy);
            acc + (c.truncate() * color).extend(0.0)
        });
        Ok(())
    })?;
    ctx.stats.composite_writes += 1;
    Ok(())
}

struct Sources<'a> {
    color: &'a Image,
    contribution: &'a Image,
    normal: &'a Image,
    position: &'a Image,
    depth: Option<&'a Image>,
    hit_distance: &'a Image,
}

impl Sources<'_> {
    fn has_geometry(&self, x: u32, y: u32, size: UVec2) -> bool {
        self.depth.map_or(true, |d| d.sample_fill(x, y, size, size).x < 1.0)
    }

    /// Bilateral glossy filter of the bounce color around (x, y).
    fn glossy(
        &self,
        x: u32,
        y: u32,
        size: UVec2,
        roughness: f32,
        inputs: &CombineInputs,
        settings: &GlossySettings,
    ) -> Vec3 {
        let fill = inputs.color_fill;
        let center = self.color.sample_fill(x, y, size, fill).truncate();
        let hit_distance = self.hit_distance.sample_fill(x, y, size, fill).x;
        if roughness <= 0.0 || !is_valid_distance(hit_distance) {
            return center;
        }
        let camera_distance = self
            .position
            .sample_fill(x, y, size, size)
            .truncate()
            .distance(inputs.camera_position)
            .max(1.0e-3);
        let radius = (roughness * hit_distance / camera_distance * settings.scale)
            .min(settings.max_radius as f32)
            .round() as i32;
        if radius == 0 {
            return center;
        }

        let normal = self.normal.sample_fill(x, y, size, size).truncate();
        let geometry = self.has_geometry(x, y, size);
        let max = size.as_ivec2() - IVec2::ONE;
        let mut sum = Vec4::ZERO;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let q = (IVec2::new(x as i32 + dx, y as i32 + dy)).clamp(IVec2::ZERO, max).as_uvec2();
                if self.has_geometry(q.x, q.y, size) != geometry {
                    continue;
                }
                let falloff = (radius + 1) as f32;
                let tent = (1.0 - dx.abs() as f32 / falloff) * (1.0 - dy.abs() as f32 / falloff);
                let similarity = normal
                    .dot(self.normal.sample_fill(q.x, q.y, size, size).truncate())
                    .max(0.0)
                    .powi(NORMAL_POWER);
                let w = tent * if dx == 0 && dy == 0 { 1.0 } else { similarity };
                sum += self.color.sample_fill(q.x, q.y, size, fill).truncate().extend(1.0) * w;
            }
        }
        sum.truncate() / sum.w.max(1.0e-6)
    }
}
