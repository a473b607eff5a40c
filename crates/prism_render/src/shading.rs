//! Direct lighting of one layer.
//!
//! Shading accumulates into `hit_shaded` in linear HDR: self-emission first,
//! then every non-shadow-casting light in a single pass, then each
//! shadow-casting light masked by its soft shadow.

use prism_core::light::inside_cone;
use prism_core::{DebugBuffer, Light, LightPartition, RenderError, RenderResult, RenderSettings};
use prism_math::{Camera, Vec3, Vec4};

use crate::frame::FrameContext;
use crate::layer::LayerRenderTargets;
use crate::output::Output;
use crate::profiler::{ProfileEvent, StageType, SubEvent};
use crate::render_targets::RenderTarget;
use crate::shadow::{ShadowOutcome, ShadowStage};
use crate::trace::TraceScene;

/// Reflectance of dielectrics at normal incidence.
pub const DIELECTRIC_F0: f32 = 0.04;

const MAX_SHININESS: f32 = 2048.0;

/// G-buffer values of one shaded texel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Surface {
    pub position: Vec3,
    /// Normal on the side the ray arrived from
    pub normal: Vec3,
    /// Unit vector from the surface towards the viewer
    pub view: Vec3,
    pub albedo: Vec3,
    pub opacity: f32,
    pub metalness: f32,
    pub roughness: f32,
}

/// Light `light` reflects towards the viewer, without visibility.
pub fn light_contribution(light: &Light, surface: &Surface) -> Vec3 {
    let common = light.common();
    let to_light = common.position - surface.position;
    let distance = to_light.length();
    if distance <= f32::EPSILON {
        return Vec3::ZERO;
    }
    let l = to_light / distance;
    let (axis, cone_min_dot) = light.cone();
    if !inside_cone(axis, cone_min_dot, -l) {
        return Vec3::ZERO;
    }
    let n_dot_l = surface.normal.dot(l);
    if n_dot_l <= 0.0 {
        return Vec3::ZERO;
    }

    let diffuse = surface.albedo * (1.0 - surface.metalness) * surface.opacity;
    let f0 = Vec3::splat(DIELECTRIC_F0).lerp(surface.albedo, surface.metalness);
    let h = (l + surface.view).normalize_or_zero();
    let shininess = (2.0 / (surface.roughness * surface.roughness).max(1.0e-4) - 2.0).clamp(1.0, MAX_SHININESS);
    let normalization = (shininess + 8.0) / (8.0 * std::f32::consts::PI);
    let specular = f0 * surface.normal.dot(h).max(0.0).powf(shininess) * normalization;

    common.color * common.intensity * common.attenuation(distance) * n_dot_l * (diffuse + specular)
}

/// Lighting stage of a layer, owning the per-light shadow pipeline.
#[derive(Debug, Default)]
pub struct ShadingStage {
    initialized: bool,
    shadow: ShadowStage,
}

impl ShadingStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, settings: &RenderSettings) {
        self.shadow.initialize(&settings.shadow);
        self.initialized = true;
    }

    fn check(&self) -> RenderResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(RenderError::NotInitialized("shading stage"))
        }
    }

    /// Start `hit_shaded` from emission; escaped texels get the background.
    pub fn init_emissive(&self, ctx: &mut FrameContext<'_>, layer: &LayerRenderTargets) -> RenderResult<()> {
        self.check()?;
        let _scope = ctx.scope(ProfileEvent::new(StageType::Shading).sub(SubEvent::EmissiveInit));
        let background = Vec3::from(ctx.settings.background).extend(1.0);
        ctx.dispatch(layer.hit_shaded, |targets, out| {
            let position = targets.image(layer.hit_position)?;
            let emissive = targets.image(layer.hit_emissive)?;
            out.fill_par(|x, y| {
                if position.load(x, y).w < 0.5 {
                    background
                } else {
                    emissive.load(x, y).truncate().extend(1.0)
                }
            });
            Ok(())
        })
    }

    /// Add every non-shadow-casting light in one pass.
    pub fn perform_shading_no_shadows(
        &self,
        ctx: &mut FrameContext<'_>,
        layer: &LayerRenderTargets,
        lights: &[&Light],
    ) -> RenderResult<()> {
        self.check()?;
        if lights.is_empty() {
            return Ok(());
        }
        let _scope = ctx.scope(ProfileEvent::new(StageType::Shading).sub(SubEvent::NoShadowLighting));
        self.accumulate(ctx, layer, lights, None)
    }

    /// Add one light's contribution, scaled by its visibility mask.
    ///
    /// Without a mask the light is treated as fully visible.
    pub fn perform_shading(
        &self,
        ctx: &mut FrameContext<'_>,
        layer: &LayerRenderTargets,
        light_index: usize,
        light: &Light,
        mask: Option<RenderTarget>,
    ) -> RenderResult<()> {
        self.check()?;
        let _scope = ctx.scope(
            ProfileEvent::new(StageType::Shading)
                .light(light_index)
                .sub(SubEvent::ShadowedLighting),
        );
        self.accumulate(ctx, layer, &[light], mask)
    }

    fn accumulate(
        &self,
        ctx: &mut FrameContext<'_>,
        layer: &LayerRenderTargets,
        lights: &[&Light],
        mask: Option<RenderTarget>,
    ) -> RenderResult<()> {
        ctx.dispatch(layer.hit_shaded, |targets, out| {
            let position = targets.image(layer.hit_position)?;
            let normal = targets.image(layer.hit_normal)?;
            let direction = targets.image(layer.ray_direction)?;
            let albedo = targets.image(layer.hit_albedo)?;
            let metalness = targets.image(layer.hit_metalness)?;
            let roughness = targets.image(layer.hit_roughness)?;
            let mask = mask.map(|m| targets.image(m)).transpose()?;
            out.update_par(|x, y, shaded| {
                let p = position.load(x, y);
                if p.w < 0.5 {
                    return shaded;
                }
                let visibility = mask.map_or(1.0, |m| m.load_x(x, y));
                if visibility <= 0.0 {
                    return shaded;
                }
                let n = normal.load(x, y);
                let a = albedo.load(x, y);
                let surface = Surface {
                    position: p.truncate(),
                    normal: n.truncate() * n.w.signum(),
                    view: -direction.load(x, y).truncate(),
                    albedo: a.truncate(),
                    opacity: a.w,
                    metalness: metalness.load_x(x, y),
                    roughness: roughness.load_x(x, y),
                };
                let lit: Vec3 = lights.iter().map(|light| light_contribution(light, &surface)).sum();
                shaded + (lit * visibility).extend(0.0)
            });
            Ok(())
        })
    }

    /// Shade a layer with every enabled light of the frame.
    ///
    /// `debug` selects a shadow buffer `(buffer, light_index)` to return
    /// instead of completing the layer. A shadow-casting light whose shadow
    /// inputs are missing is shaded without a mask.
    #[allow(clippy::too_many_arguments)]
    pub fn shade_layer(
        &self,
        ctx: &mut FrameContext<'_>,
        layer: &LayerRenderTargets,
        lights: &[Light],
        partition: &LightPartition,
        trace: &TraceScene,
        camera: &Camera,
        debug: Option<(DebugBuffer, usize)>,
    ) -> RenderResult<Output> {
        self.check()?;
        let _scope = ctx.scope(ProfileEvent::new(StageType::Shading));
        self.init_emissive(ctx, layer)?;

        let unshadowed: Vec<&Light> = partition
            .non_shadow_casting
            .iter()
            .filter_map(|&i| lights.get(i))
            .collect();
        self.perform_shading_no_shadows(ctx, layer, &unshadowed)?;

        for &index in &partition.shadow_casting {
            let Some(light) = lights.get(index) else { continue };
            let debug_buffer = debug.and_then(|(buffer, light_index)| (light_index == index).then_some(buffer));
            match self.shadow.run(ctx, layer, trace, camera, index, light, debug_buffer) {
                Ok(ShadowOutcome::Mask(mask)) => {
                    self.perform_shading(ctx, layer, index, light, Some(mask))?;
                    ctx.targets.release(mask)?;
                }
                Ok(ShadowOutcome::Debug(output)) => return Ok(output),
                Err(err) if !err.is_fatal() => {
                    log::warn!("Shading light {index} without shadows: {err}");
                    self.perform_shading(ctx, layer, index, light, None)?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Output::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{PointLight, SpotLight};

    fn surface() -> Surface {
        Surface {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            view: Vec3::Y,
            albedo: Vec3::ONE,
            opacity: 1.0,
            metalness: 0.0,
            roughness: 1.0,
        }
    }

    #[test]
    fn test_light_behind_surface_adds_nothing() {
        let light = Light::Point(PointLight::new(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE));
        assert_eq!(light_contribution(&light, &surface()), Vec3::ZERO);
    }

    #[test]
    fn test_attenuation_falls_off() {
        let near = Light::Point(PointLight::new(Vec3::new(0.0, 1.0, 0.0), Vec3::ONE));
        let far = Light::Point(PointLight::new(Vec3::new(0.0, 4.0, 0.0), Vec3::ONE));
        let near = light_contribution(&near, &surface());
        let far = light_contribution(&far, &surface());
        assert!(near.x > far.x && far.x > 0.0);
    }

    #[test]
    fn test_spot_cone_excludes_outside_points() {
        let inside = Light::Spot(SpotLight::new(Vec3::new(0.0, 2.0, 0.0), -Vec3::Y, 0.3, Vec3::ONE));
        let aside = Light::Spot(SpotLight::new(Vec3::new(0.0, 2.0, 0.0), Vec3::X, 0.3, Vec3::ONE));
        assert!(light_contribution(&inside, &surface()).x > 0.0);
        assert_eq!(light_contribution(&aside, &surface()), Vec3::ZERO);
    }

    #[test]
    fn test_transparent_dielectric_keeps_only_specular() {
        let light = Light::Point(PointLight::new(Vec3::new(0.0, 1.0, 0.0), Vec3::ONE));
        let opaque = light_contribution(&light, &surface());
        let clear = light_contribution(
            &light,
            &Surface {
                opacity: 0.0,
                ..surface()
            },
        );
        assert!(clear.x > 0.0 && clear.x < opaque.x);
    }
}
