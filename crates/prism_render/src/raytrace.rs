//! Secondary ray generation.
//!
//! A bounce reads the parent layer's hit G-buffer, spawns one reflected or
//! refracted ray per texel, traces it and writes the child's full G-buffer.
//! The child's contribution is the parent's contribution times the local
//! Fresnel weight of the branch.

use prism_core::{RenderError, RenderResult};
use prism_math::{Camera, IVec2, Interval, Ray, Vec3, Vec4};

use crate::frame::FrameContext;
use crate::image::{update_many, NO_DISTANCE};
use crate::layer::{decode_ior, encode_ior, LayerRenderTargets};
use crate::profiler::{ProfileEvent, StageType, SubEvent};
use crate::reduction::min_valid_window;
use crate::trace::TraceScene;

/// Refractive index of the medium outside every object.
pub const AIR_IOR: f32 = 1.0;

/// Weights below this spawn no ray.
const MIN_WEIGHT: f32 = 1.0e-4;

const BOUNCE_OUTPUTS: usize = 13;

/// Reflect `i` about `n`.
#[inline]
pub fn reflect(i: Vec3, n: Vec3) -> Vec3 {
    i - 2.0 * i.dot(n) * n
}

/// Refract `i` through a surface facing `n` with `eta = n1 / n2`.
///
/// Returns `None` on total internal reflection.
pub fn refract(i: Vec3, n: Vec3, eta: f32) -> Option<Vec3> {
    let cos_i = (-i).dot(n).min(1.0);
    let k = 1.0 - eta * eta * (1.0 - cos_i * cos_i);
    if k < 0.0 {
        return None;
    }
    Some((eta * i + (eta * cos_i - k.sqrt()) * n).normalize())
}

/// Schlick's approximation of Fresnel reflectance.
#[inline]
pub fn schlick(f0: Vec3, cos_theta: f32) -> Vec3 {
    f0 + (Vec3::ONE - f0) * (1.0 - cos_theta.clamp(0.0, 1.0)).powi(5)
}

/// Reflectance at normal incidence between two media.
#[inline]
pub fn dielectric_f0(n1: f32, n2: f32) -> f32 {
    let r = (n1 - n2) / (n1 + n2);
    r * r
}

/// The parent surface a bounce leaves from.
#[derive(Debug, Clone, Copy)]
pub struct BounceSource {
    pub position: Vec3,
    /// Outward normal
    pub normal: Vec3,
    pub front_face: bool,
    /// Direction of the ray that hit the parent surface
    pub incoming: Vec3,
    pub albedo: Vec3,
    pub opacity: f32,
    pub metalness: f32,
    pub roughness: f32,
    pub hit_ior: f32,
    /// Medium the incoming ray travelled through
    pub current_ior: f32,
    /// Medium on the far side when the ray exits the surface
    pub exit_ior: f32,
    pub contribution: Vec3,
}

/// Direction, local weight and medium of one branch leaving a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounce {
    pub direction: Vec3,
    pub weight: Vec3,
    /// Refractive index of the medium the new ray travels through
    pub medium: f32,
}

impl BounceSource {
    /// The reflected or refracted continuation of the incoming ray.
    pub fn bounce(&self, reflection: bool) -> Bounce {
        let facing = if self.front_face { self.normal } else { -self.normal };
        let n1 = self.current_ior;
        let n2 = if self.front_face { self.hit_ior } else { self.exit_ior };
        let cos_i = (-self.incoming).dot(facing).max(0.0);
        let f0 = Vec3::splat(dielectric_f0(n1, n2));
        let fresnel = schlick(f0.lerp(self.albedo, self.metalness), cos_i);
        let mirrored = reflect(self.incoming, facing);

        if reflection {
            return Bounce {
                direction: mirrored,
                weight: fresnel,
                medium: n1,
            };
        }

        let transmitted = (1.0 - self.metalness) * (1.0 - self.opacity);
        match refract(self.incoming, facing, n1 / n2) {
            Some(direction) => {
                let f = schlick(f0, cos_i).x;
                Bounce {
                    direction,
                    weight: Vec3::splat((1.0 - f) * transmitted),
                    medium: n2,
                }
            }
            // Total internal reflection: the transmitted share stays inside.
            None => Bounce {
                direction: mirrored,
                weight: Vec3::splat(transmitted),
                medium: n1,
            },
        }
    }
}

/// Where the rays of the parent layer came from.
#[derive(Debug, Clone, Copy)]
enum Incoming {
    Camera(Vec3),
    ParentRays,
}

/// Bounce generation for the reflection and refraction branches.
#[derive(Debug, Default)]
pub struct RaytraceStage {
    initialized: bool,
}

impl RaytraceStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self) {
        self.initialized = true;
    }

    /// Spawn the first bounce from the primary camera layer.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_first_bounce(
        &self,
        ctx: &mut FrameContext<'_>,
        reflection: bool,
        primary: &LayerRenderTargets,
        child: &LayerRenderTargets,
        trace: &TraceScene,
        camera: &Camera,
    ) -> RenderResult<()> {
        let _scope = ctx.scope(ProfileEvent::new(StageType::Raytrace).sub(SubEvent::FirstBounce));
        self.generate(ctx, reflection, primary, None, child, trace, Incoming::Camera(camera.position))
    }

    /// Spawn a bounce from a deeper layer.
    ///
    /// `history` is the layer whose medium a ray returns to when it exits
    /// the surface it hit; `None` means air.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_nth_bounce(
        &self,
        ctx: &mut FrameContext<'_>,
        reflection: bool,
        parent: &LayerRenderTargets,
        history: Option<&LayerRenderTargets>,
        child: &LayerRenderTargets,
        trace: &TraceScene,
    ) -> RenderResult<()> {
        let _scope = ctx.scope(ProfileEvent::new(StageType::Raytrace).sub(SubEvent::NthBounce));
        self.generate(ctx, reflection, parent, history, child, trace, Incoming::ParentRays)
    }

    #[allow(clippy::too_many_arguments)]
    fn generate(
        &self,
        ctx: &mut FrameContext<'_>,
        reflection: bool,
        parent: &LayerRenderTargets,
        history: Option<&LayerRenderTargets>,
        child: &LayerRenderTargets,
        trace: &TraceScene,
        incoming: Incoming,
    ) -> RenderResult<()> {
        if !self.initialized {
            return Err(RenderError::NotInitialized("raytrace stage"));
        }
        let outputs: [_; BOUNCE_OUTPUTS] = [
            child.ray_origin,
            child.ray_direction,
            child.contribution,
            child.hit_position,
            child.hit_normal,
            child.hit_albedo,
            child.hit_metalness,
            child.hit_roughness,
            child.hit_refractive_index,
            child.current_refractive_index,
            child.hit_emissive,
            child.hit_distance,
            child.hit_distance_to_camera,
        ];
        ctx.dispatch_many(outputs, |targets, outputs| {
            let position = targets.image(parent.hit_position)?;
            let normal = targets.image(parent.hit_normal)?;
            let direction = targets.image(parent.ray_direction)?;
            let albedo = targets.image(parent.hit_albedo)?;
            let metalness = targets.image(parent.hit_metalness)?;
            let roughness = targets.image(parent.hit_roughness)?;
            let hit_ior = targets.image(parent.hit_refractive_index)?;
            let current_ior = targets.image(parent.current_refractive_index)?;
            let contribution = targets.image(parent.contribution)?;
            let to_camera = targets.image(parent.hit_distance_to_camera)?;
            let history_ior = history.map(|h| targets.image(h.current_refractive_index)).transpose()?;

            update_many(outputs, |x, y, _| {
                let p = position.load(x, y);
                let parent_medium = current_ior.load_x(x, y);
                if p.w < 0.5 {
                    return escaped(parent_medium);
                }
                let n = normal.load(x, y);
                let a = albedo.load(x, y);
                let p = p.truncate();
                let source = BounceSource {
                    position: p,
                    normal: n.truncate(),
                    front_face: n.w >= 0.0,
                    incoming: match incoming {
                        Incoming::Camera(eye) => (p - eye).normalize_or_zero(),
                        Incoming::ParentRays => direction.load(x, y).truncate(),
                    },
                    albedo: a.truncate(),
                    opacity: a.w,
                    metalness: metalness.load_x(x, y),
                    roughness: roughness.load_x(x, y),
                    hit_ior: decode_ior(hit_ior.load_x(x, y)),
                    current_ior: parent_medium,
                    exit_ior: history_ior.map_or(AIR_IOR, |h| h.load_x(x, y)),
                    contribution: contribution.load(x, y).truncate(),
                };
                trace_bounce(trace, &source, reflection, to_camera.load_x(x, y))
            });
            Ok(())
        })
    }

    /// 3x3 minimum of the hit distance, ignoring escaped texels.
    pub fn filter_hit_distance(&self, ctx: &mut FrameContext<'_>, layer: &LayerRenderTargets) -> RenderResult<()> {
        if !self.initialized {
            return Err(RenderError::NotInitialized("raytrace stage"));
        }
        let _scope = ctx.scope(ProfileEvent::new(StageType::Raytrace).sub(SubEvent::HitDistanceFilter));
        ctx.dispatch(layer.hit_distance_filtered, |targets, out| {
            let distance = targets.image(layer.hit_distance)?;
            out.fill_par(|x, y| Vec4::splat(min_valid_window(distance, IVec2::new(x as i32, y as i32), 1)));
            Ok(())
        })
    }
}

/// Child texels for a parent texel whose ray escaped the scene.
fn escaped(medium: f32) -> [Vec4; BOUNCE_OUTPUTS] {
    [
        Vec4::ZERO,
        Vec4::ZERO,
        Vec4::ZERO,
        Vec4::ZERO,
        Vec4::ZERO,
        Vec4::ZERO,
        Vec4::ZERO,
        Vec4::ZERO,
        Vec4::splat(encode_ior(AIR_IOR)),
        Vec4::splat(medium),
        Vec4::ZERO,
        Vec4::splat(NO_DISTANCE),
        Vec4::splat(NO_DISTANCE),
    ]
}

fn trace_bounce(
    trace: &TraceScene,
    source: &BounceSource,
    reflection: bool,
    parent_to_camera: f32,
) -> [Vec4; BOUNCE_OUTPUTS] {
    let bounce = source.bounce(reflection);
    let weight = source.contribution * bounce.weight;
    if weight.max_element() < MIN_WEIGHT {
        let mut texels = escaped(bounce.medium);
        texels[2] = Vec4::ZERO.with_w(source.roughness);
        return texels;
    }

    let facing = if source.front_face { source.normal } else { -source.normal };
    let ray = Ray::leaving_surface(source.position, facing, bounce.direction);
    let contribution = weight.extend(source.roughness);
    let origin = ray.origin.extend(1.0);
    let direction = ray.direction.extend(0.0);

    match trace.closest_hit(&ray, Interval::FORWARD) {
        Some(hit) => {
            let m = hit.material;
            [
                origin,
                direction,
                contribution,
                hit.position.extend(1.0),
                hit.normal.extend(if hit.front_face { 1.0 } else { -1.0 }),
                m.albedo.extend(m.opacity),
                Vec4::splat(m.metalness),
                Vec4::splat(m.roughness),
                Vec4::splat(encode_ior(m.refractive_index)),
                Vec4::splat(bounce.medium),
                m.emissive.extend(1.0),
                Vec4::splat(hit.t),
                Vec4::splat(parent_to_camera.max(0.0) + hit.t),
            ]
        }
        None => {
            let mut texels = escaped(bounce.medium);
            texels[0] = origin;
            texels[1] = direction;
            texels[2] = contribution;
            texels
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glass(incoming: Vec3) -> BounceSource {
        BounceSource {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            front_face: true,
            incoming,
            albedo: Vec3::ONE,
            opacity: 0.0,
            metalness: 0.0,
            roughness: 0.0,
            hit_ior: 1.5,
            current_ior: AIR_IOR,
            exit_ior: AIR_IOR,
            contribution: Vec3::ONE,
        }
    }

    #[test]
    fn test_reflect_mirrors_about_normal() {
        let r = reflect(Vec3::new(1.0, -1.0, 0.0), Vec3::Y);
        assert_eq!(r, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_head_on_refraction_goes_straight() {
        let t = refract(-Vec3::Y, Vec3::Y, 1.0 / 1.5).unwrap();
        assert!((t - -Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn test_total_internal_reflection() {
        let grazing = Vec3::new(1.0, -0.2, 0.0).normalize();
        assert!(refract(grazing, Vec3::Y, 1.5).is_none());
        assert!(refract(grazing, Vec3::Y, 1.0 / 1.5).is_some());
    }

    #[test]
    fn test_clear_glass_conserves_energy() {
        let incoming = Vec3::new(0.3, -1.0, 0.1).normalize();
        let source = glass(incoming);
        let r = source.bounce(true);
        let t = source.bounce(false);
        assert!((r.weight.x + t.weight.x - 1.0).abs() < 1e-5);
        assert_eq!(t.medium, 1.5);
        assert_eq!(r.medium, AIR_IOR);
    }

    #[test]
    fn test_exit_returns_to_history_medium() {
        let source = BounceSource {
            front_face: false,
            current_ior: 1.5,
            exit_ior: 1.33,
            incoming: Vec3::Y,
            ..glass(Vec3::Y)
        };
        let t = source.bounce(false);
        assert_eq!(t.medium, 1.33);
        assert!(t.direction.y > 0.99);
    }

    #[test]
    fn test_total_internal_reflection_keeps_medium() {
        let source = BounceSource {
            front_face: false,
            current_ior: 1.5,
            incoming: Vec3::new(1.0, 0.2, 0.0).normalize(),
            ..glass(Vec3::Y)
        };
        let t = source.bounce(false);
        assert_eq!(t.medium, 1.5);
        assert!(t.direction.y < 0.0);
        assert_eq!(t.weight, Vec3::ONE);
    }

    #[test]
    fn test_opaque_dielectric_transmits_nothing() {
        let source = BounceSource {
            opacity: 1.0,
            ..glass(-Vec3::Y)
        };
        assert_eq!(source.bounce(false).weight, Vec3::ZERO);
        assert!(source.bounce(true).weight.x > 0.0);
    }
}
