//! Deferred primary pass.
//!
//! Drawables are written one at a time into the shared primary layer with a
//! depth test. Coverage is resolved per pixel through the camera ray of the
//! pixel, so the primary G-buffer agrees exactly with the bounce tracer.

use prism_core::{Actor, Material, Mesh, Model, RenderError, RenderResult};
use prism_math::{Camera, Interval, Mat4, Vec3, Vec4};

use crate::frame::FrameContext;
use crate::image::{update_many, NO_DISTANCE};
use crate::layer::{encode_ior, LayerRenderTargets};
use crate::profiler::{ProfileEvent, StageType};
use crate::raytrace::AIR_IOR;
use crate::trace::TraceMesh;

/// Barycentric distance from an edge that still counts as the edge in
/// wireframe mode.
const WIREFRAME_WIDTH: f32 = 0.04;

/// Something the primary pass can draw.
#[derive(Debug, Clone, Copy)]
pub enum Drawable<'a> {
    Actor { actor: &'a Actor, model: &'a Model },
    /// Loose geometry such as light markers and selection volumes
    Mesh { mesh: &'a Mesh, material: &'a Material },
}

impl Drawable<'_> {
    fn mesh(&self) -> &Mesh {
        match self {
            Drawable::Actor { model, .. } => model.mesh.as_ref(),
            Drawable::Mesh { mesh, .. } => *mesh,
        }
    }

    fn material(&self) -> Material {
        match self {
            Drawable::Actor { actor, model } => {
                let mut material = model.material;
                material.emissive += actor.extra_emissive();
                material
            }
            Drawable::Mesh { material, .. } => **material,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeferredRasterizer {
    initialized: bool,
}

impl DeferredRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self) {
        self.initialized = true;
    }

    /// Reset the primary layer: camera rays, empty hits, far depth.
    pub fn clear(&self, ctx: &mut FrameContext<'_>, layer: &LayerRenderTargets, camera: &Camera) -> RenderResult<()> {
        if !self.initialized {
            return Err(RenderError::NotInitialized("deferred rasterizer"));
        }
        let depth = layer
            .depth
            .ok_or(RenderError::MissingResource("primary depth buffer".into()))?;
        let (width, height) = (ctx.settings.width, ctx.settings.height);

        ctx.dispatch_many([layer.ray_origin, layer.ray_direction], |_, outputs| {
            update_many(outputs, |x, y, _| {
                let ray = camera.primary_ray(x, y, width, height);
                [ray.origin.extend(1.0), ray.direction.extend(0.0)]
            });
            Ok(())
        })?;
        ctx.clear(layer.contribution, Vec4::new(1.0, 1.0, 1.0, 0.0))?;
        ctx.clear(layer.current_refractive_index, Vec4::splat(AIR_IOR))?;
        ctx.clear(layer.hit_refractive_index, Vec4::splat(encode_ior(AIR_IOR)))?;
        ctx.clear(depth, Vec4::ONE)?;
        for target in [layer.hit_distance, layer.hit_distance_filtered, layer.hit_distance_to_camera] {
            ctx.clear(target, Vec4::splat(NO_DISTANCE))?;
        }
        for target in [
            layer.hit_position,
            layer.hit_normal,
            layer.hit_albedo,
            layer.hit_metalness,
            layer.hit_roughness,
            layer.hit_emissive,
            layer.hit_shaded,
        ] {
            ctx.clear(target, Vec4::ZERO)?;
        }
        Ok(())
    }

    /// Draw one drawable into the primary layer.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        ctx: &mut FrameContext<'_>,
        layer: &LayerRenderTargets,
        camera: &Camera,
        drawable: Drawable<'_>,
        pose: &Mat4,
        view: &Mat4,
        skeleton_pose: Option<&[Mat4]>,
        extra_emissive: Vec3,
        wireframe: bool,
    ) -> RenderResult<()> {
        if !self.initialized {
            return Err(RenderError::NotInitialized("deferred rasterizer"));
        }
        let depth = layer
            .depth
            .ok_or(RenderError::MissingResource("primary depth buffer".into()))?;
        let _scope = ctx.scope(ProfileEvent::new(StageType::PrimaryPass));

        let mut material = drawable.material();
        material.emissive += extra_emissive;
        let mesh = TraceMesh::new(drawable.mesh(), pose, skeleton_pose, material);
        let (width, height) = (ctx.settings.width, ctx.settings.height);
        let view_projection = camera.projection_matrix(width as f32 / height as f32) * *view;

        let outputs = [
            layer.hit_position,
            layer.hit_normal,
            layer.hit_albedo,
            layer.hit_metalness,
            layer.hit_roughness,
            layer.hit_refractive_index,
            layer.hit_emissive,
            depth,
            layer.hit_distance,
            layer.hit_distance_to_camera,
        ];
        ctx.dispatch_many(outputs, |_, outputs| {
            update_many(outputs, |x, y, current| {
                let ray = camera.primary_ray(x, y, width, height);
                let Some(hit) = mesh.hit(&ray, Interval::new(camera.near, camera.far)) else {
                    return current;
                };
                if wireframe && hit.barycentric.min_element() > WIREFRAME_WIDTH {
                    return current;
                }
                let clip = view_projection * hit.position.extend(1.0);
                let z = (clip.z / clip.w).clamp(0.0, 1.0);
                if z >= current[7].x {
                    return current;
                }
                let m = hit.material;
                [
                    hit.position.extend(1.0),
                    hit.normal.extend(if hit.front_face { 1.0 } else { -1.0 }),
                    m.albedo.extend(m.opacity),
                    Vec4::splat(m.metalness),
                    Vec4::splat(m.roughness),
                    Vec4::splat(encode_ior(m.refractive_index)),
                    m.emissive.extend(1.0),
                    Vec4::splat(z),
                    Vec4::splat(hit.t),
                    Vec4::splat(hit.t),
                ]
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameStats;
    use crate::profiler::NullProfiler;
    use crate::render_targets::RenderTargetManager;
    use prism_core::RenderSettings;

    fn draw(meshes: &[(Mesh, Material, Vec3)], wireframe: bool) -> (RenderTargetManager, LayerRenderTargets) {
        let settings = RenderSettings {
            width: 16,
            height: 16,
            ..Default::default()
        };
        let mut targets = RenderTargetManager::default();
        let mut stats = FrameStats::default();
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let mut rasterizer = DeferredRasterizer::new();
        rasterizer.initialize();
        let layer = {
            let mut ctx = FrameContext::new(&settings, &mut targets, &NullProfiler, &mut stats);
            let layer = LayerRenderTargets::lease(ctx.targets, 16, 16, true).unwrap();
            rasterizer.clear(&mut ctx, &layer, &camera).unwrap();
            for (mesh, material, offset) in meshes {
                rasterizer
                    .render(
                        &mut ctx,
                        &layer,
                        &camera,
                        Drawable::Mesh { mesh, material },
                        &Mat4::from_translation(*offset),
                        &camera.view_matrix(),
                        None,
                        Vec3::ZERO,
                        wireframe,
                    )
                    .unwrap();
            }
            layer
        };
        (targets, layer)
    }

    #[test]
    fn test_nearest_drawable_wins() {
        let red = Material {
            albedo: Vec3::X,
            ..Default::default()
        };
        let green = Material {
            albedo: Vec3::Y,
            ..Default::default()
        };
        // The nearer cube is drawn last and the farther one first, and the
        // other way round; both orders must keep the nearer surface.
        for order in [[0, 1], [1, 0]] {
            let all = [
                (Mesh::cube(0.5), red, Vec3::new(0.0, 0.0, 1.0)),
                (Mesh::cube(1.0), green, Vec3::ZERO),
            ];
            let meshes: Vec<_> = order.iter().map(|&i| all[i].clone()).collect();
            let (targets, layer) = draw(&meshes, false);
            let albedo = targets.image(layer.hit_albedo).unwrap().load(8, 8);
            assert_eq!(albedo.truncate(), Vec3::X);
            let distance = targets.image(layer.hit_distance).unwrap().load_x(8, 8);
            assert!((distance - 3.5).abs() < 0.05, "distance {distance}");
        }
    }

    #[test]
    fn test_misses_keep_cleared_values() {
        let (targets, layer) = draw(&[(Mesh::cube(0.2), Material::default(), Vec3::ZERO)], false);
        assert_eq!(targets.image(layer.hit_position).unwrap().load(0, 0).w, 0.0);
        assert_eq!(targets.image(layer.depth.unwrap()).unwrap().load_x(0, 0), 1.0);
        assert_eq!(targets.image(layer.hit_distance).unwrap().load_x(0, 0), NO_DISTANCE);
        assert_eq!(targets.image(layer.contribution).unwrap().load(0, 0).x, 1.0);
    }

    #[test]
    fn test_wireframe_skips_face_interiors() {
        let solid = draw(&[(Mesh::cube(1.0), Material::default(), Vec3::ZERO)], false);
        let wire = draw(&[(Mesh::cube(1.0), Material::default(), Vec3::ZERO)], true);
        let covered = |(targets, layer): &(RenderTargetManager, LayerRenderTargets)| {
            let position = targets.image(layer.hit_position).unwrap();
            position.texels().iter().filter(|t| t.w > 0.5).count()
        };
        assert!(covered(&wire) > 0);
        assert!(covered(&wire) < covered(&solid));
    }
}
