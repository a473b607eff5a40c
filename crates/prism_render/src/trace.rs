//! Ray queries against the frame's actor geometry.
//!
//! Each actor is posed once per frame into a world-space triangle list with
//! its own bounding box; rays test boxes before triangles.

use std::sync::Arc;

use prism_core::scene::pose_mesh;
use prism_core::{Actor, Material, Mesh, Model};
use prism_math::{Aabb, Interval, Mat4, Ray, Vec3};
use rayon::prelude::*;

/// Closest intersection along a ray.
#[derive(Debug, Clone, Copy)]
pub struct Hit {
    pub t: f32,
    pub position: Vec3,
    /// Interpolated normal on the outward side of the surface
    pub normal: Vec3,
    /// Whether the ray arrived from the outward side
    pub front_face: bool,
    /// Barycentric coordinates of the hit inside its triangle
    pub barycentric: Vec3,
    pub material: Material,
}

#[derive(Debug, Clone)]
struct TraceTriangle {
    v: [Vec3; 3],
    n: [Vec3; 3],
}

/// World-space geometry of one drawable.
#[derive(Debug, Clone)]
pub struct TraceMesh {
    triangles: Vec<TraceTriangle>,
    bounds: Aabb,
    material: Material,
}

impl TraceMesh {
    /// Pose a mesh into world space.
    pub fn new(mesh: &Mesh, pose: &Mat4, skeleton_pose: Option<&[Mat4]>, material: Material) -> Self {
        let (positions, normals) = pose_mesh(mesh, pose, skeleton_pose);
        let triangles = mesh
            .triangles()
            .filter(|t| t.iter().all(|&i| i < positions.len()))
            .map(|[a, b, c]| TraceTriangle {
                v: [positions[a], positions[b], positions[c]],
                n: [normals[a], normals[b], normals[c]],
            })
            .collect();
        Self {
            triangles,
            bounds: Aabb::enclosing(positions.iter().copied()),
            material,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Closest hit within `ray_t`.
    pub fn hit(&self, ray: &Ray, ray_t: Interval) -> Option<Hit> {
        if self.bounds.is_empty() || !self.bounds.hit(ray, ray_t) {
            return None;
        }
        let mut closest: Option<(f32, f32, f32, &TraceTriangle)> = None;
        let mut max_t = ray_t.max;
        for tri in &self.triangles {
            if let Some((t, u, v)) = intersect_triangle(ray, &tri.v, Interval::new(ray_t.min, max_t)) {
                max_t = t;
                closest = Some((t, u, v, tri));
            }
        }

        let (t, u, v, tri) = closest?;
        let barycentric = Vec3::new(1.0 - u - v, u, v);
        let geometric = (tri.v[1] - tri.v[0]).cross(tri.v[2] - tri.v[0]);
        let shading = (tri.n[0] * barycentric.x + tri.n[1] * barycentric.y + tri.n[2] * barycentric.z)
            .try_normalize()
            .unwrap_or_else(|| geometric.normalize_or_zero());
        // Orient the geometric normal by the authored normals so winding does not matter.
        let outward = if geometric.dot(shading) < 0.0 { -geometric } else { geometric };

        Some(Hit {
            t,
            position: ray.at(t),
            normal: shading,
            front_face: ray.direction.dot(outward) < 0.0,
            barycentric,
            material: self.material,
        })
    }
}

/// Möller-Trumbore ray-triangle intersection returning (t, u, v).
fn intersect_triangle(ray: &Ray, v: &[Vec3; 3], ray_t: Interval) -> Option<(f32, f32, f32)> {
    let edge1 = v[1] - v[0];
    let edge2 = v[2] - v[0];

    let h = ray.direction.cross(edge2);
    let a = edge1.dot(h);
    if a.abs() < 1e-10 {
        return None;
    }

    let f = 1.0 / a;
    let s = ray.origin - v[0];
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let w = f * ray.direction.dot(q);
    if w < 0.0 || u + w > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    ray_t.surrounds(t).then_some((t, u, w))
}

/// All traceable geometry of a frame.
#[derive(Debug, Clone, Default)]
pub struct TraceScene {
    meshes: Vec<TraceMesh>,
}

impl TraceScene {
    /// Pose every resolved actor; models must already be loaded.
    pub fn build(actors: &[(usize, &Actor, Arc<Model>)]) -> Self {
        let meshes = actors
            .par_iter()
            .map(|(_, actor, model)| {
                let mut material = model.material;
                material.emissive += actor.extra_emissive();
                TraceMesh::new(&model.mesh, &actor.pose(), actor.skeleton_pose(), material)
            })
            .collect();
        Self { meshes }
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(TraceMesh::triangle_count).sum()
    }

    /// Closest hit over every mesh.
    pub fn closest_hit(&self, ray: &Ray, ray_t: Interval) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        for mesh in &self.meshes {
            let interval = ray_t.until(best.map_or(ray_t.max, |h| h.t));
            if let Some(hit) = mesh.hit(ray, interval) {
                best = Some(hit);
            }
        }
        best
    }

    /// Distance to the nearest occluder within `ray_t`, if any.
    pub fn occluder_distance(&self, ray: &Ray, ray_t: Interval) -> Option<f32> {
        self.closest_hit(ray, ray_t).map(|hit| hit.t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::Scene;

    fn sphere_scene() -> Scene {
        let mut scene = Scene::new();
        scene
            .models
            .insert(Model::new("ball", Mesh::uv_sphere(1.0, 24, 12), Material::glass(1.5)));
        scene.add_actor(Actor::block("ball", Mat4::IDENTITY));
        scene
    }

    #[test]
    fn test_closest_hit_front_face() {
        let scene = sphere_scene();
        let trace = TraceScene::build(&scene.resolved_actors());

        let ray = Ray::new(Vec3::new(0.05, 0.03, 5.0), -Vec3::Z);
        let hit = trace.closest_hit(&ray, Interval::FORWARD).unwrap();

        assert!((hit.t - 4.0).abs() < 0.02);
        assert!(hit.front_face);
        assert!(hit.normal.z > 0.9);
        assert_eq!(hit.material.refractive_index, 1.5);
    }

    #[test]
    fn test_inside_ray_hits_back_face() {
        let scene = sphere_scene();
        let trace = TraceScene::build(&scene.resolved_actors());

        let ray = Ray::new(Vec3::ZERO, Vec3::new(1.0, 0.13, 0.07).normalize());
        let hit = trace.closest_hit(&ray, Interval::FORWARD).unwrap();
        assert!(!hit.front_face);
        assert!(hit.normal.x > 0.9);
    }

    #[test]
    fn test_occluder_respects_interval() {
        let scene = sphere_scene();
        let trace = TraceScene::build(&scene.resolved_actors());

        let ray = Ray::new(Vec3::new(0.05, 0.03, 5.0), -Vec3::Z);
        assert!(trace.occluder_distance(&ray, Interval::new(0.0, 3.0)).is_none());
        assert!(trace.occluder_distance(&ray, Interval::new(0.0, 10.0)).is_some());
    }

    #[test]
    fn test_intersect_triangle_miss() {
        let tri = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let hit = Ray::new(Vec3::new(0.2, 0.2, 1.0), -Vec3::Z);
        let miss = Ray::new(Vec3::new(2.0, 2.0, 1.0), -Vec3::Z);

        assert!(intersect_triangle(&hit, &tri, Interval::FORWARD).is_some());
        assert!(intersect_triangle(&miss, &tri, Interval::FORWARD).is_none());
    }
}
