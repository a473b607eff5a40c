//! Scene types: materials, models, actors and the per-frame scene queries.
//!
//! Actors are a closed set of variants matched exhaustively wherever they are
//! consumed (deferred pass, trace scene, selection volumes).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use prism_math::{Aabb, Mat3, Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::light::{Light, LightPartition};
use crate::mesh::Mesh;

/// Surface description written into the hit G-buffer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    /// Diffuse/albedo color (RGB, 0-1)
    pub albedo: Vec3,

    /// Opacity (0=fully transmissive, 1=opaque); stored in the albedo alpha
    pub opacity: f32,

    /// Metallic factor (0=dielectric, 1=metal)
    pub metalness: f32,

    /// Roughness factor (0=mirror, 1=rough)
    pub roughness: f32,

    /// Index of refraction of the medium behind the surface
    pub refractive_index: f32,

    /// Emissive color (RGB, 0-1)
    pub emissive: Vec3,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::splat(0.5),
            opacity: 1.0,
            metalness: 0.0,
            roughness: 0.5,
            refractive_index: 1.5,
            emissive: Vec3::ZERO,
        }
    }
}

impl Material {
    /// Perfect mirror.
    pub fn mirror(albedo: Vec3) -> Self {
        Self {
            albedo,
            metalness: 1.0,
            roughness: 0.0,
            ..Default::default()
        }
    }

    /// Clear dielectric (glass, water).
    pub fn glass(refractive_index: f32) -> Self {
        Self {
            albedo: Vec3::ONE,
            opacity: 0.0,
            metalness: 0.0,
            roughness: 0.0,
            refractive_index,
            emissive: Vec3::ZERO,
        }
    }

    /// Self-illuminated surface.
    pub fn emissive(color: Vec3) -> Self {
        Self {
            albedo: Vec3::ZERO,
            emissive: color,
            roughness: 1.0,
            ..Default::default()
        }
    }
}

/// A named mesh + material pair that actors reference.
#[derive(Clone, Debug)]
pub struct Model {
    pub name: String,
    pub mesh: Arc<Mesh>,
    pub material: Material,
}

impl Model {
    pub fn new(name: impl Into<String>, mesh: Mesh, material: Material) -> Self {
        Self {
            name: name.into(),
            mesh: Arc::new(mesh),
            material,
        }
    }
}

/// Loaded models keyed by name.
#[derive(Clone, Debug, Default)]
pub struct ModelLibrary {
    models: HashMap<String, Arc<Model>>,
}

impl ModelLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model, replacing any previous model with the same name.
    pub fn insert(&mut self, model: Model) -> Arc<Model> {
        let model = Arc::new(model);
        self.models.insert(model.name.clone(), model.clone());
        model
    }

    /// Look up a model; unloaded models are a `MissingResource`.
    pub fn get(&self, name: &str) -> RenderResult<Arc<Model>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::MissingResource(format!("model '{name}' is not loaded")))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// A rigid actor placed with a single pose.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockActor {
    pub model: String,
    #[serde(default = "identity")]
    pub pose: Mat4,
    /// Extra emission added on top of the model material
    #[serde(default)]
    pub emissive: Vec3,
}

/// An actor whose vertices follow the bones of a skeleton pose.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkeletonActor {
    pub model: String,
    #[serde(default = "identity")]
    pub pose: Mat4,
    /// Model-space bone transforms, indexed by the mesh bone indices
    #[serde(default)]
    pub skeleton_pose: Vec<Mat4>,
}

fn identity() -> Mat4 {
    Mat4::IDENTITY
}

/// Drawable scene entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Actor {
    Block(BlockActor),
    Skeleton(SkeletonActor),
}

impl Actor {
    pub fn block(model: impl Into<String>, pose: Mat4) -> Self {
        Actor::Block(BlockActor {
            model: model.into(),
            pose,
            emissive: Vec3::ZERO,
        })
    }

    pub fn model_name(&self) -> &str {
        match self {
            Actor::Block(a) => &a.model,
            Actor::Skeleton(a) => &a.model,
        }
    }

    pub fn pose(&self) -> Mat4 {
        match self {
            Actor::Block(a) => a.pose,
            Actor::Skeleton(a) => a.pose,
        }
    }

    pub fn skeleton_pose(&self) -> Option<&[Mat4]> {
        match self {
            Actor::Block(_) => None,
            Actor::Skeleton(a) => Some(&a.skeleton_pose),
        }
    }

    pub fn extra_emissive(&self) -> Vec3 {
        match self {
            Actor::Block(a) => a.emissive,
            Actor::Skeleton(_) => Vec3::ZERO,
        }
    }
}

/// Transform mesh vertices and normals to world space.
///
/// Skinned vertices are first moved by their bone; vertices referencing a
/// bone outside `skeleton_pose` keep the bind pose.
pub fn pose_mesh(mesh: &Mesh, pose: &Mat4, skeleton_pose: Option<&[Mat4]>) -> (Vec<Vec3>, Vec<Vec3>) {
    let bone_matrix = |vertex: usize| -> Mat4 {
        match (skeleton_pose, &mesh.bone_indices) {
            (Some(bones), Some(indices)) => indices
                .get(vertex)
                .and_then(|&b| bones.get(b as usize))
                .map(|bone| *pose * *bone)
                .unwrap_or(*pose),
            _ => *pose,
        }
    };

    let mut positions = Vec::with_capacity(mesh.positions.len());
    let mut normals = Vec::with_capacity(mesh.normals.len());
    for (i, (p, n)) in mesh.positions.iter().zip(&mesh.normals).enumerate() {
        let m = bone_matrix(i);
        let normal_matrix = Mat3::from_mat4(m).inverse().transpose();
        positions.push(m.transform_point3(*p));
        normals.push((normal_matrix * *n).try_normalize().unwrap_or(*n));
    }
    (positions, normals)
}

/// Actor indices the editor has selected.
#[derive(Clone, Debug, Default)]
pub struct Selection {
    actors: BTreeSet<usize>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, actor: usize) -> Self {
        self.actors.insert(actor);
        self
    }

    pub fn contains(&self, actor: usize) -> bool {
        self.actors.contains(&actor)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.actors.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

/// Everything drawn in a frame.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    pub models: ModelLibrary,
    pub actors: Vec<Actor>,
    pub lights: Vec<Light>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_actor(&mut self, actor: Actor) -> usize {
        self.actors.push(actor);
        self.actors.len() - 1
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        self.lights.push(light);
        self.lights.len() - 1
    }

    /// Actors whose model is loaded, paired with it, in actor order.
    ///
    /// Actors with missing models are skipped with a warning.
    pub fn resolved_actors(&self) -> Vec<(usize, &Actor, Arc<Model>)> {
        self.actors
            .iter()
            .enumerate()
            .filter_map(|(index, actor)| match self.models.get(actor.model_name()) {
                Ok(model) => Some((index, actor, model)),
                Err(err) => {
                    log::warn!("Skipping actor {index}: {err}");
                    None
                }
            })
            .collect()
    }

    pub fn enabled_lights(&self) -> impl Iterator<Item = (usize, &Light)> + '_ {
        self.lights.iter().enumerate().filter(|(_, l)| l.common().enabled)
    }

    /// Enabled lights split by shadow casting, recomputed on every call.
    pub fn partition_lights(&self) -> LightPartition {
        LightPartition::from_lights(&self.lights)
    }

    /// World-space bounds of an actor, if its model is loaded.
    pub fn actor_bounds(&self, index: usize) -> Option<Aabb> {
        let actor = self.actors.get(index)?;
        let model = self.models.get(actor.model_name()).ok()?;
        Some(model.mesh.bounds.transformed(&actor.pose()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::PointLight;

    fn scene_with_sphere() -> Scene {
        let mut scene = Scene::new();
        scene
            .models
            .insert(Model::new("ball", Mesh::uv_sphere(1.0, 8, 4), Material::default()));
        scene
    }

    #[test]
    fn test_missing_model_actor_is_skipped() {
        let mut scene = scene_with_sphere();
        scene.add_actor(Actor::block("ball", Mat4::IDENTITY));
        scene.add_actor(Actor::block("teapot", Mat4::IDENTITY));

        let resolved = scene.resolved_actors();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, 0);
    }

    #[test]
    fn test_actor_bounds_follow_pose() {
        let mut scene = scene_with_sphere();
        let id = scene.add_actor(Actor::block(
            "ball",
            Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0)),
        ));

        let bounds = scene.actor_bounds(id).unwrap();
        assert!((bounds.centroid().y - 3.0).abs() < 0.01);
    }

    #[test]
    fn test_skeleton_pose_moves_bound_vertices() {
        let mesh = Mesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Z], vec![0, 2, 1], None)
            .with_bones(vec![0, 1, 1]);
        let bones = [Mat4::IDENTITY, Mat4::from_translation(Vec3::Y)];

        let (positions, _) = pose_mesh(&mesh, &Mat4::IDENTITY, Some(&bones));
        assert_eq!(positions[0], Vec3::ZERO);
        assert_eq!(positions[1], Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_partition_ignores_disabled_lights() {
        let mut scene = Scene::new();
        scene.add_light(Light::Point(PointLight::new(Vec3::Y, Vec3::ONE)));
        let mut off = PointLight::new(Vec3::X, Vec3::ONE);
        off.common.enabled = false;
        scene.add_light(Light::Point(off));

        let partition = scene.partition_lights();
        assert_eq!(partition.shadow_casting, vec![0]);
        assert!(partition.non_shadow_casting.is_empty());
        assert_eq!(scene.enabled_lights().map(|(i, _)| i).collect::<Vec<_>>(), vec![0]);
    }
}
