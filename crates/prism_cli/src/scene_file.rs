//! JSON scene descriptions.
//!
//! Models are built from the mesh generators; actors place them with a
//! translation / rotation / scale triple instead of a raw matrix.

use std::path::Path;

use anyhow::{Context, Result};
use prism_core::{Actor, BlockActor, Light, Material, Mesh, Model, PointLight, Scene, Selection, SpotLight};
use prism_math::{Camera, EulerRot, Mat4, Quat, Vec3};
use prism_render::attach_shadow_maps;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    UvSphere {
        radius: f32,
        #[serde(default = "default_segments")]
        segments: u32,
        #[serde(default = "default_rings")]
        rings: u32,
    },
    Cube {
        half_extent: f32,
    },
    Plane {
        half_extent: f32,
    },
    Octahedron {
        radius: f32,
    },
}

fn default_segments() -> u32 {
    32
}

fn default_rings() -> u32 {
    16
}

impl Shape {
    pub fn build(&self) -> Mesh {
        match *self {
            Shape::UvSphere { radius, segments, rings } => Mesh::uv_sphere(radius, segments, rings),
            Shape::Cube { half_extent } => Mesh::cube(half_extent),
            Shape::Plane { half_extent } => Mesh::plane(half_extent),
            Shape::Octahedron { radius } => Mesh::octahedron(radius),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDesc {
    pub name: String,
    pub shape: Shape,
    #[serde(default)]
    pub material: Material,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Placement {
    pub translation: Vec3,
    /// XYZ Euler angles in degrees
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Placement {
    pub fn matrix(&self) -> Mat4 {
        let r = self.rotation * std::f32::consts::PI / 180.0;
        let rotation = Quat::from_euler(EulerRot::XYZ, r.x, r.y, r.z);
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.translation)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorDesc {
    pub model: String,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default)]
    pub emissive: Vec3,
}

/// Everything a `prism render` invocation reads from the scene file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub camera: Camera,
    pub models: Vec<ModelDesc>,
    pub actors: Vec<ActorDesc>,
    #[serde(default)]
    pub lights: Vec<Light>,
    /// Indices into `actors`
    #[serde(default)]
    pub selection: Vec<usize>,
    /// Spot light shadow map resolution; no maps are rendered when absent
    #[serde(default)]
    pub shadow_map_resolution: Option<u32>,
}

impl SceneFile {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let file = Self::from_json_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
        log::info!(
            "Loaded scene {}: {} models, {} actors, {} lights",
            path.display(),
            file.models.len(),
            file.actors.len(),
            file.lights.len()
        );
        Ok(file)
    }

    /// Build the renderable scene, rendering spot shadow maps if requested.
    pub fn build(&self) -> (Scene, Selection) {
        let mut scene = Scene::new();
        for model in &self.models {
            scene.models.insert(Model::new(model.name.clone(), model.shape.build(), model.material));
        }
        for actor in &self.actors {
            scene.add_actor(Actor::Block(BlockActor {
                model: actor.model.clone(),
                pose: actor.placement.matrix(),
                emissive: actor.emissive,
            }));
        }
        for light in &self.lights {
            scene.add_light(light.clone());
        }
        if let Some(resolution) = self.shadow_map_resolution {
            let count = attach_shadow_maps(&mut scene, resolution);
            log::info!("Rendered {count} spot shadow maps at {resolution}x{resolution}");
        }

        let selection = self.selection.iter().fold(Selection::new(), |s, &i| s.with(i));
        (scene, selection)
    }

    /// Glass ball and chrome cube on a floor under one point and one spot light.
    pub fn demo() -> Self {
        let mut key = PointLight::new(Vec3::new(3.0, 5.0, 4.0), Vec3::new(1.0, 0.95, 0.9));
        key.common.intensity = 6.0;
        key.common.radius = 0.3;
        let mut rim = SpotLight::new(
            Vec3::new(-3.0, 4.0, -2.0),
            Vec3::new(0.6, -0.8, 0.4),
            0.6,
            Vec3::new(0.6, 0.7, 1.0),
        );
        rim.common.intensity = 8.0;

        Self {
            camera: Camera::new(Vec3::new(0.0, 1.5, 6.0), Vec3::new(0.0, 0.3, 0.0)),
            models: vec![
                ModelDesc {
                    name: "floor".into(),
                    shape: Shape::Plane { half_extent: 6.0 },
                    material: Material {
                        albedo: Vec3::splat(0.6),
                        roughness: 0.6,
                        ..Default::default()
                    },
                },
                ModelDesc {
                    name: "ball".into(),
                    shape: Shape::UvSphere {
                        radius: 0.8,
                        segments: default_segments(),
                        rings: default_rings(),
                    },
                    material: Material::glass(1.5),
                },
                ModelDesc {
                    name: "crate".into(),
                    shape: Shape::Cube { half_extent: 0.5 },
                    material: Material::mirror(Vec3::new(0.9, 0.8, 0.6)),
                },
            ],
            actors: vec![
                ActorDesc {
                    model: "floor".into(),
                    placement: Placement {
                        translation: Vec3::new(0.0, -0.8, 0.0),
                        ..Default::default()
                    },
                    emissive: Vec3::ZERO,
                },
                ActorDesc {
                    model: "ball".into(),
                    placement: Placement::default(),
                    emissive: Vec3::ZERO,
                },
                ActorDesc {
                    model: "crate".into(),
                    placement: Placement {
                        translation: Vec3::new(1.8, -0.3, -0.8),
                        rotation: Vec3::new(0.0, 30.0, 0.0),
                        ..Default::default()
                    },
                    emissive: Vec3::ZERO,
                },
            ],
            lights: vec![Light::Point(key), Light::Spot(rim)],
            selection: Vec::new(),
            shadow_map_resolution: Some(256),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_scene() {
        let json = r#"{
            "models": [{ "name": "ball", "shape": { "type": "uv_sphere", "radius": 1.0 } }],
            "actors": [{ "model": "ball", "translation": [0.0, 1.0, 0.0] }],
            "lights": [{ "type": "point", "position": [0.0, 4.0, 0.0] }]
        }"#;
        let file = SceneFile::from_json_str(json).unwrap();
        let (scene, selection) = file.build();

        assert_eq!(scene.models.len(), 1);
        assert_eq!(scene.actors[0].pose().w_axis.y, 1.0);
        assert!(scene.lights[0].common().casts_shadows);
        assert!(selection.is_empty());
    }

    #[test]
    fn test_placement_scales_before_translating() {
        let placement = Placement {
            translation: Vec3::new(1.0, 0.0, 0.0),
            rotation: Vec3::new(0.0, 90.0, 0.0),
            scale: Vec3::splat(2.0),
        };
        let p = placement.matrix().transform_point3(Vec3::X);
        assert!((p - Vec3::new(1.0, 0.0, -2.0)).length() < 1e-5);
    }

    #[test]
    fn test_demo_scene_builds_shadow_maps() {
        let mut demo = SceneFile::demo();
        demo.shadow_map_resolution = Some(16);
        let (scene, _) = demo.build();
        assert_eq!(scene.resolved_actors().len(), 3);
        let Light::Spot(spot) = &scene.lights[1] else { panic!("expected a spot light") };
        assert!(spot.shadow_map.is_some());
    }

    #[test]
    fn test_unknown_shape_is_rejected() {
        let json = r#"{ "models": [{ "name": "x", "shape": { "type": "torus" } }], "actors": [] }"#;
        assert!(SceneFile::from_json_str(json).is_err());
    }
}
