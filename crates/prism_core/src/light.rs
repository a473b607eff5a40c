//! Punctual lights and their per-frame classification.

use std::sync::Arc;

use prism_math::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Parameters shared by every light type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LightCommon {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Linear falloff factor
    pub linear_attenuation: f32,
    /// Quadratic falloff factor
    pub quadratic_attenuation: f32,
    /// Emitter radius driving soft shadow penumbrae
    pub radius: f32,
    pub enabled: bool,
    pub casts_shadows: bool,
}

impl Default for LightCommon {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
            linear_attenuation: 0.0,
            quadratic_attenuation: 0.1,
            radius: 0.1,
            enabled: true,
            casts_shadows: true,
        }
    }
}

impl LightCommon {
    /// Distance falloff `1 / (1 + l*d + q*d^2)`.
    pub fn attenuation(&self, distance: f32) -> f32 {
        1.0 / (1.0 + self.linear_attenuation * distance + self.quadratic_attenuation * distance * distance)
    }
}

/// Omnidirectional light.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointLight {
    #[serde(flatten)]
    pub common: LightCommon,
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            common: LightCommon {
                position,
                color,
                ..Default::default()
            },
        }
    }
}

/// Cone-restricted light that shadows through a light-space shadow map.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpotLight {
    #[serde(flatten)]
    pub common: LightCommon,
    pub direction: Vec3,
    /// Half-angle of the cone in radians
    pub cone_angle: f32,
    /// Light-space occluder distances; rendered by the application
    #[serde(skip)]
    pub shadow_map: Option<Arc<ShadowMap>>,
}

impl SpotLight {
    pub fn new(position: Vec3, direction: Vec3, cone_angle: f32, color: Vec3) -> Self {
        Self {
            common: LightCommon {
                position,
                color,
                ..Default::default()
            },
            direction: direction.normalize_or_zero(),
            cone_angle,
            shadow_map: None,
        }
    }
}

/// Scene light.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Light {
    Point(PointLight),
    Spot(SpotLight),
}

impl Light {
    pub fn common(&self) -> &LightCommon {
        match self {
            Light::Point(l) => &l.common,
            Light::Spot(l) => &l.common,
        }
    }

    /// Cone axis and minimum cosine; points pass every cone test (`-1`).
    pub fn cone(&self) -> (Vec3, f32) {
        match self {
            Light::Point(_) => (Vec3::ZERO, -1.0),
            Light::Spot(l) => (l.direction, l.cone_angle.cos()),
        }
    }
}

/// Whether `to_point` (light → point, normalized) lies inside a cone.
pub fn inside_cone(axis: Vec3, cone_min_dot: f32, to_point: Vec3) -> bool {
    cone_min_dot <= -1.0 || axis.dot(to_point) >= cone_min_dot
}

/// Enabled lights of a frame split by shadow casting, as indices into the
/// scene light list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightPartition {
    pub shadow_casting: Vec<usize>,
    pub non_shadow_casting: Vec<usize>,
}

impl LightPartition {
    pub fn from_lights(lights: &[Light]) -> Self {
        let mut partition = Self::default();
        for (index, light) in lights.iter().enumerate() {
            let common = light.common();
            if !common.enabled {
                continue;
            }
            if common.casts_shadows {
                partition.shadow_casting.push(index);
            } else {
                partition.non_shadow_casting.push(index);
            }
        }
        partition
    }
}

/// Square perspective distance map seen from a spot light.
///
/// Each texel holds the distance from the light to the closest surface along
/// the texel's direction, or `f32::INFINITY` where nothing was hit.
#[derive(Clone, Debug)]
pub struct ShadowMap {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    /// tan(half field of view)
    pub tan_half_fov: f32,
    pub resolution: u32,
    pub distances: Vec<f32>,
}

impl ShadowMap {
    /// Build an orthonormal light frame for a spot light.
    pub fn frame(position: Vec3, forward: Vec3, cone_angle: f32, resolution: u32) -> Self {
        let forward = forward.normalize_or_zero();
        let helper = if forward.y.abs() > 0.99 { Vec3::X } else { Vec3::Y };
        let right = forward.cross(helper).normalize();
        let up = right.cross(forward);
        let resolution = resolution.max(1);
        Self {
            position,
            forward,
            right,
            up,
            tan_half_fov: cone_angle.clamp(0.01, 1.5).tan(),
            resolution,
            distances: vec![f32::INFINITY; (resolution * resolution) as usize],
        }
    }

    /// Direction through the center of texel (x, y).
    pub fn texel_direction(&self, x: u32, y: u32) -> Vec3 {
        let r = self.resolution as f32;
        let u = ((x as f32 + 0.5) / r) * 2.0 - 1.0;
        let v = 1.0 - ((y as f32 + 0.5) / r) * 2.0;
        (self.forward + self.right * (u * self.tan_half_fov) + self.up * (v * self.tan_half_fov))
            .normalize()
    }

    /// Project a world point into map UV space ([0,1]^2), if in front of the light.
    pub fn project(&self, point: Vec3) -> Option<Vec2> {
        let d = point - self.position;
        let z = d.dot(self.forward);
        if z <= 0.0 {
            return None;
        }
        let u = d.dot(self.right) / (z * self.tan_half_fov);
        let v = d.dot(self.up) / (z * self.tan_half_fov);
        if u.abs() > 1.0 || v.abs() > 1.0 {
            return None;
        }
        Some(Vec2::new(u * 0.5 + 0.5, 0.5 - v * 0.5))
    }

    /// Nearest-texel stored distance at a UV coordinate.
    pub fn distance_at(&self, uv: Vec2) -> f32 {
        let r = self.resolution;
        let x = ((uv.x * r as f32) as u32).min(r - 1);
        let y = ((uv.y * r as f32) as u32).min(r - 1);
        self.distances[(y * r + x) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_light_cone_always_passes() {
        let light = Light::Point(PointLight::new(Vec3::ZERO, Vec3::ONE));
        let (axis, min_dot) = light.cone();
        assert_eq!(min_dot, -1.0);
        assert!(inside_cone(axis, min_dot, -Vec3::Y));
    }

    #[test]
    fn test_spot_cone() {
        let light = Light::Spot(SpotLight::new(Vec3::ZERO, -Vec3::Y, 0.5, Vec3::ONE));
        let (axis, min_dot) = light.cone();
        assert!(inside_cone(axis, min_dot, -Vec3::Y));
        assert!(!inside_cone(axis, min_dot, Vec3::X));
    }

    #[test]
    fn test_attenuation_falls_off() {
        let common = LightCommon::default();
        assert_eq!(common.attenuation(0.0), 1.0);
        assert!(common.attenuation(2.0) < common.attenuation(1.0));
    }

    #[test]
    fn test_shadow_map_projects_center() {
        let map = ShadowMap::frame(Vec3::new(0.0, 5.0, 0.0), -Vec3::Y, 0.6, 16);
        let uv = map.project(Vec3::ZERO).unwrap();
        assert!((uv - Vec2::splat(0.5)).length() < 1e-4);
        assert!(map.project(Vec3::new(0.0, 10.0, 0.0)).is_none());
    }

    #[test]
    fn test_light_json_keeps_type() {
        let json = r#"{"type":"spot","position":[0,4,0],"direction":[0,-1,0],"cone_angle":0.4}"#;
        let light: Light = serde_json::from_str(json).unwrap();
        assert!(matches!(light, Light::Spot(ref s) if s.shadow_map.is_none()));
        assert_eq!(light.common().position, Vec3::new(0.0, 4.0, 0.0));
    }
}
