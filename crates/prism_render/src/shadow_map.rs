//! Distance maps for spot lights.

use std::sync::Arc;

use prism_core::{Light, Scene, ShadowMap, SpotLight};
use prism_math::{Interval, Ray};
use rayon::prelude::*;

use crate::trace::TraceScene;

/// Render the light-space distance map of a spot light.
pub fn render_shadow_map(trace: &TraceScene, spot: &SpotLight, resolution: u32) -> ShadowMap {
    let mut map = ShadowMap::frame(spot.common.position, spot.direction, spot.cone_angle, resolution);
    let r = map.resolution;
    let distances: Vec<f32> = (0..r * r)
        .into_par_iter()
        .map(|i| {
            let ray = Ray::new(map.position, map.texel_direction(i % r, i / r));
            trace
                .occluder_distance(&ray, Interval::FORWARD)
                .unwrap_or(f32::INFINITY)
        })
        .collect();
    map.distances = distances;
    map
}

/// Give every enabled shadow-casting spot light of `scene` a fresh map.
///
/// Returns the number of maps rendered.
pub fn attach_shadow_maps(scene: &mut Scene, resolution: u32) -> usize {
    let trace = TraceScene::build(&scene.resolved_actors());
    let mut rendered = 0;
    for light in &mut scene.lights {
        if let Light::Spot(spot) = light {
            if spot.common.enabled && spot.common.casts_shadows {
                spot.shadow_map = Some(Arc::new(render_shadow_map(&trace, spot, resolution)));
                rendered += 1;
            }
        }
    }
    log::debug!("Rendered {rendered} spot shadow maps at {resolution}x{resolution}");
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{Actor, Material, Mesh, Model};
    use prism_math::{Mat4, Vec2, Vec3};

    #[test]
    fn test_map_sees_floor_and_blocker() {
        let mut scene = Scene::new();
        scene.models.insert(Model::new("floor", Mesh::plane(4.0), Material::default()));
        scene.models.insert(Model::new("box", Mesh::cube(0.25), Material::default()));
        scene.add_actor(Actor::block("floor", Mat4::IDENTITY));
        scene.add_actor(Actor::block("box", Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0))));
        let spot = SpotLight::new(Vec3::new(0.0, 3.0, 0.0), -Vec3::Y, 0.6, Vec3::ONE);
        let index = scene.add_light(Light::Spot(spot));

        assert_eq!(attach_shadow_maps(&mut scene, 32), 1);
        let Light::Spot(spot) = &scene.lights[index] else {
            panic!("light changed type");
        };
        let map = spot.shadow_map.as_ref().unwrap();

        // The map center looks at the top of the box, the corner at the floor.
        let center = map.distance_at(Vec2::splat(0.5));
        assert!((center - 1.75).abs() < 1e-2, "center distance {center}");
        let corner = map.distance_at(Vec2::splat(0.02));
        assert!(corner > 3.0 && corner.is_finite(), "corner distance {corner}");
    }
}
