use crate::{Vec3, RAY_EPSILON};

/// A ray in 3D space with origin and direction.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Create a ray leaving a surface, nudged along `normal` so it does not
    /// re-hit the surface it starts on.
    ///
    /// The nudge follows the side of the surface the direction points to.
    pub fn leaving_surface(point: Vec3, normal: Vec3, direction: Vec3) -> Self {
        let side = if direction.dot(normal) >= 0.0 { 1.0 } else { -1.0 };
        Self {
            origin: point + normal * (RAY_EPSILON * side),
            direction,
        }
    }

    /// Get the point along the ray at parameter t.
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);

        assert_eq!(ray.at(0.0), Vec3::ZERO);
        assert_eq!(ray.at(2.0), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(ray.at(-1.0), Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_leaving_surface_follows_direction() {
        let outward = Ray::leaving_surface(Vec3::ZERO, Vec3::Y, Vec3::new(0.0, 1.0, 1.0));
        assert!(outward.origin.y > 0.0);

        let inward = Ray::leaving_surface(Vec3::ZERO, Vec3::Y, Vec3::new(0.0, -1.0, 0.0));
        assert!(inward.origin.y < 0.0);
    }
}
