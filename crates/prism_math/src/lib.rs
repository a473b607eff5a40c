//! PRISM math types.
//!
//! Re-exports `glam` and adds the small set of ray-tracing helpers shared by
//! the scene and render crates.

// Re-export glam for convenience
pub use glam::*;

mod aabb;
mod camera;
mod interval;
mod ray;

pub use aabb::Aabb;
pub use camera::Camera;
pub use interval::Interval;
pub use ray::Ray;

/// Offset applied along the surface normal when spawning secondary rays.
pub const RAY_EPSILON: f32 = 1.0e-3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_operations() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 5.0, 6.0);
        assert_eq!(a + b, Vec3::new(5.0, 7.0, 9.0));
    }
}
