use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::Ray;

/// Pinhole camera shared by the primary pass and the compositor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO)
    }
}

impl Camera {
    /// Create a new camera
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            fov_y: 45.0_f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }

    /// Get the view matrix (world → camera space)
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the projection matrix for an output aspect ratio
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }

    /// Ray through the center of pixel (x, y) of a `width` x `height` image.
    ///
    /// Pixel (0, 0) is the top-left corner.
    pub fn primary_ray(&self, x: u32, y: u32, width: u32, height: u32) -> Ray {
        let forward = (self.target - self.position).normalize();
        let right = forward.cross(self.up).normalize();
        let up = right.cross(forward);

        let half_h = (self.fov_y * 0.5).tan();
        let half_w = half_h * width as f32 / height.max(1) as f32;

        let u = ((x as f32 + 0.5) / width.max(1) as f32) * 2.0 - 1.0;
        let v = 1.0 - ((y as f32 + 0.5) / height.max(1) as f32) * 2.0;

        let direction = (forward + right * (u * half_w) + up * (v * half_h)).normalize();
        Ray::new(self.position, direction)
    }

    /// World-space size of one pixel at `distance` from the camera.
    pub fn pixel_footprint(&self, distance: f32, height: u32) -> f32 {
        2.0 * (self.fov_y * 0.5).tan() * distance / height.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_ray_points_at_target() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let ray = camera.primary_ray(50, 50, 101, 101);

        assert!((ray.direction - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-4);
        assert_eq!(ray.origin, camera.position);
    }

    #[test]
    fn test_top_left_ray_goes_up_and_left() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let ray = camera.primary_ray(0, 0, 64, 32);

        assert!(ray.direction.x < 0.0);
        assert!(ray.direction.y > 0.0);
    }

    #[test]
    fn test_view_matrix() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let view = camera.view_matrix();
        assert!(view.w_axis.z < 0.0);
    }

    #[test]
    fn test_pixel_footprint_grows_with_distance() {
        let camera = Camera::default();
        assert!(camera.pixel_footprint(10.0, 100) > camera.pixel_footprint(1.0, 100));
    }
}
