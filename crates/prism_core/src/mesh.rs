//! Triangle mesh geometry.
//!
//! Meshes are renderer-agnostic: the deferred pass and the trace scene both
//! read positions, normals and indices directly.

use prism_math::{Aabb, Vec3};

/// A mesh consisting of vertex positions, normals and triangle indices.
#[derive(Clone, Debug)]
pub struct Mesh {
    /// Vertex positions (one Vec3 per vertex)
    pub positions: Vec<Vec3>,

    /// Vertex normals (one per vertex, unit length)
    pub normals: Vec<Vec3>,

    /// Triangle indices (every 3 indices form a triangle, CCW front faces)
    pub indices: Vec<u32>,

    /// Bone each vertex follows (skinned meshes only)
    pub bone_indices: Option<Vec<u32>>,

    /// Axis-aligned bounding box in model space
    pub bounds: Aabb,
}

impl Mesh {
    /// Create a new mesh, computing smooth normals when none are given.
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>, normals: Option<Vec<Vec3>>) -> Self {
        let bounds = Aabb::enclosing(positions.iter().copied());
        let mut mesh = Self {
            normals: Vec::new(),
            positions,
            indices,
            bone_indices: None,
            bounds,
        };
        match normals {
            Some(normals) if normals.len() == mesh.positions.len() => mesh.normals = normals,
            _ => mesh.compute_normals(),
        }
        mesh
    }

    /// Attach per-vertex bone indices for skeletal posing.
    pub fn with_bones(mut self, bone_indices: Vec<u32>) -> Self {
        self.bone_indices = Some(bone_indices);
        self
    }

    /// Compute smooth vertex normals by averaging face normals.
    pub fn compute_normals(&mut self) {
        let vertex_count = self.positions.len();
        let mut normals = vec![Vec3::ZERO; vertex_count];

        for face in self.indices.chunks_exact(3) {
            let (i0, i1, i2) = (face[0] as usize, face[1] as usize, face[2] as usize);
            if i0 >= vertex_count || i1 >= vertex_count || i2 >= vertex_count {
                continue;
            }
            let p0 = self.positions[i0];
            let face_normal = (self.positions[i1] - p0).cross(self.positions[i2] - p0);

            normals[i0] += face_normal;
            normals[i1] += face_normal;
            normals[i2] += face_normal;
        }

        for normal in &mut normals {
            *normal = normal.try_normalize().unwrap_or(Vec3::Y);
        }

        self.normals = normals;
    }

    /// Get the number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Iterate triangles as vertex index triples.
    pub fn triangles(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        self.indices
            .chunks_exact(3)
            .map(|f| [f[0] as usize, f[1] as usize, f[2] as usize])
    }

    // =========================================================================
    // Generators
    // =========================================================================

    /// UV sphere centered at the origin.
    pub fn uv_sphere(radius: f32, segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut positions = Vec::new();
        let mut normals = Vec::new();

        for ring in 0..=rings {
            let theta = std::f32::consts::PI * ring as f32 / rings as f32;
            for seg in 0..=segments {
                let phi = std::f32::consts::TAU * seg as f32 / segments as f32;
                let n = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                positions.push(n * radius);
                normals.push(n);
            }
        }

        let stride = segments + 1;
        let mut indices = Vec::new();
        for ring in 0..rings {
            for seg in 0..segments {
                let a = ring * stride + seg;
                let b = a + stride;
                indices.extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
            }
        }

        Self::new(positions, indices, Some(normals))
    }

    /// Axis-aligned cube with flat faces.
    pub fn cube(half_extent: f32) -> Self {
        let h = half_extent;
        let faces = [
            (Vec3::X, Vec3::Y, Vec3::Z),
            (-Vec3::X, Vec3::Y, -Vec3::Z),
            (Vec3::Y, Vec3::Z, Vec3::X),
            (-Vec3::Y, Vec3::Z, -Vec3::X),
            (Vec3::Z, Vec3::Y, -Vec3::X),
            (-Vec3::Z, Vec3::Y, Vec3::X),
        ];
        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        for (normal, up, right) in faces {
            let base = positions.len() as u32;
            let center = normal * h;
            for (su, sr) in [(-1.0, -1.0), (-1.0, 1.0), (1.0, 1.0), (1.0, -1.0)] {
                positions.push(center + up * (su * h) + right * (sr * h));
                normals.push(normal);
            }
            // Wind so the cross product points along `normal`.
            let origin = positions[base as usize];
            let e1 = positions[base as usize + 1] - origin;
            let e2 = positions[base as usize + 2] - origin;
            if e1.cross(e2).dot(normal) > 0.0 {
                indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
            } else {
                indices.extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
            }
        }

        Self::new(positions, indices, Some(normals))
    }

    /// Square ground plane in XZ facing +Y.
    pub fn plane(half_extent: f32) -> Self {
        let h = half_extent;
        let positions = vec![
            Vec3::new(-h, 0.0, -h),
            Vec3::new(-h, 0.0, h),
            Vec3::new(h, 0.0, h),
            Vec3::new(h, 0.0, -h),
        ];
        Self::new(positions, vec![0, 1, 2, 0, 2, 3], Some(vec![Vec3::Y; 4]))
    }

    /// Small octahedron used for light markers.
    pub fn octahedron(radius: f32) -> Self {
        let positions = vec![
            Vec3::X * radius,
            -Vec3::X * radius,
            Vec3::Y * radius,
            -Vec3::Y * radius,
            Vec3::Z * radius,
            -Vec3::Z * radius,
        ];
        let indices = vec![
            0, 2, 4, 4, 2, 1, 1, 2, 5, 5, 2, 0, 4, 3, 0, 1, 3, 4, 5, 3, 1, 0, 3, 5,
        ];
        Self::new(positions, indices, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_computes_normals() {
        let mesh = Mesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Z], vec![0, 2, 1], None);
        assert_eq!(mesh.normals.len(), 3);
        assert!((mesh.normals[0] - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_cube_faces_point_outward() {
        let cube = Mesh::cube(1.0);
        assert_eq!(cube.triangle_count(), 12);

        for [a, b, c] in cube.triangles() {
            let p = [cube.positions[a], cube.positions[b], cube.positions[c]];
            let n = (p[1] - p[0]).cross(p[2] - p[0]);
            let center = (p[0] + p[1] + p[2]) / 3.0;
            assert!(n.dot(center) > 0.0, "inward face at {center:?}");
        }
    }

    #[test]
    fn test_sphere_bounds() {
        let sphere = Mesh::uv_sphere(2.0, 16, 8);
        assert!((sphere.bounds.extent() - Vec3::splat(4.0)).length() < 0.05);
    }

    #[test]
    fn test_octahedron_normals_point_outward() {
        let mesh = Mesh::octahedron(1.0);
        for (p, n) in mesh.positions.iter().zip(&mesh.normals) {
            assert!(p.dot(*n) > 0.0);
        }
    }
}
