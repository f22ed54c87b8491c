// Meshes
//
// Raw vertex bytes described by a VertexLayout, optional u32 indices, and the
// topology to draw them with. Both live in device-local buffers.

use anyhow::Result;
use ash::vk;
use bytemuck::Pod;
use glam::{Vec2, Vec3};
use std::sync::Arc;

use crate::backend::buffer::GpuBuffer;
use crate::backend::pipeline::Topology;
use crate::backend::vertex::{VertexLayout, VertexPcu};
use crate::backend::VulkanDevice;
use crate::error::FatalError;

pub struct Mesh {
    layout: VertexLayout,
    topology: Topology,
    vertices: GpuBuffer,
    indices: GpuBuffer,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    pub fn new(device: &Arc<VulkanDevice>, layout: VertexLayout, topology: Topology) -> Self {
        Self {
            layout,
            topology,
            vertices: GpuBuffer::vertex(device.clone()),
            indices: GpuBuffer::index(device.clone()),
            vertex_count: 0,
            index_count: 0,
        }
    }

    /// Mesh with data already uploaded
    pub fn from_vertices<V: Pod>(
        device: &Arc<VulkanDevice>,
        layout: VertexLayout,
        topology: Topology,
        vertices: &[V],
        indices: Option<&[u32]>,
    ) -> Result<Self> {
        let mut mesh = Self::new(device, layout, topology);
        mesh.upload(bytemuck::cast_slice(vertices), indices)?;
        Ok(mesh)
    }

    /// Replace the mesh data. Buffers keep their handles while sizes match.
    pub fn upload(&mut self, vertex_bytes: &[u8], indices: Option<&[u32]>) -> Result<()> {
        self.vertex_count = vertex_count(&self.layout, vertex_bytes.len())?;
        self.vertices.copy_to_gpu(vertex_bytes)?;

        let indices = indices.unwrap_or(&[]);
        self.index_count = indices.len() as u32;
        self.indices.copy_to_gpu(bytemuck::cast_slice(indices))?;
        Ok(())
    }

    /// 24 vertices (four per face so each face gets its own uvs), 36 indices
    pub fn unit_cube(device: &Arc<VulkanDevice>) -> Result<Self> {
        let (vertices, indices) = cube_geometry();
        Self::from_vertices(
            device,
            VertexPcu::layout(),
            Topology::TriangleList,
            &vertices,
            Some(&indices),
        )
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn set_topology(&mut self, topology: Topology) {
        self.topology = topology;
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertices.handle()
    }

    pub fn index_buffer(&self) -> Option<vk::Buffer> {
        self.is_indexed().then(|| self.indices.handle())
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn is_indexed(&self) -> bool {
        self.index_count > 0
    }
}

fn vertex_count(layout: &VertexLayout, byte_count: usize) -> Result<u32, FatalError> {
    if layout.stride == 0 {
        return Err(FatalError::MissingState("vertex layout has a zero stride"));
    }
    if byte_count % layout.stride as usize != 0 {
        return Err(FatalError::Parse {
            what: "vertex data",
            path: "<memory>".into(),
            message: format!(
                "{} bytes is not a multiple of the {} byte stride",
                byte_count, layout.stride
            ),
        });
    }
    Ok((byte_count / layout.stride as usize) as u32)
}

/// Unit cube centered on the origin, counter-clockwise faces seen from outside
pub fn cube_geometry() -> (Vec<VertexPcu>, Vec<u32>) {
    // (normal, u axis, v axis) with u x v == normal
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];
    let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        let color = face_color(normal);
        for (x, y) in corners {
            let position = normal * 0.5 + u * x + v * y;
            // v grows downwards in texture space
            let uv = Vec2::new(x + 0.5, 0.5 - y);
            vertices.push(VertexPcu::new(position, color, uv));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

fn face_color(normal: Vec3) -> [u8; 4] {
    let tint = |axis: f32| (160.0 + 95.0 * axis.abs()) as u8;
    [tint(normal.x), tint(normal.y), tint(normal.z), 255]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_four_vertices_per_face() {
        let (vertices, indices) = cube_geometry();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn cube_triangles_face_outwards() {
        let (vertices, indices) = cube_geometry();
        for triangle in indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| Vec3::from(vertices[triangle[k] as usize].position));
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid) > 0.0, "triangle {:?} faces inwards", triangle);
        }
    }

    #[test]
    fn cube_fits_unit_bounds() {
        let (vertices, _) = cube_geometry();
        for vertex in &vertices {
            for component in vertex.position {
                assert!((component.abs() - 0.5).abs() < 1e-6);
            }
            assert!(vertex.uv.iter().all(|t| (0.0..=1.0).contains(t)));
        }
    }

    #[test]
    fn vertex_count_requires_whole_vertices() {
        let layout = VertexPcu::layout();
        assert_eq!(vertex_count(&layout, 24 * 3).unwrap(), 3);
        assert_eq!(vertex_count(&layout, 0).unwrap(), 0);
        assert!(vertex_count(&layout, 25).is_err());

        let empty = VertexLayout::packed(&[]);
        assert!(matches!(
            vertex_count(&empty, 24),
            Err(FatalError::MissingState(_))
        ));
    }
}
