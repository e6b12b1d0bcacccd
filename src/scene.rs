//! The renderable scene contract consumed by the capture pass.
//!
//! Scene-graph construction and asset import live outside this crate; the
//! pipeline only needs geometry it can draw into the capture targets plus
//! the per-instance data those targets record: a transform (current and
//! previous frame, for velocity), a base color, and metal/rough factors.
//!
//! # Vertex Layout
//!
//! [`Vertex3d`] uses the following GPU layout (32 bytes per vertex):
//!
//! | Attribute | Format    | Offset | Shader Location |
//! |-----------|-----------|--------|-----------------|
//! | position  | Float32x3 | 0      | 0               |
//! | normal    | Float32x3 | 12     | 1               |
//! | uv        | Float32x2 | 24     | 2               |

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Mat4;

use crate::gpu::GpuContext;

static NEXT_SCENE_ID: AtomicU64 = AtomicU64::new(1);

/// A vertex for 3D mesh rendering with position, normal, and texture
/// coordinates. `#[repr(C)]` for predictable GPU upload.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    /// The 3D position of this vertex in model space.
    pub position: [f32; 3],
    /// The surface normal vector (should be normalized).
    pub normal: [f32; 3],
    /// Texture coordinates, typically in the range [0, 1].
    pub uv: [f32; 2],
}

impl Vertex3d {
    /// The wgpu vertex buffer layout descriptor for this vertex type.
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex3d>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            // position
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            // normal
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x3,
            },
            // uv
            wgpu::VertexAttribute {
                offset: 24,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };

    /// Creates a new vertex with the given position, normal, and UV.
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// GPU-resident 3D mesh geometry with vertex and index buffers.
///
/// Meshes are immutable after creation; to render different geometry,
/// create a new mesh. Instances share a mesh via `Arc`.
#[derive(Debug)]
pub struct Mesh {
    pub(crate) vertex_buffer: wgpu::Buffer,
    pub(crate) index_buffer: wgpu::Buffer,
    pub(crate) index_count: u32,
}

impl Mesh {
    /// Uploads raw vertex and index data to GPU buffers.
    pub fn new(gpu: &GpuContext, vertices: &[Vertex3d], indices: &[u32]) -> Self {
        use wgpu::util::DeviceExt;

        let vertex_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Vertex Buffer"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

        let index_buffer = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Index Buffer"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        }
    }

    /// A `size`×`size` plane on the XZ axis, normal up, centered at origin.
    pub fn plane(gpu: &GpuContext, size: f32) -> Self {
        let h = size * 0.5;
        let vertices = [
            Vertex3d::new([-h, 0.0, -h], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex3d::new([h, 0.0, -h], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex3d::new([h, 0.0, h], [0.0, 1.0, 0.0], [1.0, 1.0]),
            Vertex3d::new([-h, 0.0, h], [0.0, 1.0, 0.0], [0.0, 1.0]),
        ];
        let indices = [0, 2, 1, 0, 3, 2];
        Self::new(gpu, &vertices, &indices)
    }

    /// A unit cube centered at the origin.
    pub fn cube(gpu: &GpuContext) -> Self {
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, tangent, bitangent) in faces {
            let base = vertices.len() as u32;
            for (u, v) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
                let position = [
                    normal[0] * 0.5 + tangent[0] * u + bitangent[0] * v,
                    normal[1] * 0.5 + tangent[1] * u + bitangent[1] * v,
                    normal[2] * 0.5 + tangent[2] * u + bitangent[2] * v,
                ];
                vertices.push(Vertex3d::new(position, normal, [u + 0.5, v + 0.5]));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(gpu, &vertices, &indices)
    }
}

/// One placed mesh with the material factors the capture pass records.
///
/// The previous frame's transform is kept alongside the current one so the
/// capture shader can derive per-pixel motion for moving objects. Update
/// motion through [`set_transform`](Self::set_transform), which rotates the
/// current transform into the previous slot.
pub struct MeshInstance {
    pub(crate) mesh: Arc<Mesh>,
    pub(crate) transform: Mat4,
    pub(crate) prev_transform: Mat4,
    /// Base color in linear RGBA.
    pub color: [f32; 4],
    /// Metalness factor in [0, 1].
    pub metalness: f32,
    /// Roughness factor in [0, 1].
    pub roughness: f32,
}

impl MeshInstance {
    /// Places a mesh with the given transform and a plain white dielectric
    /// material.
    pub fn new(mesh: Arc<Mesh>, transform: Mat4) -> Self {
        Self {
            mesh,
            transform,
            prev_transform: transform,
            color: [1.0, 1.0, 1.0, 1.0],
            metalness: 0.0,
            roughness: 0.8,
        }
    }

    /// Sets the base color.
    pub fn with_color(mut self, r: f32, g: f32, b: f32) -> Self {
        self.color = [r, g, b, 1.0];
        self
    }

    /// Sets metalness and roughness factors.
    pub fn with_material(mut self, metalness: f32, roughness: f32) -> Self {
        self.metalness = metalness;
        self.roughness = roughness;
        self
    }

    /// Moves the instance, retaining the old transform for motion vectors.
    pub fn set_transform(&mut self, transform: Mat4) {
        self.prev_transform = self.transform;
        self.transform = transform;
    }

    /// The current model transform.
    pub fn transform(&self) -> Mat4 {
        self.transform
    }
}

/// A set of mesh instances with a stable identity.
///
/// Identity is assigned at construction and never changes; the pipeline
/// memoizes its capture buffers on (scene id, camera id). Mutating
/// instances (moving things around) deliberately keeps the identity — the
/// buffers are re-rendered every frame regardless, only their allocation is
/// memoized.
pub struct Scene {
    instances: Vec<MeshInstance>,
    id: u64,
}

impl Scene {
    /// Creates an empty scene with a fresh identity.
    pub fn new() -> Self {
        Self {
            instances: Vec::new(),
            id: NEXT_SCENE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Adds an instance, returning its index.
    pub fn add(&mut self, instance: MeshInstance) -> usize {
        self.instances.push(instance);
        self.instances.len() - 1
    }

    /// Mutable access to a placed instance.
    pub fn instance_mut(&mut self, index: usize) -> Option<&mut MeshInstance> {
        self.instances.get_mut(index)
    }

    /// The instances in draw order.
    pub fn instances(&self) -> &[MeshInstance] {
        &self.instances
    }

    /// The scene's stable identity.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenes_have_distinct_identities() {
        assert_ne!(Scene::new().id(), Scene::new().id());
    }
}
