//! Multi-target scene capture.
//!
//! One geometry pass renders the scene into every per-pixel buffer the
//! effect chain reads: shaded color, view-space normals, metal/rough
//! factors, motion velocity, and depth. Writing them simultaneously keeps
//! the buffers pixel-consistent and keeps the frame to a single scene
//! traversal.
//!
//! The resulting [`FrameBufferSet`] is owned here; passes receive read-only
//! texture views. Allocation is memoized on (scene identity, camera
//! identity) and on the output resolution — a resize or an identity change
//! drops the whole set and reallocates.

use glam::Mat4;

use crate::camera::Camera;
use crate::gpu::GpuContext;
use crate::scene::{Scene, Vertex3d};
use crate::signal::BufferRole;

/// HDR color target format shared by every effect target.
pub(crate) const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const METAL_ROUGH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg8Unorm;
const VELOCITY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg16Float;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Model uniforms are bound with dynamic offsets; wgpu requires 256-byte
/// alignment between entries.
const MODEL_STRIDE: u64 = 256;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CaptureUniforms {
    view: [[f32; 4]; 4],
    view_proj: [[f32; 4]; 4],
    unjittered_view_proj: [[f32; 4]; 4],
    prev_view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ModelUniforms {
    model: [[f32; 4]; 4],
    prev_model: [[f32; 4]; 4],
    normal_matrix: [[f32; 4]; 4],
    color: [f32; 4],
    metal_rough: [f32; 2],
    _pad: [f32; 2],
}

struct CaptureTarget {
    view: wgpu::TextureView,
}

impl CaptureTarget {
    fn new(
        gpu: &GpuContext,
        label: &str,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { view }
    }
}

/// The named buffers produced by one capture of one scene from one camera.
///
/// Buffers carry per-pixel identity data (normals, velocity, material
/// factors), so they are sampled with nearest-neighbor filtering only; the
/// shared sampler lives here and downstream passes borrow it.
pub struct FrameBufferSet {
    color: CaptureTarget,
    normal: CaptureTarget,
    metal_rough: CaptureTarget,
    velocity: CaptureTarget,
    depth: CaptureTarget,
    scene_id: u64,
    camera_id: u64,
    width: u32,
    height: u32,
    generation: u64,
}

impl FrameBufferSet {
    fn new(gpu: &GpuContext, scene_id: u64, camera_id: u64, generation: u64) -> Self {
        let (width, height) = (gpu.width(), gpu.height());
        Self {
            color: CaptureTarget::new(gpu, "Capture Color", COLOR_FORMAT, width, height),
            normal: CaptureTarget::new(gpu, "Capture Normal", NORMAL_FORMAT, width, height),
            metal_rough: CaptureTarget::new(
                gpu,
                "Capture MetalRough",
                METAL_ROUGH_FORMAT,
                width,
                height,
            ),
            velocity: CaptureTarget::new(gpu, "Capture Velocity", VELOCITY_FORMAT, width, height),
            depth: CaptureTarget::new(gpu, "Capture Depth", DEPTH_FORMAT, width, height),
            scene_id,
            camera_id,
            width,
            height,
            generation,
        }
    }

    /// Read-only view of a buffer by its semantic role.
    pub fn view(&self, role: BufferRole) -> &wgpu::TextureView {
        match role {
            BufferRole::Color => &self.color.view,
            BufferRole::Normal => &self.normal.view,
            BufferRole::MetalRough => &self.metal_rough.view,
            BufferRole::Velocity => &self.velocity.view,
            BufferRole::Depth => &self.depth.view,
        }
    }

    /// Identity of this allocation. Bumps whenever the set is reallocated;
    /// the effects graph keys its rebuild on this.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Buffer resolution in pixels.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn matches(&self, scene_id: u64, camera_id: u64, width: u32, height: u32) -> bool {
        self.scene_id == scene_id
            && self.camera_id == camera_id
            && self.width == width
            && self.height == height
    }
}

/// Renders a scene into a [`FrameBufferSet`] in a single multi-target pass.
pub struct SceneCapture {
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    model_buffer: wgpu::Buffer,
    model_bind_group: wgpu::BindGroup,
    model_capacity: u64,
    nearest_sampler: wgpu::Sampler,
    buffers: Option<FrameBufferSet>,
    next_generation: u64,
}

impl SceneCapture {
    /// Creates the capture pipeline and its uniform plumbing.
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Capture Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/gbuffer.wgsl").into()),
        });

        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Capture Camera Uniforms"),
            size: std::mem::size_of::<CaptureUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Capture Camera Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Capture Camera Bind Group"),
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let model_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Capture Model Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<ModelUniforms>() as u64,
                        ),
                    },
                    count: None,
                }],
            });

        let model_capacity = 64;
        let (model_buffer, model_bind_group) =
            Self::create_model_buffer(gpu, &model_bind_group_layout, model_capacity);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Capture Pipeline Layout"),
            bind_group_layouts: &[&camera_bind_group_layout, &model_bind_group_layout],
            push_constant_ranges: &[],
        });

        let color_targets = [
            Some(wgpu::ColorTargetState {
                format: COLOR_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            }),
            Some(wgpu::ColorTargetState {
                format: NORMAL_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            }),
            Some(wgpu::ColorTargetState {
                format: METAL_ROUGH_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            }),
            Some(wgpu::ColorTargetState {
                format: VELOCITY_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            }),
        ];

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Capture Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[Vertex3d::LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &color_targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Per-pixel identity data must not be interpolated.
        let nearest_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Capture Nearest Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            pipeline,
            camera_buffer,
            camera_bind_group,
            model_buffer,
            model_bind_group,
            model_capacity,
            nearest_sampler,
            buffers: None,
            next_generation: 1,
        }
    }

    fn create_model_buffer(
        gpu: &GpuContext,
        layout: &wgpu::BindGroupLayout,
        capacity: u64,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Capture Model Uniforms"),
            size: capacity * MODEL_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Capture Model Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<ModelUniforms>() as u64),
                }),
            }],
        });
        (buffer, bind_group)
    }

    /// The nearest-neighbor sampler shared by every buffer reader.
    pub fn nearest_sampler(&self) -> &wgpu::Sampler {
        &self.nearest_sampler
    }

    /// Ensures buffers exist for this (scene, camera) at the current
    /// resolution, reallocating when identity or size changed.
    ///
    /// Same scene and camera at the same resolution always yields the same
    /// [`FrameBufferSet`] allocation; the generation only bumps on realloc.
    pub fn prepare(&mut self, gpu: &GpuContext, scene: &Scene, camera: &Camera) -> &FrameBufferSet {
        let (width, height) = (gpu.width(), gpu.height());
        let stale = match &self.buffers {
            Some(set) => !set.matches(scene.id(), camera.id(), width, height),
            None => true,
        };
        if stale {
            log::debug!(
                "reallocating capture buffers: scene={} camera={} {}x{}",
                scene.id(),
                camera.id(),
                width,
                height
            );
            self.buffers = Some(FrameBufferSet::new(
                gpu,
                scene.id(),
                camera.id(),
                self.next_generation,
            ));
            self.next_generation += 1;
        }
        self.buffers.as_ref().expect("buffers allocated above")
    }

    /// The current buffer set, if one has been prepared.
    pub fn buffers(&self) -> Option<&FrameBufferSet> {
        self.buffers.as_ref()
    }

    /// Records the capture pass for one frame.
    ///
    /// `view_proj` carries the jittered projection used for rasterization;
    /// `unjittered_view_proj` and `prev_view_proj` are jitter-free so the
    /// velocity buffer measures real motion only.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
        camera: &Camera,
        view_proj: Mat4,
        unjittered_view_proj: Mat4,
        prev_view_proj: Mat4,
    ) {
        let instance_count = scene.instances().len() as u64;
        if instance_count > self.model_capacity {
            let layout = self.pipeline.get_bind_group_layout(1);
            self.model_capacity = instance_count.next_power_of_two();
            let (buffer, bind_group) = Self::create_model_buffer(gpu, &layout, self.model_capacity);
            self.model_buffer = buffer;
            self.model_bind_group = bind_group;
        }

        let view = camera.view();
        let uniforms = CaptureUniforms {
            view: view.to_cols_array_2d(),
            view_proj: view_proj.to_cols_array_2d(),
            unjittered_view_proj: unjittered_view_proj.to_cols_array_2d(),
            prev_view_proj: prev_view_proj.to_cols_array_2d(),
        };
        gpu.queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        for (i, instance) in scene.instances().iter().enumerate() {
            let normal_matrix = (view * instance.transform).inverse().transpose();
            let model = ModelUniforms {
                model: instance.transform.to_cols_array_2d(),
                prev_model: instance.prev_transform.to_cols_array_2d(),
                normal_matrix: normal_matrix.to_cols_array_2d(),
                color: instance.color,
                metal_rough: [instance.metalness, instance.roughness],
                _pad: [0.0; 2],
            };
            gpu.queue.write_buffer(
                &self.model_buffer,
                i as u64 * MODEL_STRIDE,
                bytemuck::cast_slice(&[model]),
            );
        }

        let buffers = self
            .buffers
            .as_ref()
            .expect("prepare() must run before render()");

        fn color_attachment(view: &wgpu::TextureView) -> Option<wgpu::RenderPassColorAttachment<'_>> {
            Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Capture Pass"),
            color_attachments: &[
                color_attachment(&buffers.color.view),
                color_attachment(&buffers.normal.view),
                color_attachment(&buffers.metal_rough.view),
                color_attachment(&buffers.velocity.view),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &buffers.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);

        for (i, instance) in scene.instances().iter().enumerate() {
            let offset = (i as u64 * MODEL_STRIDE) as u32;
            pass.set_bind_group(1, &self.model_bind_group, &[offset]);
            pass.set_vertex_buffer(0, instance.mesh.vertex_buffer.slice(..));
            pass.set_index_buffer(
                instance.mesh.index_buffer.slice(..),
                wgpu::IndexFormat::Uint32,
            );
            pass.draw_indexed(0..instance.mesh.index_count, 0, 0..1);
        }
    }
}
