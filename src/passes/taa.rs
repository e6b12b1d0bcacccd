//! Temporal antialias resolve.
//!
//! The pass owns the frame-to-frame history texture: after each resolve
//! the output is copied back into the history, and the history is marked
//! invalid whenever the targets reallocate or the caller reports a camera
//! projection change. An invalid history resolves to the current frame
//! unchanged, so the first frame after any reset is simply unsmoothed.

use crate::capture::{COLOR_FORMAT, FrameBufferSet};
use crate::gpu::GpuContext;
use crate::passes::{ConfigError, begin_fullscreen_pass, check_range};
use crate::signal::BufferRole;

/// Tunables for the temporal blend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaaConfig {
    /// Share of the clamped history in the resolved pixel. Zero disables
    /// accumulation entirely.
    pub blend_factor: f32,
}

impl Default for TaaConfig {
    fn default() -> Self {
        Self { blend_factor: 0.9 }
    }
}

impl TaaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("taa", "blend_factor", self.blend_factor, 0.0, 0.99)?;
        Ok(())
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct TaaUniforms {
    resolution: [f32; 2],
    blend_factor: f32,
    history_valid: f32,
}

// Unlike the other passes, the resolve target's texture is retained so it
// can be copied into the history after the pass.
struct TaaTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl TaaTarget {
    fn new(device: &wgpu::Device, label: &str, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }
}

pub struct TaaPass {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    output: Option<TaaTarget>,
    history: Option<TaaTarget>,
    history_valid: bool,
}

impl TaaPass {
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("TAA Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/taa.wgsl").into()),
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("TAA Uniforms"),
            size: std::mem::size_of::<TaaUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // History reprojection lands between pixels; linear filtering there
        // is the whole point.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("TAA History Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("TAA Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("TAA Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("TAA Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            pipeline,
            uniform_buffer,
            bind_group_layout,
            sampler,
            output: None,
            history: None,
            history_valid: false,
        }
    }

    /// The resolved frame written by the last `render`.
    pub fn output(&self) -> Option<&wgpu::TextureView> {
        self.output.as_ref().map(|t| &t.view)
    }

    /// Drops accumulated history. Call when the camera projection changes
    /// or effects come back from disabled; resize handles itself.
    ///
    /// Dropping on re-enable trades a few frames of reconvergence for
    /// never reprojecting history that stopped tracking the scene while
    /// effects were off.
    pub fn invalidate_history(&mut self) {
        self.history_valid = false;
    }

    fn ensure_size(&mut self, gpu: &GpuContext, width: u32, height: u32) {
        let stale = match &self.output {
            Some(target) => target.width != width || target.height != height,
            None => true,
        };
        if stale {
            self.output = Some(TaaTarget::new(&gpu.device, "TAA Output", width, height));
            self.history = Some(TaaTarget::new(&gpu.device, "TAA History", width, height));
            self.history_valid = false;
        }
    }

    pub fn render(
        &mut self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &FrameBufferSet,
        current: &wgpu::TextureView,
        config: &TaaConfig,
    ) {
        let (width, height) = buffers.size();
        self.ensure_size(gpu, width, height);

        let uniforms = TaaUniforms {
            resolution: [width as f32, height as f32],
            blend_factor: config.blend_factor,
            history_valid: if self.history_valid { 1.0 } else { 0.0 },
        };
        gpu.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let output = self.output.as_ref().expect("targets allocated above");
        let history = self.history.as_ref().expect("targets allocated above");

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("TAA Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(current),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&history.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(
                        buffers.view(BufferRole::Velocity),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(buffers.view(BufferRole::Depth)),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        {
            let mut pass = begin_fullscreen_pass(encoder, "TAA Resolve Pass", &output.view);
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        // The resolved frame becomes next frame's history.
        encoder.copy_texture_to_texture(
            output.texture.as_image_copy(),
            history.texture.as_image_copy(),
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.history_valid = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TaaConfig::default().validate().is_ok());
    }

    #[test]
    fn full_history_weight_is_rejected() {
        let config = TaaConfig { blend_factor: 1.0 };
        let err = config.validate().unwrap_err();
        assert_eq!(err.pass, "taa");
        assert_eq!(err.field, "blend_factor");
    }
}
