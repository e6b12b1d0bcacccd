//! Screen-space reflections.
//!
//! View-space rays march along the mirror direction against the depth
//! buffer. The output target carries the reflected color in rgb and a hit
//! confidence in alpha; a miss writes fully transparent black, so the
//! compositor's blend leaves the base image untouched. The target can run
//! at a reduced resolution to trade sharpness for march cost.

use glam::Mat4;

use crate::capture::{COLOR_FORMAT, FrameBufferSet};
use crate::gpu::GpuContext;
use crate::passes::{ConfigError, EffectTarget, begin_fullscreen_pass, check_range};
use crate::signal::BufferRole;

/// Tunables for the reflection march.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsrConfig {
    /// Maximum ray travel in world units. Zero disables the march.
    pub max_distance: f32,
    /// Depth tolerance for counting an intersection, in world units.
    pub thickness: f32,
    /// Number of roughness-blur rings around the hit point. Zero takes a
    /// single sharp tap.
    pub blur_quality: u32,
    /// Output resolution relative to the capture buffers.
    pub resolution_scale: f32,
}

impl Default for SsrConfig {
    fn default() -> Self {
        Self {
            max_distance: 11.0,
            thickness: 0.15,
            blur_quality: 1,
            resolution_scale: 1.0,
        }
    }
}

impl SsrConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("ssr", "max_distance", self.max_distance, 0.0, 100.0)?;
        check_range("ssr", "thickness", self.thickness, 0.01, 1.0)?;
        check_range("ssr", "blur_quality", self.blur_quality as f32, 0.0, 4.0)?;
        check_range("ssr", "resolution_scale", self.resolution_scale, 0.1, 1.0)?;
        Ok(())
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SsrUniforms {
    proj: [[f32; 4]; 4],
    inv_proj: [[f32; 4]; 4],
    resolution: [f32; 2],
    max_distance: f32,
    thickness: f32,
    blur_quality: f32,
    _pad: [f32; 3],
}

pub struct SsrPass {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    target: Option<EffectTarget>,
}

impl SsrPass {
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SSR Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/ssr.wgsl").into()),
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("SSR Uniforms"),
            size: std::mem::size_of::<SsrUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
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
            label: Some("SSR Bind Group Layout"),
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
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SSR Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("SSR Pipeline"),
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
            target: None,
        }
    }

    /// The reflection target written by the last `render`.
    pub fn output(&self) -> Option<&wgpu::TextureView> {
        self.target.as_ref().map(|t| &t.view)
    }

    fn ensure_size(&mut self, gpu: &GpuContext, width: u32, height: u32) {
        let stale = match &self.target {
            Some(target) => !target.matches(width, height),
            None => true,
        };
        if stale {
            self.target = Some(EffectTarget::new(
                &gpu.device,
                "SSR Target",
                COLOR_FORMAT,
                width,
                height,
            ));
        }
    }

    pub fn render(
        &mut self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        buffers: &FrameBufferSet,
        proj: Mat4,
        config: &SsrConfig,
    ) {
        let (width, height) = buffers.size();
        let scaled_w = ((width as f32 * config.resolution_scale) as u32).max(1);
        let scaled_h = ((height as f32 * config.resolution_scale) as u32).max(1);
        self.ensure_size(gpu, scaled_w, scaled_h);

        // March resolution stays the capture resolution; only the output
        // raster shrinks.
        let uniforms = SsrUniforms {
            proj: proj.to_cols_array_2d(),
            inv_proj: proj.inverse().to_cols_array_2d(),
            resolution: [width as f32, height as f32],
            max_distance: config.max_distance,
            thickness: config.thickness,
            blur_quality: config.blur_quality as f32,
            _pad: [0.0; 3],
        };
        gpu.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SSR Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(buffers.view(BufferRole::Color)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(buffers.view(BufferRole::Normal)),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(
                        buffers.view(BufferRole::MetalRough),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(buffers.view(BufferRole::Depth)),
                },
            ],
        });

        let target = self.target.as_ref().expect("target allocated above");
        let mut pass = begin_fullscreen_pass(encoder, "SSR Pass", &target.view);
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SsrConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_distance_is_a_valid_off_state() {
        let config = SsrConfig {
            max_distance: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tiny_resolution_scale_is_rejected() {
        let config = SsrConfig {
            resolution_scale: 0.05,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "resolution_scale");
    }
}
