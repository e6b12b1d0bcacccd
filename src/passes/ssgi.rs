//! Screen-space global illumination and ambient occlusion.
//!
//! One fullscreen pass marches horizon slices through the depth buffer and
//! writes a combined target: bounced light in rgb, occlusion visibility in
//! alpha. The compositor multiplies both against the base color.

use glam::Mat4;

use crate::capture::{COLOR_FORMAT, FrameBufferSet};
use crate::gpu::GpuContext;
use crate::passes::{ConfigError, EffectTarget, begin_fullscreen_pass, check_range};
use crate::signal::BufferRole;

/// Tunables for the GI/AO march.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsgiConfig {
    /// Depth samples per horizon slice direction. Zero disables the march:
    /// the pass then reports full visibility and no bounce.
    pub step_count: u32,
    /// Number of horizon slices around each pixel.
    pub slice_count: u32,
    /// Sampling radius in world units.
    pub radius: f32,
    /// Depth tolerance separating connected surfaces from disconnected
    /// foreground geometry, in world units.
    pub thickness: f32,
    /// Scale on the bounced light.
    pub gi_intensity: f32,
    /// Exponent on the visibility term. Zero leaves the image undarkened.
    pub ao_intensity: f32,
}

impl Default for SsgiConfig {
    fn default() -> Self {
        Self {
            step_count: 8,
            slice_count: 2,
            radius: 15.0,
            thickness: 10.0,
            gi_intensity: 20.0,
            ao_intensity: 4.0,
        }
    }
}

impl SsgiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("ssgi", "step_count", self.step_count as f32, 0.0, 32.0)?;
        check_range("ssgi", "slice_count", self.slice_count as f32, 1.0, 8.0)?;
        check_range("ssgi", "radius", self.radius, 1.0, 100.0)?;
        check_range("ssgi", "thickness", self.thickness, 0.01, 10.0)?;
        check_range("ssgi", "gi_intensity", self.gi_intensity, 0.0, 100.0)?;
        check_range("ssgi", "ao_intensity", self.ao_intensity, 0.0, 4.0)?;
        Ok(())
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SsgiUniforms {
    proj: [[f32; 4]; 4],
    inv_proj: [[f32; 4]; 4],
    resolution: [f32; 2],
    step_count: f32,
    slice_count: f32,
    radius: f32,
    thickness: f32,
    gi_intensity: f32,
    ao_intensity: f32,
}

pub struct SsgiPass {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    target: Option<EffectTarget>,
}

impl SsgiPass {
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("SSGI Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/ssgi.wgsl").into()),
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("SSGI Uniforms"),
            size: std::mem::size_of::<SsgiUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SSGI Bind Group Layout"),
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
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
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
            label: Some("SSGI Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("SSGI Pipeline"),
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

    /// The GI/AO target written by the last `render`.
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
                "SSGI Target",
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
        config: &SsgiConfig,
    ) {
        let (width, height) = buffers.size();
        self.ensure_size(gpu, width, height);

        let uniforms = SsgiUniforms {
            proj: proj.to_cols_array_2d(),
            inv_proj: proj.inverse().to_cols_array_2d(),
            resolution: [width as f32, height as f32],
            step_count: config.step_count as f32,
            slice_count: config.slice_count as f32,
            radius: config.radius,
            thickness: config.thickness,
            gi_intensity: config.gi_intensity,
            ao_intensity: config.ao_intensity,
        };
        gpu.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SSGI Bind Group"),
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
                    resource: wgpu::BindingResource::TextureView(buffers.view(BufferRole::Depth)),
                },
            ],
        });

        let target = self.target.as_ref().expect("target allocated above");
        let mut pass = begin_fullscreen_pass(encoder, "SSGI Pass", &target.view);
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
        assert!(SsgiConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_steps_is_a_valid_off_state() {
        let config = SsgiConfig {
            step_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_radius_names_the_field() {
        let config = SsgiConfig {
            radius: 0.5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.pass, "ssgi");
        assert_eq!(err.field, "radius");
    }

    #[test]
    fn excessive_step_count_is_rejected() {
        let config = SsgiConfig {
            step_count: 64,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
