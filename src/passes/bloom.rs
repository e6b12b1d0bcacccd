//! Bloom.
//!
//! Bright regions are extracted at half resolution, then widened by
//! iterated separable gaussian blurs over a ping-pong target pair. The
//! result is additive glow: black everywhere the source sat below the
//! threshold, so adding it to an image changes nothing there.

use crate::capture::COLOR_FORMAT;
use crate::gpu::GpuContext;
use crate::passes::{ConfigError, EffectTarget, begin_fullscreen_pass, check_range};

const BLUR_ITERATIONS: usize = 4;

/// Tunables for the glow extraction and spread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomConfig {
    /// Luminance below this contributes nothing.
    pub threshold: f32,
    /// Scale applied to extracted brightness.
    pub strength: f32,
    /// How far successive blur iterations reach.
    pub radius: f32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            threshold: 0.15,
            strength: 1.05,
            radius: 0.85,
        }
    }
}

impl BloomConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("bloom", "threshold", self.threshold, 0.0, 1.0)?;
        check_range("bloom", "strength", self.strength, 0.0, 3.0)?;
        check_range("bloom", "radius", self.radius, 0.0, 1.0)?;
        Ok(())
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct BloomUniforms {
    texel: [f32; 2],
    direction: [f32; 2],
    threshold: f32,
    strength: f32,
    spread: f32,
    _pad: f32,
}

pub struct BloomPass {
    extract_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    extract_uniforms: wgpu::Buffer,
    // One buffer per blur invocation: every uniform write for the frame
    // lands before the encoder is submitted, so invocations cannot share.
    blur_uniforms: Vec<wgpu::Buffer>,
    sampler: wgpu::Sampler,
    targets: Option<[EffectTarget; 2]>,
}

impl BloomPass {
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bloom Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/bloom.wgsl").into()),
        });

        let make_uniforms = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: std::mem::size_of::<BloomUniforms>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let extract_uniforms = make_uniforms("Bloom Extract Uniforms");
        let blur_uniforms = (0..BLUR_ITERATIONS * 2)
            .map(|_| make_uniforms("Bloom Blur Uniforms"))
            .collect();

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Bloom Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Bind Group Layout"),
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
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Bloom Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |label: &str, entry: &str| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(entry),
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
            })
        };

        let extract_pipeline = make_pipeline("Bloom Extract Pipeline", "fs_extract");
        let blur_pipeline = make_pipeline("Bloom Blur Pipeline", "fs_blur");

        Self {
            extract_pipeline,
            blur_pipeline,
            bind_group_layout,
            extract_uniforms,
            blur_uniforms,
            sampler,
            targets: None,
        }
    }

    /// The glow target written by the last `render`.
    pub fn output(&self) -> Option<&wgpu::TextureView> {
        self.targets.as_ref().map(|t| &t[0].view)
    }

    fn ensure_size(&mut self, gpu: &GpuContext, width: u32, height: u32) {
        let stale = match &self.targets {
            Some([a, _]) => !a.matches(width, height),
            None => true,
        };
        if stale {
            self.targets = Some([
                EffectTarget::new(&gpu.device, "Bloom Ping", COLOR_FORMAT, width, height),
                EffectTarget::new(&gpu.device, "Bloom Pong", COLOR_FORMAT, width, height),
            ]);
        }
    }

    fn bind(
        &self,
        gpu: &GpuContext,
        uniforms: &wgpu::Buffer,
        src: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(src),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    /// Records extraction and blurs, reading brightness from `src` (the
    /// first composite) at the given full resolution.
    pub fn render(
        &mut self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        width: u32,
        height: u32,
        src: &wgpu::TextureView,
        config: &BloomConfig,
    ) {
        let (half_w, half_h) = ((width / 2).max(1), (height / 2).max(1));
        self.ensure_size(gpu, half_w, half_h);

        let texel = [1.0 / half_w as f32, 1.0 / half_h as f32];

        let extract = BloomUniforms {
            texel,
            direction: [0.0, 0.0],
            threshold: config.threshold,
            strength: config.strength,
            spread: 0.0,
            _pad: 0.0,
        };
        gpu.queue
            .write_buffer(&self.extract_uniforms, 0, bytemuck::cast_slice(&[extract]));

        for (i, buffer) in self.blur_uniforms.iter().enumerate() {
            let iteration = (i / 2) as f32;
            let horizontal = i % 2 == 0;
            let blur = BloomUniforms {
                texel,
                direction: if horizontal { [1.0, 0.0] } else { [0.0, 1.0] },
                threshold: 0.0,
                strength: 0.0,
                spread: 1.0 + iteration * config.radius * 2.0,
                _pad: 0.0,
            };
            gpu.queue
                .write_buffer(buffer, 0, bytemuck::cast_slice(&[blur]));
        }

        let targets = self.targets.as_ref().expect("targets allocated above");

        // Extract into ping.
        let bind_group = self.bind(gpu, &self.extract_uniforms, src);
        {
            let mut pass = begin_fullscreen_pass(encoder, "Bloom Extract Pass", &targets[0].view);
            pass.set_pipeline(&self.extract_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        // Ping-pong blurs; an even pass count lands the result back in ping.
        for (i, uniforms) in self.blur_uniforms.iter().enumerate() {
            let (src, dst) = if i % 2 == 0 {
                (&targets[0], &targets[1])
            } else {
                (&targets[1], &targets[0])
            };
            let bind_group = self.bind(gpu, uniforms, &src.view);
            let mut pass = begin_fullscreen_pass(encoder, "Bloom Blur Pass", &dst.view);
            pass.set_pipeline(&self.blur_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(BloomConfig::default().validate().is_ok());
    }

    #[test]
    fn negative_strength_is_rejected() {
        let config = BloomConfig {
            strength: -0.1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.pass, "bloom");
        assert_eq!(err.field, "strength");
    }

    #[test]
    fn threshold_above_one_is_rejected() {
        let config = BloomConfig {
            threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
