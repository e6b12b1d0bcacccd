//! The fixed effects graph and its compiled composite pipelines.
//!
//! Two points in the frame are algebraic rather than hand-written: the
//! first composite folds GI and AO into the scene color, and the second
//! adds bloom and lays reflections over the result. Both are expressed as
//! [`EffectSignal`] trees and compiled to WGSL; the topology itself never
//! changes, only the buffers and parameters feeding it. A graph rebuild is
//! keyed on (buffer generation, camera identity, parameter hash) so
//! unchanged frames reuse the cached pipelines byte-for-byte.

use crate::capture::COLOR_FORMAT;
use crate::gpu::GpuContext;
use crate::passes::EffectTarget;
use crate::signal::{
    BufferRole, Channels, CompiledComposite, EffectSignal, PassSource, SignalInput,
    compile_composite,
};

/// Identity of one compiled graph. Two frames with equal keys share the
/// same compiled pipelines.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RebuildKey {
    /// Generation of the capture buffer allocation.
    pub buffers_generation: u64,
    /// Identity of the capturing camera.
    pub camera_id: u64,
    /// Hash over every pass parameter that shapes the graph.
    pub config_hash: u64,
}

/// FNV-1a over the exact bit patterns, so a parameter change of any
/// magnitude produces a new key.
pub fn hash_params(values: &[f32]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for value in values {
        for byte in value.to_bits().to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    hash
}

/// The complete signal topology of one frame.
///
/// The shape is fixed: `composited1` feeds bloom and SSR, `composited2`
/// feeds the TAA resolve, and the resolve is the single root presented to
/// the surface. `gi` and `ao` are live handles into the same tree kept
/// for inspection.
pub struct EffectsGraph {
    composited1: EffectSignal,
    composited2: EffectSignal,
    gi: EffectSignal,
    ao: EffectSignal,
    root: EffectSignal,
}

impl EffectsGraph {
    pub fn build() -> Self {
        let base = EffectSignal::buffer(BufferRole::Color, Channels::Rgb);
        let base_alpha = EffectSignal::buffer(BufferRole::Color, Channels::A);
        let gi = EffectSignal::pass(PassSource::Ssgi, Channels::Rgb);
        let ao = EffectSignal::pass(PassSource::Ssgi, Channels::A);

        // composited1 = color * AO + color * GI, scene alpha untouched.
        let occluded = base.mul(&ao).expect("scalar broadcasts over color");
        let bounced = base.mul(&gi).expect("color shapes match");
        let composited1 = occluded
            .add(&bounced)
            .expect("color shapes match")
            .with_alpha(&base_alpha)
            .expect("color gains scalar alpha");

        // composited2 = (composited1 + bloom) blended under SSR by its
        // hit confidence. It samples the materialized first composite.
        let c1_rgb = EffectSignal::pass(PassSource::Composite1, Channels::Rgb);
        let c1_alpha = EffectSignal::pass(PassSource::Composite1, Channels::A);
        let bloom = EffectSignal::pass(PassSource::Bloom, Channels::Rgb);
        let ssr = EffectSignal::pass(PassSource::Ssr, Channels::All);
        let composited2 = c1_rgb
            .add(&bloom)
            .expect("color shapes match")
            .with_alpha(&c1_alpha)
            .expect("color gains scalar alpha")
            .blend(&ssr)
            .expect("both sides carry alpha");

        let root = EffectSignal::pass(PassSource::Taa, Channels::All);

        Self {
            composited1,
            composited2,
            gi,
            ao,
            root,
        }
    }

    /// The single signal presented to the surface.
    pub fn root(&self) -> &EffectSignal {
        &self.root
    }

    pub fn composited1(&self) -> &EffectSignal {
        &self.composited1
    }

    pub fn composited2(&self) -> &EffectSignal {
        &self.composited2
    }

    /// Handle on the bounce-light term, useful for debug views.
    pub fn gi(&self) -> &EffectSignal {
        &self.gi
    }

    /// Handle on the occlusion term, useful for debug views.
    pub fn ao(&self) -> &EffectSignal {
        &self.ao
    }
}

impl Default for EffectsGraph {
    fn default() -> Self {
        Self::build()
    }
}

/// A compiled composite signal, its render pipeline, and its output target.
pub(crate) struct CompositePipeline {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    inputs: Vec<SignalInput>,
    target: Option<EffectTarget>,
    label: &'static str,
}

impl CompositePipeline {
    pub fn new(gpu: &GpuContext, signal: &EffectSignal, label: &'static str) -> Self {
        let device = &gpu.device;
        let CompiledComposite { wgsl, inputs } = compile_composite(signal);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(wgsl.into()),
        });

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
            count: None,
        }];
        for i in 0..inputs.len() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: i as u32 + 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
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
            bind_group_layout,
            inputs,
            target: None,
            label,
        }
    }

    /// The composite target written by the last `render`.
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
                self.label,
                COLOR_FORMAT,
                width,
                height,
            ));
        }
    }

    /// Records the composite pass, resolving each declared input to a live
    /// texture view through `resolve`.
    pub fn render<'a>(
        &mut self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        sampler: &wgpu::Sampler,
        width: u32,
        height: u32,
        resolve: impl Fn(SignalInput) -> &'a wgpu::TextureView,
    ) {
        self.ensure_size(gpu, width, height);

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Sampler(sampler),
        }];
        for (i, input) in self.inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 1,
                resource: wgpu::BindingResource::TextureView(resolve(*input)),
            });
        }
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: &self.bind_group_layout,
            entries: &entries,
        });

        let target = self.target.as_ref().expect("target allocated above");
        let mut pass = crate::passes::begin_fullscreen_pass(encoder, self.label, &target.view);
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{SignalShape, SignalValue, compile_composite};
    use glam::Vec4;

    #[test]
    fn graph_has_a_single_color_alpha_root() {
        let graph = EffectsGraph::build();
        assert_eq!(graph.root().shape(), SignalShape::ColorAlpha);
        assert_eq!(graph.composited1().shape(), SignalShape::ColorAlpha);
        assert_eq!(graph.composited2().shape(), SignalShape::ColorAlpha);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let a = EffectsGraph::build();
        let b = EffectsGraph::build();
        assert_eq!(a.composited1(), b.composited1());
        assert_eq!(a.composited2(), b.composited2());
        assert_eq!(a.root(), b.root());
        assert_eq!(
            compile_composite(a.composited2()).wgsl,
            compile_composite(b.composited2()).wgsl
        );
    }

    #[test]
    fn first_composite_folds_gi_and_ao_into_color() {
        let graph = EffectsGraph::build();
        let out = graph.composited1().eval(&|input| match input {
            SignalInput::Buffer(BufferRole::Color) => Vec4::new(0.5, 0.25, 1.0, 0.8),
            SignalInput::Pass(PassSource::Ssgi) => Vec4::new(0.1, 0.1, 0.1, 0.5),
            _ => Vec4::ZERO,
        });
        // color * ao + color * gi, per channel; alpha passes through.
        let expect = Vec4::new(
            0.5 * 0.5 + 0.5 * 0.1,
            0.25 * 0.5 + 0.25 * 0.1,
            1.0 * 0.5 + 1.0 * 0.1,
            0.8,
        );
        assert_eq!(out, SignalValue::ColorAlpha(expect));
    }

    #[test]
    fn second_composite_misses_leave_the_base_untouched() {
        let graph = EffectsGraph::build();
        let base = Vec4::new(0.2, 0.3, 0.4, 1.0);
        let out = graph.composited2().eval(&|input| match input {
            SignalInput::Pass(PassSource::Composite1) => base,
            SignalInput::Pass(PassSource::Bloom) => Vec4::ZERO,
            // SSR miss: zero color, zero confidence.
            SignalInput::Pass(PassSource::Ssr) => Vec4::ZERO,
            _ => Vec4::ZERO,
        });
        assert_eq!(out, SignalValue::ColorAlpha(base));
    }

    #[test]
    fn second_composite_declares_its_inputs_once() {
        let graph = EffectsGraph::build();
        let compiled = compile_composite(graph.composited2());
        assert_eq!(
            compiled.inputs,
            vec![
                SignalInput::Pass(PassSource::Composite1),
                SignalInput::Pass(PassSource::Bloom),
                SignalInput::Pass(PassSource::Ssr),
            ]
        );
    }

    #[test]
    fn param_hash_tracks_every_bit() {
        let base: [f32; 3] = [8.0, 2.0, 15.0];
        let mut nudged = base;
        nudged[2] = f32::from_bits(nudged[2].to_bits() + 1);
        assert_ne!(hash_params(&base), hash_params(&nudged));
        assert_eq!(hash_params(&base), hash_params(&[8.0, 2.0, 15.0]));
    }

    #[test]
    fn rebuild_key_compares_by_value() {
        let a = RebuildKey {
            buffers_generation: 1,
            camera_id: 7,
            config_hash: hash_params(&[0.9]),
        };
        assert_eq!(a, a);
        let b = RebuildKey {
            buffers_generation: 2,
            ..a
        };
        assert_ne!(a, b);
    }
}
