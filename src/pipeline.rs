//! Frame orchestration.
//!
//! [`EffectsPipeline`] owns the parameter surface, the capture stage, every
//! effect pass, and the compiled composite pipelines, and records one frame
//! in a fixed order:
//!
//! capture -> ssgi -> composite1 -> bloom -> ssr -> composite2 -> taa -> blit
//!
//! Parameter writes are folded in once at the top of the frame, so however
//! many controls changed since the last frame, the whole frame sees one
//! consistent configuration. The compiled graph is cached and keyed on
//! (capture buffer generation, camera identity, parameter hash); frames
//! with an unchanged key reuse it untouched. Disabling effects bypasses
//! everything but the capture and presents the raw scene color, leaving
//! the cache warm for re-enable.

use glam::Mat4;

use crate::camera::{Camera, jitter_offset};
use crate::capture::SceneCapture;
use crate::compositor::{CompositePipeline, EffectsGraph, RebuildKey, hash_params};
use crate::gpu::GpuContext;
use crate::params::ParamSurface;
use crate::passes::{
    BloomConfig, BloomPass, ConfigError, SsgiConfig, SsgiPass, SsrConfig, SsrPass, TaaConfig,
    TaaPass,
};
use crate::scene::Scene;
use crate::signal::{BufferRole, PassSource, SignalInput};

/// Presents a finished HDR target to the surface.
struct BlitPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl BlitPass {
    fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Blit Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Blit Pipeline"),
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
                    format: gpu.config.format,
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
            sampler,
        }
    }

    fn render(
        &self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        src: &wgpu::TextureView,
        dst: &wgpu::TextureView,
    ) {
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Blit Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: dst,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

/// Whether accumulated TAA history is unusable this frame.
///
/// History carries over only while the projection stays put and effects
/// stay on: a projection change reprojects into garbage, and frames
/// rendered while disabled never fed the accumulator. Resizes fold into
/// the projection key through the aspect ratio.
fn history_must_reset(
    prev_projection_key: Option<u64>,
    projection_key: u64,
    was_enabled: bool,
    enabled: bool,
) -> bool {
    prev_projection_key != Some(projection_key) || (enabled && !was_enabled)
}

/// The whole post-processing chain behind one render call.
pub struct EffectsPipeline {
    params: ParamSurface,
    graph: EffectsGraph,
    capture: SceneCapture,
    ssgi: SsgiPass,
    ssr: SsrPass,
    bloom: BloomPass,
    taa: TaaPass,
    blit: BlitPass,
    composite1: CompositePipeline,
    composite2: CompositePipeline,
    graph_key: Option<RebuildKey>,
    ssgi_config: SsgiConfig,
    ssr_config: SsrConfig,
    bloom_config: BloomConfig,
    taa_config: TaaConfig,
    frame_index: u64,
    prev_view_proj: Option<Mat4>,
    prev_projection_key: Option<u64>,
    was_enabled: bool,
}

impl EffectsPipeline {
    pub fn new(gpu: &GpuContext) -> Self {
        let graph = EffectsGraph::build();
        let composite1 = CompositePipeline::new(gpu, graph.composited1(), "Composite1");
        let composite2 = CompositePipeline::new(gpu, graph.composited2(), "Composite2");

        Self {
            params: ParamSurface::new(),
            graph,
            capture: SceneCapture::new(gpu),
            ssgi: SsgiPass::new(gpu),
            ssr: SsrPass::new(gpu),
            bloom: BloomPass::new(gpu),
            taa: TaaPass::new(gpu),
            blit: BlitPass::new(gpu),
            composite1,
            composite2,
            graph_key: None,
            ssgi_config: SsgiConfig::default(),
            ssr_config: SsrConfig::default(),
            bloom_config: BloomConfig::default(),
            taa_config: TaaConfig::default(),
            frame_index: 0,
            prev_view_proj: None,
            prev_projection_key: None,
            was_enabled: true,
        }
    }

    /// The external control surface.
    pub fn params(&self) -> &ParamSurface {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamSurface {
        &mut self.params
    }

    /// The live signal topology, e.g. for debug views of GI or AO.
    pub fn graph(&self) -> &EffectsGraph {
        &self.graph
    }

    /// Replaces the SSGI configuration, rejecting out-of-range fields.
    pub fn set_ssgi_config(&mut self, config: SsgiConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let p = &mut self.params;
        p.set("ssgi.steps", config.step_count as f64);
        p.set("ssgi.slices", config.slice_count as f64);
        p.set("ssgi.radius", config.radius as f64);
        p.set("ssgi.thickness", config.thickness as f64);
        p.set("ssgi.gi_intensity", config.gi_intensity as f64);
        p.set("ssgi.ao_intensity", config.ao_intensity as f64);
        Ok(())
    }

    /// Replaces the SSR configuration, rejecting out-of-range fields.
    pub fn set_ssr_config(&mut self, config: SsrConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let p = &mut self.params;
        p.set("ssr.distance", config.max_distance as f64);
        p.set("ssr.thickness", config.thickness as f64);
        p.set("ssr.blur_quality", config.blur_quality as f64);
        p.set("ssr.resolution_scale", config.resolution_scale as f64);
        Ok(())
    }

    /// Replaces the bloom configuration, rejecting out-of-range fields.
    pub fn set_bloom_config(&mut self, config: BloomConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let p = &mut self.params;
        p.set("bloom.threshold", config.threshold as f64);
        p.set("bloom.strength", config.strength as f64);
        p.set("bloom.radius", config.radius as f64);
        Ok(())
    }

    /// Replaces the TAA configuration, rejecting out-of-range fields.
    pub fn set_taa_config(&mut self, config: TaaConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.params.set("taa.blend_factor", config.blend_factor as f64);
        Ok(())
    }

    /// Folds all parameter writes since the last frame into the typed
    /// configurations, at most once per frame.
    fn apply_params(&mut self) {
        if !self.params.take_dirty() {
            return;
        }
        let v = |key: &str| self.params.value(key) as f32;
        self.ssgi_config = SsgiConfig {
            step_count: v("ssgi.steps") as u32,
            slice_count: v("ssgi.slices") as u32,
            radius: v("ssgi.radius"),
            thickness: v("ssgi.thickness"),
            gi_intensity: v("ssgi.gi_intensity"),
            ao_intensity: v("ssgi.ao_intensity"),
        };
        self.ssr_config = SsrConfig {
            max_distance: v("ssr.distance"),
            thickness: v("ssr.thickness"),
            blur_quality: v("ssr.blur_quality") as u32,
            resolution_scale: v("ssr.resolution_scale"),
        };
        self.bloom_config = BloomConfig {
            threshold: v("bloom.threshold"),
            strength: v("bloom.strength"),
            radius: v("bloom.radius"),
        };
        self.taa_config = TaaConfig {
            blend_factor: v("taa.blend_factor"),
        };
    }

    fn config_hash(&self) -> u64 {
        hash_params(&[
            self.ssgi_config.step_count as f32,
            self.ssgi_config.slice_count as f32,
            self.ssgi_config.radius,
            self.ssgi_config.thickness,
            self.ssgi_config.gi_intensity,
            self.ssgi_config.ao_intensity,
            self.ssr_config.max_distance,
            self.ssr_config.thickness,
            self.ssr_config.blur_quality as f32,
            self.ssr_config.resolution_scale,
            self.bloom_config.threshold,
            self.bloom_config.strength,
            self.bloom_config.radius,
            self.taa_config.blend_factor,
        ])
    }

    fn rebuild_if_stale(&mut self, gpu: &GpuContext, buffers_generation: u64, camera_id: u64) {
        let key = RebuildKey {
            buffers_generation,
            camera_id,
            config_hash: self.config_hash(),
        };
        if self.graph_key == Some(key) {
            return;
        }
        log::debug!("rebuilding effects graph: {:?}", key);
        self.graph = EffectsGraph::build();
        self.composite1 = CompositePipeline::new(gpu, self.graph.composited1(), "Composite1");
        self.composite2 = CompositePipeline::new(gpu, self.graph.composited2(), "Composite2");
        self.graph_key = Some(key);
    }

    /// Records, submits, and presents one frame.
    ///
    /// Surface loss reconfigures and skips the frame; other surface errors
    /// are logged and skipped. A skipped frame leaves all temporal state
    /// exactly as it was.
    pub fn render(&mut self, gpu: &mut GpuContext, scene: &Scene, camera: &Camera) {
        self.apply_params();

        let frame = match gpu.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("surface lost, reconfiguring");
                gpu.resize(gpu.width(), gpu.height());
                return;
            }
            Err(err) => {
                log::warn!("skipping frame: {err}");
                return;
            }
        };
        let surface_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let (width, height) = (gpu.width(), gpu.height());
        let aspect = gpu.aspect();
        let enabled = self.params.enabled();

        let projection_key = camera.projection_key(aspect);
        if history_must_reset(self.prev_projection_key, projection_key, self.was_enabled, enabled) {
            self.taa.invalidate_history();
            self.prev_view_proj = None;
            self.prev_projection_key = Some(projection_key);
        }
        self.was_enabled = enabled;

        let view = camera.view();
        let proj = camera.projection(aspect);
        let unjittered_view_proj = proj * view;
        let prev_view_proj = self.prev_view_proj.unwrap_or(unjittered_view_proj);
        // Jitter exists for the TAA resolve to consume; without it the
        // raster stays put.
        let raster_view_proj = if enabled {
            camera.jittered_projection(aspect, jitter_offset(self.frame_index, width, height)) * view
        } else {
            unjittered_view_proj
        };

        self.capture.prepare(gpu, scene, camera);

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        self.capture.render(
            gpu,
            &mut encoder,
            scene,
            camera,
            raster_view_proj,
            unjittered_view_proj,
            prev_view_proj,
        );

        if enabled {
            let generation = self
                .capture
                .buffers()
                .map(|b| b.generation())
                .unwrap_or_default();
            self.rebuild_if_stale(gpu, generation, camera.id());

            self.record_effects(gpu, &mut encoder, proj, width, height);

            let resolved = self.taa.output().expect("taa rendered this frame");
            self.blit.render(gpu, &mut encoder, resolved, &surface_view);
        } else {
            let buffers = self.capture.buffers().expect("capture prepared this frame");
            self.blit
                .render(gpu, &mut encoder, buffers.view(BufferRole::Color), &surface_view);
        }

        gpu.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        self.prev_view_proj = Some(unjittered_view_proj);
        self.frame_index += 1;
    }

    fn record_effects(
        &mut self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        proj: Mat4,
        width: u32,
        height: u32,
    ) {
        let buffers = self.capture.buffers().expect("capture prepared this frame");

        self.ssgi
            .render(gpu, encoder, buffers, proj, &self.ssgi_config);

        let sampler = self.capture.nearest_sampler();
        let ssgi_out = self.ssgi.output().expect("ssgi rendered this frame");
        self.composite1
            .render(gpu, encoder, sampler, width, height, |input| match input {
                SignalInput::Buffer(role) => buffers.view(role),
                SignalInput::Pass(PassSource::Ssgi) => ssgi_out,
                other => unreachable!("composite1 does not read {:?}", other),
            });

        let composite1_out = self
            .composite1
            .output()
            .expect("composite1 rendered this frame");
        self.bloom
            .render(gpu, encoder, width, height, composite1_out, &self.bloom_config);

        self.ssr
            .render(gpu, encoder, buffers, proj, &self.ssr_config);

        let bloom_out = self.bloom.output().expect("bloom rendered this frame");
        let ssr_out = self.ssr.output().expect("ssr rendered this frame");
        self.composite2
            .render(gpu, encoder, sampler, width, height, |input| match input {
                SignalInput::Pass(PassSource::Composite1) => composite1_out,
                SignalInput::Pass(PassSource::Bloom) => bloom_out,
                SignalInput::Pass(PassSource::Ssr) => ssr_out,
                other => unreachable!("composite2 does not read {:?}", other),
            });

        let composite2_out = self
            .composite2
            .output()
            .expect("composite2 rendered this frame");
        self.taa
            .render(gpu, encoder, buffers, composite2_out, &self.taa_config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_defaults_match_typed_defaults() {
        let p = ParamSurface::new();

        let ssgi = SsgiConfig::default();
        assert_eq!(p.value("ssgi.steps") as u32, ssgi.step_count);
        assert_eq!(p.value("ssgi.slices") as u32, ssgi.slice_count);
        assert_eq!(p.value("ssgi.radius") as f32, ssgi.radius);
        assert_eq!(p.value("ssgi.thickness") as f32, ssgi.thickness);
        assert_eq!(p.value("ssgi.gi_intensity") as f32, ssgi.gi_intensity);
        assert_eq!(p.value("ssgi.ao_intensity") as f32, ssgi.ao_intensity);

        let ssr = SsrConfig::default();
        assert_eq!(p.value("ssr.distance") as f32, ssr.max_distance);
        assert_eq!(p.value("ssr.thickness") as f32, ssr.thickness);
        assert_eq!(p.value("ssr.blur_quality") as u32, ssr.blur_quality);
        assert_eq!(p.value("ssr.resolution_scale") as f32, ssr.resolution_scale);

        let bloom = BloomConfig::default();
        assert_eq!(p.value("bloom.threshold") as f32, bloom.threshold);
        assert_eq!(p.value("bloom.strength") as f32, bloom.strength);
        assert_eq!(p.value("bloom.radius") as f32, bloom.radius);

        let taa = TaaConfig::default();
        assert_eq!(p.value("taa.blend_factor") as f32, taa.blend_factor);
    }

    #[test]
    fn config_hash_changes_with_any_pass_parameter() {
        let base = hash_params(&[8.0, 2.0, 15.0, 10.0, 20.0, 4.0]);
        let nudged = hash_params(&[8.0, 2.0, 15.0, 10.0, 20.0, 3.5]);
        assert_ne!(base, nudged);
    }

    #[test]
    fn history_survives_a_steady_enabled_frame() {
        assert!(!history_must_reset(Some(7), 7, true, true));
    }

    #[test]
    fn history_resets_when_the_projection_changes() {
        // First frame has no previous key; any later key change also resets.
        assert!(history_must_reset(None, 7, true, true));
        assert!(history_must_reset(Some(7), 8, true, true));
    }

    #[test]
    fn history_resets_on_the_reenable_edge_only() {
        assert!(history_must_reset(Some(7), 7, false, true));
        // Turning off, or staying off, leaves the (unused) history alone.
        assert!(!history_must_reset(Some(7), 7, true, false));
        assert!(!history_must_reset(Some(7), 7, false, false));
    }
}
