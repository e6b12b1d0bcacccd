//! # Afterglow
//!
//! **A screen-space post-processing pipeline for 3D scenes.**
//!
//! One capture pass renders a scene into a set of per-pixel buffers (color,
//! normals, depth, velocity, material factors); a fixed chain of effect
//! passes — global illumination, reflections, bloom, temporal antialiasing —
//! then reworks the image entirely in screen space. Where passes combine, the
//! math is expressed as composable [`EffectSignal`] values compiled to WGSL,
//! so the blend algebra is testable on the CPU without a GPU in sight.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use afterglow::{Camera, EffectsPipeline, GpuContext, Mat4, Mesh, MeshInstance, Scene};
//!
//! fn render_loop(window: Arc<winit::window::Window>) {
//!     let mut gpu = GpuContext::new(window).unwrap();
//!     let mut pipeline = EffectsPipeline::new(&gpu);
//!
//!     let mut scene = Scene::new();
//!     let cube = Arc::new(Mesh::cube(&gpu));
//!     scene.add(MeshInstance::new(cube, Mat4::IDENTITY));
//!     let camera = Camera::new().at(0.0, 2.0, 6.0).looking_at(0.0, 0.0, 0.0);
//!
//!     pipeline.params_mut().set("bloom.strength", 1.4);
//!
//!     loop {
//!         pipeline.render(&mut gpu, &scene, &camera);
//!     }
//! }
//! ```

mod camera;
mod capture;
mod compositor;
mod gpu;
mod params;
mod passes;
mod pipeline;
mod scene;
mod signal;

pub use camera::Camera;
pub use capture::{FrameBufferSet, SceneCapture};
pub use compositor::{EffectsGraph, RebuildKey};
pub use gpu::{GpuContext, InitError};
pub use params::{Control, ParamSurface};
pub use passes::{
    BloomConfig, BloomPass, ConfigError, SsgiConfig, SsgiPass, SsrConfig, SsrPass, TaaConfig,
    TaaPass,
};
pub use pipeline::EffectsPipeline;
pub use scene::{Mesh, MeshInstance, Scene, Vertex3d};
pub use signal::{
    BufferRole, Channels, CompiledComposite, EffectSignal, PassSource, SignalError, SignalInput,
    SignalShape, SignalValue, compile_composite,
};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
