//! Core GPU context and device management.
//!
//! [`GpuContext`] holds the wgpu device, queue, surface, and surface
//! configuration, and is passed by reference to every pass in the pipeline.
//! Initialization verifies the one hardware capability the pipeline cannot
//! live without: enough simultaneous color attachments for the multi-target
//! scene capture. A device that cannot do that is rejected up front — the
//! effect chain has no degraded mode.

use std::sync::Arc;
use winit::window::Window;

/// Color attachments the capture pass writes in its single geometry pass
/// (color, normal, metal/rough, velocity). Depth rides alongside.
pub const CAPTURE_COLOR_TARGETS: u32 = 4;

/// Failure to bring up a usable GPU device.
#[derive(Debug)]
pub enum InitError {
    /// No surface could be created for the window.
    Surface(wgpu::CreateSurfaceError),
    /// No suitable adapter was found.
    Adapter(String),
    /// The adapter refused to create a device.
    Device(String),
    /// The device cannot write enough render targets in one pass.
    InsufficientColorTargets {
        /// What the adapter supports.
        supported: u32,
        /// What the capture pass needs.
        required: u32,
    },
}

impl std::fmt::Display for InitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitError::Surface(e) => write!(f, "surface creation failed: {}", e),
            InitError::Adapter(msg) => write!(f, "no suitable GPU adapter: {}", msg),
            InitError::Device(msg) => write!(f, "device creation failed: {}", msg),
            InitError::InsufficientColorTargets {
                supported,
                required,
            } => write!(
                f,
                "multi-target capture needs {} color attachments, device supports {}",
                required, supported
            ),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::Surface(e) => Some(e),
            _ => None,
        }
    }
}

/// Core GPU context holding wgpu resources.
///
/// All fields are public to allow direct access to wgpu APIs when needed.
/// The context is created once at startup and passed by reference to all
/// rendering passes.
pub struct GpuContext {
    /// The surface for presenting rendered frames to the window.
    pub surface: wgpu::Surface<'static>,
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue for submitting work to the GPU.
    pub queue: wgpu::Queue,
    /// Current surface configuration (format, size, present mode).
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    /// Creates a new GPU context from a winit window.
    ///
    /// Performs the usual wgpu bring-up (instance, surface, adapter, device,
    /// surface configuration with an sRGB format and Fifo present mode) and
    /// then checks that the device supports the capture pass's attachment
    /// count. Returns [`InitError`] instead of degrading.
    pub fn new(window: Arc<Window>) -> Result<Self, InitError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window).map_err(InitError::Surface)?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| InitError::Adapter(e.to_string()))?;

        let supported = adapter.limits().max_color_attachments;
        if supported < CAPTURE_COLOR_TARGETS {
            return Err(InitError::InsufficientColorTargets {
                supported,
                required: CAPTURE_COLOR_TARGETS,
            });
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Afterglow Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| InitError::Device(e.to_string()))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            surface,
            device,
            queue,
            config,
        })
    }

    /// Resizes the surface to new dimensions.
    ///
    /// Call this when the window is resized. Ignores zero-sized dimensions
    /// to avoid wgpu validation errors during window minimize. Downstream
    /// buffers notice the change and reallocate on their next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    /// Returns the current surface width in pixels.
    pub fn width(&self) -> u32 {
        self.config.width
    }

    /// Returns the current surface height in pixels.
    pub fn height(&self) -> u32 {
        self.config.height
    }

    /// Returns the current aspect ratio (width / height).
    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }
}
