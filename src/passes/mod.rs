//! Screen-space effect passes.
//!
//! Each pass owns its pipeline, uniform buffer, and output target(s), and
//! follows the same shape: a validated `*Config` struct, an `ensure_size`
//! step that reallocates targets on resolution change, and a `render` that
//! records one fullscreen pass into the frame's command encoder.

mod bloom;
mod ssgi;
mod ssr;
mod taa;

pub use bloom::{BloomConfig, BloomPass};
pub use ssgi::{SsgiConfig, SsgiPass};
pub use ssr::{SsrConfig, SsrPass};
pub use taa::{TaaConfig, TaaPass};

/// A pass configuration field fell outside its documented range.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub pass: &'static str,
    pub field: &'static str,
    pub value: f32,
    pub min: f32,
    pub max: f32,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} = {} is outside [{}, {}]",
            self.pass, self.field, self.value, self.min, self.max
        )
    }
}

impl std::error::Error for ConfigError {}

pub(crate) fn check_range(
    pass: &'static str,
    field: &'static str,
    value: f32,
    min: f32,
    max: f32,
) -> Result<(), ConfigError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError {
            pass,
            field,
            value,
            min,
            max,
        })
    }
}

/// A single offscreen color target with the ping-pong realloc idiom shared
/// by the passes.
pub(crate) struct EffectTarget {
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl EffectTarget {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
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
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            width,
            height,
        }
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

/// Begins a fullscreen render pass that clears and writes `view`.
pub(crate) fn begin_fullscreen_pass<'a>(
    encoder: &'a mut wgpu::CommandEncoder,
    label: &str,
    view: &'a wgpu::TextureView,
) -> wgpu::RenderPass<'a> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_check_accepts_bounds() {
        assert!(check_range("ssgi", "radius", 1.0, 1.0, 100.0).is_ok());
        assert!(check_range("ssgi", "radius", 100.0, 1.0, 100.0).is_ok());
    }

    #[test]
    fn range_check_names_the_field() {
        let err = check_range("ssr", "thickness", 2.0, 0.01, 1.0).unwrap_err();
        assert_eq!(err.pass, "ssr");
        assert_eq!(err.field, "thickness");
        assert!(err.to_string().contains("ssr.thickness"));
    }

    #[test]
    fn range_check_rejects_non_finite() {
        assert!(check_range("bloom", "strength", f32::NAN, 0.0, 3.0).is_err());
        assert!(check_range("bloom", "strength", f32::INFINITY, 0.0, 3.0).is_err());
    }
}
