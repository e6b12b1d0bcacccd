//! Perspective camera with a stable identity and TAA jitter support.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec2, Vec3};

static NEXT_CAMERA_ID: AtomicU64 = AtomicU64::new(1);

/// Halton (2, 3) sample points used to jitter the projection while TAA is
/// active. Sixteen samples cycle before the pattern repeats.
pub(crate) const JITTER_SEQUENCE: [[f32; 2]; 16] = [
    [0.5, 0.333333],
    [0.25, 0.666667],
    [0.75, 0.111111],
    [0.125, 0.444444],
    [0.625, 0.777778],
    [0.375, 0.222222],
    [0.875, 0.555556],
    [0.0625, 0.888889],
    [0.5625, 0.037037],
    [0.3125, 0.370370],
    [0.8125, 0.703704],
    [0.1875, 0.148148],
    [0.6875, 0.481481],
    [0.4375, 0.814815],
    [0.9375, 0.259259],
    [0.03125, 0.592593],
];

/// Sub-pixel clip-space jitter for a frame index at a given resolution.
pub(crate) fn jitter_offset(frame_index: u64, width: u32, height: u32) -> Vec2 {
    let sample = JITTER_SEQUENCE[(frame_index as usize) % JITTER_SEQUENCE.len()];
    Vec2::new(
        (sample[0] - 0.5) / width as f32 * 2.0,
        (sample[1] - 0.5) / height as f32 * 2.0,
    )
}

/// A perspective camera for 3D scenes.
///
/// Each camera carries an identity id assigned at construction. Moving or
/// re-aiming a camera keeps its identity; the pipeline memoizes capture
/// buffers and the effects graph on that identity, not on pose. Changing the
/// projection (fov, near/far) keeps identity too, but invalidates the TAA
/// history, which keys on the projection itself.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    /// World-space eye position.
    pub position: Vec3,
    /// World-space look target.
    pub target: Vec3,
    /// Up reference, typically +Y.
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Near clip distance.
    pub near: f32,
    /// Far clip distance.
    pub far: f32,
    id: u64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: std::f32::consts::FRAC_PI_3, // 60 degrees
            near: 0.1,
            far: 200.0,
            id: NEXT_CAMERA_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Camera {
    /// Creates a camera with default pose and projection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the eye to the given position.
    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    /// Aims the camera at the given point.
    pub fn looking_at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.target = Vec3::new(x, y, z);
        self
    }

    /// Sets the vertical field of view in degrees.
    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov_y = fov_degrees.to_radians();
        self
    }

    /// The camera's stable identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// View matrix (world to camera space).
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Projection matrix without jitter, for the given aspect ratio.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }

    /// Projection with a clip-space jitter offset folded in.
    pub fn jittered_projection(&self, aspect: f32, jitter: Vec2) -> Mat4 {
        let mut proj = self.projection(aspect);
        proj.col_mut(2).x += jitter.x;
        proj.col_mut(2).y += jitter.y;
        proj
    }

    /// Fingerprint of the projection parameters. The TAA history buffer is
    /// discarded when this changes.
    pub(crate) fn projection_key(&self, aspect: f32) -> u64 {
        let mut key = 0xcbf2_9ce4_8422_2325u64; // FNV-1a
        for bits in [
            self.fov_y.to_bits(),
            aspect.to_bits(),
            self.near.to_bits(),
            self.far.to_bits(),
        ] {
            key ^= bits as u64;
            key = key.wrapping_mul(0x0000_0100_0000_01b3);
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cameras_have_distinct_identities() {
        let a = Camera::new();
        let b = Camera::new();
        assert_ne!(a.id(), b.id());
        // Moving a camera keeps its identity.
        let moved = a.at(1.0, 2.0, 3.0);
        assert_eq!(moved.id(), a.id());
    }

    #[test]
    fn projection_key_tracks_projection_only() {
        let cam = Camera::new();
        let key = cam.projection_key(16.0 / 9.0);
        assert_eq!(key, cam.at(5.0, 0.0, 0.0).projection_key(16.0 / 9.0));
        assert_ne!(key, cam.with_fov(90.0).projection_key(16.0 / 9.0));
        assert_ne!(key, cam.projection_key(4.0 / 3.0));
    }

    #[test]
    fn jitter_stays_subpixel_and_cycles() {
        for frame in 0..32 {
            let j = jitter_offset(frame, 1920, 1080);
            assert!(j.x.abs() <= 1.0 / 1920.0 + 1e-6);
            assert!(j.y.abs() <= 1.0 / 1080.0 + 1e-6);
        }
        assert_eq!(jitter_offset(0, 800, 600), jitter_offset(16, 800, 600));
    }
}
