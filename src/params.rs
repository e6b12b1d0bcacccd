//! Named, range-constrained controls for tuning the effect passes.
//!
//! The parameter surface is the boundary between an external control shell
//! (sliders, scripting, whatever the host wires up) and the typed pass
//! configs. Writes through [`ParamSurface::set`] clamp to the control's
//! declared range; that is the only place in the crate where clamping
//! happens. Pass logic itself rejects out-of-range values instead.
//!
//! Controls are grouped by pass name with dotted keys (`ssgi.steps`,
//! `ssr.distance`, `bloom.strength`). The pipeline reads the whole surface
//! as one atomic snapshot before a graph rebuild, so a burst of writes from
//! a control shell can never be half-applied to a single rebuild.

use std::collections::BTreeMap;

/// A single tunable control: current value plus its declared range and step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Control {
    /// Current value, always within `[min, max]`.
    pub value: f64,
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
    /// Suggested UI increment. Zero means continuous.
    pub step: f64,
}

impl Control {
    /// Creates a control, clamping the initial value into range.
    pub fn new(value: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            value: value.clamp(min, max),
            min,
            max,
            step,
        }
    }
}

/// The full set of controls exposed to an external control shell.
///
/// Key layout follows the original control panel: per-pass folders
/// (`ssgi.*`, `ssr.*`, `bloom.*`, `taa.*`) plus the global `effects` toggle.
pub struct ParamSurface {
    controls: BTreeMap<String, Control>,
    enabled: bool,
    dirty: bool,
}

impl ParamSurface {
    /// Builds the surface with the default control set and values.
    pub fn new() -> Self {
        let mut controls = BTreeMap::new();
        let mut add = |key: &str, value: f64, min: f64, max: f64, step: f64| {
            controls.insert(key.to_string(), Control::new(value, min, max, step));
        };

        add("ssgi.steps", 8.0, 0.0, 32.0, 1.0);
        add("ssgi.slices", 2.0, 1.0, 8.0, 1.0);
        add("ssgi.radius", 15.0, 1.0, 100.0, 0.0);
        add("ssgi.gi_intensity", 20.0, 0.0, 100.0, 0.0);
        add("ssgi.ao_intensity", 4.0, 0.0, 4.0, 0.0);
        add("ssgi.thickness", 10.0, 0.01, 10.0, 0.0);
        add("ssr.distance", 11.0, 0.0, 100.0, 1.0);
        add("ssr.blur_quality", 1.0, 0.0, 4.0, 1.0);
        add("ssr.thickness", 0.15, 0.01, 1.0, 0.0);
        add("ssr.resolution_scale", 1.0, 0.1, 1.0, 0.0);
        add("bloom.threshold", 0.15, 0.0, 1.0, 0.01);
        add("bloom.strength", 1.05, 0.0, 3.0, 0.01);
        add("bloom.radius", 0.85, 0.0, 1.0, 0.01);
        add("taa.blend_factor", 0.9, 0.0, 0.99, 0.01);

        Self {
            controls,
            enabled: true,
            dirty: true,
        }
    }

    /// Writes a control value, clamped to the control's range.
    ///
    /// Returns `false` when no control with that key exists. Writing the
    /// value a control already holds does not mark the surface dirty.
    pub fn set(&mut self, key: &str, value: f64) -> bool {
        match self.controls.get_mut(key) {
            Some(control) => {
                let clamped = value.clamp(control.min, control.max);
                if control.value != clamped {
                    control.value = clamped;
                    self.dirty = true;
                }
                true
            }
            None => false,
        }
    }

    /// Reads a control by key.
    pub fn get(&self, key: &str) -> Option<&Control> {
        self.controls.get(key)
    }

    /// Current value of a control that is known to exist.
    pub(crate) fn value(&self, key: &str) -> f64 {
        self.controls[key].value
    }

    /// The global effects toggle. Flipping it does not dirty the surface:
    /// bypassing the pipeline must not force a rebuild on re-enable.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the effect chain is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Iterates controls in a pass group, in key order.
    pub fn group<'a>(&'a self, pass: &'a str) -> impl Iterator<Item = (&'a str, &'a Control)> {
        self.controls
            .iter()
            .filter(move |(key, _)| key.split('.').next() == Some(pass))
            .map(|(key, control)| (key.as_str(), control))
    }

    /// True when a control changed since the last [`take_dirty`](Self::take_dirty).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears and returns the dirty flag. The pipeline calls this exactly
    /// once per frame, right before deciding whether to rebuild, so all
    /// writes since the previous frame land in the same rebuild.
    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

impl Default for ParamSurface {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clamps_to_declared_range() {
        let mut surface = ParamSurface::new();
        assert!(surface.set("ssgi.ao_intensity", 9.5));
        assert_eq!(surface.value("ssgi.ao_intensity"), 4.0);
        assert!(surface.set("bloom.threshold", -1.0));
        assert_eq!(surface.value("bloom.threshold"), 0.0);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut surface = ParamSurface::new();
        assert!(!surface.set("ssgi.banana", 1.0));
    }

    #[test]
    fn dirty_tracks_real_changes_only() {
        let mut surface = ParamSurface::new();
        assert!(surface.take_dirty()); // fresh surface applies once

        surface.set("ssr.distance", 11.0); // unchanged value
        assert!(!surface.is_dirty());

        surface.set("ssr.distance", 20.0);
        assert!(surface.take_dirty());
        assert!(!surface.is_dirty());
    }

    #[test]
    fn toggling_effects_does_not_dirty() {
        let mut surface = ParamSurface::new();
        surface.take_dirty();
        surface.set_enabled(false);
        surface.set_enabled(true);
        assert!(!surface.is_dirty());
    }

    #[test]
    fn groups_filter_by_pass_prefix() {
        let surface = ParamSurface::new();
        let bloom: Vec<&str> = surface.group("bloom").map(|(k, _)| k).collect();
        assert_eq!(bloom, vec!["bloom.radius", "bloom.strength", "bloom.threshold"]);
    }
}
