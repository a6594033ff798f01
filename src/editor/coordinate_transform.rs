//! Viewport transform between world and canvas-local screen coordinates.
//!
//! `screen = world * scale + offset`. Screen points are relative to the
//! canvas' top-left corner.

use egui::{Pos2, Rect, Vec2};
use serde::{Deserialize, Serialize};

pub const MIN_SCALE: f32 = 0.25;
pub const MAX_SCALE: f32 = 3.0;

/// Scale multiplier per wheel notch.
pub const ZOOM_STEP: f32 = 1.1;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    scale: f32,
    offset: Vec2,
    min_scale: f32,
    max_scale: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: Vec2::ZERO,
            min_scale: MIN_SCALE,
            max_scale: MAX_SCALE,
        }
    }
}

impl Viewport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bounds(mut self, min_scale: f32, max_scale: f32) -> Self {
        self.min_scale = min_scale.min(max_scale);
        self.max_scale = min_scale.max(max_scale);
        self.scale = self.clamp_scale(self.scale);
        self
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.min_scale, self.max_scale)
    }

    pub fn world_to_screen(&self, world: Pos2) -> Pos2 {
        (world.to_vec2() * self.scale + self.offset).to_pos2()
    }

    pub fn screen_to_world(&self, screen: Pos2) -> Pos2 {
        ((screen.to_vec2() - self.offset) / self.scale).to_pos2()
    }

    pub fn world_rect_to_screen(&self, rect: Rect) -> Rect {
        Rect::from_min_max(self.world_to_screen(rect.min), self.world_to_screen(rect.max))
    }

    /// Non-finite requests keep the current scale.
    fn clamp_scale(&self, scale: f32) -> f32 {
        if !scale.is_finite() {
            return self.scale;
        }
        scale.clamp(self.min_scale, self.max_scale)
    }

    /// Set the scale, keeping the world point under `pivot` in place.
    ///
    /// Returns `false` when the clamped scale equals the current one.
    pub fn set_zoom(&mut self, scale: f32, pivot: Pos2) -> bool {
        let next = self.clamp_scale(scale);
        if next == self.scale {
            return false;
        }
        let world_pivot = self.screen_to_world(pivot);
        self.scale = next;
        self.offset = pivot.to_vec2() - world_pivot.to_vec2() * next;
        true
    }

    pub fn zoom_by(&mut self, factor: f32, pivot: Pos2) -> bool {
        self.set_zoom(self.scale * factor, pivot)
    }

    /// One wheel notch; negative `delta_y` zooms in.
    pub fn zoom_wheel(&mut self, delta_y: f32, pivot: Pos2) -> bool {
        if delta_y == 0.0 {
            return false;
        }
        let factor = if delta_y < 0.0 { ZOOM_STEP } else { 1.0 / ZOOM_STEP };
        self.zoom_by(factor, pivot)
    }

    /// Shift by a screen-space delta. Scale is untouched.
    pub fn pan(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    pub fn reset(&mut self) {
        self.scale = self.clamp_scale(1.0);
        self.offset = Vec2::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Pos2, b: Pos2) -> bool {
        (a - b).length() < 1e-3
    }

    #[test]
    fn test_inverse_law() {
        let points = [Pos2::new(0.0, 0.0), Pos2::new(123.5, -40.0), Pos2::new(-900.0, 512.25)];
        for scale in [0.25, 0.8, 1.0, 2.7] {
            let mut viewport = Viewport::new();
            viewport.set_zoom(scale, Pos2::new(17.0, 33.0));
            viewport.pan(Vec2::new(-250.0, 80.5));
            for p in points {
                assert!(close(viewport.world_to_screen(viewport.screen_to_world(p)), p));
                assert!(close(viewport.screen_to_world(viewport.world_to_screen(p)), p));
            }
        }
    }

    #[test]
    fn test_zoom_keeps_pivot_fixed() {
        let mut viewport = Viewport::new();
        viewport.pan(Vec2::new(40.0, -12.0));
        for (factor, pivot) in [
            (1.1, Pos2::new(300.0, 200.0)),
            (0.5, Pos2::new(5.0, 700.0)),
            (2.0, Pos2::new(-20.0, 10.0)),
        ] {
            let before = viewport.screen_to_world(pivot);
            viewport.zoom_by(factor, pivot);
            assert!(close(viewport.screen_to_world(pivot), before));
        }
    }

    #[test]
    fn test_scale_is_clamped() {
        let mut viewport = Viewport::new();
        assert!(viewport.set_zoom(10.0, Pos2::ZERO));
        assert_eq!(viewport.scale(), MAX_SCALE);
        assert!(!viewport.zoom_by(2.0, Pos2::ZERO));
        viewport.set_zoom(0.01, Pos2::ZERO);
        assert_eq!(viewport.scale(), MIN_SCALE);
        assert!(!viewport.set_zoom(f32::NAN, Pos2::ZERO));
        assert_eq!(viewport.scale(), MIN_SCALE);
    }

    #[test]
    fn test_pan_leaves_scale() {
        let mut viewport = Viewport::new().with_bounds(0.5, 2.5);
        viewport.zoom_wheel(-1.0, Pos2::new(10.0, 10.0));
        let scale = viewport.scale();
        viewport.pan(Vec2::new(15.0, -5.0));
        assert_eq!(viewport.scale(), scale);
        assert_eq!(viewport.bounds(), (0.5, 2.5));
    }
}
