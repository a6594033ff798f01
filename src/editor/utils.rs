//! # Editor Utility Functions
//!
//! Connection curve geometry and small drawing helpers.
//!
//! Connections are cubic beziers leaving an output horizontally to the right
//! and entering an input from the left. Hit-testing samples the curve and
//! checks the distance to each segment, which behaves like testing against a
//! widened stroke.

use egui::{Color32, Pos2, Stroke};

/// Width of the invisible stroke used when picking connections, in screen pixels.
pub const CONNECTION_HIT_WIDTH: f32 = 6.0;

const CURVE_SAMPLES: usize = 24;

/// Control points for a connection from `p1` (output) to `p2` (input).
pub fn bezier_control_points(p1: Pos2, p2: Pos2) -> (Pos2, Pos2) {
    let offset = (p2.x - p1.x).abs() * 0.5 + 60.0;
    (Pos2::new(p1.x + offset, p1.y), Pos2::new(p2.x - offset, p2.y))
}

pub fn bezier_point(p1: Pos2, c1: Pos2, c2: Pos2, p2: Pos2, t: f32) -> Pos2 {
    let t_inv = 1.0 - t;
    (t_inv.powi(3) * p1.to_vec2()
        + 3.0 * t_inv.powi(2) * t * c1.to_vec2()
        + 3.0 * t_inv * t.powi(2) * c2.to_vec2()
        + t.powi(3) * p2.to_vec2())
    .to_pos2()
}

/// Test if a point is within `threshold` of the connection curve `p1 -> p2`.
pub fn hit_test_bezier(pos: Pos2, p1: Pos2, p2: Pos2, threshold: f32) -> bool {
    let (c1, c2) = bezier_control_points(p1, p2);
    let mut prev = p1;
    for i in 1..=CURVE_SAMPLES {
        let t = i as f32 / CURVE_SAMPLES as f32;
        let current = bezier_point(p1, c1, c2, p2, t);
        if distance_to_segment(pos, prev, current) <= threshold {
            return true;
        }
        prev = current;
    }
    false
}

/// Index of the topmost curve within `threshold` of `pos`.
///
/// Curves are given in draw order, so the last hit wins.
pub fn topmost_curve_hit(pos: Pos2, curves: &[(Pos2, Pos2)], threshold: f32) -> Option<usize> {
    curves
        .iter()
        .rposition(|(start, end)| hit_test_bezier(pos, *start, *end, threshold))
}

/// Shortest distance from `p` to the segment `a-b`.
pub fn distance_to_segment(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ab = b - a;
    if ab.length_sq() < 1e-6 {
        return p.distance(a);
    }
    let ap = p - a;
    let t = (ap.dot(ab) / ab.length_sq()).clamp(0.0, 1.0);
    let closest = a + ab * t;
    p.distance(closest)
}

pub fn draw_dashed_line(
    painter: &egui::Painter,
    start: Pos2,
    end: Pos2,
    dash_length: f32,
    gap_length: f32,
    stroke: Stroke,
) {
    let dir = end - start;
    let total_length = dir.length();
    if total_length < 0.001 {
        return;
    }

    let unit = dir / total_length;
    let mut pos = 0.0;
    let mut drawing = true;

    while pos < total_length {
        let segment_length = if drawing { dash_length } else { gap_length };
        let segment_end = (pos + segment_length).min(total_length);

        if drawing {
            painter.line_segment([start + unit * pos, start + unit * segment_end], stroke);
        }

        pos = segment_end;
        drawing = !drawing;
    }
}

/// Dashed outline of a rectangle.
pub fn draw_dashed_rect(painter: &egui::Painter, rect: egui::Rect, stroke: Stroke) {
    let corners = [rect.left_top(), rect.right_top(), rect.right_bottom(), rect.left_bottom()];
    for i in 0..4 {
        draw_dashed_line(painter, corners[i], corners[(i + 1) % 4], 6.0, 4.0, stroke);
    }
}

/// Interpolate between two colors (0.0 = `c1`, 1.0 = `c2`).
pub fn lerp_color(c1: Color32, c2: Color32, t: f32) -> Color32 {
    let mix = |a: u8, b: u8| (a as f32 * (1.0 - t) + b as f32 * t) as u8;
    Color32::from_rgba_premultiplied(
        mix(c1.r(), c2.r()),
        mix(c1.g(), c2.g()),
        mix(c1.b(), c2.b()),
        mix(c1.a(), c2.a()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_points_offset() {
        let (c1, c2) = bezier_control_points(Pos2::new(0.0, 0.0), Pos2::new(100.0, 50.0));
        assert_eq!(c1, Pos2::new(110.0, 0.0));
        assert_eq!(c2, Pos2::new(-10.0, 50.0));
    }

    #[test]
    fn test_hit_test_bezier_endpoints_and_miss() {
        let p1 = Pos2::new(0.0, 0.0);
        let p2 = Pos2::new(200.0, 100.0);
        assert!(hit_test_bezier(Pos2::new(0.0, 2.0), p1, p2, 3.0));
        assert!(hit_test_bezier(Pos2::new(100.0, 50.0), p1, p2, 3.0));
        assert!(!hit_test_bezier(Pos2::new(100.0, 90.0), p1, p2, 3.0));
    }

    #[test]
    fn test_topmost_curve_wins() {
        let curve = (Pos2::new(0.0, 0.0), Pos2::new(200.0, 0.0));
        let curves = [curve, curve, (Pos2::new(0.0, 300.0), Pos2::new(200.0, 300.0))];
        let threshold = CONNECTION_HIT_WIDTH / 2.0;
        assert_eq!(topmost_curve_hit(Pos2::new(100.0, 1.0), &curves, threshold), Some(1));
        assert_eq!(topmost_curve_hit(Pos2::new(100.0, 150.0), &curves, threshold), None);
    }

    #[test]
    fn test_distance_to_segment() {
        let d = distance_to_segment(Pos2::new(5.0, 5.0), Pos2::new(0.0, 0.0), Pos2::new(10.0, 0.0));
        assert!((d - 5.0).abs() < 1e-6);
        let d = distance_to_segment(Pos2::new(-3.0, 4.0), Pos2::new(0.0, 0.0), Pos2::new(0.0, 0.0));
        assert!((d - 5.0).abs() < 1e-6);
    }
}
