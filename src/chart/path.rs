use bevy::ecs::world::EntityRef;
use bevy::math::DVec2;
use bevy::prelude::*;
use geo::LineString;

use crate::canvas::{Color, DrawSurface};
use crate::chart::{ChartElementComponent, HoverObject, Locator, Renderer};
use crate::viewport::RenderHelper;

/// Path in world units.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct PathGeometryComponent(pub LineString<f64>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowEnd {
    First,
    Last,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowType {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrowSpec {
    /// Half opening angle of the head, radians.
    pub angle: f64,
    /// Head length in client pixels.
    pub length: f64,
    pub end: ArrowEnd,
    pub kind: ArrowType,
}

impl ArrowSpec {
    fn on_first(&self) -> bool {
        matches!(self.end, ArrowEnd::First | ArrowEnd::Both)
    }

    fn on_last(&self) -> bool {
        matches!(self.end, ArrowEnd::Last | ArrowEnd::Both)
    }
}

const MIN_TAIL_LENGTH: f64 = 10.0;
const MIN_HEAD_LENGTH: f64 = 5.0;
/// Extra pixels around a stroke that still count as a hit.
const HIT_TOLERANCE: f64 = 3.0;

/// Index of the first point at least `padding` away from the first point, and the
/// point on the segment leading to it at exactly that distance.
fn pad(points: &[DVec2], padding: f64) -> Option<(usize, DVec2)> {
    let first = *points.first()?;
    if points.len() < 2 {
        return None;
    }
    let index = points
        .iter()
        .position(|p| p.distance_squared(first) >= padding * padding)?;
    if index < 1 {
        return None;
    }
    let inside = points[index - 1];
    let outside = points[index];
    let over = outside.distance(first) - padding;
    let towards = (inside - outside).normalize_or_zero();
    Some((index, outside + towards * over))
}

/// Shortens the path by `start` at its beginning and `end` at its end, along the path.
pub fn pad_line_string(points: &[DVec2], start: f64, end: f64) -> Vec<DVec2> {
    let mut padded: Vec<DVec2> = match pad(points, start) {
        Some((index, point)) => std::iter::once(point).chain(points[index..].iter().copied()).collect(),
        None => points.to_vec(),
    };
    let reversed: Vec<DVec2> = padded.iter().rev().copied().collect();
    if let Some((index, point)) = pad(&reversed, end) {
        padded.truncate(padded.len() - index);
        padded.push(point);
    }
    padded
}

fn path_length(points: &[DVec2]) -> f64 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}

/// Index of the point `distance` away from the end, walking back along the path.
fn point_index_at_distance(points: &[DVec2], distance: f64) -> usize {
    let mut length = 0.0;
    let mut i = points.len() - 1;
    while i > 0 && length < distance {
        length += points[i].distance(points[i - 1]);
        i -= 1;
    }
    i
}

/// Head at the last point of `points`, in client pixels.
fn arrow_head(points: &[DVec2], arrow: &ArrowSpec) -> Vec<DVec2> {
    if points.len() < 2 {
        return Vec::new();
    }
    let heads = if arrow.end == ArrowEnd::Both { 2.0 } else { 1.0 };
    let line_length = path_length(points);
    let head_length = if line_length - arrow.length * heads < MIN_TAIL_LENGTH {
        (line_length - MIN_TAIL_LENGTH) / heads
    } else {
        arrow.length
    }
    .max(MIN_HEAD_LENGTH);

    let base = if points.len() == 2 {
        points[0]
    } else {
        points[point_index_at_distance(points, head_length)]
    };
    let tip = points[points.len() - 1];
    let direction = tip - base;
    if direction == DVec2::ZERO {
        return Vec::new();
    }
    let polar = direction.y.atan2(direction.x);
    let back = DVec2::new(-head_length, 0.0);
    let left = tip + DVec2::from_angle(polar - arrow.angle).rotate(back);
    let right = tip + DVec2::from_angle(polar + arrow.angle).rotate(back);
    match arrow.kind {
        ArrowType::Closed => vec![left, tip, right, left],
        ArrowType::Open => vec![left, tip, right],
    }
}

fn client_path(entity: &EntityRef, helper: &RenderHelper) -> Option<(Vec<DVec2>, ChartElementComponent)> {
    let geometry = entity.get::<PathGeometryComponent>()?;
    let element = entity.get::<ChartElementComponent>()?.clone();
    let points: Vec<DVec2> = geometry.0.coords().map(|&c| helper.coord_to_client(c)).collect();
    let points = pad_line_string(&points, element.start_padding, element.end_padding);
    (points.len() >= 2).then_some((points, element))
}

fn trace(surface: &mut dyn DrawSurface, points: &[DVec2]) {
    for (i, p) in points.iter().enumerate() {
        if i == 0 {
            surface.move_to(p.x, p.y);
        } else {
            surface.line_to(p.x, p.y);
        }
    }
}

fn draw_head(surface: &mut dyn DrawSurface, head: &[DVec2], arrow: &ArrowSpec, color: Color) {
    if head.len() < 2 {
        return;
    }
    surface.begin_path();
    trace(surface, head);
    surface.set_line_dash(&[]);
    if arrow.kind == ArrowType::Closed {
        surface.close_path();
        surface.set_fill_style(color);
        surface.fill();
    }
    surface.stroke();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PathRenderer;

impl Renderer for PathRenderer {
    fn render(&self, entity: EntityRef, surface: &mut dyn DrawSurface, helper: &RenderHelper) {
        let Some((points, element)) = client_path(&entity, helper) else {
            return;
        };
        let Some(color) = element.stroke_color else {
            return;
        };
        surface.begin_path();
        trace(surface, &points);
        surface.set_stroke_style(color);
        surface.set_line_dash(&element.line_dash);
        surface.set_line_width(element.stroke_width);
        surface.stroke();

        if let Some(arrow) = &element.arrow {
            if arrow.on_first() {
                let reversed: Vec<DVec2> = points.iter().rev().copied().collect();
                draw_head(surface, &arrow_head(&reversed, arrow), arrow, color);
            }
            if arrow.on_last() {
                draw_head(surface, &arrow_head(&points, arrow), arrow, color);
            }
        }
    }
}

fn distance_to_segment(p: DVec2, a: DVec2, b: DVec2) -> f64 {
    let ab = b - a;
    let t = if ab == DVec2::ZERO {
        0.0
    } else {
        ((p - a).dot(ab) / ab.length_squared()).clamp(0.0, 1.0)
    };
    p.distance(a + ab * t)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PathLocator;

impl Locator for PathLocator {
    fn search(&self, point: DVec2, entity: EntityRef, helper: &RenderHelper) -> Option<HoverObject> {
        let (points, element) = client_path(&entity, helper)?;
        let pointer = helper.to_client(point);
        let distance = points
            .windows(2)
            .map(|w| distance_to_segment(pointer, w[0], w[1]))
            .fold(f64::INFINITY, f64::min);
        (distance <= element.stroke_width / 2.0 + HIT_TOLERANCE).then_some(HoverObject {
            entity: entity.id(),
            index: element.index,
            distance,
        })
    }
}
