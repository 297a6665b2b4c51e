use std::f64::consts::TAU;

use bevy::ecs::world::EntityRef;
use bevy::math::DVec2;
use bevy::prelude::*;

use crate::canvas::DrawSurface;
use crate::chart::{ChartElementComponent, HoverObject, Locator, Renderer};
use crate::placement::ScreenOrigin;
use crate::viewport::RenderHelper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkerShape {
    #[default]
    Circle,
    Square,
}

/// Marker centered on the entity's screen origin.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct PointComponent {
    /// Diameter in client pixels.
    pub size: f64,
    pub shape: MarkerShape,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PointRenderer;

impl Renderer for PointRenderer {
    fn render(&self, entity: EntityRef, surface: &mut dyn DrawSurface, _: &RenderHelper) {
        let (Some(origin), Some(point)) = (entity.get::<ScreenOrigin>(), entity.get::<PointComponent>()) else {
            return;
        };
        let Some(element) = entity.get::<ChartElementComponent>() else {
            return;
        };
        let center = origin.0;
        let half = point.size / 2.0;

        surface.begin_path();
        match point.shape {
            MarkerShape::Circle => {
                surface.move_to(center.x + half, center.y);
                surface.arc(center.x, center.y, half, 0.0, TAU, false);
            }
            MarkerShape::Square => {
                surface.move_to(center.x - half, center.y - half);
                surface.line_to(center.x + half, center.y - half);
                surface.line_to(center.x + half, center.y + half);
                surface.line_to(center.x - half, center.y + half);
            }
        }
        surface.close_path();
        if let Some(fill) = element.fill_color {
            surface.set_fill_style(fill);
            surface.fill();
        }
        if let Some(stroke) = element.stroke_color {
            surface.set_stroke_style(stroke);
            surface.set_line_width(element.stroke_width);
            surface.stroke();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PointLocator;

impl Locator for PointLocator {
    fn search(&self, point: DVec2, entity: EntityRef, helper: &RenderHelper) -> Option<HoverObject> {
        let origin = entity.get::<ScreenOrigin>()?;
        let marker = entity.get::<PointComponent>()?;
        let distance = helper.to_client(point).distance(origin.0);
        (distance <= marker.size / 2.0).then(|| HoverObject {
            entity: entity.id(),
            index: entity.get::<ChartElementComponent>().map_or(0, |e| e.index),
            distance,
        })
    }
}
