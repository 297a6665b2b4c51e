use bevy::ecs::world::EntityRef;
use bevy::math::DVec2;
use bevy::prelude::*;
use geo::{Contains, Coord, LineString, Point};

use crate::canvas::{Color, DrawSurface};
use crate::chart::{HoverObject, Locator, Renderer};
use crate::placement::{ScreenGeometryComponent, WorldOrigin};
use crate::viewport::RenderHelper;

/// Look of the fragments of one region.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct RegionStyleComponent {
    pub fill: Color,
    pub stroke: Option<Color>,
    pub stroke_width: f64,
    pub index: usize,
}

impl Default for RegionStyleComponent {
    fn default() -> Self {
        Self {
            fill: Color::rgba(0x45, 0x82, 0xb4, 0x99),
            stroke: Some(Color::WHITE),
            stroke_width: 1.0,
            index: 0,
        }
    }
}

fn trace_ring(surface: &mut dyn DrawSurface, ring: &LineString<f64>, origin: DVec2, factor: f64) {
    for (i, c) in ring.0.iter().enumerate() {
        let p = origin + DVec2::new(c.x, c.y) * factor;
        if i == 0 {
            surface.move_to(p.x, p.y);
        } else {
            surface.line_to(p.x, p.y);
        }
    }
    surface.close_path();
}

/// Draws a fragment from its screen geometry, rescaled when the geometry was
/// prepared for another zoom.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionRenderer;

impl Renderer for RegionRenderer {
    fn render(&self, entity: EntityRef, surface: &mut dyn DrawSurface, helper: &RenderHelper) {
        let (Some(screen), Some(origin)) = (entity.get::<ScreenGeometryComponent>(), entity.get::<WorldOrigin>()) else {
            return;
        };
        let style = entity.get::<RegionStyleComponent>().copied().unwrap_or_default();
        let client_origin = helper.to_client(origin.0);
        let factor = helper.zoom_factor(screen.zoom);

        surface.begin_path();
        for polygon in &screen.geometry {
            trace_ring(surface, polygon.exterior(), client_origin, factor);
            for interior in polygon.interiors() {
                trace_ring(surface, interior, client_origin, factor);
            }
        }
        surface.set_fill_style(style.fill);
        surface.fill();
        if let Some(stroke) = style.stroke {
            surface.set_stroke_style(stroke);
            surface.set_line_width(style.stroke_width);
            surface.stroke();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegionLocator;

impl Locator for RegionLocator {
    fn search(&self, point: DVec2, entity: EntityRef, _: &RenderHelper) -> Option<HoverObject> {
        let screen = entity.get::<ScreenGeometryComponent>()?;
        let origin = entity.get::<WorldOrigin>()?;
        let local = (point - origin.0) * f64::from(1u32 << screen.zoom);
        screen
            .geometry
            .contains(&Point::from(Coord { x: local.x, y: local.y }))
            .then(|| HoverObject {
                entity: entity.id(),
                index: entity.get::<RegionStyleComponent>().map_or(0, |s| s.index),
                distance: 0.0,
            })
    }
}
