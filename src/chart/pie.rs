use std::f64::consts::{FRAC_PI_2, TAU};

use bevy::ecs::world::EntityRef;
use bevy::math::DVec2;
use bevy::prelude::*;

use crate::canvas::{Color, DrawSurface};
use crate::chart::{ChartElementComponent, HoverObject, Locator, Renderer};
use crate::placement::ScreenOrigin;
use crate::viewport::RenderHelper;

/// Pie chart centered on the entity's screen origin. A non-zero `hole_radius`
/// makes it a donut.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct PieSpecComponent {
    pub radius: f64,
    pub hole_radius: f64,
    pub values: Vec<f64>,
    pub colors: Vec<Color>,
    /// Data index of each sector.
    pub indices: Vec<usize>,
}

impl PieSpecComponent {
    /// Start and end angle of every sector, clockwise from twelve o'clock.
    pub fn sectors(&self) -> Vec<(f64, f64)> {
        let total: f64 = self.values.iter().map(|v| v.abs()).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        let mut start = -FRAC_PI_2;
        self.values
            .iter()
            .map(|value| {
                let end = start + TAU * value.abs() / total;
                let sector = (start, end);
                start = end;
                sector
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PieRenderer;

impl Renderer for PieRenderer {
    fn render(&self, entity: EntityRef, surface: &mut dyn DrawSurface, _: &RenderHelper) {
        let (Some(origin), Some(spec)) = (entity.get::<ScreenOrigin>(), entity.get::<PieSpecComponent>()) else {
            return;
        };
        let element = entity.get::<ChartElementComponent>();
        let center = origin.0;

        for (i, (start, end)) in spec.sectors().into_iter().enumerate() {
            surface.begin_path();
            if spec.hole_radius > 0.0 {
                surface.arc(center.x, center.y, spec.radius, start, end, false);
                surface.arc(center.x, center.y, spec.hole_radius, end, start, true);
            } else {
                surface.move_to(center.x, center.y);
                surface.arc(center.x, center.y, spec.radius, start, end, false);
            }
            surface.close_path();
            if let Some(&color) = spec.colors.get(i) {
                surface.set_fill_style(color);
                surface.fill();
            }
            if let Some(stroke) = element.and_then(|e| e.stroke_color) {
                surface.set_stroke_style(stroke);
                surface.set_line_width(element.map_or(1.0, |e| e.stroke_width));
                surface.stroke();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PieLocator;

impl Locator for PieLocator {
    fn search(&self, point: DVec2, entity: EntityRef, helper: &RenderHelper) -> Option<HoverObject> {
        let origin = entity.get::<ScreenOrigin>()?;
        let spec = entity.get::<PieSpecComponent>()?;
        let offset = helper.to_client(point) - origin.0;
        let distance = offset.length();
        if distance > spec.radius || distance < spec.hole_radius {
            return None;
        }
        // Same angular frame as `sectors`: from -π/2, growing clockwise on screen.
        let mut angle = offset.y.atan2(offset.x);
        if angle < -FRAC_PI_2 {
            angle += TAU;
        }
        let sector = spec
            .sectors()
            .iter()
            .position(|&(start, end)| angle >= start && angle < end)?;
        Some(HoverObject {
            entity: entity.id(),
            index: spec.indices.get(sector).copied().unwrap_or(sector),
            distance: 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;

    use super::*;
    use crate::viewport::Viewport;

    fn spec(hole_radius: f64) -> PieSpecComponent {
        PieSpecComponent {
            radius: 20.0,
            hole_radius,
            values: vec![1.0, 3.0],
            colors: vec![Color::rgb(255, 0, 0), Color::rgb(0, 0, 255)],
            indices: vec![7, 8],
        }
    }

    #[test]
    fn sectors_split_the_circle() {
        let sectors = spec(0.0).sectors();
        assert_relative_eq!(sectors[0].0, -FRAC_PI_2);
        assert_relative_eq!(sectors[0].1, 0.0);
        assert_relative_eq!(sectors[1].1, 1.5 * std::f64::consts::PI);
        assert!(PieSpecComponent { values: vec![0.0], ..spec(0.0) }.sectors().is_empty());
    }

    #[test]
    fn locator_finds_sector_and_skips_hole() {
        let mut world = World::new();
        let helper = RenderHelper::new(&Viewport {
            zoom: 0.0,
            center: DVec2::splat(50.0),
            size: DVec2::splat(100.0),
            min_zoom: 0.0,
            max_zoom: 1.0,
        });
        let pie = world
            .spawn((ScreenOrigin(DVec2::splat(50.0)), spec(5.0)))
            .id();
        let locator: Arc<dyn Locator> = Arc::new(PieLocator);
        let entity = world.entity(pie);

        // Upper right quarter belongs to the first sector.
        let hit = locator.search(DVec2::new(60.0, 40.0), entity, &helper).unwrap();
        assert_eq!(hit.index, 7);
        // Left half belongs to the second one.
        let hit = locator.search(DVec2::new(35.0, 50.0), entity, &helper).unwrap();
        assert_eq!(hit.index, 8);
        assert!(locator.search(DVec2::new(51.0, 50.0), entity, &helper).is_none());
        assert!(locator.search(DVec2::new(90.0, 50.0), entity, &helper).is_none());
    }
}
