//! Current camera state and the visible cell set derived from it.

pub mod render_helper;

use std::collections::HashSet;

use bevy::math::DVec2;
use bevy::prelude::*;
use geo::{Coord, Rect};

use crate::config::LiveMapConfig;
use crate::geometry::{CellKey, MapProjection, MercatorProjection, QuadKey, WORLD_SIZE};

pub use render_helper::RenderHelper;

/// Zoom and center of the map. World units are scaled by `2^zoom` on screen.
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct Viewport {
    pub zoom: f64,
    /// World coordinates of the client area center.
    pub center: DVec2,
    /// Client size in pixels.
    pub size: DVec2,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Viewport {
    pub fn from_config(config: &LiveMapConfig) -> Self {
        let (lon, lat) = config.initial_center;
        let center = MercatorProjection.project(Coord { x: lon, y: lat });
        let mut viewport = Self {
            zoom: config.initial_zoom,
            center: DVec2::new(center.x, center.y),
            size: DVec2::new(f64::from(config.viewport_size.0), f64::from(config.viewport_size.1)),
            min_zoom: f64::from(config.min_zoom),
            max_zoom: f64::from(config.max_zoom),
        };
        viewport.clamp();
        viewport
    }

    pub fn scale(&self) -> f64 {
        self.zoom.exp2()
    }

    pub fn world_to_screen(&self, world: DVec2) -> DVec2 {
        (world - self.center) * self.scale() + self.size / 2.0
    }

    pub fn screen_to_world(&self, screen: DVec2) -> DVec2 {
        (screen - self.size / 2.0) / self.scale() + self.center
    }

    pub fn visible_world_rect(&self) -> Rect<f64> {
        let half = self.size / 2.0 / self.scale();
        let min = self.center - half;
        let max = self.center + half;
        Rect::new(Coord { x: min.x, y: min.y }, Coord { x: max.x, y: max.y })
    }

    /// Integer zoom used for cell requests.
    pub fn cell_zoom(&self) -> u8 {
        self.zoom.floor().clamp(0.0, 30.0) as u8
    }

    /// Cells at `zoom` intersecting the client area, clamped to the world grid.
    pub fn visible_cells(&self, zoom: u8) -> HashSet<CellKey> {
        let rect = self.visible_world_rect();
        let count = 1u32 << zoom;
        let cell = WORLD_SIZE / f64::from(count);
        let last = f64::from(count - 1);
        let to_index = |v: f64| (v / cell).floor().clamp(0.0, last) as u32;

        let (x0, x1) = (to_index(rect.min().x), to_index(rect.max().x));
        let (y0, y1) = (to_index(rect.min().y), to_index(rect.max().y));
        let mut cells = HashSet::with_capacity(((x1 - x0 + 1) * (y1 - y0 + 1)) as usize);
        for y in y0..=y1 {
            for x in x0..=x1 {
                cells.insert(CellKey::new(zoom, x, y));
            }
        }
        cells
    }

    pub fn pan(&mut self, delta_px: DVec2) {
        self.center -= delta_px / self.scale();
        self.clamp();
    }

    /// Zooms by `delta` levels keeping the world point under `anchor_px` in place.
    pub fn zoom_at(&mut self, delta: f64, anchor_px: DVec2) {
        let anchor = self.screen_to_world(anchor_px);
        self.zoom = (self.zoom + delta).clamp(self.min_zoom, self.max_zoom);
        self.center = anchor - (anchor_px - self.size / 2.0) / self.scale();
        self.clamp();
    }

    pub fn move_to(&mut self, center: DVec2, zoom: f64) {
        self.center = center;
        self.zoom = zoom;
        self.clamp();
    }

    /// Replaces the zoom limits and pulls the current zoom inside them.
    pub fn set_zoom_bounds(&mut self, min_zoom: f64, max_zoom: f64) {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self.clamp();
    }

    fn clamp(&mut self) {
        self.zoom = self.zoom.clamp(self.min_zoom, self.max_zoom);
        self.center = self.center.clamp(DVec2::ZERO, DVec2::splat(WORLD_SIZE));
    }
}

/// Visibility derived from the [`Viewport`]. Recomputed lazily on the tick
/// after a camera change.
#[derive(Resource, Debug, Clone, Default)]
pub struct ViewportGrid {
    pub visible_cells: HashSet<CellKey>,
    pub visible_quads: HashSet<QuadKey>,
    /// Geometry level of detail: the integer cell zoom.
    pub zoom_bucket: u8,
    pub stale: bool,
}

impl ViewportGrid {
    pub fn stale() -> Self {
        Self {
            stale: true,
            ..default()
        }
    }

    pub fn is_cell_visible(&self, key: &CellKey) -> bool {
        self.visible_cells.contains(key)
    }

    pub fn is_quad_visible(&self, quad: &QuadKey) -> bool {
        self.visible_quads.contains(quad)
    }
}

pub fn viewport_grid_update_system(
    viewport: Res<Viewport>,
    config: Res<LiveMapConfig>,
    mut grid: ResMut<ViewportGrid>,
) {
    if !grid.stale {
        return;
    }
    let zoom = viewport.cell_zoom();
    let quad_zoom = zoom.min(config.fragment_max_quad_zoom);
    grid.visible_cells = viewport.visible_cells(zoom);
    grid.visible_quads = viewport
        .visible_cells(quad_zoom)
        .iter()
        .map(CellKey::quad_key)
        .collect();
    grid.zoom_bucket = zoom;
    grid.stale = false;
    debug!(
        "Viewport at zoom {:.2}: {} cells, {} quads",
        viewport.zoom,
        grid.visible_cells.len(),
        grid.visible_quads.len()
    );
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn viewport(zoom: f64, size: f64) -> Viewport {
        Viewport {
            zoom,
            center: DVec2::splat(128.0),
            size: DVec2::splat(size),
            min_zoom: 0.0,
            max_zoom: 20.0,
        }
    }

    #[test]
    fn screen_and_world_are_inverse() {
        let viewport = viewport(3.5, 512.0);
        let world = DVec2::new(100.25, 140.5);
        let back = viewport.screen_to_world(viewport.world_to_screen(world));
        assert_relative_eq!(back.x, world.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, world.y, epsilon = 1e-9);
        assert_eq!(viewport.world_to_screen(viewport.center), DVec2::splat(256.0));
    }

    #[test]
    fn visible_cells_cover_client_area() {
        // 512 px at zoom 1 spans the whole world: 2x2 cells.
        let cells = viewport(1.0, 512.0).visible_cells(1);
        assert_eq!(cells.len(), 4);
        // Zoom 5 with a 256 px client area centered on a cell corner.
        let cells = viewport(5.0, 256.0).visible_cells(5);
        assert_eq!(cells.len(), 4);
        assert!(cells.contains(&CellKey::new(5, 15, 15)));
        assert!(cells.contains(&CellKey::new(5, 16, 16)));
    }

    #[test]
    fn zoom_keeps_anchor_in_place() {
        let mut viewport = viewport(2.0, 400.0);
        let anchor = DVec2::new(300.0, 120.0);
        let before = viewport.screen_to_world(anchor);
        viewport.zoom_at(1.5, anchor);
        let after = viewport.screen_to_world(anchor);
        assert_relative_eq!(before.x, after.x, epsilon = 1e-9);
        assert_relative_eq!(before.y, after.y, epsilon = 1e-9);
        assert_relative_eq!(viewport.zoom, 3.5);
    }

    #[test]
    fn pan_moves_against_drag() {
        let mut viewport = viewport(0.0, 256.0);
        viewport.pan(DVec2::new(10.0, 0.0));
        assert_relative_eq!(viewport.center.x, 118.0);
    }
}
