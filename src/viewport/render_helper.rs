use bevy::math::DVec2;
use geo::Coord;

use crate::viewport::Viewport;

/// World ↔ client conversions handed to renderers and locators.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderHelper {
    viewport: Viewport,
}

impl RenderHelper {
    pub fn new(viewport: &Viewport) -> Self {
        Self {
            viewport: viewport.clone(),
        }
    }

    pub fn zoom(&self) -> f64 {
        self.viewport.zoom
    }

    pub fn to_client(&self, world: DVec2) -> DVec2 {
        self.viewport.world_to_screen(world)
    }

    pub fn coord_to_client(&self, world: Coord<f64>) -> DVec2 {
        self.to_client(DVec2::new(world.x, world.y))
    }

    pub fn to_world(&self, client: DVec2) -> DVec2 {
        self.viewport.screen_to_world(client)
    }

    pub fn dim_to_client(&self, world: f64) -> f64 {
        world * self.viewport.scale()
    }

    pub fn dim_to_world(&self, client: f64) -> f64 {
        client / self.viewport.scale()
    }

    /// Scale between geometry prepared for `geometry_zoom` and the current zoom.
    pub fn zoom_factor(&self, geometry_zoom: u8) -> f64 {
        (self.viewport.zoom - f64::from(geometry_zoom)).exp2()
    }
}
