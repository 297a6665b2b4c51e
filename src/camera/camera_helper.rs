use bevy::math::DVec2;
use bevy::prelude::*;
use geo::Coord;

use crate::geometry::{MapProjection, MercatorProjection};
use crate::viewport::Viewport;

/// Camera control input, in client pixels unless noted.
#[derive(Event, Debug, Clone, Copy, PartialEq)]
pub enum CameraInput {
    /// Drag by `delta` pixels.
    Pan { delta: DVec2 },
    /// Zoom by `delta` levels around `anchor`.
    Zoom { delta: f64, anchor: DVec2 },
    /// Jump to a world position.
    MoveTo { center: DVec2, zoom: f64 },
}

impl CameraInput {
    pub fn move_to_lon_lat(lon: f64, lat: f64, zoom: f64) -> Self {
        let world = MercatorProjection.project(Coord { x: lon, y: lat });
        CameraInput::MoveTo {
            center: DVec2::new(world.x, world.y),
            zoom,
        }
    }
}

/// lon/lat of the client area center.
pub fn camera_middle_to_lon_lat(viewport: &Viewport) -> Coord<f64> {
    MercatorProjection.invert(Coord {
        x: viewport.center.x,
        y: viewport.center.y,
    })
}

/// lon/lat under a client pixel.
pub fn client_to_lon_lat(viewport: &Viewport, client: DVec2) -> Coord<f64> {
    let world = viewport.screen_to_world(client);
    MercatorProjection.invert(Coord {
        x: world.x,
        y: world.y,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn middle_of_world_is_null_island() {
        let viewport = Viewport {
            zoom: 3.0,
            center: DVec2::splat(128.0),
            size: DVec2::new(640.0, 480.0),
            min_zoom: 0.0,
            max_zoom: 10.0,
        };
        let middle = camera_middle_to_lon_lat(&viewport);
        assert_relative_eq!(middle.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(middle.y, 0.0, epsilon = 1e-9);

        let corner = client_to_lon_lat(&viewport, DVec2::ZERO);
        assert!(corner.x < 0.0 && corner.y > 0.0);
    }
}
