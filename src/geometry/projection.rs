use std::f64::consts::PI;
use std::sync::Arc;

use bevy::prelude::Resource;

use geo::{Coord, Rect};

/// Edge length of the world square at zoom 0.
pub const WORLD_SIZE: f64 = 256.0;

pub const MAX_LATITUDE: f64 = 85.0511287798;

/// Maps lon/lat degrees into the world square `[0, WORLD_SIZE]²` (y pointing down) and back.
pub trait MapProjection: Send + Sync {
    fn project(&self, lon_lat: Coord<f64>) -> Coord<f64>;

    fn invert(&self, world: Coord<f64>) -> Coord<f64>;

    /// World rectangle covering a lon/lat box given by its south-west corner and extent.
    fn square(&self, lon: f64, lat: f64, width: f64, height: f64) -> Rect<f64> {
        let top_left = self.project(Coord { x: lon, y: lat + height });
        let bottom_right = self.project(Coord { x: lon + width, y: lat });
        Rect::new(top_left, bottom_right)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MercatorProjection;

impl MapProjection for MercatorProjection {
    fn project(&self, lon_lat: Coord<f64>) -> Coord<f64> {
        let lat = lon_lat.y.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = (lon_lat.x + 180.0) / 360.0;
        let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0;
        Coord {
            x: x * WORLD_SIZE,
            y: y * WORLD_SIZE,
        }
    }

    fn invert(&self, world: Coord<f64>) -> Coord<f64> {
        let x = world.x / WORLD_SIZE;
        let y = world.y / WORLD_SIZE;
        let lon = x * 360.0 - 180.0;
        let lat = (PI * (1.0 - 2.0 * y)).sinh().atan().to_degrees();
        Coord {
            x: lon,
            y: lat.clamp(-MAX_LATITUDE, MAX_LATITUDE),
        }
    }
}

/// Projection shared by the systems that turn lon/lat input into world geometry.
#[derive(Resource, Clone)]
pub struct Projection(pub Arc<dyn MapProjection>);

impl Default for Projection {
    fn default() -> Self {
        Self(Arc::new(MercatorProjection))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn projects_longitude_linearly() {
        let p = MercatorProjection.project(Coord { x: 1.0, y: 0.0 });
        assert_relative_eq!(p.x, 128.7111, epsilon = 1e-4);
        assert_relative_eq!(p.y, 128.0, epsilon = 1e-9);
    }

    #[test]
    fn square_has_top_left_origin() {
        let rect = MercatorProjection.square(1.0, 2.0, 30.0, 40.0);
        assert_relative_eq!(rect.min().x, 128.711, epsilon = 1e-3);
        assert_relative_eq!(rect.min().y, 95.0316, epsilon = 1e-3);
        assert_relative_eq!(rect.width(), 21.333, epsilon = 1e-3);
        assert_relative_eq!(rect.height(), 31.546, epsilon = 1e-3);
    }

    #[test]
    fn latitude_is_clamped() {
        let north = MercatorProjection.project(Coord { x: 0.0, y: 89.0 });
        assert_relative_eq!(north.y, 0.0, epsilon = 1e-6);
        let back = MercatorProjection.invert(Coord { x: 64.0, y: 100.0 });
        let again = MercatorProjection.project(back);
        assert_relative_eq!(again.x, 64.0, epsilon = 1e-9);
        assert_relative_eq!(again.y, 100.0, epsilon = 1e-9);
    }
}
