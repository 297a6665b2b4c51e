//! Coordinate spaces, cell addressing and geometry transforms.
//!
//! Three spaces are in play: lon/lat degrees, the world square `[0, 256]²` and
//! client pixels. Projections go lon/lat ↔ world, the viewport goes world ↔ client.

pub mod keys;
pub mod projection;
pub mod resample;
pub mod simplify;

use geo::{BoundingRect, Coord, MultiPolygon, Rect};

pub use keys::{CellKey, QuadKey};
pub use projection::{MapProjection, MercatorProjection, Projection, MAX_LATITUDE, WORLD_SIZE};
pub use resample::{resample_path, Resamplable, ResampleTask, RESAMPLING_PRECISION};
pub use simplify::{simplify_ring, SimplifyTask};

/// Bounding box of a geometry, or a degenerate box at the origin when it is empty.
pub fn bbox_or_origin(geometry: &MultiPolygon<f64>) -> Rect<f64> {
    geometry
        .bounding_rect()
        .unwrap_or_else(|| Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }))
}
