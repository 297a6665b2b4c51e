use std::fmt;

use geo::{Coord, Rect};

use crate::error::MapError;
use crate::geometry::projection::{MapProjection, WORLD_SIZE};

/// A slippy-map tile address. `x` grows eastwards and `y` southwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl CellKey {
    pub const fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    pub fn parent(&self) -> Option<CellKey> {
        (self.zoom > 0).then(|| CellKey::new(self.zoom - 1, self.x / 2, self.y / 2))
    }

    /// The four children, in quad key digit order.
    pub fn children(&self) -> [CellKey; 4] {
        let (x, y, zoom) = (self.x * 2, self.y * 2, self.zoom + 1);
        [
            CellKey::new(zoom, x, y),
            CellKey::new(zoom, x + 1, y),
            CellKey::new(zoom, x, y + 1),
            CellKey::new(zoom, x + 1, y + 1),
        ]
    }

    /// Ancestor at `zoom`, or `None` when `zoom` is deeper than this cell.
    pub fn ancestor(&self, zoom: u8) -> Option<CellKey> {
        if zoom > self.zoom {
            return None;
        }
        let shift = self.zoom - zoom;
        Some(CellKey::new(zoom, self.x >> shift, self.y >> shift))
    }

    /// Edge length of the cell in world units.
    pub fn world_size(&self) -> f64 {
        WORLD_SIZE / f64::from(1u32 << self.zoom)
    }

    pub fn world_rect(&self) -> Rect<f64> {
        let size = self.world_size();
        let min = Coord {
            x: f64::from(self.x) * size,
            y: f64::from(self.y) * size,
        };
        Rect::new(min, Coord { x: min.x + size, y: min.y + size })
    }

    pub fn quad_key(&self) -> QuadKey {
        let mut digits = String::with_capacity(self.zoom as usize);
        for level in (0..self.zoom).rev() {
            let mask = 1u32 << level;
            let mut digit = 0u8;
            if self.x & mask != 0 {
                digit += 1;
            }
            if self.y & mask != 0 {
                digit += 2;
            }
            digits.push(char::from(b'0' + digit));
        }
        QuadKey(digits)
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Quad tree address: one digit `0..=3` per zoom level, most significant first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuadKey(String);

impl QuadKey {
    pub fn parse(digits: &str) -> Result<Self, MapError> {
        if digits.len() > 30 || !digits.bytes().all(|b| (b'0'..=b'3').contains(&b)) {
            return Err(MapError::InvalidQuadKey(digits.to_string()));
        }
        Ok(QuadKey(digits.to_string()))
    }

    pub fn root() -> Self {
        QuadKey(String::new())
    }

    pub fn zoom(&self) -> u8 {
        self.0.len() as u8
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn cell_key(&self) -> CellKey {
        let mut x = 0;
        let mut y = 0;
        for digit in self.0.bytes().map(|b| b - b'0') {
            x = (x << 1) | u32::from(digit & 1);
            y = (y << 1) | u32::from(digit >> 1);
        }
        CellKey::new(self.zoom(), x, y)
    }

    pub fn parent(&self) -> Option<QuadKey> {
        (!self.0.is_empty()).then(|| QuadKey(self.0[..self.0.len() - 1].to_string()))
    }

    /// Truncates the key to `zoom` digits (no-op when already shallower).
    pub fn at_zoom(&self, zoom: u8) -> QuadKey {
        QuadKey(self.0.chars().take(zoom as usize).collect())
    }

    /// Bounds of the quad in lon/lat, computed through `projection`.
    pub fn compute_rect(&self, projection: &dyn MapProjection) -> Rect<f64> {
        let world = self.cell_key().world_rect();
        let a = projection.invert(world.min());
        let b = projection.invert(world.max());
        Rect::new(a, b)
    }
}

impl fmt::Display for QuadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0)
        }
    }
}
