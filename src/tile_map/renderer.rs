use std::sync::Arc;

use geo::{Coord, Geometry, LineString};
use serde::{Deserialize, Serialize};

use crate::canvas::{Async, Bitmap, Canvas, Color, DrawSurface};
use crate::error::MapError;
use crate::geometry::CellKey;
use crate::multitasking::{BoxedTask, MicroTask, MicroTaskExt};
use crate::tile_map::parser::{ParsedTile, TileLayer, MVT_EXTENT};

/// How features of the layers matching `layer` are drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerRule {
    /// Matches layer names containing this text; exact match wins over substring.
    pub layer: String,
    pub fill: Option<Color>,
    pub stroke: Option<Color>,
    /// Pixels.
    pub line_width: f64,
    pub alpha: f64,
}

impl LayerRule {
    pub fn fill(layer: &str, color: Color, alpha: f64) -> Self {
        Self {
            layer: layer.to_string(),
            fill: Some(color),
            stroke: None,
            line_width: 1.0,
            alpha,
        }
    }

    pub fn stroke(layer: &str, color: Color, line_width: f64) -> Self {
        Self {
            layer: layer.to_string(),
            fill: None,
            stroke: Some(color),
            line_width,
            alpha: 1.0,
        }
    }

    /// Rule that draws nothing.
    pub fn hidden(layer: &str) -> Self {
        Self {
            layer: layer.to_string(),
            fill: None,
            stroke: None,
            line_width: 0.0,
            alpha: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileStyle {
    pub background: Color,
    pub rules: Vec<LayerRule>,
    /// Applied to layers no rule matches.
    pub default_rule: Option<LayerRule>,
    /// Point features are only drawn from this zoom on.
    pub min_point_zoom: u8,
}

impl Default for TileStyle {
    fn default() -> Self {
        Self {
            background: Color::rgb(0x20, 0x22, 0x25),
            rules: vec![
                LayerRule::fill("building", Color::WHITE, 0.5),
                LayerRule::fill("park", Color::rgb(0x00, 0xff, 0x00), 0.5),
                LayerRule::fill("water", Color::rgb(0x00, 0x00, 0xff), 0.5),
                LayerRule::hidden("mountain"),
                LayerRule::hidden("land"),
            ],
            default_rule: Some(LayerRule::stroke("", Color::WHITE, 1.0)),
            min_point_zoom: 15,
        }
    }
}

impl TileStyle {
    pub fn rule_for(&self, layer: &str) -> Option<&LayerRule> {
        self.rules
            .iter()
            .find(|rule| rule.layer == layer)
            .or_else(|| self.rules.iter().find(|rule| layer.contains(rule.layer.as_str())))
            .or(self.default_rule.as_ref())
    }
}

/// Last stage of the tile pipeline: draws a parsed tile and captures a snapshot.
pub trait TileDataRenderer: Send + Sync {
    fn render(
        &self,
        key: &CellKey,
        tile: ParsedTile,
        canvas: &Canvas,
        tile_size: u32,
    ) -> BoxedTask<Bitmap>;
}

#[derive(Debug, Clone, Default)]
pub struct SymbolizingTileRenderer {
    pub style: Arc<TileStyle>,
}

impl SymbolizingTileRenderer {
    pub fn new(style: TileStyle) -> Self {
        Self {
            style: Arc::new(style),
        }
    }
}

impl TileDataRenderer for SymbolizingTileRenderer {
    fn render(
        &self,
        key: &CellKey,
        tile: ParsedTile,
        canvas: &Canvas,
        tile_size: u32,
    ) -> BoxedTask<Bitmap> {
        let mut surface = canvas.create_surface(tile_size, tile_size);
        surface.clear(self.style.background);
        TileRenderTask {
            key: *key,
            style: self.style.clone(),
            surface,
            tile,
            tile_size,
            next_layer: 0,
            snapshot: None,
            result: None,
        }
        .boxed()
    }
}

/// Draws one layer per resume, then waits for the surface snapshot.
pub struct TileRenderTask {
    key: CellKey,
    style: Arc<TileStyle>,
    surface: Box<dyn DrawSurface>,
    tile: ParsedTile,
    tile_size: u32,
    next_layer: usize,
    snapshot: Option<Async<Bitmap>>,
    result: Option<Bitmap>,
}

impl TileRenderTask {
    fn draw_layer(&mut self, layer: &TileLayer) {
        let Some(rule) = self.style.rule_for(&layer.name) else {
            return;
        };
        if rule.fill.is_none() && rule.stroke.is_none() {
            return;
        }
        let scale = f64::from(self.tile_size) / f64::from(MVT_EXTENT);
        let draw_points = self.key.zoom >= self.style.min_point_zoom;
        let surface = self.surface.as_mut();

        surface.save();
        surface.scale(scale, scale);
        surface.set_global_alpha(rule.alpha);
        surface.set_line_width(rule.line_width / scale);
        for feature in &layer.features {
            surface.begin_path();
            if !trace_geometry(surface, feature, draw_points, 1.0 / scale) {
                continue;
            }
            if let Some(fill) = rule.fill {
                surface.set_fill_style(fill);
                surface.fill();
            }
            if let Some(stroke) = rule.stroke {
                surface.set_stroke_style(stroke);
                surface.stroke();
            }
        }
        surface.restore();
    }
}

fn to_f64(c: Coord<f32>) -> (f64, f64) {
    (f64::from(c.x), f64::from(c.y))
}

fn trace_line(surface: &mut dyn DrawSurface, line: &LineString<f32>, close: bool) {
    for (i, &point) in line.0.iter().enumerate() {
        let (x, y) = to_f64(point);
        if i == 0 {
            surface.move_to(x, y);
        } else {
            surface.line_to(x, y);
        }
    }
    if close {
        surface.close_path();
    }
}

fn trace_point(surface: &mut dyn DrawSurface, point: Coord<f32>, size: f64) {
    let (x, y) = to_f64(point);
    surface.move_to(x, y);
    surface.line_to(x + size, y);
    surface.line_to(x + size, y + size);
    surface.line_to(x, y + size);
    surface.close_path();
}

/// Adds the geometry to the current path. Returns false when nothing was added.
fn trace_geometry(surface: &mut dyn DrawSurface, geometry: &Geometry<f32>, points: bool, point_size: f64) -> bool {
    match geometry {
        Geometry::Point(point) if points => trace_point(surface, point.0, point_size),
        Geometry::MultiPoint(multi_point) if points => {
            for point in multi_point {
                trace_point(surface, point.0, point_size);
            }
        }
        Geometry::Line(line) => {
            let (x0, y0) = to_f64(line.start);
            let (x1, y1) = to_f64(line.end);
            surface.move_to(x0, y0);
            surface.line_to(x1, y1);
        }
        Geometry::LineString(line_string) => trace_line(surface, line_string, false),
        Geometry::MultiLineString(multi_line_string) => {
            for line_string in multi_line_string {
                trace_line(surface, line_string, false);
            }
        }
        Geometry::Polygon(polygon) => {
            trace_line(surface, polygon.exterior(), true);
            for interior in polygon.interiors() {
                trace_line(surface, interior, true);
            }
        }
        Geometry::MultiPolygon(multi_polygon) => {
            for polygon in multi_polygon {
                trace_line(surface, polygon.exterior(), true);
                for interior in polygon.interiors() {
                    trace_line(surface, interior, true);
                }
            }
        }
        Geometry::Rect(rect) => trace_line(surface, rect.to_polygon().exterior(), true),
        Geometry::Triangle(triangle) => trace_line(surface, triangle.to_polygon().exterior(), true),
        Geometry::GeometryCollection(collection) => {
            let mut traced = false;
            for geometry in collection {
                traced |= trace_geometry(surface, geometry, points, point_size);
            }
            return traced;
        }
        _ => return false,
    }
    true
}

impl MicroTask for TileRenderTask {
    type Output = Bitmap;

    fn resume(&mut self) -> Result<(), MapError> {
        if self.result.is_some() {
            return Ok(());
        }
        if let Some(snapshot) = &mut self.snapshot {
            if let Some(result) = snapshot.poll() {
                self.result = Some(result.map_err(|e| MapError::Render {
                    key: self.key,
                    reason: e.to_string(),
                })?);
            }
            return Ok(());
        }

        match self.tile.clone() {
            ParsedTile::Vector(layers) => {
                if let Some(layer) = layers.get(self.next_layer) {
                    self.draw_layer(layer);
                    self.next_layer += 1;
                    return Ok(());
                }
            }
            ParsedTile::Raster(bitmap) => {
                let size = f64::from(self.tile_size);
                self.surface.draw_bitmap(&bitmap, 0.0, 0.0, size, size);
            }
        }
        self.snapshot = Some(self.surface.snapshot());
        Ok(())
    }

    fn alive(&self) -> bool {
        self.result.is_none()
    }

    fn get_result(&self) -> Option<Bitmap> {
        self.result.clone()
    }
}

#[cfg(test)]
mod tests {
    use geo::{polygon, Polygon};

    use super::*;

    fn render(tile: ParsedTile, zoom: u8) -> (Bitmap, usize) {
        let renderer = SymbolizingTileRenderer::new(TileStyle {
            background: Color::BLACK,
            ..TileStyle::default()
        });
        let mut task = renderer.render(&CellKey::new(zoom, 0, 0), tile, &Canvas::default(), 16);
        let mut resumes = 0;
        while task.alive() {
            task.resume().unwrap();
            resumes += 1;
        }
        (task.get_result().unwrap(), resumes)
    }

    #[test]
    fn rule_lookup_prefers_exact_names() {
        let style = TileStyle::default();
        assert_eq!(style.rule_for("water").and_then(|r| r.fill), Some(Color::rgb(0, 0, 0xff)));
        assert_eq!(style.rule_for("waterway").and_then(|r| r.fill), Some(Color::rgb(0, 0, 0xff)));
        assert_eq!(style.rule_for("transportation").and_then(|r| r.stroke), Some(Color::WHITE));
        assert_eq!(style.rule_for("landcover").map(|r| r.fill.is_none() && r.stroke.is_none()), Some(true));
    }

    #[test]
    fn vector_layers_take_one_resume_each() {
        let square: Polygon<f32> = polygon![
            (x: 0.0, y: 0.0),
            (x: 4096.0, y: 0.0),
            (x: 4096.0, y: 4096.0),
            (x: 0.0, y: 4096.0),
        ];
        let layers = vec![
            TileLayer {
                name: "building".into(),
                features: vec![Geometry::Polygon(square)],
            },
            TileLayer {
                name: "land".into(),
                features: Vec::new(),
            },
        ];
        // Two layers, one snapshot request, one snapshot poll.
        let (bitmap, resumes) = render(ParsedTile::Vector(Arc::new(layers)), 10);
        assert_eq!(resumes, 4);
        let center = bitmap.pixel(8, 8).unwrap();
        assert!(center.r > 100 && center.r == center.g, "{center:?}");
    }

    #[test]
    fn raster_tiles_are_scaled_to_tile_size() {
        let (bitmap, _) = render(ParsedTile::Raster(Bitmap::filled(4, 4, Color::rgb(255, 0, 0))), 3);
        assert_eq!((bitmap.width, bitmap.height), (16, 16));
        assert!(bitmap.pixel(8, 8).unwrap().r > 240);
    }
}
