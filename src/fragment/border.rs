use geo::{Coord, LineString, MultiLineString, MultiPolygon, Rect};

use crate::error::MapError;
use crate::geometry::Resamplable;
use crate::multitasking::MicroTask;

const BORDER_EPSILON: f64 = 1e-9;

fn is_on_border(p: Coord<f64>, rect: &Rect<f64>) -> bool {
    let near = |a: f64, b: f64| (a - b).abs() <= BORDER_EPSILON;
    near(p.x, rect.min().x) || near(p.x, rect.max().x) || near(p.y, rect.min().y) || near(p.y, rect.max().y)
}

/// Extracts the visible boundary of a clipped fragment: the parts of its rings
/// that do not run along the clip rectangle. One point per resume.
pub struct FilterBorderTask {
    rings: Vec<Vec<Coord<f64>>>,
    clip: Rect<f64>,
    ring: usize,
    point: usize,
    line: Vec<Coord<f64>>,
    lines: Vec<LineString<f64>>,
    previous: Option<Coord<f64>>,
    previous_visible: bool,
    result: Option<MultiLineString<f64>>,
}

impl FilterBorderTask {
    pub fn new(geometry: &MultiPolygon<f64>, clip: Rect<f64>) -> Self {
        Self {
            rings: geometry.rings(),
            clip,
            ring: 0,
            point: 0,
            line: Vec::new(),
            lines: Vec::new(),
            previous: None,
            previous_visible: false,
            result: None,
        }
    }

    fn flush_line(&mut self) {
        if !self.line.is_empty() {
            self.lines.push(LineString(std::mem::take(&mut self.line)));
        }
    }
}

impl MicroTask for FilterBorderTask {
    type Output = MultiLineString<f64>;

    fn resume(&mut self) -> Result<(), MapError> {
        if self.result.is_some() {
            return Ok(());
        }
        loop {
            let Some(ring) = self.rings.get(self.ring) else {
                self.result = Some(MultiLineString(std::mem::take(&mut self.lines)));
                return Ok(());
            };
            if self.point < ring.len() {
                break;
            }
            self.flush_line();
            self.previous = None;
            self.previous_visible = false;
            self.ring += 1;
            self.point = 0;
        }

        let current = self.rings[self.ring][self.point];
        self.point += 1;
        if is_on_border(current, &self.clip) {
            if self.previous_visible {
                self.line.push(current);
                self.flush_line();
            }
            self.previous = Some(current);
            self.previous_visible = false;
        } else {
            if !self.previous_visible {
                if let Some(previous) = self.previous {
                    self.line.push(previous);
                }
            }
            self.line.push(current);
            self.previous_visible = true;
        }
        Ok(())
    }

    fn alive(&self) -> bool {
        self.result.is_none()
    }

    fn get_result(&self) -> Option<MultiLineString<f64>> {
        self.result.clone()
    }
}
