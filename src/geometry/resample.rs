//! Adaptive resampling of lon/lat geometry through a projection.
//!
//! Long segments bend under the Mercator projection. A segment is split at its
//! midpoint while the projected midpoint deviates from the straight projected
//! segment by more than the precision, up to a fixed recursion depth.

use std::sync::Arc;

use geo::{Coord, LineString, MultiLineString, MultiPolygon, Polygon};

use crate::error::MapError;
use crate::geometry::projection::MapProjection;
use crate::multitasking::MicroTask;

/// World units.
pub const RESAMPLING_PRECISION: f64 = 0.001;
const MAX_DEPTH: u32 = 9;

/// Geometry that can be handled as a flat list of rings and rebuilt afterwards.
pub trait Resamplable: Clone + Send + Sync + 'static {
    fn rings(&self) -> Vec<Vec<Coord<f64>>>;

    /// Rebuilds the same shape from transformed rings, in [`Resamplable::rings`] order.
    fn rebuild(&self, rings: Vec<Vec<Coord<f64>>>) -> Self;
}

impl Resamplable for LineString<f64> {
    fn rings(&self) -> Vec<Vec<Coord<f64>>> {
        vec![self.0.clone()]
    }

    fn rebuild(&self, rings: Vec<Vec<Coord<f64>>>) -> Self {
        LineString(rings.into_iter().next().unwrap_or_default())
    }
}

impl Resamplable for MultiLineString<f64> {
    fn rings(&self) -> Vec<Vec<Coord<f64>>> {
        self.0.iter().map(|line| line.0.clone()).collect()
    }

    fn rebuild(&self, rings: Vec<Vec<Coord<f64>>>) -> Self {
        MultiLineString(rings.into_iter().map(LineString).collect())
    }
}

impl Resamplable for MultiPolygon<f64> {
    fn rings(&self) -> Vec<Vec<Coord<f64>>> {
        let mut rings = Vec::new();
        for polygon in &self.0 {
            rings.push(polygon.exterior().0.clone());
            rings.extend(polygon.interiors().iter().map(|ring| ring.0.clone()));
        }
        rings
    }

    fn rebuild(&self, rings: Vec<Vec<Coord<f64>>>) -> Self {
        let mut rings = rings.into_iter();
        let polygons = self
            .0
            .iter()
            .map(|polygon| {
                let exterior = LineString(rings.next().unwrap_or_default());
                let interiors = polygon
                    .interiors()
                    .iter()
                    .map(|_| LineString(rings.next().unwrap_or_default()))
                    .collect();
                Polygon::new(exterior, interiors)
            })
            .collect();
        MultiPolygon(polygons)
    }
}

fn resample_segment(
    projection: &dyn MapProjection,
    precision: f64,
    (from, to): (Coord<f64>, Coord<f64>),
    (projected_from, projected_to): (Coord<f64>, Coord<f64>),
    depth: u32,
    out: &mut Vec<Coord<f64>>,
) {
    if depth < MAX_DEPTH {
        let middle = (from + to) / 2.0;
        let projected_middle = projection.project(middle);
        let straight = (projected_from + projected_to) / 2.0;
        let deviation = projected_middle - straight;
        if deviation.x.hypot(deviation.y) > precision {
            resample_segment(
                projection,
                precision,
                (from, middle),
                (projected_from, projected_middle),
                depth + 1,
                out,
            );
            resample_segment(
                projection,
                precision,
                (middle, to),
                (projected_middle, projected_to),
                depth + 1,
                out,
            );
            return;
        }
    }
    out.push(projected_to);
}

/// Projects and resamples a whole path at once.
pub fn resample_path(
    projection: &dyn MapProjection,
    precision: f64,
    path: &[Coord<f64>],
) -> Vec<Coord<f64>> {
    let mut out = Vec::with_capacity(path.len());
    let mut previous: Option<(Coord<f64>, Coord<f64>)> = None;
    for &point in path {
        let projected = projection.project(point);
        match previous {
            None => out.push(projected),
            Some((from, projected_from)) => resample_segment(
                projection,
                precision,
                (from, point),
                (projected_from, projected),
                0,
                &mut out,
            ),
        }
        previous = Some((point, projected));
    }
    out
}

/// Resampling as a micro-task: one input point per resume.
pub struct ResampleTask<G> {
    source: G,
    projection: Arc<dyn MapProjection>,
    precision: f64,
    rings: Vec<Vec<Coord<f64>>>,
    ring: usize,
    point: usize,
    previous: Option<(Coord<f64>, Coord<f64>)>,
    output: Vec<Vec<Coord<f64>>>,
    result: Option<G>,
}

impl<G: Resamplable> ResampleTask<G> {
    pub fn new(source: G, projection: Arc<dyn MapProjection>, precision: f64) -> Self {
        let rings = source.rings();
        let mut task = Self {
            source,
            projection,
            precision,
            output: Vec::with_capacity(rings.len()),
            rings,
            ring: 0,
            point: 0,
            previous: None,
            result: None,
        };
        task.skip_finished_rings();
        task
    }

    fn skip_finished_rings(&mut self) {
        while let Some(ring) = self.rings.get(self.ring) {
            if self.point < ring.len() {
                return;
            }
            if self.output.len() == self.ring {
                self.output.push(Vec::new());
            }
            self.ring += 1;
            self.point = 0;
            self.previous = None;
        }
        if self.result.is_none() {
            let rings = std::mem::take(&mut self.output);
            self.result = Some(self.source.rebuild(rings));
        }
    }
}

impl<G: Resamplable> MicroTask for ResampleTask<G> {
    type Output = G;

    fn resume(&mut self) -> Result<(), MapError> {
        let Some(&point) = self.rings.get(self.ring).and_then(|ring| ring.get(self.point)) else {
            return Ok(());
        };
        if self.output.len() == self.ring {
            self.output.push(Vec::new());
        }
        let out = &mut self.output[self.ring];
        let projected = self.projection.project(point);
        match self.previous {
            None => out.push(projected),
            Some((from, projected_from)) => resample_segment(
                self.projection.as_ref(),
                self.precision,
                (from, point),
                (projected_from, projected),
                0,
                out,
            ),
        }
        self.previous = Some((point, projected));
        self.point += 1;
        self.skip_finished_rings();
        Ok(())
    }

    fn alive(&self) -> bool {
        self.result.is_none()
    }

    fn get_result(&self) -> Option<G> {
        self.result.clone()
    }
}
