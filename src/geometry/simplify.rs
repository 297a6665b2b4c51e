use geo::{Coord, LineString, SimplifyIdx};

use crate::error::MapError;
use crate::geometry::resample::Resamplable;
use crate::multitasking::MicroTask;

/// Ramer-Douglas-Peucker with `precision` as the distance tolerance.
/// The first and the last point always survive, so a ring of two or more points
/// never shrinks below two.
pub fn simplify_ring(points: &[Coord<f64>], precision: f64) -> Vec<Coord<f64>> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let kept = LineString::from(points.to_vec()).simplify_idx(&precision);
    kept.into_iter().filter_map(|i| points.get(i).copied()).collect()
}

/// Converts world geometry into client pixels relative to `origin` at `zoom`
/// and simplifies it, one ring per resume.
pub struct SimplifyTask<G> {
    source: G,
    rings: Vec<Vec<Coord<f64>>>,
    origin: Coord<f64>,
    scale: f64,
    precision: f64,
    output: Vec<Vec<Coord<f64>>>,
    result: Option<G>,
}

impl<G: Resamplable> SimplifyTask<G> {
    pub fn new(source: G, origin: Coord<f64>, zoom: u8, precision_px: f64) -> Self {
        let rings = source.rings();
        let mut task = Self {
            source,
            output: Vec::with_capacity(rings.len()),
            rings,
            origin,
            scale: f64::from(1u32 << zoom),
            precision: precision_px,
            result: None,
        };
        task.finish_if_done();
        task
    }

    fn finish_if_done(&mut self) {
        if self.output.len() == self.rings.len() && self.result.is_none() {
            let rings = std::mem::take(&mut self.output);
            self.result = Some(self.source.rebuild(rings));
        }
    }
}

impl<G: Resamplable> MicroTask for SimplifyTask<G> {
    type Output = G;

    fn resume(&mut self) -> Result<(), MapError> {
        if let Some(ring) = self.rings.get(self.output.len()) {
            let client: Vec<Coord<f64>> = ring
                .iter()
                .map(|&p| (p - self.origin) * self.scale)
                .collect();
            self.output.push(simplify_ring(&client, self.precision));
        }
        self.finish_if_done();
        Ok(())
    }

    fn alive(&self) -> bool {
        self.result.is_none()
    }

    fn get_result(&self) -> Option<G> {
        self.result.clone()
    }
}
