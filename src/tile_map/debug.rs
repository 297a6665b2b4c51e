//! Instrumented pipeline stages. Each decorator forwards to the wrapped stage
//! and records timing and size per cell without touching control flow.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bevy::prelude::*;

use crate::canvas::{Async, Bitmap, Canvas};
use crate::ecs::SystemClock;
use crate::error::MapError;
use crate::geometry::CellKey;
use crate::multitasking::{BoxedTask, MicroTask, MicroTaskExt};
use crate::tile_map::fetcher::{TileData, TileFetcher};
use crate::tile_map::parser::{ParsedTile, TileDataParser};
use crate::tile_map::renderer::TileDataRenderer;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellStats {
    pub fetch_time: Option<Duration>,
    pub data_size: usize,
    pub parse_time: Option<Duration>,
    pub features: usize,
    pub render_time: Option<Duration>,
}

#[derive(Resource, Clone, Default)]
pub struct TileStatistics(Arc<Mutex<HashMap<CellKey, CellStats>>>);

impl TileStatistics {
    fn lock(&self) -> MutexGuard<'_, HashMap<CellKey, CellStats>> {
        // A panic while recording leaves plain counters behind, still readable.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn update(&self, key: CellKey, f: impl FnOnce(&mut CellStats)) {
        f(self.lock().entry(key).or_default());
    }

    pub fn get(&self, key: &CellKey) -> Option<CellStats> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, key: &CellKey) {
        self.lock().remove(key);
    }
}

pub struct DebugTileFetcher {
    pub inner: Arc<dyn TileFetcher>,
    pub stats: TileStatistics,
    pub clock: SystemClock,
}

impl TileFetcher for DebugTileFetcher {
    fn fetch(&self, key: &CellKey) -> Async<TileData> {
        let start = self.clock.now();
        let clock = self.clock.clone();
        let stats = self.stats.clone();
        let key = *key;
        self.inner.fetch(&key).on_result(move |result| {
            let elapsed = clock.since(start);
            let size = result.as_ref().map(TileData::len).unwrap_or(0);
            stats.update(key, |s| {
                s.fetch_time = Some(elapsed);
                s.data_size = size;
            });
        })
    }
}

/// Sums the time spent inside `resume` and reports it once the task finishes.
pub struct TimedTask<T: MicroTask> {
    task: T,
    clock: SystemClock,
    spent: Duration,
    on_finish: Option<Box<dyn FnOnce(Duration, &T::Output) + Send + Sync>>,
}

impl<T: MicroTask> TimedTask<T> {
    pub fn new(
        task: T,
        clock: SystemClock,
        on_finish: impl FnOnce(Duration, &T::Output) + Send + Sync + 'static,
    ) -> Self {
        Self {
            task,
            clock,
            spent: Duration::ZERO,
            on_finish: Some(Box::new(on_finish)),
        }
    }
}

impl<T: MicroTask> MicroTask for TimedTask<T> {
    type Output = T::Output;

    fn resume(&mut self) -> Result<(), MapError> {
        let start = self.clock.now();
        let result = self.task.resume();
        self.spent += self.clock.since(start);
        result?;
        if !self.task.alive() {
            if let (Some(report), Some(output)) = (self.on_finish.take(), self.task.get_result()) {
                report(self.spent, &output);
            }
        }
        Ok(())
    }

    fn alive(&self) -> bool {
        self.task.alive()
    }

    fn get_result(&self) -> Option<T::Output> {
        self.task.get_result()
    }
}

pub struct DebugTileParser {
    pub inner: Arc<dyn TileDataParser>,
    pub stats: TileStatistics,
    pub clock: SystemClock,
}

impl TileDataParser for DebugTileParser {
    fn parse(&self, key: &CellKey, data: TileData) -> BoxedTask<ParsedTile> {
        let stats = self.stats.clone();
        let key = *key;
        let task = self.inner.parse(&key, data);
        TimedTask::new(task, self.clock.clone(), move |spent, tile: &ParsedTile| {
            let features = tile.feature_count();
            stats.update(key, |s| {
                s.parse_time = Some(spent);
                s.features = features;
            });
        })
        .boxed()
    }
}

pub struct DebugTileRenderer {
    pub inner: Arc<dyn TileDataRenderer>,
    pub stats: TileStatistics,
    pub clock: SystemClock,
}

impl TileDataRenderer for DebugTileRenderer {
    fn render(
        &self,
        key: &CellKey,
        tile: ParsedTile,
        canvas: &Canvas,
        tile_size: u32,
    ) -> BoxedTask<Bitmap> {
        let stats = self.stats.clone();
        let key = *key;
        let task = self.inner.render(&key, tile, canvas, tile_size);
        TimedTask::new(task, self.clock.clone(), move |spent, _: &Bitmap| {
            stats.update(key, |s| s.render_time = Some(spent));
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::ManualTimeSource;
    use crate::tile_map::fetcher::MemoryTileFetcher;
    use crate::tile_map::parser::MvtTileParser;

    #[test]
    fn fetch_and_parse_are_recorded() {
        let source = Arc::new(ManualTimeSource::default());
        let clock = SystemClock(source.clone());
        let stats = TileStatistics::default();
        let key = CellKey::new(1, 1, 0);

        let fetcher = DebugTileFetcher {
            inner: Arc::new(MemoryTileFetcher::new().with_tile(key, TileData::Vector(Vec::new().into()))),
            stats: stats.clone(),
            clock: clock.clone(),
        };
        let mut response = fetcher.fetch(&key);
        source.advance(Duration::from_millis(7));
        let data = response.poll().unwrap().unwrap();

        let parser = DebugTileParser {
            inner: Arc::new(MvtTileParser),
            stats: stats.clone(),
            clock,
        };
        let mut task = parser.parse(&key, data);
        while task.alive() {
            task.resume().unwrap();
        }

        let cell = stats.get(&key).unwrap();
        assert_eq!(cell.fetch_time, Some(Duration::from_millis(7)));
        assert_eq!(cell.data_size, 0);
        assert_eq!(cell.parse_time, Some(Duration::ZERO));
        assert_eq!(cell.render_time, None);
    }

    #[test]
    fn failed_fetch_is_recorded_and_passed_on() {
        let stats = TileStatistics::default();
        let fetcher = DebugTileFetcher {
            inner: Arc::new(MemoryTileFetcher::new()),
            stats: stats.clone(),
            clock: SystemClock::default(),
        };
        let key = CellKey::new(4, 2, 2);
        assert!(fetcher.fetch(&key).poll().unwrap().is_err());
        assert_eq!(stats.get(&key).map(|s| s.data_size), Some(0));
    }
}
