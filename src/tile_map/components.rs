use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bevy::prelude::*;

use crate::canvas::{Async, Bitmap};
use crate::geometry::CellKey;
use crate::tile_map::fetcher::{TileData, TileFetcher};
use crate::tile_map::parser::{ParsedTile, TileDataParser};
use crate::tile_map::renderer::TileDataRenderer;

#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellComponent(pub CellKey);

/// Where a cell is in the pipeline.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStage {
    Fetching,
    Parsing,
    Parsed,
    Rendering,
    Ready,
}

#[derive(Component)]
pub struct TileResponseComponent(pub Async<TileData>);

#[derive(Component, Clone)]
pub struct ParsedTileComponent(pub ParsedTile);

#[derive(Debug, Clone, PartialEq)]
pub enum Tile {
    Empty,
    /// Fully rendered tile of this cell.
    Snapshot(Bitmap),
    /// Region of an ancestor tile shown until the cell's own tile is ready.
    SubTile { donor: CellKey, bitmap: Bitmap },
}

#[derive(Component, Debug, Clone, PartialEq)]
pub struct TileComponent(pub Tile);

pub use crate::layers::HiddenComponent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedCell {
    pub entity: Entity,
    /// Tick the cell was last visible.
    pub last_visible: u64,
}

/// Cell lifecycle bookkeeping. A key is never both streaming and cached.
#[derive(Resource, Debug, Default)]
pub struct CellState {
    pub streaming: HashMap<CellKey, Entity>,
    pub cached: HashMap<CellKey, CachedCell>,
    /// Cells whose fetch or tasks failed, not requested again until the viewport changes.
    pub failed: HashSet<CellKey>,
}

impl CellState {
    pub fn is_known(&self, key: &CellKey) -> bool {
        self.streaming.contains_key(key) || self.cached.contains_key(key)
    }

    pub fn should_request(&self, key: &CellKey) -> bool {
        !self.is_known(key) && !self.failed.contains(key)
    }

    pub fn entity(&self, key: &CellKey) -> Option<Entity> {
        self.streaming
            .get(key)
            .copied()
            .or_else(|| self.cached.get(key).map(|c| c.entity))
    }
}

/// Fired when a cell leaves the pipeline before reaching `Ready`.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellDiscarded {
    pub key: CellKey,
    pub stage: CellStage,
}

/// The three pipeline stages used by the tile systems.
#[derive(Resource, Clone)]
pub struct TileService {
    pub fetcher: Arc<dyn TileFetcher>,
    pub parser: Arc<dyn TileDataParser>,
    pub renderer: Arc<dyn TileDataRenderer>,
}
