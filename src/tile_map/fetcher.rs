use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::canvas::Async;
use crate::error::MapError;
use crate::geometry::CellKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileType {
    Raster,
    Vector,
}

/// Raw tile payload as delivered by a tile source.
#[derive(Debug, Clone, PartialEq)]
pub enum TileData {
    /// Mapbox vector tile bytes.
    Vector(Arc<[u8]>),
    /// PNG or JPEG bytes.
    Raster(Arc<[u8]>),
}

impl TileData {
    pub fn new(tile_type: TileType, bytes: Vec<u8>) -> Self {
        match tile_type {
            TileType::Raster => TileData::Raster(bytes.into()),
            TileType::Vector => TileData::Vector(bytes.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            TileData::Vector(bytes) | TileData::Raster(bytes) => bytes,
        }
    }
}

/// First stage of the tile pipeline. Fetches complete off the tick thread.
pub trait TileFetcher: Send + Sync {
    fn fetch(&self, key: &CellKey) -> Async<TileData>;
}

/// Serves tiles from memory. Unknown cells fail like a 404 would.
#[derive(Debug, Clone, Default)]
pub struct MemoryTileFetcher {
    tiles: HashMap<CellKey, TileData>,
    fallback: Option<TileData>,
}

impl MemoryTileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tile(mut self, key: CellKey, data: TileData) -> Self {
        self.tiles.insert(key, data);
        self
    }

    /// Served for every cell without its own entry.
    pub fn with_fallback(mut self, data: TileData) -> Self {
        self.fallback = Some(data);
        self
    }
}

impl TileFetcher for MemoryTileFetcher {
    fn fetch(&self, key: &CellKey) -> Async<TileData> {
        match self.tiles.get(key).or(self.fallback.as_ref()) {
            Some(data) => Async::ready(data.clone()),
            None => Async::failed(MapError::fetch(key, "no such tile")),
        }
    }
}
