//! Basemap tiles: one entity per visible cell, moved through
//! fetch → parse → render by the loading systems.

pub mod components;
pub mod debug;
pub mod fetcher;
pub mod loading;
pub mod parser;
pub mod renderer;

use std::sync::Arc;

use bevy::prelude::*;

use crate::config::LiveMapConfig;
use crate::ecs::{tick_alive, MapSystems, MapTick, SystemClock};

pub use components::{
    CachedCell, CellComponent, CellDiscarded, CellStage, CellState, HiddenComponent,
    ParsedTileComponent, Tile, TileComponent, TileResponseComponent, TileService,
};
pub use debug::{CellStats, DebugTileFetcher, DebugTileParser, DebugTileRenderer, TileStatistics};
pub use fetcher::{MemoryTileFetcher, TileData, TileFetcher, TileType};
pub use loading::*;
pub use parser::{MvtTileParser, ParsedTile, TileDataParser, TileLayer};
pub use renderer::{LayerRule, SymbolizingTileRenderer, TileDataRenderer, TileStyle};

/// Registers the tile pipeline. Without a fetcher the pipeline stays idle until
/// a [`TileService`] is inserted.
#[derive(Default)]
pub struct TileMapPlugin {
    pub fetcher: Option<Arc<dyn TileFetcher>>,
}

impl TileMapPlugin {
    fn service(&self, app: &App, fetcher: Arc<dyn TileFetcher>) -> TileService {
        let config = app
            .world()
            .get_resource::<LiveMapConfig>()
            .cloned()
            .unwrap_or_default();
        let parser: Arc<dyn TileDataParser> = Arc::new(MvtTileParser);
        let renderer: Arc<dyn TileDataRenderer> =
            Arc::new(SymbolizingTileRenderer::new(config.tile_style.clone()));
        if !config.debug_tile_stats {
            return TileService {
                fetcher,
                parser,
                renderer,
            };
        }

        let stats = app
            .world()
            .get_resource::<TileStatistics>()
            .cloned()
            .unwrap_or_default();
        let clock = app
            .world()
            .get_resource::<SystemClock>()
            .cloned()
            .unwrap_or_default();
        TileService {
            fetcher: Arc::new(DebugTileFetcher {
                inner: fetcher,
                stats: stats.clone(),
                clock: clock.clone(),
            }),
            parser: Arc::new(DebugTileParser {
                inner: parser,
                stats: stats.clone(),
                clock: clock.clone(),
            }),
            renderer: Arc::new(DebugTileRenderer {
                inner: renderer,
                stats,
                clock,
            }),
        }
    }
}

impl Plugin for TileMapPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<CellState>()
            .init_resource::<TileStatistics>()
            .add_event::<CellDiscarded>();
        if let Some(fetcher) = &self.fetcher {
            let service = self.service(app, fetcher.clone());
            app.insert_resource(service);
        }
        app.add_systems(
            MapTick,
            (
                tile_failure_system,
                cell_visibility_system,
                cell_request_system,
                tile_response_system,
                tile_render_stage_system,
                tile_snapshot_system,
                cell_cache_removing_system,
            )
                .chain()
                .run_if(resource_exists::<TileService>)
                .distributive_run_if(tick_alive)
                .in_set(MapSystems::Basemap),
        );
    }
}
