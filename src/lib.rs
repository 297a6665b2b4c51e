//! A live map engine for the Bevy ECS.
//!
//! The map is a set of entities driven by a fixed schedule, [`MapTick`]: basemap
//! tiles streamed per visible cell, region boundaries streamed in fragments per
//! visible quad, and chart layers on top. Expensive geometry work runs as
//! cooperative micro-tasks under a per-tick time budget, and the layers are
//! composited into a [`RenderedFrame`] bitmap the host can present.

#[cfg(feature = "http")]
pub mod api;
pub mod camera;
pub mod canvas;
pub mod chart;
pub mod config;
pub mod diagnostics;
pub mod ecs;
pub mod error;
pub mod fragment;
pub mod geometry;
pub mod layers;
pub mod multitasking;
pub mod placement;
pub mod tile_map;
pub mod viewport;

use std::sync::Arc;

use bevy::prelude::*;

use crate::camera::{CameraConfig, CameraSystemPlugin};
use crate::chart::{hover_search_system, HoverObjects, PointerInput};
use crate::diagnostics::DiagnosticsPlugin;
use crate::ecs::{report_tick_error, tick_alive, TickRunnerPlugin};
use crate::layers::{layer_dirty_tracking_system, layers_rendering_system, spawn_layer};
use crate::multitasking::{scheduler_system, SchedulerStats};
use crate::placement::{screen_geometry_system, world_to_screen_update_system};

#[cfg(feature = "http")]
pub use api::HttpTileFetcher;
pub use camera::CameraInput;
pub use canvas::{Async, Bitmap, Canvas, Color};
pub use chart::{ChartElementComponent, HoverObject, LayerBuilder};
pub use config::LiveMapConfig;
pub use diagnostics::{LiveMapDiagnostics, LoadingState};
pub use ecs::{ManualTimeSource, MapSystems, MapTick, SystemClock, TickState, TimeSource};
pub use error::{ErrorChannel, MapError};
pub use fragment::{FragmentPlugin, FragmentProvider, MemoryFragmentProvider, RegionComponent};
pub use geometry::{CellKey, MapProjection, MercatorProjection, Projection, QuadKey};
pub use layers::{MapLayers, RenderedFrame};
pub use tile_map::{MemoryTileFetcher, TileData, TileFetcher, TileMapPlugin, TileType};
pub use viewport::{Viewport, ViewportGrid};

/// Everything needed to run a map: schedule, camera, tile and fragment
/// pipelines, micro-task scheduler and layer compositing.
pub struct LiveMapPlugin {
    pub config: LiveMapConfig,
    pub tile_fetcher: Option<Arc<dyn TileFetcher>>,
    pub fragment_provider: Option<Arc<dyn FragmentProvider>>,
    pub clock: Option<SystemClock>,
}

impl LiveMapPlugin {
    pub fn new(config: LiveMapConfig) -> Self {
        Self {
            config,
            tile_fetcher: None,
            fragment_provider: None,
            clock: None,
        }
    }

    pub fn with_tiles(mut self, fetcher: impl TileFetcher + 'static) -> Self {
        self.tile_fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn with_fragments(mut self, provider: impl FragmentProvider + 'static) -> Self {
        self.fragment_provider = Some(Arc::new(provider));
        self
    }

    /// Replaces the wall clock, e.g. with a [`ManualTimeSource`].
    pub fn with_clock(mut self, source: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(SystemClock(source));
        self
    }
}

impl Plugin for LiveMapPlugin {
    fn build(&self, app: &mut App) {
        if let Some(clock) = &self.clock {
            app.insert_resource(clock.clone());
        }
        app.insert_resource(self.config.clone())
            .insert_resource(Viewport::from_config(&self.config))
            .init_resource::<Canvas>()
            .init_resource::<Projection>()
            .init_resource::<SchedulerStats>()
            .init_resource::<RenderedFrame>()
            .init_resource::<HoverObjects>()
            .add_event::<PointerInput>()
            .add_plugins(TickRunnerPlugin)
            .add_plugins(CameraSystemPlugin::new(CameraConfig {
                min_zoom: f64::from(self.config.min_zoom),
                max_zoom: f64::from(self.config.max_zoom),
                ..default()
            }));

        let basemap = spawn_layer(app.world_mut(), "basemap", 0);
        let fragments = spawn_layer(app.world_mut(), "fragments", 1);
        app.insert_resource(MapLayers { basemap, fragments });

        app.add_plugins(TileMapPlugin {
            fetcher: self.tile_fetcher.clone(),
        })
        .add_plugins(FragmentPlugin {
            provider: self.fragment_provider.clone(),
        })
        .add_plugins(DiagnosticsPlugin)
        .add_systems(
            MapTick,
            hover_search_system
                .run_if(tick_alive)
                .in_set(MapSystems::Input),
        )
        .add_systems(
            MapTick,
            scheduler_system
                .run_if(tick_alive)
                .in_set(MapSystems::Scheduler),
        )
        .add_systems(
            MapTick,
            (world_to_screen_update_system, screen_geometry_system)
                .distributive_run_if(tick_alive)
                .in_set(MapSystems::Placement),
        )
        .add_systems(
            MapTick,
            (
                layer_dirty_tracking_system,
                layers_rendering_system.pipe(report_tick_error),
            )
                .chain()
                .distributive_run_if(tick_alive)
                .in_set(MapSystems::Rendering),
        );
        info!(
            "Live map ready: {}x{} px at zoom {}",
            self.config.viewport_size.0, self.config.viewport_size.1, self.config.initial_zoom
        );
    }
}
