use std::time::Duration;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::tile_map::TileStyle;

/// Engine settings, fixed for the lifetime of a map.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveMapConfig {
    /// Per-tick budget of the micro-task scheduler.
    pub computation_frame_time_ms: u64,
    /// Resumes per tick granted to geometry projection tasks.
    pub projection_quant: u32,
    /// Resumes per tick granted to tile parse and render tasks.
    pub tile_quantum: u32,
    pub tile_cache_limit: usize,
    pub fragment_cache_limit: usize,
    pub fragment_active_downloads_limit: usize,
    pub fragment_max_quad_zoom: u8,
    /// Edge length of a rendered tile in pixels.
    pub tile_size: u32,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub viewport_size: (u32, u32),
    pub initial_zoom: f64,
    /// lon/lat
    pub initial_center: (f64, f64),
    pub screen_precision_px: f64,
    pub debug_tile_stats: bool,
    pub perf_stats: bool,
    pub cache_dir: String,
    pub tile_style: TileStyle,
}

impl Default for LiveMapConfig {
    fn default() -> Self {
        Self {
            computation_frame_time_ms: 10,
            projection_quant: 1000,
            tile_quantum: 10,
            tile_cache_limit: 36,
            fragment_cache_limit: 40_000,
            fragment_active_downloads_limit: 40,
            fragment_max_quad_zoom: 10,
            tile_size: 256,
            min_zoom: 1,
            max_zoom: 15,
            viewport_size: (800, 600),
            initial_zoom: 1.0,
            initial_center: (0.0, 0.0),
            screen_precision_px: 1.0,
            debug_tile_stats: false,
            perf_stats: false,
            cache_dir: "cache".to_string(),
            tile_style: TileStyle::default(),
        }
    }
}

impl LiveMapConfig {
    pub fn computation_frame_time(&self) -> Duration {
        Duration::from_millis(self.computation_frame_time_ms)
    }
}
