//! Tile fetcher for XYZ web tile servers, with an on-disk cache.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bevy::log::{debug, warn};
use serde::{Deserialize, Serialize};
use ureq::Agent;

use crate::canvas::Async;
use crate::config::LiveMapConfig;
use crate::error::MapError;
use crate::geometry::CellKey;
use crate::tile_map::{TileData, TileFetcher, TileType};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const RATE_LIMIT_DELAY: Duration = Duration::from_secs(5);
const RATE_LIMIT_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileOrigin {
    pub enabled: bool,
    pub tile_type: TileType,
}

/// Fetches tiles from the first enabled origin on a worker thread. Downloaded
/// tiles are written to `{cache_dir}/{origin}/{z}_{x}_{y}.{png|pbf}` and served
/// from there afterwards.
#[derive(Clone)]
pub struct HttpTileFetcher {
    agent: Agent,
    cache_dir: PathBuf,
    origins: BTreeMap<String, TileOrigin>,
}

impl Default for HttpTileFetcher {
    fn default() -> Self {
        Self::new("cache")
    }
}

impl HttpTileFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let mut origins = BTreeMap::new();
        for (url, enabled, tile_type) in [
            ("https://tile.openstreetmap.org", false, TileType::Raster),
            ("https://mt1.google.com/vt/lyrs=y", true, TileType::Raster),
            ("https://mt1.google.com/vt/lyrs=m", false, TileType::Raster),
            ("https://mt1.google.com/vt/lyrs=s", false, TileType::Raster),
            ("https://tiles.openfreemap.org/planet/20250122_001001_pt", false, TileType::Vector),
        ] {
            origins.insert(url.to_string(), TileOrigin { enabled, tile_type });
        }
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        Self {
            agent,
            cache_dir: cache_dir.into(),
            origins,
        }
    }

    /// Caches tiles under the configured `cache_dir`.
    pub fn from_config(config: &LiveMapConfig) -> Self {
        Self::new(&config.cache_dir)
    }

    /// Adds `url` if unknown and makes it the only enabled origin.
    pub fn with_origin(mut self, url: &str, tile_type: TileType) -> Self {
        if !self.origins.contains_key(url) {
            self.add_origin(url, false, tile_type);
        }
        self.enable_only(url);
        self
    }

    pub fn add_origin(&mut self, url: &str, enabled: bool, tile_type: TileType) {
        self.origins
            .insert(url.to_string(), TileOrigin { enabled, tile_type });
    }

    pub fn enable(&mut self, url: &str) {
        if let Some(origin) = self.origins.get_mut(url) {
            origin.enabled = true;
        }
    }

    pub fn disable_all(&mut self) {
        for origin in self.origins.values_mut() {
            origin.enabled = false;
        }
    }

    pub fn enable_only(&mut self, url: &str) {
        self.disable_all();
        self.enable(url);
    }

    pub fn enabled_origin(&self) -> Option<(&str, TileType)> {
        self.origins
            .iter()
            .find(|(_, origin)| origin.enabled)
            .map(|(url, origin)| (url.as_str(), origin.tile_type))
    }

    pub fn origins(&self) -> &BTreeMap<String, TileOrigin> {
        &self.origins
    }

    pub fn cache_file(&self, origin: &str, tile_type: TileType, key: &CellKey) -> PathBuf {
        let folder: String = origin
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.cache_dir.join(folder).join(format!(
            "{}_{}_{}.{}",
            key.zoom,
            key.x,
            key.y,
            extension(tile_type)
        ))
    }
}

fn extension(tile_type: TileType) -> &'static str {
    match tile_type {
        TileType::Raster => "png",
        TileType::Vector => "pbf",
    }
}

pub fn tile_url(origin: &str, tile_type: TileType, key: &CellKey) -> String {
    if origin.contains("google") {
        format!("{origin}&x={}&y={}&z={}", key.x, key.y, key.zoom)
    } else {
        format!("{origin}/{}/{}/{}.{}", key.zoom, key.x, key.y, extension(tile_type))
    }
}

struct TileRequest {
    key: CellKey,
    url: String,
    cache_file: PathBuf,
    tile_type: TileType,
}

impl TileRequest {
    fn load(&self, agent: &Agent) -> Result<TileData, MapError> {
        if let Ok(bytes) = fs::read(&self.cache_file) {
            debug!("Tile {} served from {}", self.key, self.cache_file.display());
            return Ok(TileData::new(self.tile_type, bytes));
        }

        let mut retries = 0;
        loop {
            match agent.get(&self.url).call() {
                Ok(mut response) => {
                    let bytes = response
                        .body_mut()
                        .read_to_vec()
                        .map_err(|err| MapError::fetch(self.key, err))?;
                    self.store(&bytes);
                    return Ok(TileData::new(self.tile_type, bytes));
                }
                Err(ureq::Error::StatusCode(429)) if retries < RATE_LIMIT_RETRIES => {
                    retries += 1;
                    debug!("Rate limited on {}, retrying", self.url);
                    thread::sleep(RATE_LIMIT_DELAY);
                }
                Err(err) => return Err(MapError::fetch(self.key, err)),
            }
        }
    }

    fn store(&self, bytes: &[u8]) {
        let written = match self.cache_file.parent() {
            Some(dir) => fs::create_dir_all(dir).and_then(|_| fs::write(&self.cache_file, bytes)),
            None => fs::write(&self.cache_file, bytes),
        };
        if let Err(err) = written {
            warn!("Could not cache tile {}: {err}", self.key);
        }
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch(&self, key: &CellKey) -> Async<TileData> {
        let Some((origin, tile_type)) = self.enabled_origin() else {
            return Async::failed(MapError::fetch(key, "no tile origin enabled"));
        };
        let request = TileRequest {
            key: *key,
            url: tile_url(origin, tile_type, key),
            cache_file: self.cache_file(origin, tile_type, key),
            tile_type,
        };
        let agent = self.agent.clone();
        let (sender, response) = Async::channel();
        let spawned = thread::Builder::new()
            .name(format!("tile_{key}"))
            .spawn(move || sender.send(request.load(&agent)));
        started(key, spawned, response)
    }
}

fn started(key: &CellKey, spawned: io::Result<JoinHandle<()>>, response: Async<TileData>) -> Async<TileData> {
    match spawned {
        Ok(_) => response,
        Err(err) => Async::failed(MapError::fetch(key, format!("could not start the download: {err}"))),
    }
}
