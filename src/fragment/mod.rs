//! Region boundary streaming.
//!
//! A region's geometry is fetched in fragments, one per (region, quad, zoom
//! bucket). Fragments follow `Downloading → (obsolete | Streaming) →
//! ScreenGeometryPending → Cached`; a fragment whose quad left the viewport
//! while it was in flight is dropped on arrival without ever being cached.

pub mod border;
pub mod systems;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bevy::prelude::*;
use geo::{MultiLineString, MultiPolygon};

use crate::canvas::Async;
use crate::ecs::{report_tick_error, tick_alive, MapSystems, MapTick};
use crate::geometry::QuadKey;

pub use border::FilterBorderTask;
pub use systems::*;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentKey {
    pub region_id: String,
    pub quad_key: QuadKey,
    /// Geometry level of detail the fragment was requested for.
    pub zoom_bucket: u8,
}

impl FragmentKey {
    pub fn new(region_id: impl Into<String>, quad_key: QuadKey, zoom_bucket: u8) -> Self {
        Self {
            region_id: region_id.into(),
            quad_key,
            zoom_bucket,
        }
    }

    pub fn entity_name(&self) -> String {
        format!("fragment_{self}")
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.region_id, self.quad_key, self.zoom_bucket)
    }
}

/// Geometry per fragment, in lon/lat. Keys missing from a batch have no geometry.
pub type FragmentBatch = Vec<(FragmentKey, MultiPolygon<f64>)>;

pub trait FragmentProvider: Send + Sync {
    /// Geometry of every `region_ids` × `quads` fragment at `zoom_bucket`.
    fn fetch(&self, region_ids: &[String], quads: &[QuadKey], zoom_bucket: u8) -> Async<FragmentBatch>;
}

/// Serves fragments from memory, regardless of zoom bucket.
#[derive(Debug, Clone, Default)]
pub struct MemoryFragmentProvider {
    fragments: HashMap<(String, QuadKey), MultiPolygon<f64>>,
}

impl MemoryFragmentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fragment(mut self, region_id: &str, quad_key: QuadKey, geometry: MultiPolygon<f64>) -> Self {
        self.fragments.insert((region_id.to_string(), quad_key), geometry);
        self
    }
}

impl FragmentProvider for MemoryFragmentProvider {
    fn fetch(&self, region_ids: &[String], quads: &[QuadKey], zoom_bucket: u8) -> Async<FragmentBatch> {
        let mut batch = FragmentBatch::new();
        for region_id in region_ids {
            for quad in quads {
                if let Some(geometry) = self.fragments.get(&(region_id.clone(), quad.clone())) {
                    batch.push((FragmentKey::new(region_id.clone(), quad.clone(), zoom_bucket), geometry.clone()));
                }
            }
        }
        Async::ready(batch)
    }
}

#[derive(Resource, Clone)]
pub struct FragmentService {
    pub provider: Arc<dyn FragmentProvider>,
}

/// A region shown on the map, drawn from the fragments listed in `fragments`.
#[derive(Component, Debug, Clone, Default, PartialEq)]
pub struct RegionComponent {
    pub id: String,
    /// Cached fragments of the visible quads.
    pub fragments: Vec<Entity>,
}

impl RegionComponent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fragments: Vec::new(),
        }
    }
}

/// World geometry of a fragment beyond its polygons.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct FragmentComponent {
    pub key: FragmentKey,
    /// Quad rectangle the fragment was clipped to.
    pub clip_path: MultiPolygon<f64>,
    /// Boundary without the segments running along the clip rectangle.
    pub border: MultiLineString<f64>,
}

/// One in-flight provider request.
pub struct PendingFragments {
    pub keys: HashSet<FragmentKey>,
    pub response: Async<FragmentBatch>,
}

#[derive(Resource, Default)]
pub struct FragmentDownloads(pub Vec<PendingFragments>);

/// Fragment lifecycle bookkeeping. Caches hold entity handles only.
#[derive(Resource, Debug, Default)]
pub struct FragmentCaches {
    /// Keys that became needed this tick.
    pub requested: HashSet<FragmentKey>,
    /// Keys that stopped being needed this tick.
    pub obsolete: HashSet<FragmentKey>,
    /// Needed keys waiting for a download slot.
    pub queue: BTreeSet<FragmentKey>,
    pub downloading: HashSet<FragmentKey>,
    /// Geometry that arrived this tick.
    pub downloaded: HashMap<FragmentKey, MultiPolygon<f64>>,
    /// Fragments whose entity exists but has no screen geometry yet.
    pub streaming: HashMap<FragmentKey, Entity>,
    pub cached: HashMap<FragmentKey, Entity>,
    /// Keys that became available this tick.
    pub emitted: HashSet<FragmentKey>,
    /// Keys the provider has no geometry for.
    pub empty: HashSet<FragmentKey>,
    /// Keys whose download or projection failed, skipped until the viewport changes.
    pub failed: HashSet<FragmentKey>,
}

impl FragmentCaches {
    /// Keys anywhere between request and cache.
    pub fn is_in_flight(&self, key: &FragmentKey) -> bool {
        self.queue.contains(key) || self.downloading.contains(key) || self.streaming.contains_key(key)
    }

    pub fn is_known(&self, key: &FragmentKey) -> bool {
        self.is_in_flight(key)
            || self.cached.contains_key(key)
            || self.empty.contains(key)
            || self.failed.contains(key)
    }
}

pub struct FragmentPlugin {
    pub provider: Option<Arc<dyn FragmentProvider>>,
}

impl Plugin for FragmentPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FragmentCaches>()
            .init_resource::<FragmentDownloads>();
        if let Some(provider) = &self.provider {
            app.insert_resource(FragmentService {
                provider: provider.clone(),
            });
        }
        app.add_systems(
            MapTick,
            (
                fragment_update_system,
                fragment_downloading_system,
                fragment_emit_system.pipe(report_tick_error),
                region_emit_system,
                fragments_removing_system,
            )
                .chain()
                .run_if(resource_exists::<FragmentService>)
                .distributive_run_if(tick_alive)
                .in_set(MapSystems::Fragments),
        );
    }
}
