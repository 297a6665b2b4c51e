use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use bevy::math::DVec2;
use bevy::prelude::*;
use geo::{Coord, MultiLineString, MultiPolygon, Rect};

use crate::chart::{LocatorComponent, RegionLocator, RegionRenderer, RegionStyleComponent, RendererComponent};
use crate::config::LiveMapConfig;
use crate::error::{ErrorChannel, MapError};
use crate::fragment::{
    FilterBorderTask, FragmentCaches, FragmentComponent, FragmentDownloads, FragmentKey,
    FragmentService, PendingFragments, RegionComponent,
};
use crate::geometry::{bbox_or_origin, MapProjection, Projection, ResampleTask, RESAMPLING_PRECISION};
use crate::layers::{MapLayers, ParentLayerComponent};
use crate::multitasking::{
    constant, pair, BoxedTask, MicroTaskExt, MicroTaskFailed, MicroThreadComponent, WorldUpdate,
};
use crate::placement::{ScreenGeometryComponent, WorldDimension, WorldGeometryComponent, WorldOrigin};
use crate::viewport::ViewportGrid;

/// Share of the clip rectangle added on every side before border filtering.
const CLIP_INFLATION: f64 = 0.125;

fn despawn(commands: &mut Commands, entity: Entity) {
    if let Ok(mut target) = commands.get_entity(entity) {
        target.despawn();
    }
}

/// Diffs the fragments needed by the viewport against what is known: new keys
/// are queued, keys no longer needed are dropped from every cache.
pub fn fragment_update_system(
    mut commands: Commands,
    grid: Res<ViewportGrid>,
    regions: Query<&RegionComponent>,
    mut caches: ResMut<FragmentCaches>,
) {
    if grid.is_changed() && !caches.failed.is_empty() {
        debug!("Viewport changed, {} failed fragments may be requested again", caches.failed.len());
        caches.failed.clear();
    }
    let mut needed = HashSet::new();
    for region in &regions {
        for quad in &grid.visible_quads {
            needed.insert(FragmentKey::new(region.id.clone(), quad.clone(), grid.zoom_bucket));
        }
    }

    let requested: HashSet<FragmentKey> = needed
        .iter()
        .filter(|key| !caches.is_known(key))
        .cloned()
        .collect();
    let obsolete: HashSet<FragmentKey> = caches
        .cached
        .keys()
        .chain(caches.streaming.keys())
        .chain(caches.queue.iter())
        .filter(|key| !needed.contains(*key))
        .cloned()
        .collect();

    for key in &obsolete {
        caches.queue.remove(key);
        if let Some(entity) = caches.streaming.remove(key) {
            despawn(&mut commands, entity);
        }
        if let Some(entity) = caches.cached.remove(key) {
            despawn(&mut commands, entity);
        }
    }
    if !requested.is_empty() || !obsolete.is_empty() {
        debug!("Fragments: {} requested, {} obsolete", requested.len(), obsolete.len());
    }
    caches.queue.extend(requested.iter().cloned());
    caches.requested = requested;
    caches.obsolete = obsolete;
}

/// Keeps up to `fragment_active_downloads_limit` keys in flight and collects
/// the responses into `downloaded`.
pub fn fragment_downloading_system(
    mut caches: ResMut<FragmentCaches>,
    mut downloads: ResMut<FragmentDownloads>,
    service: Res<FragmentService>,
    config: Res<LiveMapConfig>,
    errors: Res<ErrorChannel>,
) {
    let free = config
        .fragment_active_downloads_limit
        .saturating_sub(caches.downloading.len());
    let starting: Vec<FragmentKey> = caches.queue.iter().take(free).cloned().collect();

    let mut by_zoom: BTreeMap<u8, Vec<FragmentKey>> = BTreeMap::new();
    for key in starting {
        caches.queue.remove(&key);
        caches.downloading.insert(key.clone());
        by_zoom.entry(key.zoom_bucket).or_default().push(key);
    }
    for (zoom_bucket, keys) in by_zoom {
        let regions: Vec<String> = keys
            .iter()
            .map(|k| k.region_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let quads: Vec<_> = keys
            .iter()
            .map(|k| k.quad_key.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        downloads.0.push(PendingFragments {
            keys: keys.into_iter().collect(),
            response: service.provider.fetch(&regions, &quads, zoom_bucket),
        });
    }

    for mut pending in std::mem::take(&mut downloads.0) {
        match pending.response.poll() {
            None => downloads.0.push(pending),
            Some(Ok(batch)) => {
                let mut geometries: HashMap<FragmentKey, MultiPolygon<f64>> = batch
                    .into_iter()
                    .filter(|(key, _)| pending.keys.contains(key))
                    .collect();
                for key in pending.keys {
                    if caches.downloading.remove(&key) {
                        let geometry = geometries.remove(&key).unwrap_or_else(|| MultiPolygon(Vec::new()));
                        caches.downloaded.insert(key, geometry);
                    }
                }
            }
            Some(Err(err)) => {
                errors.report(&err);
                for key in pending.keys {
                    if caches.downloading.remove(&key) {
                        caches.failed.insert(key);
                    }
                }
            }
        }
    }
}

fn inflate(rect: Rect<f64>, share: f64) -> Rect<f64> {
    let dx = rect.width() * share;
    let dy = rect.height() * share;
    Rect::new(
        Coord { x: rect.min().x - dx, y: rect.min().y - dy },
        Coord { x: rect.max().x + dx, y: rect.max().y + dy },
    )
}

fn spawn_fragment(
    commands: &mut Commands,
    key: FragmentKey,
    boundaries: MultiPolygon<f64>,
    projection: Arc<dyn MapProjection>,
    layer: Entity,
    style: RegionStyleComponent,
    quantum: u32,
) -> Entity {
    let entity = commands.spawn(Name::new(key.entity_name())).id();
    let clip_rect = key.quad_key.compute_rect(projection.as_ref());
    let clip_path = MultiPolygon(vec![clip_rect.to_polygon()]);

    let task = FilterBorderTask::new(&boundaries, inflate(clip_rect, CLIP_INFLATION))
        .flat_map(move |border| {
            let border: BoxedTask<MultiLineString<f64>> = if border.0.is_empty() {
                constant(border).boxed()
            } else {
                ResampleTask::new(border, projection.clone(), RESAMPLING_PRECISION).boxed()
            };
            pair(
                border,
                pair(
                    ResampleTask::new(clip_path, projection.clone(), RESAMPLING_PRECISION),
                    ResampleTask::new(boundaries, projection, RESAMPLING_PRECISION),
                ),
            )
        })
        .map(move |(border, (clip_path, polygons))| {
            let bbox = bbox_or_origin(&polygons);
            WorldUpdate::on_entity(entity, move |target| {
                target.insert((
                    WorldOrigin(DVec2::new(bbox.min().x, bbox.min().y)),
                    WorldDimension(DVec2::new(bbox.width(), bbox.height())),
                    WorldGeometryComponent(polygons.clone()),
                    FragmentComponent {
                        key: key.clone(),
                        clip_path: clip_path.clone(),
                        border: border.clone(),
                    },
                    ParentLayerComponent(layer),
                    style,
                    RendererComponent(Arc::new(RegionRenderer)),
                    LocatorComponent(Arc::new(RegionLocator)),
                ));
            })
        });
    commands
        .entity(entity)
        .insert(MicroThreadComponent::new(task, quantum));
    entity
}

pub fn fragment_emit_system(
    mut commands: Commands,
    grid: Res<ViewportGrid>,
    mut caches: ResMut<FragmentCaches>,
    projection: Res<Projection>,
    config: Res<LiveMapConfig>,
    layers: Option<Res<MapLayers>>,
    regions: Query<(&RegionComponent, Option<&ParentLayerComponent>, Option<&RegionStyleComponent>)>,
    transformed: Query<(), With<ScreenGeometryComponent>>,
    failed: Query<(), With<MicroTaskFailed>>,
) -> Result<(), MapError> {
    let layers = layers.ok_or(MapError::MissingSingleton("MapLayers"))?;
    let region_targets: HashMap<&str, (Entity, RegionStyleComponent)> = regions
        .iter()
        .map(|(region, parent, style)| {
            (
                region.id.as_str(),
                (
                    parent.map_or(layers.fragments, |p| p.0),
                    style.copied().unwrap_or_default(),
                ),
            )
        })
        .collect();

    let mut empty = HashSet::new();
    for (key, geometry) in std::mem::take(&mut caches.downloaded) {
        if !grid.is_quad_visible(&key.quad_key) {
            debug!("Fragment {key} arrived for an invisible quad, dropping it");
            continue;
        }
        if geometry.0.is_empty() {
            empty.insert(key);
            continue;
        }
        let Some(&(layer, style)) = region_targets.get(key.region_id.as_str()) else {
            debug!("Region of fragment {key} is gone, dropping it");
            continue;
        };
        let entity = spawn_fragment(
            &mut commands,
            key.clone(),
            geometry,
            projection.0.clone(),
            layer,
            style,
            config.projection_quant,
        );
        caches.streaming.insert(key, entity);
    }

    let mut ready = Vec::new();
    let mut broken = Vec::new();
    for (key, &entity) in &caches.streaming {
        if transformed.contains(entity) {
            ready.push(key.clone());
        } else if failed.contains(entity) {
            broken.push((key.clone(), entity));
        }
    }
    for (key, entity) in broken {
        caches.streaming.remove(&key);
        despawn(&mut commands, entity);
        caches.failed.insert(key);
    }
    for key in &ready {
        if let Some(entity) = caches.streaming.remove(key) {
            caches.cached.insert(key.clone(), entity);
        }
    }

    let mut emitted: HashSet<FragmentKey> = empty.iter().cloned().collect();
    emitted.extend(ready);
    emitted.extend(
        caches
            .requested
            .iter()
            .filter(|key| caches.cached.contains_key(*key))
            .cloned(),
    );
    caches.empty.extend(empty);
    caches.emitted = emitted;
    Ok(())
}

/// Points every region at the cached fragments of the visible quads.
pub fn region_emit_system(
    caches: Res<FragmentCaches>,
    grid: Res<ViewportGrid>,
    mut regions: Query<&mut RegionComponent>,
) {
    for mut region in &mut regions {
        let mut fragments: Vec<Entity> = caches
            .cached
            .iter()
            .filter(|(key, _)| key.region_id == region.id && grid.is_quad_visible(&key.quad_key))
            .map(|(_, entity)| *entity)
            .collect();
        fragments.sort();
        if region.fragments != fragments {
            region.fragments = fragments;
        }
    }
}

/// Evicts invisible cached fragments once the cache grows past its limit.
pub fn fragments_removing_system(
    mut commands: Commands,
    grid: Res<ViewportGrid>,
    mut caches: ResMut<FragmentCaches>,
    config: Res<LiveMapConfig>,
) {
    if caches.cached.len() <= config.fragment_cache_limit {
        return;
    }
    let excess = caches.cached.len() - config.fragment_cache_limit;
    let mut evictable: Vec<FragmentKey> = caches
        .cached
        .keys()
        .filter(|key| key.zoom_bucket != grid.zoom_bucket || !grid.is_quad_visible(&key.quad_key))
        .cloned()
        .collect();
    evictable.sort();
    for key in evictable.into_iter().take(excess) {
        if let Some(entity) = caches.cached.remove(&key) {
            despawn(&mut commands, entity);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::canvas::Async;
    use crate::fragment::{FragmentBatch, FragmentProvider};
    use crate::geometry::QuadKey;

    struct NeverProvider;

    impl FragmentProvider for NeverProvider {
        fn fetch(&self, _: &[String], _: &[QuadKey], _: u8) -> Async<FragmentBatch> {
            Async::from_poller(|| None)
        }
    }

    #[derive(Clone, Default)]
    struct FailingProvider(Arc<AtomicUsize>);

    impl FragmentProvider for FailingProvider {
        fn fetch(&self, _: &[String], _: &[QuadKey], _: u8) -> Async<FragmentBatch> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Async::failed(MapError::Task("provider offline".into()))
        }
    }

    fn quad(digits: &str) -> QuadKey {
        QuadKey::parse(digits).unwrap()
    }

    fn app(quads: &[&str], provider: impl FragmentProvider + 'static) -> App {
        let mut app = App::new();
        app.insert_resource(ViewportGrid {
            visible_quads: quads.iter().map(|q| quad(q)).collect(),
            zoom_bucket: 1,
            ..default()
        })
        .insert_resource(LiveMapConfig {
            fragment_active_downloads_limit: 2,
            ..default()
        })
        .insert_resource(FragmentService {
            provider: Arc::new(provider),
        })
        .init_resource::<FragmentCaches>()
        .init_resource::<FragmentDownloads>()
        .init_resource::<ErrorChannel>()
        .add_systems(Update, (fragment_update_system, fragment_downloading_system).chain());
        app
    }

    #[test]
    fn downloads_are_capped_and_obsolete_keys_leave_the_queue() {
        let mut app = app(&["0", "1", "2"], NeverProvider);
        app.world_mut().spawn(RegionComponent::new("foo"));
        app.update();

        let caches = app.world().resource::<FragmentCaches>();
        assert_eq!(caches.requested.len(), 3);
        assert_eq!(caches.downloading.len(), 2);
        assert_eq!(caches.queue.len(), 1);
        let queued = caches.queue.iter().next().cloned().unwrap();

        app.world_mut().resource_mut::<ViewportGrid>().visible_quads.remove(&queued.quad_key);
        app.update();

        let caches = app.world().resource::<FragmentCaches>();
        assert!(caches.queue.is_empty());
        assert!(caches.obsolete.contains(&queued));
        assert!(caches.requested.is_empty());
        assert_eq!(caches.downloading.len(), 2);
    }

    #[test]
    fn failed_downloads_wait_for_a_viewport_change() {
        let provider = FailingProvider::default();
        let mut app = app(&["0", "1"], provider.clone());
        app.world_mut().spawn(RegionComponent::new("foo"));
        for _ in 0..5 {
            app.update();
        }

        assert_eq!(provider.0.load(Ordering::SeqCst), 1);
        let caches = app.world().resource::<FragmentCaches>();
        assert_eq!(caches.failed.len(), 2);
        assert!(caches.downloading.is_empty());
        assert!(caches.queue.is_empty());
        assert_eq!(app.world().resource::<ErrorChannel>().reported(), 1);

        app.world_mut().resource_mut::<ViewportGrid>().set_changed();
        app.update();
        assert_eq!(provider.0.load(Ordering::SeqCst), 2);
    }
}
