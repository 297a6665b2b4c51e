//! Tile pipeline systems: fetch → parse → render → ready, with visibility checked
//! each time a cell is about to enter its next stage.

use std::sync::Arc;

use bevy::math::DVec2;
use bevy::prelude::*;

use crate::canvas::Canvas;
use crate::chart::{RendererComponent, TileRenderer};
use crate::config::LiveMapConfig;
use crate::ecs::TickState;
use crate::error::ErrorChannel;
use crate::geometry::CellKey;
use crate::layers::{mark_layer_dirty, MapLayers, ParentLayerComponent};
use crate::multitasking::{MicroTaskExt, MicroTaskFailed, MicroThreadComponent, WorldUpdate};
use crate::placement::{WorldDimension, WorldOrigin};
use crate::tile_map::components::*;
use crate::tile_map::debug::TileStatistics;
use crate::viewport::ViewportGrid;

fn discard(
    commands: &mut Commands,
    state: &mut CellState,
    stats: &TileStatistics,
    discarded: &mut EventWriter<CellDiscarded>,
    entity: Entity,
    key: CellKey,
    stage: CellStage,
) {
    debug!("Discarding cell {key} before leaving {stage:?}, it is no longer visible");
    state.streaming.remove(&key);
    stats.remove(&key);
    commands.entity(entity).despawn();
    discarded.write(CellDiscarded { key, stage });
}

/// Region of the closest cached ancestor tile covering `key`.
pub fn donor_tile(key: &CellKey, state: &CellState, tiles: &Query<&TileComponent>) -> Tile {
    let mut ancestor = key.parent();
    while let Some(candidate) = ancestor {
        let snapshot = state
            .cached
            .get(&candidate)
            .and_then(|cached| tiles.get(cached.entity).ok())
            .and_then(|tile| match &tile.0 {
                Tile::Snapshot(bitmap) => Some(bitmap),
                _ => None,
            });
        if let Some(bitmap) = snapshot {
            let depth = key.zoom - candidate.zoom;
            let size = bitmap.width >> depth;
            if size == 0 {
                break;
            }
            let x = (key.x - (candidate.x << depth)) * size;
            let y = (key.y - (candidate.y << depth)) * size;
            return Tile::SubTile {
                donor: candidate,
                bitmap: bitmap.sub_region(x, y, size, size),
            };
        }
        ancestor = candidate.parent();
    }
    Tile::Empty
}

pub fn cell_request_system(
    mut commands: Commands,
    grid: Res<ViewportGrid>,
    mut state: ResMut<CellState>,
    service: Res<TileService>,
    layers: Res<MapLayers>,
    tiles: Query<&TileComponent>,
) {
    if grid.is_changed() && !state.failed.is_empty() {
        debug!("Viewport changed, {} failed cells may be requested again", state.failed.len());
        state.failed.clear();
    }
    let mut requested: Vec<CellKey> = grid
        .visible_cells
        .iter()
        .filter(|key| state.should_request(key))
        .copied()
        .collect();
    requested.sort();

    for key in requested {
        let rect = key.world_rect();
        let donor = donor_tile(&key, &state, &tiles);
        let entity = commands
            .spawn((
                Name::new(format!("tile_{key}")),
                CellComponent(key),
                CellStage::Fetching,
                TileResponseComponent(service.fetcher.fetch(&key)),
                TileComponent(donor),
                ParentLayerComponent(layers.basemap),
                RendererComponent(Arc::new(TileRenderer)),
                WorldOrigin(DVec2::new(rect.min().x, rect.min().y)),
                WorldDimension(DVec2::new(rect.width(), rect.height())),
            ))
            .id();
        state.streaming.insert(key, entity);
    }
}

pub fn tile_response_system(
    mut commands: Commands,
    mut responses: Query<(Entity, &CellComponent, &mut TileResponseComponent)>,
    grid: Res<ViewportGrid>,
    mut state: ResMut<CellState>,
    service: Res<TileService>,
    config: Res<LiveMapConfig>,
    errors: Res<ErrorChannel>,
    stats: Res<TileStatistics>,
    mut discarded: EventWriter<CellDiscarded>,
) {
    for (entity, cell, mut response) in &mut responses {
        let Some(result) = response.0.poll() else {
            continue;
        };
        let key = cell.0;
        match result {
            Err(err) => {
                errors.report(&err);
                state.streaming.remove(&key);
                state.failed.insert(key);
                stats.remove(&key);
                commands.entity(entity).despawn();
            }
            Ok(_) if !grid.is_cell_visible(&key) => {
                discard(&mut commands, &mut state, &stats, &mut discarded, entity, key, CellStage::Fetching);
            }
            Ok(data) => {
                let task = service.parser.parse(&key, data).map(move |tile| {
                    WorldUpdate::on_entity(entity, move |target| {
                        target.insert((ParsedTileComponent(tile.clone()), CellStage::Parsed));
                    })
                });
                commands
                    .entity(entity)
                    .remove::<TileResponseComponent>()
                    .insert((
                        CellStage::Parsing,
                        MicroThreadComponent::new(task, config.tile_quantum),
                    ));
            }
        }
    }
}

pub fn tile_render_stage_system(
    mut commands: Commands,
    parsed: Query<(Entity, &CellComponent, &ParsedTileComponent, &ParentLayerComponent)>,
    grid: Res<ViewportGrid>,
    mut state: ResMut<CellState>,
    service: Res<TileService>,
    canvas: Res<Canvas>,
    config: Res<LiveMapConfig>,
    stats: Res<TileStatistics>,
    mut discarded: EventWriter<CellDiscarded>,
) {
    for (entity, cell, tile, parent) in &parsed {
        let key = cell.0;
        if !grid.is_cell_visible(&key) {
            discard(&mut commands, &mut state, &stats, &mut discarded, entity, key, CellStage::Parsed);
            continue;
        }
        let layer = parent.0;
        let task = service
            .renderer
            .render(&key, tile.0.clone(), &canvas, config.tile_size)
            .map(move |bitmap| {
                WorldUpdate::on_entity(entity, move |target| {
                    target.insert((TileComponent(Tile::Snapshot(bitmap.clone())), CellStage::Ready));
                })
                .and(WorldUpdate::new(move |world| mark_layer_dirty(world, layer)))
            });
        commands
            .entity(entity)
            .remove::<ParsedTileComponent>()
            .insert((
                CellStage::Rendering,
                MicroThreadComponent::new(task, config.tile_quantum),
            ));
    }
}

/// Moves cells that reached `Ready` from streaming to cached.
pub fn tile_snapshot_system(
    ready: Query<(Entity, &CellComponent, &CellStage), Changed<CellStage>>,
    mut state: ResMut<CellState>,
    tick: Res<TickState>,
) {
    for (entity, cell, stage) in &ready {
        if *stage != CellStage::Ready {
            continue;
        }
        if state.streaming.remove(&cell.0).is_some() {
            state.cached.insert(
                cell.0,
                CachedCell {
                    entity,
                    last_visible: tick.tick,
                },
            );
        }
    }
}

/// Drops cells whose parse or render task failed; they are requested again
/// after the next viewport change.
pub fn tile_failure_system(
    mut commands: Commands,
    failed: Query<(Entity, &CellComponent), With<MicroTaskFailed>>,
    mut state: ResMut<CellState>,
    stats: Res<TileStatistics>,
) {
    for (entity, cell) in &failed {
        warn!("Tile {} failed, dropping it", cell.0);
        state.streaming.remove(&cell.0);
        state.failed.insert(cell.0);
        stats.remove(&cell.0);
        commands.entity(entity).despawn();
    }
}

pub fn cell_visibility_system(
    mut commands: Commands,
    cells: Query<(Entity, &CellComponent, Has<HiddenComponent>)>,
    grid: Res<ViewportGrid>,
) {
    if !grid.is_changed() {
        return;
    }
    for (entity, cell, hidden) in &cells {
        match (grid.is_cell_visible(&cell.0), hidden) {
            (true, true) => {
                commands.entity(entity).remove::<HiddenComponent>();
            }
            (false, false) => {
                commands.entity(entity).insert(HiddenComponent);
            }
            _ => {}
        }
    }
}

/// Evicts invisible cached cells, least recently visible first, beyond the cache limit.
pub fn cell_cache_removing_system(
    mut commands: Commands,
    grid: Res<ViewportGrid>,
    mut state: ResMut<CellState>,
    config: Res<LiveMapConfig>,
    tick: Res<TickState>,
    stats: Res<TileStatistics>,
) {
    for (key, cached) in state.cached.iter_mut() {
        if grid.is_cell_visible(key) {
            cached.last_visible = tick.tick;
        }
    }
    if state.cached.len() <= config.tile_cache_limit {
        return;
    }

    let mut evictable: Vec<(u64, CellKey)> = state
        .cached
        .iter()
        .filter(|(key, _)| !grid.is_cell_visible(key))
        .map(|(key, cached)| (cached.last_visible, *key))
        .collect();
    evictable.sort();

    let excess = state.cached.len() - config.tile_cache_limit;
    for (_, key) in evictable.into_iter().take(excess) {
        if let Some(cached) = state.cached.remove(&key) {
            stats.remove(&key);
            commands.entity(cached.entity).despawn();
        }
    }
}
