mod common;

use std::collections::HashSet;

use bevy::math::DVec2;
use bevy::prelude::*;
use bevy_live_map::ecs::runner::run_map_tick;
use bevy_live_map::tile_map::{
    CellComponent, CellDiscarded, CellStage, CellState, TileData, TileStatistics, TileType,
};
use bevy_live_map::{CameraInput, CellKey, LiveMapPlugin, MemoryTileFetcher, RenderedFrame};

use common::{config, headless, mvt_square, png, run_until};

#[derive(Resource, Default)]
struct Discarded(Vec<CellKey>);

fn collect_discarded(mut events: EventReader<CellDiscarded>, mut discarded: ResMut<Discarded>) {
    discarded.0.extend(events.read().map(|event| event.key));
}

fn red_tiles() -> MemoryTileFetcher {
    MemoryTileFetcher::new().with_fallback(TileData::new(TileType::Raster, png([255, 0, 0, 255], 256)))
}

fn water_tiles() -> MemoryTileFetcher {
    MemoryTileFetcher::new().with_fallback(TileData::new(TileType::Vector, mvt_square("water")))
}

fn cell_entities(world: &mut World) -> HashSet<CellKey> {
    world
        .query::<&CellComponent>()
        .iter(world)
        .map(|cell| cell.0)
        .collect()
}

#[test]
fn raster_tiles_reach_the_frame() {
    let mut app = headless(LiveMapPlugin::new(config(1.0)).with_tiles(red_tiles()));

    let cached = run_until(&mut app, 20, |world| world.resource::<CellState>().cached.len() == 4);
    assert!(cached, "the four zoom 1 cells never became ready");
    app.update();

    let frame = app.world().resource::<RenderedFrame>();
    let bitmap = frame.bitmap.as_ref().expect("a composited frame");
    assert_eq!((bitmap.width, bitmap.height), (256, 256));
    for (x, y) in [(10, 10), (128, 128), (245, 200)] {
        let pixel = bitmap.pixel(x, y).unwrap();
        assert_eq!((pixel.r, pixel.g, pixel.b, pixel.a), (255, 0, 0, 255), "pixel {x},{y}");
    }
}

#[test]
fn cells_panned_away_before_render_are_discarded() {
    let mut app = headless(LiveMapPlugin::new(config(5.0)).with_tiles(red_tiles()));
    app.init_resource::<Discarded>()
        .add_systems(Update, collect_discarded.after(run_map_tick));

    app.update();
    let requested = cell_entities(app.world_mut());
    let expected: HashSet<CellKey> = [(15, 15), (16, 15), (15, 16), (16, 16)]
        .into_iter()
        .map(|(x, y)| CellKey::new(5, x, y))
        .collect();
    assert_eq!(requested, expected);

    app.world_mut().send_event(CameraInput::Pan {
        delta: DVec2::new(-2000.0, 0.0),
    });
    for _ in 0..10 {
        app.update();
    }

    let discarded: HashSet<CellKey> = app.world().resource::<Discarded>().0.iter().copied().collect();
    assert_eq!(discarded, expected);

    let state = app.world().resource::<CellState>();
    for key in &expected {
        assert!(!state.cached.contains_key(key), "{key} was cached");
        assert!(!state.streaming.contains_key(key), "{key} is still streaming");
    }
    let remaining = cell_entities(app.world_mut());
    assert!(remaining.is_disjoint(&expected));
    assert!(!remaining.is_empty(), "the panned-to cells were never requested");
}

#[test]
fn cache_keeps_cells_that_left_the_viewport_up_to_its_limit() {
    let mut plugin_config = config(5.0);
    plugin_config.tile_cache_limit = 6;
    let mut app = headless(LiveMapPlugin::new(plugin_config).with_tiles(red_tiles()));

    assert!(run_until(&mut app, 20, |world| world.resource::<CellState>().cached.len() == 4));

    // Half a cell to the right: two cells leave, two new ones come in.
    app.world_mut().send_event(CameraInput::Pan {
        delta: DVec2::new(-256.0, 0.0),
    });
    assert!(run_until(&mut app, 20, |world| world.resource::<CellState>().cached.len() == 6));

    app.world_mut().send_event(CameraInput::Pan {
        delta: DVec2::new(-256.0, 0.0),
    });
    run_until(&mut app, 20, |world| world.resource::<CellState>().streaming.is_empty());
    app.update();

    let state = app.world().resource::<CellState>();
    assert_eq!(state.cached.len(), 6);
    // The first column left the viewport first and was evicted first.
    assert!(!state.cached.contains_key(&CellKey::new(5, 15, 15)));
    assert!(!state.cached.contains_key(&CellKey::new(5, 15, 16)));
}

#[test]
fn vector_tiles_are_symbolized_into_the_frame() {
    let mut app = headless(LiveMapPlugin::new(config(1.0)).with_tiles(water_tiles()));

    assert!(run_until(&mut app, 20, |world| world.resource::<CellState>().cached.len() == 4));
    app.update();

    let frame = app.world().resource::<RenderedFrame>();
    let bitmap = frame.bitmap.as_ref().expect("a composited frame");
    // Cell (0, 0) spans client -128..128; its water square covers -64..64.
    let water = bitmap.pixel(32, 32).unwrap();
    assert!(water.b > water.r + 60, "expected water at 32,32, got {water:?}");
    // Outside every square: the default background.
    let land = bitmap.pixel(100, 100).unwrap();
    assert!(land.b < 0x40 && land.r < 0x40, "expected background at 100,100, got {land:?}");
}

#[test]
fn tile_statistics_cover_every_stage_of_ready_cells() {
    let mut plugin_config = config(1.0);
    plugin_config.debug_tile_stats = true;
    let mut app = headless(LiveMapPlugin::new(plugin_config).with_tiles(water_tiles()));

    assert!(run_until(&mut app, 20, |world| world.resource::<CellState>().cached.len() == 4));

    let size = mvt_square("water").len();
    let stats = app.world().resource::<TileStatistics>().clone();
    assert_eq!(stats.len(), 4);
    let state = app.world().resource::<CellState>();
    for (key, cached) in &state.cached {
        assert_eq!(app.world().get::<CellStage>(cached.entity), Some(&CellStage::Ready));
        let cell = stats.get(key).expect("statistics of a ready cell");
        assert!(cell.fetch_time.is_some());
        assert_eq!(cell.data_size, size);
        assert!(cell.parse_time.is_some());
        assert_eq!(cell.features, 1);
        assert!(cell.render_time.is_some());
    }
}

#[test]
fn tile_statistics_follow_the_cache() {
    let mut plugin_config = config(5.0);
    plugin_config.debug_tile_stats = true;
    plugin_config.tile_cache_limit = 4;
    let mut app = headless(LiveMapPlugin::new(plugin_config).with_tiles(water_tiles()));
    assert!(run_until(&mut app, 20, |world| world.resource::<CellState>().cached.len() == 4));

    for _ in 0..6 {
        app.world_mut().send_event(CameraInput::Pan {
            delta: DVec2::new(-256.0, 0.0),
        });
        run_until(&mut app, 20, |world| world.resource::<CellState>().streaming.is_empty());
    }
    app.update();

    let state = app.world().resource::<CellState>();
    let stats = app.world().resource::<TileStatistics>();
    assert_eq!(state.cached.len(), 4);
    assert_eq!(stats.len(), state.cached.len());
    for key in state.cached.keys() {
        assert!(stats.get(key).is_some(), "{key} has no statistics");
    }
}
