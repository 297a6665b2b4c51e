mod common;

use std::sync::{Arc, Mutex};

use bevy::math::DVec2;
use bevy::prelude::*;
use bevy_live_map::fragment::{FragmentCaches, RegionComponent};
use bevy_live_map::tile_map::{CellComponent, CellState};
use bevy_live_map::{
    CameraInput, ErrorChannel, LiveMapPlugin, MapError, MapLayers, MemoryFragmentProvider, MemoryTileFetcher,
    RenderedFrame, TickState,
};

use common::{config, headless};

fn collect_errors(app: &mut App) -> Arc<Mutex<Vec<MapError>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let registered = app
        .world_mut()
        .resource_mut::<ErrorChannel>()
        .register(move |err| sink.lock().unwrap().push(err.clone()));
    assert!(registered);
    seen
}

#[test]
fn failed_fetches_reach_the_handler_and_drop_the_cell() {
    let mut app = headless(LiveMapPlugin::new(config(1.0)).with_tiles(MemoryTileFetcher::new()));
    let seen = collect_errors(&mut app);

    app.update();

    let errors = seen.lock().unwrap();
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(|err| matches!(err, MapError::Fetch { .. })));
    assert_eq!(app.world().resource::<ErrorChannel>().reported(), 4);
    assert!(app.world().resource::<CellState>().streaming.is_empty());

    let world = app.world_mut();
    assert_eq!(world.query::<&CellComponent>().iter(world).count(), 0);
    // The tick itself carried on.
    assert!(!world.resource::<TickState>().aborted);
    assert_eq!(world.resource::<RenderedFrame>().frame, 1);
}

#[test]
fn failed_cells_wait_for_a_viewport_change() {
    let mut app = headless(LiveMapPlugin::new(config(1.0)).with_tiles(MemoryTileFetcher::new()));
    let seen = collect_errors(&mut app);

    for _ in 0..5 {
        app.update();
    }
    assert_eq!(seen.lock().unwrap().len(), 4);
    assert_eq!(app.world().resource::<CellState>().failed.len(), 4);

    // The same four cells stay visible, but the move lets them be tried again.
    app.world_mut().send_event(CameraInput::Pan {
        delta: DVec2::new(1.0, 0.0),
    });
    app.update();
    app.update();
    assert_eq!(seen.lock().unwrap().len(), 8);
    assert_eq!(app.world().resource::<ErrorChannel>().reported(), 8);
}

#[test]
fn failing_system_aborts_only_its_tick() {
    let mut app = headless(LiveMapPlugin::new(config(1.0)).with_fragments(MemoryFragmentProvider::new()));
    let seen = collect_errors(&mut app);
    app.world_mut().spawn(RegionComponent::new("r"));
    let layers = app.world_mut().remove_resource::<MapLayers>().unwrap();

    app.update();

    assert!(app.world().resource::<TickState>().aborted);
    assert!(matches!(
        seen.lock().unwrap().as_slice(),
        [MapError::MissingSingleton("MapLayers")]
    ));
    // Rendering comes after the failing system and was skipped.
    assert_eq!(app.world().resource::<RenderedFrame>().frame, 0);

    app.world_mut().insert_resource(layers);
    app.update();

    assert!(!app.world().resource::<TickState>().aborted);
    assert_eq!(app.world().resource::<RenderedFrame>().frame, 1);
    assert_eq!(app.world().resource::<ErrorChannel>().reported(), 1);
    assert!(app.world().resource::<FragmentCaches>().cached.is_empty());
}
