use std::time::Duration;

use bevy::prelude::*;

use crate::config::LiveMapConfig;
use crate::ecs::{tick_alive, MapSystems, MapTick, SystemClock, TickState};
use crate::fragment::FragmentCaches;
use crate::multitasking::MicroThreadComponent;
use crate::tile_map::{CellState, TileResponseComponent};

/// True while tiles or fragments are on their way or micro-tasks are pending.
#[derive(Resource, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadingState(pub bool);

#[derive(Resource, Debug, Default, Clone, PartialEq)]
pub struct LiveMapDiagnostics {
    pub tick_time: Duration,
    pub entities: usize,
    pub micro_threads: usize,
    pub streaming_fragments: usize,
    pub downloading_fragments: usize,
    pub cached_fragments: usize,
    pub downloading_tiles: usize,
    pub cached_tiles: usize,
}

impl LiveMapDiagnostics {
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("tick: {:.2} ms", self.tick_time.as_secs_f64() * 1000.0),
            format!("entities: {}", self.entities),
            format!("micro threads: {}", self.micro_threads),
            format!(
                "fragments: {} streaming, {} downloading, {} cached",
                self.streaming_fragments, self.downloading_fragments, self.cached_fragments
            ),
            format!(
                "tiles: {} downloading, {} cached",
                self.downloading_tiles, self.cached_tiles
            ),
        ]
    }

    fn same_counts(&self, other: &LiveMapDiagnostics) -> bool {
        LiveMapDiagnostics {
            tick_time: Duration::ZERO,
            ..self.clone()
        } == LiveMapDiagnostics {
            tick_time: Duration::ZERO,
            ..other.clone()
        }
    }
}

pub struct DiagnosticsPlugin;

impl Plugin for DiagnosticsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<LoadingState>()
            .init_resource::<LiveMapDiagnostics>()
            .add_systems(
                MapTick,
                (
                    loading_state_system,
                    diagnostics_system.run_if(perf_stats_enabled),
                )
                    .distributive_run_if(tick_alive)
                    .in_set(MapSystems::Diagnostics),
            );
    }
}

fn perf_stats_enabled(config: Option<Res<LiveMapConfig>>) -> bool {
    config.is_some_and(|config| config.perf_stats)
}

pub fn loading_state_system(
    cells: Option<Res<CellState>>,
    fragments: Option<Res<FragmentCaches>>,
    threads: Query<(), With<MicroThreadComponent>>,
    mut state: ResMut<LoadingState>,
) {
    let tiles_loading = cells.is_some_and(|cells| !cells.streaming.is_empty());
    let fragments_loading = fragments.is_some_and(|caches| {
        !caches.queue.is_empty() || !caches.downloading.is_empty() || !caches.streaming.is_empty()
    });
    let loading = tiles_loading || fragments_loading || !threads.is_empty();
    if state.0 != loading {
        debug!("Loading: {loading}");
        state.0 = loading;
    }
}

pub fn diagnostics_system(
    entities: Query<Entity>,
    threads: Query<(), With<MicroThreadComponent>>,
    responses: Query<(), With<TileResponseComponent>>,
    cells: Option<Res<CellState>>,
    fragments: Option<Res<FragmentCaches>>,
    tick: Res<TickState>,
    clock: Res<SystemClock>,
    mut diagnostics: ResMut<LiveMapDiagnostics>,
) {
    let (streaming_fragments, downloading_fragments, cached_fragments) = fragments
        .map(|caches| (caches.streaming.len(), caches.downloading.len(), caches.cached.len()))
        .unwrap_or_default();
    let current = LiveMapDiagnostics {
        tick_time: clock.now().saturating_sub(tick.start),
        entities: entities.iter().count(),
        micro_threads: threads.iter().count(),
        streaming_fragments,
        downloading_fragments,
        cached_fragments,
        downloading_tiles: responses.iter().count(),
        cached_tiles: cells.map_or(0, |cells| cells.cached.len()),
    };
    if !diagnostics.same_counts(&current) {
        for line in current.lines() {
            debug!("{line}");
        }
    }
    *diagnostics = current;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multitasking::{constant, MicroTaskExt, WorldUpdate};

    #[test]
    fn loading_follows_pending_work() {
        let mut app = App::new();
        app.init_resource::<LoadingState>()
            .add_systems(Update, loading_state_system);

        app.update();
        assert_eq!(*app.world().resource::<LoadingState>(), LoadingState(false));

        let entity = app
            .world_mut()
            .spawn(MicroThreadComponent::new(constant(()).map(|_| WorldUpdate::none()), 1))
            .id();
        app.update();
        assert_eq!(*app.world().resource::<LoadingState>(), LoadingState(true));

        app.world_mut().despawn(entity);
        app.update();
        assert_eq!(*app.world().resource::<LoadingState>(), LoadingState(false));
    }

    #[test]
    fn tick_time_alone_is_not_a_change() {
        let a = LiveMapDiagnostics {
            entities: 3,
            ..default()
        };
        let b = LiveMapDiagnostics {
            tick_time: Duration::from_millis(4),
            ..a.clone()
        };
        assert!(a.same_counts(&b));
        assert_eq!(b.lines()[0], "tick: 4.00 ms");
    }
}
