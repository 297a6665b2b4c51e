use std::time::Duration;

use bevy::ecs::schedule::{ExecutorKind, ScheduleLabel};
use bevy::prelude::*;

use crate::ecs::clock::SystemClock;
use crate::error::{ErrorChannel, MapError};

/// One engine tick. Run once per host frame from `Update`.
#[derive(ScheduleLabel, Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapTick;

/// Fixed execution order of the engine systems inside [`MapTick`].
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapSystems {
    BeginTick,
    Input,
    Viewport,
    Basemap,
    Fragments,
    Scheduler,
    Placement,
    Rendering,
    Diagnostics,
}

/// Logical clock of the engine.
#[derive(Resource, Debug, Default, Clone)]
pub struct TickState {
    pub tick: u64,
    pub start: Duration,
    pub delta: Duration,
    pub aborted: bool,
}

pub struct TickRunnerPlugin;

impl Plugin for TickRunnerPlugin {
    fn build(&self, app: &mut App) {
        let mut schedule = Schedule::new(MapTick);
        schedule.set_executor_kind(ExecutorKind::SingleThreaded);

        app.add_schedule(schedule)
            .init_resource::<TickState>()
            .init_resource::<SystemClock>()
            .init_resource::<ErrorChannel>()
            .configure_sets(
                MapTick,
                (
                    MapSystems::BeginTick,
                    MapSystems::Input,
                    MapSystems::Viewport,
                    MapSystems::Basemap,
                    MapSystems::Fragments,
                    MapSystems::Scheduler,
                    MapSystems::Placement,
                    MapSystems::Rendering,
                    MapSystems::Diagnostics,
                )
                    .chain(),
            )
            .add_systems(MapTick, begin_tick.in_set(MapSystems::BeginTick))
            .add_systems(Update, run_map_tick);
    }
}

pub fn run_map_tick(world: &mut World) {
    world.run_schedule(MapTick);
}

pub fn begin_tick(mut state: ResMut<TickState>, clock: Res<SystemClock>) {
    let now = clock.now();
    state.delta = if state.tick == 0 {
        Duration::ZERO
    } else {
        now.saturating_sub(state.start)
    };
    state.start = now;
    state.tick += 1;
    state.aborted = false;
}

/// Run condition shared by every system after [`MapSystems::BeginTick`].
pub fn tick_alive(state: Res<TickState>) -> bool {
    !state.aborted
}

/// Pipe target of fallible systems: a failure aborts the rest of the tick.
pub fn report_tick_error(
    In(result): In<Result<(), MapError>>,
    mut state: ResMut<TickState>,
    errors: Res<ErrorChannel>,
) {
    if let Err(err) = result {
        warn!("Aborting tick {}", state.tick);
        errors.report(&err);
        state.aborted = true;
    }
}
