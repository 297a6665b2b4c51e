//! Cooperative executor for entity-attached micro-tasks.
//!
//! Every entity carrying a [`MicroThreadComponent`] is resumed in turn, up to its
//! quantum, until the per-tick computation budget is spent. Finished tasks hand back
//! a [`WorldUpdate`] that is applied through the tick's command queue.

use std::sync::Arc;
use std::time::Duration;

use bevy::ecs::world::EntityWorldMut;
use bevy::prelude::*;

use crate::config::LiveMapConfig;
use crate::ecs::clock::SystemClock;
use crate::error::{ErrorChannel, MapError};
use crate::multitasking::micro_task::{BoxedTask, MicroTask};

type WorldFn = Arc<dyn Fn(&mut World) + Send + Sync>;

/// Deferred world mutation produced by a finished task.
#[derive(Clone, Default)]
pub struct WorldUpdate(Vec<WorldFn>);

impl WorldUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(f: impl Fn(&mut World) + Send + Sync + 'static) -> Self {
        Self(vec![Arc::new(f)])
    }

    /// Update targeting a single entity; dropped if the entity is gone by then.
    pub fn on_entity(
        entity: Entity,
        f: impl Fn(&mut EntityWorldMut) + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |world| match world.get_entity_mut(entity) {
            Ok(mut target) => f(&mut target),
            Err(_) => debug!("Entity {entity} despawned before its task finished"),
        })
    }

    pub fn and(mut self, other: WorldUpdate) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn apply(&self, world: &mut World) {
        for f in &self.0 {
            f(world);
        }
    }
}

#[derive(Component)]
pub struct MicroThreadComponent {
    pub task: BoxedTask<WorldUpdate>,
    pub quantum: u32,
}

impl MicroThreadComponent {
    pub fn new(task: impl MicroTask<Output = WorldUpdate> + 'static, quantum: u32) -> Self {
        Self {
            task: Box::new(task),
            quantum,
        }
    }
}

/// Left on an entity whose task failed.
#[derive(Component, Debug, Clone)]
pub struct MicroTaskFailed(pub MapError);

#[derive(Resource, Debug, Default, Clone)]
pub struct SchedulerStats {
    pub active: usize,
    pub resumes: usize,
    pub finished: usize,
    pub failed: usize,
    pub elapsed: Duration,
    rotation: usize,
}

pub fn scheduler_system(
    mut commands: Commands,
    mut threads: Query<(Entity, &mut MicroThreadComponent)>,
    clock: Res<SystemClock>,
    config: Res<LiveMapConfig>,
    errors: Res<ErrorChannel>,
    mut stats: ResMut<SchedulerStats>,
) {
    let budget = config.computation_frame_time();
    let start = clock.now();

    let mut pending: Vec<Entity> = threads.iter().map(|(entity, _)| entity).collect();
    pending.sort();
    if !pending.is_empty() {
        let offset = stats.rotation % pending.len();
        pending.rotate_left(offset);
        stats.rotation = stats.rotation.wrapping_add(1);
    }

    let mut resumes = 0;
    let mut finished = 0;
    let mut failed = 0;
    let mut last_resume = Duration::ZERO;

    'frame: while !pending.is_empty() {
        let mut i = 0;
        while i < pending.len() {
            let entity = pending[i];
            let Ok((_, mut thread)) = threads.get_mut(entity) else {
                pending.remove(i);
                continue;
            };

            let mut error = None;
            for _ in 0..thread.quantum.max(1) {
                if !thread.task.alive() {
                    break;
                }
                // The first resume of a tick always runs.
                if resumes > 0 && clock.since(start) + last_resume >= budget {
                    break 'frame;
                }
                let before = clock.now();
                let result = thread.task.resume();
                last_resume = clock.since(before);
                resumes += 1;
                if let Err(err) = result {
                    error = Some(err);
                    break;
                }
            }

            if let Some(err) = error {
                errors.report(&err);
                commands
                    .entity(entity)
                    .remove::<MicroThreadComponent>()
                    .insert(MicroTaskFailed(err));
                failed += 1;
                pending.remove(i);
            } else if !thread.task.alive() {
                commands.entity(entity).remove::<MicroThreadComponent>();
                if let Some(update) = thread.task.get_result() {
                    commands.queue(move |world: &mut World| update.apply(world));
                }
                finished += 1;
                pending.remove(i);
            } else {
                i += 1;
            }

            if clock.since(start) >= budget {
                break 'frame;
            }
        }
    }

    stats.active = pending.len();
    stats.resumes = resumes;
    stats.finished = finished;
    stats.failed = failed;
    stats.elapsed = clock.since(start);
}
