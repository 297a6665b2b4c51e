pub mod micro_task;
pub mod scheduler;

pub use micro_task::{constant, join, pair, BoxedTask, MicroTask, MicroTaskExt};
pub use scheduler::{
    scheduler_system, MicroTaskFailed, MicroThreadComponent, SchedulerStats, WorldUpdate,
};
