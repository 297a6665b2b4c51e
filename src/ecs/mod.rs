//! Entity/component runtime: world access helpers, the tick runner and its clock.

pub mod clock;
pub mod runner;
pub mod store;

pub use clock::{ManualTimeSource, RealTimeSource, SystemClock, TimeSource};
pub use runner::{report_tick_error, tick_alive, MapSystems, MapTick, TickRunnerPlugin, TickState};
pub use store::EntityStore;
