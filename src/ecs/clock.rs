use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bevy::prelude::*;

/// Monotonic time as seen by the engine, measured from an arbitrary origin.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Duration;
}

pub struct RealTimeSource {
    origin: Instant,
}

impl Default for RealTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for RealTimeSource {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to. Used by headless hosts and tests.
#[derive(Default)]
pub struct ManualTimeSource {
    nanos: AtomicU64,
}

impl ManualTimeSource {
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Duration) {
        self.nanos.store(to.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[derive(Resource, Clone)]
pub struct SystemClock(pub Arc<dyn TimeSource>);

impl SystemClock {
    pub fn new(source: impl TimeSource + 'static) -> Self {
        Self(Arc::new(source))
    }

    pub fn now(&self) -> Duration {
        self.0.now()
    }

    pub fn since(&self, start: Duration) -> Duration {
        self.now().saturating_sub(start)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(RealTimeSource::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_on_advance() {
        let source = Arc::new(ManualTimeSource::default());
        let clock = SystemClock(source.clone());
        assert_eq!(clock.now(), Duration::ZERO);
        source.advance(Duration::from_millis(3));
        assert_eq!(clock.since(Duration::from_millis(1)), Duration::from_millis(2));
        assert_eq!(clock.since(Duration::from_millis(5)), Duration::ZERO);
    }
}
