use chrono::{DateTime, Utc};

/// The orchestrator never reads the wall clock itself; it asks a `Clock`,
/// so tests can pin `now` the way spec's orchestration scenarios require.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock pinned to a fixed instant, optionally advanced manually
/// between orchestrator steps within a single test.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
