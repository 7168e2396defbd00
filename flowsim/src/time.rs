use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

/// simulation timestamp (nanoseconds since epoch 0).
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub const fn from_secs(secs: u64) -> Self {
        SimTime(secs.saturating_mul(1_000_000_000))
    }

    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis.saturating_mul(1_000_000))
    }

    pub const fn from_micros(micros: u64) -> Self {
        SimTime(micros.saturating_mul(1_000))
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// advance by a duration.
    pub fn checked_add(&self, d: Duration) -> Option<SimTime> {
        u64::try_from(d.as_nanos())
            .ok()
            .and_then(|nanos| self.0.checked_add(nanos))
            .map(SimTime)
    }

    /// advance by a duration, clamping at [`SimTime::MAX`].
    pub fn saturating_add(&self, d: Duration) -> SimTime {
        self.checked_add(d).unwrap_or(SimTime::MAX)
    }

    /// time elapsed since `earlier`, zero if `earlier` is not before `self`.
    pub fn saturating_since(&self, earlier: SimTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl From<Duration> for SimTime {
    fn from(d: Duration) -> Self {
        SimTime(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// single scheduled event for the simulator.
///
/// `seq` breaks ties between equal timestamps so that events scheduled for
/// the same instant run in the order they were scheduled.
pub(crate) struct ScheduledEvent<T> {
    pub when: SimTime,
    pub seq: u64,
    pub payload: T,
}

impl<T> ScheduledEvent<T> {
    fn key(&self) -> (SimTime, u64) {
        (self.when, self.seq)
    }
}

impl<T> PartialEq for ScheduledEvent<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for ScheduledEvent<T> {}

impl<T> PartialOrd for ScheduledEvent<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// reversed so that `BinaryHeap` pops the earliest event first
impl<T> Ord for ScheduledEvent<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}
