use std::any::Any;
use std::collections::{BinaryHeap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use crate::{
    error::{EventFault, SimError},
    time::{ScheduledEvent, SimTime},
};

/// boxed event body.
pub type Action<W> = Box<dyn FnOnce(&mut Scheduler<W>, &mut W) -> Result<(), SimError>>;

/// what the run loop does after an event fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultAction {
    Continue,
    Abort,
}

pub type FaultHandler = Box<dyn FnMut(&EventFault) -> FaultAction>;

/// handle returned by `schedule`, used to cancel the event.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EventHandle(u64);

struct Pending<W> {
    label: &'static str,
    action: Action<W>,
}

/// event queue and simulated clock, generic over the world `W` its events
/// act on. Events with the same timestamp run in scheduling order.
pub struct Scheduler<W> {
    queue: BinaryHeap<ScheduledEvent<Pending<W>>>,
    /// sequence numbers of events neither executed nor cancelled
    live: HashSet<u64>,
    next_seq: u64,
    now: SimTime,
    closed: bool,
    executed: u64,
    on_fault: FaultHandler,
    faults: Vec<EventFault>,
}

impl<W> Default for Scheduler<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> Scheduler<W> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            live: HashSet::new(),
            next_seq: 0,
            now: SimTime::ZERO,
            closed: false,
            executed: 0,
            on_fault: Box::new(|_| FaultAction::Continue),
            faults: Vec::new(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// events scheduled and not yet executed or cancelled.
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// faults collected so far, in the order they happened.
    pub fn faults(&self) -> &[EventFault] {
        &self.faults
    }

    pub fn set_fault_handler(&mut self, handler: impl FnMut(&EventFault) -> FaultAction + 'static) {
        self.on_fault = Box::new(handler);
    }

    /// schedule `action` to run `delay` after the current time.
    pub fn schedule<F>(
        &mut self,
        delay: Duration,
        label: &'static str,
        action: F,
    ) -> Result<EventHandle, SimError>
    where
        F: FnOnce(&mut Scheduler<W>, &mut W) -> Result<(), SimError> + 'static,
    {
        let when = self.now.checked_add(delay).ok_or(SimError::TimeOverflow)?;
        self.schedule_at(when, label, action)
    }

    /// schedule `action` at an absolute time, which must not be in the past.
    pub fn schedule_at<F>(
        &mut self,
        when: SimTime,
        label: &'static str,
        action: F,
    ) -> Result<EventHandle, SimError>
    where
        F: FnOnce(&mut Scheduler<W>, &mut W) -> Result<(), SimError> + 'static,
    {
        if self.closed {
            return Err(SimError::SimulationEnded);
        }
        if when < self.now {
            return Err(SimError::ScheduleInPast { at: when, now: self.now });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.live.insert(seq);
        self.queue.push(ScheduledEvent {
            when,
            seq,
            payload: Pending {
                label,
                action: Box::new(action),
            },
        });
        Ok(EventHandle(seq))
    }

    /// cancel a pending event. The entry stays in the heap and is skipped
    /// when it reaches the front. Returns false if the event already ran or
    /// was cancelled before.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.live.remove(&handle.0)
    }

    /// execute events in time order while their timestamp is `<= stop`.
    /// The clock ends at `stop` unless an event ran later than that, which
    /// cannot happen.
    pub fn run_until(&mut self, stop: SimTime, world: &mut W) -> Result<(), SimError> {
        self.drive(Some(stop), world)?;
        if self.now < stop {
            self.now = stop;
        }
        Ok(())
    }

    /// execute events until the queue is empty.
    pub fn run_to_completion(&mut self, world: &mut W) -> Result<(), SimError> {
        self.drive(None, world)
    }

    fn drive(&mut self, stop: Option<SimTime>, world: &mut W) -> Result<(), SimError> {
        loop {
            match self.queue.peek() {
                Some(next) if stop.is_none_or(|stop| next.when <= stop) => {}
                _ => return Ok(()),
            }
            let Some(ScheduledEvent { when, seq, payload }) = self.queue.pop() else {
                return Ok(());
            };
            if !self.live.remove(&seq) {
                continue;
            }

            self.now = when;
            self.executed += 1;
            let Pending { label, action } = payload;
            // a panicking action is a fault like any other
            let outcome = catch_unwind(AssertUnwindSafe(|| action(self, world)))
                .unwrap_or_else(|err| Err(SimError::EventFailed(panic_message(&*err))));
            if let Err(error) = outcome {
                let fault = EventFault { at: when, label, error };
                tracing::warn!("event fault: {fault}");
                let decision = (self.on_fault)(&fault);
                self.faults.push(fault);
                if decision == FaultAction::Abort {
                    return Err(SimError::Aborted(when));
                }
            }
        }
    }

    /// close the scheduler, dropping every queued event without running it.
    /// Returns how many live events were discarded.
    pub fn shutdown(&mut self) -> usize {
        let discarded = self.live.len();
        self.queue.clear();
        self.live.clear();
        self.closed = true;
        tracing::debug!(discarded, now = %self.now, "scheduler closed");
        discarded
    }
}

fn panic_message(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = err.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    type Log = Vec<(SimTime, u32)>;

    fn record(tag: u32) -> impl FnOnce(&mut Scheduler<Log>, &mut Log) -> Result<(), SimError> {
        move |s, log| {
            log.push((s.now(), tag));
            Ok(())
        }
    }

    #[test]
    fn runs_in_time_order() {
        let mut s = Scheduler::new();
        let mut log = Log::new();
        s.schedule(Duration::from_millis(30), "c", record(3)).unwrap();
        s.schedule(Duration::from_millis(10), "a", record(1)).unwrap();
        s.schedule(Duration::from_millis(20), "b", record(2)).unwrap();
        s.run_to_completion(&mut log).unwrap();

        let tags: Vec<_> = log.iter().map(|(_, t)| *t).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert_eq!(s.now(), SimTime::from_millis(30));
        assert_eq!(s.executed(), 3);
    }

    #[test]
    fn equal_times_run_in_scheduling_order() {
        let mut s = Scheduler::new();
        let mut log = Log::new();
        for tag in 0..10 {
            s.schedule(Duration::from_secs(1), "tie", record(tag)).unwrap();
        }
        s.run_to_completion(&mut log).unwrap();
        let tags: Vec<_> = log.iter().map(|(_, t)| *t).collect();
        assert_eq!(tags, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn events_can_schedule_followups() {
        let mut s = Scheduler::new();
        let mut log = Log::new();
        s.schedule(Duration::from_millis(5), "first", |s, log: &mut Log| {
            log.push((s.now(), 1));
            s.schedule(Duration::ZERO, "same-instant", record(2))?;
            s.schedule(Duration::from_millis(5), "later", record(3))?;
            Ok(())
        })
        .unwrap();
        s.run_to_completion(&mut log).unwrap();
        assert_eq!(
            log,
            vec![
                (SimTime::from_millis(5), 1),
                (SimTime::from_millis(5), 2),
                (SimTime::from_millis(10), 3),
            ]
        );
    }

    #[test]
    fn scheduling_into_the_past_is_rejected() {
        let mut s: Scheduler<Log> = Scheduler::new();
        let mut log = Log::new();
        s.run_until(SimTime::from_secs(2), &mut log).unwrap();
        assert_eq!(s.now(), SimTime::from_secs(2));

        let err = s.schedule_at(SimTime::from_secs(1), "late", record(0)).unwrap_err();
        assert_eq!(
            err,
            SimError::ScheduleInPast {
                at: SimTime::from_secs(1),
                now: SimTime::from_secs(2)
            }
        );
        assert!(s.schedule_at(SimTime::from_secs(2), "now", record(0)).is_ok());
    }

    #[test]
    fn overflowing_delay_is_rejected() {
        let mut s: Scheduler<Log> = Scheduler::new();
        let err = s.schedule(Duration::MAX, "far", record(0)).unwrap_err();
        assert_eq!(err, SimError::TimeOverflow);
    }

    #[test]
    fn cancelled_events_are_skipped() {
        let mut s = Scheduler::new();
        let mut log = Log::new();
        s.schedule(Duration::from_millis(1), "keep", record(1)).unwrap();
        let h = s.schedule(Duration::from_millis(2), "drop", record(2)).unwrap();
        assert_eq!(s.pending(), 2);
        assert!(s.cancel(h));
        assert!(!s.cancel(h));
        assert_eq!(s.pending(), 1);

        s.run_to_completion(&mut log).unwrap();
        assert_eq!(log, vec![(SimTime::from_millis(1), 1)]);
        assert_eq!(s.executed(), 1);
    }

    #[test]
    fn stop_time_is_inclusive_and_leaves_later_events() {
        let mut s = Scheduler::new();
        let mut log = Log::new();
        s.schedule_at(SimTime::from_secs(1), "at-stop", record(1)).unwrap();
        s.schedule_at(SimTime::from_secs(2), "after-stop", record(2)).unwrap();
        s.run_until(SimTime::from_secs(1), &mut log).unwrap();
        assert_eq!(log, vec![(SimTime::from_secs(1), 1)]);
        assert_eq!(s.pending(), 1);

        assert_eq!(s.shutdown(), 1);
        assert!(s.is_closed());
        assert_eq!(
            s.schedule(Duration::ZERO, "closed", record(3)).unwrap_err(),
            SimError::SimulationEnded
        );
        s.run_to_completion(&mut log).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn faults_are_isolated_and_collected() {
        let mut s = Scheduler::new();
        let mut log = Log::new();
        s.schedule(Duration::from_millis(1), "boom", |_, _: &mut Log| {
            Err(SimError::EventFailed("boom".into()))
        })
        .unwrap();
        s.schedule(Duration::from_millis(2), "after", record(7)).unwrap();
        s.run_to_completion(&mut log).unwrap();

        assert_eq!(log, vec![(SimTime::from_millis(2), 7)]);
        assert_eq!(s.faults().len(), 1);
        assert_eq!(s.faults()[0].label, "boom");
        assert_eq!(s.faults()[0].at, SimTime::from_millis(1));
    }

    #[test]
    fn fault_handler_can_abort() {
        let mut s = Scheduler::new();
        let mut log = Log::new();
        s.set_fault_handler(|_| FaultAction::Abort);
        s.schedule(Duration::from_millis(1), "boom", |_, _: &mut Log| {
            Err(SimError::EventFailed("boom".into()))
        })
        .unwrap();
        s.schedule(Duration::from_millis(2), "after", record(7)).unwrap();

        let err = s.run_to_completion(&mut log).unwrap_err();
        assert_eq!(err, SimError::Aborted(SimTime::from_millis(1)));
        assert!(log.is_empty());
        assert_eq!(s.pending(), 1);
    }

    #[test]
    fn panicking_action_becomes_a_fault() {
        let mut s = Scheduler::new();
        let mut log = Log::new();
        s.schedule(Duration::from_millis(1), "panics", |_, _: &mut Log| -> Result<(), SimError> {
            panic!("lost the packet")
        })
        .unwrap();
        s.schedule(Duration::from_millis(2), "after", record(7)).unwrap();
        s.run_to_completion(&mut log).unwrap();

        assert_eq!(log, vec![(SimTime::from_millis(2), 7)]);
        assert_eq!(s.faults().len(), 1);
        assert_eq!(s.faults()[0].label, "panics");
        assert_eq!(
            s.faults()[0].error,
            SimError::EventFailed("panicked: lost the packet".into())
        );
    }

    proptest! {
        #[test]
        fn execution_order_is_time_then_insertion(delays in prop::collection::vec(0u64..50, 1..200)) {
            let mut s = Scheduler::new();
            let mut log = Log::new();
            for (i, d) in delays.iter().enumerate() {
                s.schedule(Duration::from_millis(*d), "p", record(i as u32)).unwrap();
            }
            s.run_to_completion(&mut log).unwrap();

            let mut expected: Vec<(SimTime, u32)> = delays
                .iter()
                .enumerate()
                .map(|(i, d)| (SimTime::from_millis(*d), i as u32))
                .collect();
            expected.sort();
            prop_assert_eq!(log, expected);
        }
    }
}
