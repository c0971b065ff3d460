use crate::{shared::Job, TaskHandle, TimerId};
use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

/// A periodic or single-shot callback owned by the loop.
///
/// Readiness and cadence follow `original_source/src/core/SwCoreApplication.h`'s
/// `_T` timer: a timer is ready once `now - last_fire >= interval`, and firing
/// it resets `last_fire` to the fire moment (drift-tolerant cadence, not
/// `last_fire += interval`), so cadence slips under load instead of bursting
/// after a stall.
pub(crate) struct Timer {
    pub id: TimerId,
    pub interval: Duration,
    pub single_shot: bool,
    pub last_fire: Instant,
    // `Rc<RefCell<_>>`, not an owned `Box`, because a recurring timer's body
    // must still be callable after this fire's spawned task runs (the task
    // may run in a later iteration than the one that observed readiness).
    pub body: Rc<RefCell<dyn FnMut(TaskHandle)>>,
}

impl Timer {
    pub fn is_ready(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_fire) >= self.interval
    }

    pub fn time_until_ready(&self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_fire);
        self.interval.saturating_sub(elapsed)
    }
}

/// Registry of active timers. A plain `Vec` rather than a priority queue:
/// every iteration scans every timer (§4.B step 3 fires *every* ready timer,
/// not just the earliest one), and registration order must be preserved so
/// timers with equal readiness fire in registration order.
#[derive(Default)]
pub(crate) struct TimerSet {
    timers: Vec<Timer>,
}

impl TimerSet {
    pub fn insert(&mut self, timer: Timer) {
        self.timers.push(timer);
    }

    pub fn remove(&mut self, id: TimerId) {
        self.timers.retain(|t| t.id != id);
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Fires every ready timer exactly once, in registration order, spawning
    /// its body as a fresh task via `spawn_ready`. Single-shot timers that
    /// fired are removed. Returns the minimum time until the next timer
    /// becomes ready, if any timer remains.
    pub fn fire_ready(
        &mut self,
        now: Instant,
        mut spawn_ready: impl FnMut(Job),
    ) -> Option<Duration> {
        let mut fired_single_shots = Vec::new();
        for timer in &mut self.timers {
            if timer.is_ready(now) {
                let body = timer.body.clone();
                spawn_ready(Box::new(move |h| (body.borrow_mut())(h)));
                timer.last_fire = now;
                if timer.single_shot {
                    fired_single_shots.push(timer.id);
                }
            }
        }
        for id in fired_single_shots {
            self.remove(id);
        }
        self.timers.iter().map(|t| t.time_until_ready(now)).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::SharedState;

    fn dummy_handle() -> TaskHandle {
        let pool = loom_task::StackPool::new(4096, false, 0, 1, 1);
        let (sender, _receiver) = crossbeam_channel::unbounded();
        TaskHandle::new(Rc::new(RefCell::new(SharedState::new(pool, sender))))
    }

    #[test]
    fn ready_after_interval_elapses() {
        let now = Instant::now();
        let timer = Timer {
            id: TimerId::mint(),
            interval: Duration::from_millis(50),
            single_shot: false,
            last_fire: now,
            body: Rc::new(RefCell::new(|_h| {})),
        };
        assert!(!timer.is_ready(now + Duration::from_millis(10)));
        assert!(timer.is_ready(now + Duration::from_millis(50)));
    }

    #[test]
    fn fire_ready_resets_to_fire_moment_not_accumulated_interval() {
        let now = Instant::now();
        let mut set = TimerSet::default();
        let count = Rc::new(RefCell::new(0));
        let count2 = count.clone();
        set.insert(Timer {
            id: TimerId::mint(),
            interval: Duration::from_millis(50),
            single_shot: false,
            last_fire: now,
            body: Rc::new(RefCell::new(move |_h| *count2.borrow_mut() += 1)),
        });

        // Fires late (120ms after last_fire, 70ms of drift).
        let fire_at = now + Duration::from_millis(120);
        let mut spawned = Vec::new();
        set.fire_ready(fire_at, |job| spawned.push(job));
        assert_eq!(spawned.len(), 1);
        spawned.remove(0)(dummy_handle());
        assert_eq!(*count.borrow(), 1);

        // Drift-tolerant: last_fire is now `fire_at`, so it is not ready
        // again until another full interval after the late fire, not after
        // the original schedule.
        assert!(!set.timers[0].is_ready(fire_at + Duration::from_millis(10)));
        assert!(set.timers[0].is_ready(fire_at + Duration::from_millis(50)));
    }

    #[test]
    fn single_shot_timer_is_removed_after_firing() {
        let now = Instant::now();
        let mut set = TimerSet::default();
        let id = TimerId::mint();
        set.insert(Timer {
            id,
            interval: Duration::from_millis(1),
            single_shot: true,
            last_fire: now,
            body: Rc::new(RefCell::new(|_h| {})),
        });
        set.fire_ready(now + Duration::from_millis(5), |_| {});
        assert!(set.is_empty());
    }
}
