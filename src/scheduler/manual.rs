use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{run_guarded, Job, RepeatingTask, Scheduler, Task, TaskId};

#[derive(Default)]
struct State {
    now: Duration,
    next_id: TaskId,
    queue: BTreeMap<(Duration, TaskId), Job>,
    deadlines: HashMap<TaskId, Duration>,
    paused: Duration,
}

/// Scheduler driven by a fake clock.
///
/// Nothing runs until [`ManualScheduler::advance`] moves the clock past a
/// task's deadline. `pause` does not block; it only adds to
/// [`ManualScheduler::paused`].
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use service_mesh::scheduler::{ManualScheduler, Scheduler};
///
/// let scheduler = ManualScheduler::new();
/// let ran = Arc::new(AtomicBool::new(false));
/// let flag = ran.clone();
/// scheduler.schedule(Duration::from_secs(10), Box::new(move || flag.store(true, Ordering::SeqCst)));
///
/// scheduler.advance(Duration::from_secs(9));
/// assert!(!ran.load(Ordering::SeqCst));
/// scheduler.advance(Duration::from_secs(1));
/// assert!(ran.load(Ordering::SeqCst));
/// ```
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<State>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time elapsed on the fake clock.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Total time requested through `pause`.
    pub fn paused(&self) -> Duration {
        self.lock().paused
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Move the clock forward, running every task that falls due on the
    /// way, in deadline order. Tasks scheduled by those tasks run too if
    /// they fall due before the new time.
    pub fn advance(&self, by: Duration) {
        let target = self.lock().now + by;
        loop {
            let (id, job) = {
                let mut state = self.lock();
                let due = state
                    .queue
                    .keys()
                    .next()
                    .copied()
                    .filter(|(at, _)| *at <= target);
                let Some(key) = due else {
                    state.now = target;
                    return;
                };
                let Some(job) = state.queue.remove(&key) else {
                    continue;
                };
                let (at, id) = key;
                state.now = state.now.max(at);
                state.deadlines.remove(&id);
                if let Job::Repeating { interval, task } = &job {
                    // a zero interval would never let the clock move on
                    let next = at + (*interval).max(Duration::from_millis(1));
                    state.queue.insert(
                        (next, id),
                        Job::Repeating {
                            interval: *interval,
                            task: task.clone(),
                        },
                    );
                    state.deadlines.insert(id, next);
                }
                (id, job)
            };

            match job {
                Job::Once(task) => run_guarded(id, task),
                Job::Repeating { task, .. } => run_guarded(id, || task()),
            }
        }
    }

    /// Run whatever is already due.
    pub fn run_due(&self) {
        self.advance(Duration::ZERO);
    }

    fn insert(&self, delay: Duration, job: Job) -> TaskId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        let at = state.now + delay;
        state.queue.insert((at, id), job);
        state.deadlines.insert(id, at);
        id
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskId {
        self.insert(delay, Job::Once(task))
    }

    fn schedule_repeating(&self, interval: Duration, task: RepeatingTask) -> TaskId {
        self.insert(interval, Job::Repeating { interval, task })
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.lock();
        match state.deadlines.remove(&id) {
            Some(at) => {
                state.queue.remove(&(at, id));
                true
            }
            None => false,
        }
    }

    fn pause(&self, duration: Duration) {
        self.lock().paused += duration;
    }
}
