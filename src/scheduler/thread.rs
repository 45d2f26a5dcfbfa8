use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::{run_guarded, Job, RepeatingTask, Scheduler, Task, TaskId};

#[derive(Default)]
struct State {
    next_id: TaskId,
    queue: BTreeMap<(Instant, TaskId), Job>,
    deadlines: HashMap<TaskId, Instant>,
    stopped: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, at: Instant, job: Job) -> TaskId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.queue.insert((at, id), job);
        state.deadlines.insert(id, at);
        self.wake.notify_one();
        id
    }
}

/// Runs tasks on a single background thread.
///
/// Tasks run one at a time in deadline order. The thread stops when the
/// scheduler is shut down or dropped; tasks still queued are discarded.
pub struct ThreadScheduler {
    shared: Arc<Shared>,
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadScheduler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
        });
        let worker = shared.clone();
        thread::spawn(move || run(worker));
        Self { shared }
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Stop the background thread.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        state.stopped = true;
        state.queue.clear();
        state.deadlines.clear();
        self.shared.wake.notify_all();
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        let mut state = shared.lock();
        let (key, job) = loop {
            if state.stopped {
                return;
            }
            let now = Instant::now();
            match state.queue.keys().next().copied() {
                None => {
                    state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                Some((at, _)) if at > now => {
                    state = shared
                        .wake
                        .wait_timeout(state, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                Some(key) => {
                    if let Some(job) = state.queue.remove(&key) {
                        break (key, job);
                    }
                }
            }
        };

        let (_, id) = key;
        match job {
            Job::Once(task) => {
                state.deadlines.remove(&id);
                drop(state);
                run_guarded(id, task);
            }
            Job::Repeating { interval, task } => {
                let next = Instant::now() + interval;
                state.queue.insert(
                    (next, id),
                    Job::Repeating {
                        interval,
                        task: task.clone(),
                    },
                );
                state.deadlines.insert(id, next);
                drop(state);
                run_guarded(id, || task());
            }
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskId {
        self.shared.insert(Instant::now() + delay, Job::Once(task))
    }

    fn schedule_repeating(&self, interval: Duration, task: RepeatingTask) -> TaskId {
        self.shared
            .insert(Instant::now() + interval, Job::Repeating { interval, task })
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.shared.lock();
        match state.deadlines.remove(&id) {
            Some(at) => {
                state.queue.remove(&(at, id));
                true
            }
            None => false,
        }
    }

    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
