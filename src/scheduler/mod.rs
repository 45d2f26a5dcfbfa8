//! Delayed and periodic work.
//!
//! Distribution never sleeps on a delivery thread; every delay (publication
//! debounce, component stagger, heartbeat) goes through a [`Scheduler`].
//!
//! - [`ThreadScheduler`]: one background thread, real time.
//! - [`ManualScheduler`]: a fake clock advanced by hand, for tests.

mod manual;
mod thread;

use std::sync::Arc;
use std::time::Duration;

pub use manual::ManualScheduler;
pub use thread::ThreadScheduler;

/// Identifies a scheduled task for cancellation.
pub type TaskId = u64;

/// Work run once.
pub type Task = Box<dyn FnOnce() + Send>;

/// Work run on every tick of a repeating schedule.
pub type RepeatingTask = Arc<dyn Fn() + Send + Sync>;

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TaskId;

    /// Run `task` every `interval`, first after one interval.
    fn schedule_repeating(&self, interval: Duration, task: RepeatingTask) -> TaskId;

    /// Returns false if the task already ran (one-shot) or is unknown.
    fn cancel(&self, id: TaskId) -> bool;

    /// Block the calling thread for `duration`.
    fn pause(&self, duration: Duration);
}

pub(crate) enum Job {
    Once(Task),
    Repeating { interval: Duration, task: RepeatingTask },
}

/// Run a task, containing panics so one bad task doesn't take the
/// scheduler down with it.
pub(crate) fn run_guarded(id: TaskId, work: impl FnOnce()) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(work)).is_err() {
        tracing::error!(target: "service_mesh::scheduler", task = id, "scheduled task panicked");
    }
}
