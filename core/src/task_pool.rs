//! Fixed-capacity cooperative scheduler.
//!
//! One thread drains the pool: it runs every due task, then sleeps until the
//! earliest next deadline or until a task is posted or removed. Task bodies
//! run while the task table is locked, so a callback must never post,
//! remove or drop a [`TaskHandle`] of the same pool.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, trace, warn};

use crate::slots::OptionalSlots;

pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub const INVALID: TaskId = TaskId(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type TaskCallback = Box<dyn FnMut() + Send>;

/// What to run and when.
///
/// A task is due once `last_executed + interval` has passed; a task that
/// never ran is due immediately.
pub struct TaskDescription {
    pub single_shot: bool,
    pub callback: Option<TaskCallback>,
    pub interval: Duration,
    pub description: String,
    pub last_executed: Option<Instant>,
}

impl Default for TaskDescription {
    fn default() -> Self {
        Self {
            single_shot: false,
            callback: None,
            interval: Duration::ZERO,
            description: String::new(),
            last_executed: None,
        }
    }
}

impl fmt::Debug for TaskDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescription")
            .field("single_shot", &self.single_shot)
            .field("callback", &self.callback.is_some())
            .field("interval", &self.interval)
            .field("description", &self.description)
            .field("last_executed", &self.last_executed)
            .finish()
    }
}

impl TaskDescription {
    pub fn periodic(
        description: impl Into<String>,
        interval: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            interval,
            description: description.into(),
            ..Self::default()
        }
    }

    /// Runs once on the next pass.
    pub fn single_shot(description: impl Into<String>, callback: impl FnMut() + Send + 'static) -> Self {
        Self {
            single_shot: true,
            callback: Some(Box::new(callback)),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Runs once, `delay` from now.
    pub fn delayed(
        description: impl Into<String>,
        delay: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            single_shot: true,
            callback: Some(Box::new(callback)),
            interval: delay,
            description: description.into(),
            last_executed: Some(Instant::now()),
        }
    }

    fn due_at(&self, now: Instant) -> Instant {
        self.last_executed
            .map_or(now, |last_executed| last_executed + self.interval)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub description: String,
    pub single_shot: bool,
    pub interval: Duration,
    pub last_executed: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPoolTiming {
    /// Sleep when nothing is scheduled sooner.
    pub idle_wait: Duration,
    /// Upper bound for one blocking wait.
    pub max_wait: Duration,
}

impl Default for TaskPoolTiming {
    fn default() -> Self {
        Self {
            idle_wait: DEFAULT_IDLE_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

struct Task {
    id: TaskId,
    description: TaskDescription,
}

struct State<const N: usize> {
    tasks: OptionalSlots<Task, N>,
    last_id: u64,
    wake_pending: bool,
}

impl<const N: usize> State<N> {
    fn next_id(&mut self) -> TaskId {
        self.last_id = self.last_id.wrapping_add(1);
        if self.last_id == TaskId::INVALID.0 {
            self.last_id += 1;
        }
        TaskId(self.last_id)
    }
}

struct Shared<const N: usize> {
    state: Mutex<State<N>>,
    wakeup: Condvar,
    timing: TaskPoolTiming,
}

impl<const N: usize> Shared<N> {
    fn lock(&self) -> MutexGuard<'_, State<N>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self, mut state: MutexGuard<'_, State<N>>) {
        state.wake_pending = true;
        drop(state);
        self.wakeup.notify_all();
    }
}

trait TaskTable: Send + Sync {
    fn contains_task(&self, id: TaskId) -> bool;
    fn remove_task(&self, id: TaskId) -> bool;
}

impl<const N: usize> TaskTable for Shared<N> {
    fn contains_task(&self, id: TaskId) -> bool {
        self.lock().tasks.iter().any(|task| task.id == id)
    }

    fn remove_task(&self, id: TaskId) -> bool {
        let mut state = self.lock();
        if !state.tasks.remove_if(|task| task.id == id) {
            return false;
        }
        debug!("removed task {id}");
        self.wake(state);
        true
    }
}

/// Pool of at most `N` pending tasks. Clones share the same table.
#[derive(Clone)]
pub struct TaskPool<const N: usize> {
    shared: Arc<Shared<N>>,
}

impl<const N: usize> Default for TaskPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for TaskPool<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("capacity", &N)
            .field("len", &self.len())
            .field("timing", &self.shared.timing)
            .finish()
    }
}

impl<const N: usize> TaskPool<N> {
    pub fn new() -> Self {
        Self::with_timing(TaskPoolTiming::default())
    }

    pub fn with_timing(timing: TaskPoolTiming) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    tasks: OptionalSlots::new(),
                    last_id: 0,
                    wake_pending: false,
                }),
                wakeup: Condvar::new(),
                timing,
            }),
        }
    }

    pub fn timing(&self) -> TaskPoolTiming {
        self.shared.timing
    }

    /// Schedules a task. The returned handle is invalid when the pool is
    /// full; otherwise dropping it removes the task.
    pub fn post_task(&self, description: TaskDescription) -> TaskHandle {
        let mut state = self.shared.lock();
        if state.tasks.is_full() {
            warn!(
                "task pool full ({N} tasks), dropping '{}'",
                description.description
            );
            return TaskHandle::invalid();
        }

        let id = state.next_id();
        debug!("adding task {id} '{}'", description.description);
        state.tasks.append(Task { id, description });
        self.shared.wake(state);

        let pool = Arc::downgrade(&self.shared);
        let pool: Weak<dyn TaskTable> = pool;
        TaskHandle {
            pool: Some(pool),
            id,
        }
    }

    pub fn remove_task(&self, id: TaskId) -> bool {
        self.shared.remove_task(id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.shared.contains_task(id)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().tasks.count()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().tasks.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.shared
            .lock()
            .tasks
            .iter()
            .map(|task| TaskInfo {
                id: task.id,
                description: task.description.description.clone(),
                single_shot: task.description.single_shot,
                interval: task.description.interval,
                last_executed: task.description.last_executed,
            })
            .collect()
    }

    pub fn run_pending_work(&self) -> Instant {
        self.run_pending_work_at(Instant::now())
    }

    /// Runs every task due at `now` and returns when the pool next needs
    /// attention.
    pub fn run_pending_work_at(&self, now: Instant) -> Instant {
        let mut state = self.shared.lock();
        let mut next_deadline = now + self.shared.timing.idle_wait;

        for index in 0..N {
            let Some(task) = state.tasks.get_mut(index) else {
                continue;
            };
            let id = task.id;
            let description = &mut task.description;
            if description.callback.is_none() {
                continue;
            }

            if description.due_at(now) <= now {
                trace!("running task {id} '{}'", description.description);
                if let Some(callback) = description.callback.as_mut() {
                    callback();
                }

                if description.single_shot {
                    debug!("single shot task {id} '{}' done", description.description);
                    state.tasks.erase(index);
                    continue;
                }
                description.last_executed = Some(now);
            }

            next_deadline = next_deadline.min(description.due_at(now));
        }

        next_deadline
    }

    /// Drains the pool on the calling thread until `stop` is set.
    pub fn run_until(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            let deadline = self.run_pending_work();
            if stop.load(Ordering::Acquire) {
                break;
            }
            self.wait_until(deadline);
        }
    }

    /// Blocks until `deadline`, at most `max_wait`, or until the pool is
    /// woken by a post, a removal or [`TaskPool::wake`].
    pub fn wait_until(&self, deadline: Instant) {
        let timeout = deadline
            .saturating_duration_since(Instant::now())
            .min(self.shared.timing.max_wait);

        let state = self.shared.lock();
        let (mut state, _) = self
            .shared
            .wakeup
            .wait_timeout_while(state, timeout, |state| !state.wake_pending)
            .unwrap_or_else(PoisonError::into_inner);
        state.wake_pending = false;
    }

    pub fn wake(&self) {
        self.shared.wake(self.shared.lock());
    }

    pub fn spawn_worker(&self, name: &str) -> std::io::Result<TaskPoolWorker<N>> {
        let stop = Arc::new(AtomicBool::new(false));
        let pool = self.clone();
        let thread_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || pool.run_until(&thread_stop))?;
        debug!("task pool worker '{name}' started");

        Ok(TaskPoolWorker {
            pool: self.clone(),
            stop,
            thread: Some(thread),
        })
    }
}

/// Cancellation right for one posted task. Dropping it removes the task.
#[must_use = "dropping the handle removes the task"]
pub struct TaskHandle {
    pool: Option<Weak<dyn TaskTable>>,
    id: TaskId,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("attached", &self.pool.is_some())
            .finish()
    }
}

impl TaskHandle {
    pub fn invalid() -> Self {
        Self {
            pool: None,
            id: TaskId::INVALID,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_valid()
    }

    /// Whether the task is still scheduled.
    pub fn is_active(&self) -> bool {
        self.pool
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|pool| pool.contains_task(self.id))
    }

    /// Removes the task now. Returns whether it was still scheduled.
    pub fn cancel(mut self) -> bool {
        self.release()
    }

    /// Gives up the cancellation right; the task stays scheduled.
    pub fn detach(mut self) -> TaskId {
        self.pool = None;
        self.id
    }

    fn release(&mut self) -> bool {
        match self.pool.take().and_then(|pool| pool.upgrade()) {
            Some(pool) => pool.remove_task(self.id),
            None => false,
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Background thread draining a [`TaskPool`]. Stopped and joined on drop.
pub struct TaskPoolWorker<const N: usize> {
    pool: TaskPool<N>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<const N: usize> TaskPoolWorker<N> {
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.pool.wake();
        if thread.join().is_err() {
            warn!("task pool worker panicked");
        }
        debug!("task pool worker stopped");
    }
}

impl<const N: usize> Drop for TaskPoolWorker<N> {
    fn drop(&mut self) {
        self.stop();
    }
}
