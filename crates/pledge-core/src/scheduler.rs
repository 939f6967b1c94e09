//! Cooperative task queue for reaction batches
//!
//! Settling or registering on a deferred value never runs handlers inline.
//! Instead the value arms a task here, and the task runs on a later turn when
//! the owner drives the queue with [`Scheduler::run_once`] or
//! [`Scheduler::run_until_idle`]. Everything is single-threaded: the handle is
//! `Rc`-based and every interior borrow is released before a task body runs,
//! so tasks may freely schedule, cancel or settle.

use crate::config::RuntimeConfig;
use crate::error::SchedulerError;
use rustc_hash::FxHashSet;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

/// Identifier of a scheduled task, unique per scheduler
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks put on the queue
    pub tasks_scheduled: u64,

    /// Tasks whose body ran
    pub tasks_run: u64,

    /// Tasks cancelled before running (replaced batches)
    pub tasks_cancelled: u64,

    /// Reaction records consumed
    pub reactions_run: u64,

    /// Handlers that threw
    pub handler_failures: u64,

    /// Reads of `then` that threw
    pub then_access_failures: u64,

    /// Calls of `then` that threw before committing an outcome
    pub then_invocation_failures: u64,

    /// Attempts to resolve a deferred value with itself
    pub self_references: u64,

    /// Resolution steps moved onto the queue by the depth bound
    pub trampolined_steps: u64,

    /// Rejections that had no reaction registered at the moment they settled
    ///
    /// Settle-time snapshot: a reaction registered on a later turn does not
    /// decrement it.
    pub unobserved_rejections: u64,
}

struct ScheduledTask {
    id: TaskId,
    job: Box<dyn FnOnce()>,
}

struct SchedulerInner {
    config: RuntimeConfig,
    queue: RefCell<VecDeque<ScheduledTask>>,
    /// Queued tasks that have been neither run nor cancelled
    live: RefCell<FxHashSet<TaskId>>,
    next_id: Cell<u64>,
    resolution_depth: Cell<usize>,
    stats: RefCell<SchedulerStats>,
}

/// Handle to a task queue; clones share the same queue
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler with default configuration
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a scheduler with explicit configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                config,
                queue: RefCell::new(VecDeque::new()),
                live: RefCell::new(FxHashSet::default()),
                next_id: Cell::new(1),
                resolution_depth: Cell::new(0),
                stats: RefCell::new(SchedulerStats::default()),
            }),
        }
    }

    /// Configuration this scheduler was built with
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Append a task to the back of the queue
    pub fn schedule<F>(&self, job: F) -> TaskId
    where
        F: FnOnce() + 'static,
    {
        let id = TaskId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        self.inner.live.borrow_mut().insert(id);
        self.inner.queue.borrow_mut().push_back(ScheduledTask {
            id,
            job: Box::new(job),
        });
        self.record(|s| s.tasks_scheduled += 1);
        trace!(task = %id, "scheduled");
        id
    }

    /// Cancel a queued task
    ///
    /// Returns false if the task already ran or was already cancelled.
    pub fn cancel(&self, id: TaskId) -> bool {
        let removed = self.inner.live.borrow_mut().remove(&id);
        if removed {
            self.record(|s| s.tasks_cancelled += 1);
            trace!(task = %id, "cancelled");
        }
        removed
    }

    /// Run the next live task
    ///
    /// Returns false when nothing was left to run.
    pub fn run_once(&self) -> bool {
        loop {
            let Some(task) = self.inner.queue.borrow_mut().pop_front() else {
                return false;
            };
            if !self.inner.live.borrow_mut().remove(&task.id) {
                // Cancelled; drop the job and its captures
                continue;
            }
            trace!(task = %task.id, "running");
            self.record(|s| s.tasks_run += 1);
            (task.job)();
            return true;
        }
    }

    /// Run tasks until the queue is empty, including tasks scheduled by the
    /// tasks themselves
    ///
    /// Returns the number of tasks run. With a configured `task_budget`, stops
    /// after that many tasks and reports the work still queued.
    pub fn run_until_idle(&self) -> Result<usize, SchedulerError> {
        let budget = self.inner.config.task_budget;
        let mut ran = 0;
        loop {
            if let Some(budget) = budget {
                if ran >= budget && !self.is_idle() {
                    return Err(SchedulerError::BudgetExhausted {
                        budget,
                        remaining: self.pending_tasks(),
                    });
                }
            }
            if !self.run_once() {
                return Ok(ran);
            }
            ran += 1;
        }
    }

    /// Number of live tasks waiting to run
    pub fn pending_tasks(&self) -> usize {
        self.inner.live.borrow().len()
    }

    /// Whether no live task is waiting
    pub fn is_idle(&self) -> bool {
        self.inner.live.borrow().is_empty()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.borrow().clone()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-owning handle; deferred values hold this so a dropped scheduler
    /// frees its queue even while values are still waiting on it
    pub(crate) fn downgrade(&self) -> WeakScheduler {
        WeakScheduler(Rc::downgrade(&self.inner))
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut SchedulerStats)) {
        update(&mut self.inner.stats.borrow_mut());
    }

    /// Enter one level of synchronous resolution
    ///
    /// Returns None once `max_sync_depth` levels are active; the caller must
    /// then continue on a fresh task.
    pub(crate) fn enter_resolution(&self) -> Option<DepthGuard> {
        let depth = self.inner.resolution_depth.get();
        if depth >= self.inner.config.max_sync_depth {
            return None;
        }
        self.inner.resolution_depth.set(depth + 1);
        Some(DepthGuard {
            scheduler: self.clone(),
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending_tasks", &self.pending_tasks())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Weak counterpart of [`Scheduler`]
#[derive(Clone)]
pub(crate) struct WeakScheduler(Weak<SchedulerInner>);

impl WeakScheduler {
    pub(crate) fn upgrade(&self) -> Option<Scheduler> {
        self.0.upgrade().map(|inner| Scheduler { inner })
    }
}

/// Restores the resolution depth when dropped
pub(crate) struct DepthGuard {
    scheduler: Scheduler,
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let depth = &self.scheduler.inner.resolution_depth;
        depth.set(depth.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (Rc<RefCell<Vec<u32>>>, impl Fn(u32) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let push = move |n: u32| {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(n)) as Box<dyn FnOnce()>
        };
        (log, push)
    }

    #[test]
    fn test_fifo_order() {
        let scheduler = Scheduler::new();
        let (log, push) = log();
        scheduler.schedule(push(1));
        scheduler.schedule(push(2));
        scheduler.schedule(push(3));
        assert!(log.borrow().is_empty());

        assert_eq!(scheduler.run_until_idle(), Ok(3));
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_cancelled_task_is_skipped() {
        let scheduler = Scheduler::new();
        let (log, push) = log();
        let first = scheduler.schedule(push(1));
        scheduler.schedule(push(2));

        assert!(scheduler.cancel(first));
        assert!(!scheduler.cancel(first));
        assert_eq!(scheduler.pending_tasks(), 1);

        assert_eq!(scheduler.run_until_idle(), Ok(1));
        assert_eq!(*log.borrow(), vec![2]);

        let stats = scheduler.stats();
        assert_eq!(stats.tasks_scheduled, 2);
        assert_eq!(stats.tasks_cancelled, 1);
        assert_eq!(stats.tasks_run, 1);
    }

    #[test]
    fn test_tasks_scheduled_while_running_run_later() {
        let scheduler = Scheduler::new();
        let (log, push) = log();
        let inner = scheduler.clone();
        let nested = push(2);
        let first = push(1);
        scheduler.schedule(move || {
            first();
            inner.schedule(nested);
        });
        scheduler.schedule(push(3));

        assert_eq!(scheduler.run_until_idle(), Ok(3));
        assert_eq!(*log.borrow(), vec![1, 3, 2]);
    }

    #[test]
    fn test_run_once_on_empty_queue() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.run_once());
        assert_eq!(scheduler.run_until_idle(), Ok(0));
    }

    #[test]
    fn test_budget_exhausted() {
        let scheduler = Scheduler::with_config(RuntimeConfig {
            task_budget: Some(2),
            ..RuntimeConfig::default()
        });
        let (_log, push) = log();
        for n in 0..5 {
            scheduler.schedule(push(n));
        }
        assert_eq!(
            scheduler.run_until_idle(),
            Err(SchedulerError::BudgetExhausted {
                budget: 2,
                remaining: 3,
            })
        );
        // Budget is per drive
        assert!(scheduler.run_until_idle().is_err());
        assert_eq!(scheduler.run_until_idle(), Ok(1));
    }

    #[test]
    fn test_budget_exactly_met_is_ok() {
        let scheduler = Scheduler::with_config(RuntimeConfig {
            task_budget: Some(2),
            ..RuntimeConfig::default()
        });
        let (_log, push) = log();
        scheduler.schedule(push(1));
        scheduler.schedule(push(2));
        assert_eq!(scheduler.run_until_idle(), Ok(2));
    }

    #[test]
    fn test_dropping_scheduler_drops_queued_jobs() {
        let scheduler = Scheduler::new();
        let weak = scheduler.downgrade();
        let capture = Rc::new(());
        let held = capture.clone();
        scheduler.schedule(move || drop(held));
        assert_eq!(Rc::strong_count(&capture), 2);

        drop(scheduler);
        assert!(weak.upgrade().is_none());
        assert_eq!(Rc::strong_count(&capture), 1);
    }

    #[test]
    fn test_resolution_depth_guard() {
        let scheduler = Scheduler::with_config(RuntimeConfig {
            max_sync_depth: 2,
            ..RuntimeConfig::default()
        });
        let a = scheduler.enter_resolution();
        let b = scheduler.enter_resolution();
        assert!(a.is_some() && b.is_some());
        assert!(scheduler.enter_resolution().is_none());
        drop(b);
        assert!(scheduler.enter_resolution().is_some());
    }
}
