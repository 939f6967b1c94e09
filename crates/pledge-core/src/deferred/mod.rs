//! Deferred values: the write-once settlement state machine
//!
//! A [`Deferred`] starts [`State::Unsettled`] and moves to
//! [`State::Fulfilled`] or [`State::Rejected`] exactly once, through
//! [`Deferred::settle`]. Reactions registered with [`Deferred::register`] are
//! queued as records and flushed by a scheduler task after settlement, in
//! registration order, never on the registering or settling stack.
//!
//! Values hold their scheduler weakly. Dropping every [`Scheduler`] handle
//! frees the queue and whatever it captured; values that outlive it can still
//! settle, but their reactions are discarded instead of armed.

mod reaction;

use crate::resolution::{self, OnceGuard};
use crate::scheduler::{Scheduler, SchedulerStats, TaskId, WeakScheduler};
use crate::value::{Function, ThrowResult, Value};
use reaction::Reaction;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Unique identifier for a Deferred
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeferredId(u64);

static NEXT_DEFERRED_ID: AtomicU64 = AtomicU64::new(1);

impl DeferredId {
    fn next() -> Self {
        DeferredId(NEXT_DEFERRED_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeferredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deferred#{}", self.0)
    }
}

/// Settlement state of a Deferred
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum State {
    /// Not settled yet
    Unsettled,
    /// Settled with a value
    Fulfilled,
    /// Settled with a reason
    Rejected,
}

impl State {
    /// Whether the state is terminal
    pub fn is_settled(self) -> bool {
        self != State::Unsettled
    }

    /// The terminal outcome, if settled
    pub fn outcome(self) -> Option<Outcome> {
        match self {
            State::Unsettled => None,
            State::Fulfilled => Some(Outcome::Fulfilled),
            State::Rejected => Some(Outcome::Rejected),
        }
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            State::Unsettled => "unsettled",
            State::Fulfilled => "fulfilled",
            State::Rejected => "rejected",
        }
    }
}

/// A terminal outcome
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Produced a value
    Fulfilled,
    /// Failed with a reason
    Rejected,
}

impl From<Outcome> for State {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Fulfilled => State::Fulfilled,
            Outcome::Rejected => State::Rejected,
        }
    }
}

/// A reaction batch waiting on the scheduler
struct ArmedBatch {
    task: TaskId,
    reactions: Vec<Reaction>,
}

struct Slot {
    state: State,
    /// Fulfillment value or rejection reason; meaningful once settled
    value: Value,
    /// Reactions registered since the last arming
    pending: Vec<Reaction>,
    armed: Option<ArmedBatch>,
}

struct DeferredInner {
    id: DeferredId,
    scheduler: WeakScheduler,
    slot: RefCell<Slot>,
}

/// A value that settles once, later
///
/// Cloning yields another handle to the same deferred value.
#[derive(Clone)]
pub struct Deferred {
    inner: Rc<DeferredInner>,
}

impl Deferred {
    /// Create a deferred value and run `initializer` synchronously with its
    /// settlement controls
    ///
    /// A panic inside `initializer` is not caught; use [`Deferred::try_new`]
    /// to turn an initializer failure into a rejection.
    pub fn new<F>(scheduler: &Scheduler, initializer: F) -> Self
    where
        F: FnOnce(Resolver, Rejecter),
    {
        let deferred = Self::unsettled(scheduler);
        let (resolve, reject) = deferred.controls();
        initializer(resolve, reject);
        deferred
    }

    /// Like [`Deferred::new`], but an `Err` returned by `initializer` rejects
    /// the value (unless the initializer already resolved it)
    pub fn try_new<F>(scheduler: &Scheduler, initializer: F) -> Self
    where
        F: FnOnce(Resolver, Rejecter) -> Result<(), Value>,
    {
        let deferred = Self::unsettled(scheduler);
        let (resolve, reject) = deferred.controls();
        if let Err(thrown) = initializer(resolve, reject.clone()) {
            debug!(deferred = %deferred.id(), reason = %thrown, "initializer threw");
            reject.reject(thrown);
        }
        deferred
    }

    pub(crate) fn unsettled(scheduler: &Scheduler) -> Self {
        Self::unsettled_on(scheduler.downgrade())
    }

    fn unsettled_on(scheduler: WeakScheduler) -> Self {
        Deferred {
            inner: Rc::new(DeferredInner {
                id: DeferredId::next(),
                scheduler,
                slot: RefCell::new(Slot {
                    state: State::Unsettled,
                    value: Value::Undefined,
                    pending: Vec::new(),
                    armed: None,
                }),
            }),
        }
    }

    fn controls(&self) -> (Resolver, Rejecter) {
        let once = OnceGuard::new();
        (
            Resolver {
                target: self.clone(),
                once: once.clone(),
            },
            Rejecter {
                target: self.clone(),
                once,
            },
        )
    }

    /// Register reactions and return the downstream value they settle
    ///
    /// Arguments that are not callable are treated as absent, which passes
    /// the corresponding outcome straight through to the downstream value.
    pub fn register(&self, on_fulfilled: Value, on_rejected: Value) -> Deferred {
        self.register_handlers(
            on_fulfilled.as_function().cloned(),
            on_rejected.as_function().cloned(),
        )
    }

    /// Register a fulfillment reaction written in Rust
    pub fn then<F>(&self, on_fulfilled: F) -> Deferred
    where
        F: Fn(Value) -> ThrowResult + 'static,
    {
        self.register_handlers(Some(Function::unary(on_fulfilled)), None)
    }

    /// Register a rejection reaction written in Rust
    pub fn catch<F>(&self, on_rejected: F) -> Deferred
    where
        F: Fn(Value) -> ThrowResult + 'static,
    {
        self.register_handlers(None, Some(Function::unary(on_rejected)))
    }

    pub(crate) fn register_handlers(
        &self,
        on_fulfilled: Option<Function>,
        on_rejected: Option<Function>,
    ) -> Deferred {
        let downstream = Deferred::unsettled_on(self.inner.scheduler.clone());
        let settled = {
            let mut slot = self.inner.slot.borrow_mut();
            slot.pending
                .push(Reaction::new(on_fulfilled, on_rejected, downstream.clone()));
            slot.state.is_settled()
        };
        trace!(deferred = %self.id(), downstream = %downstream.id(), "registered");
        if settled {
            self.arm();
        }
        downstream
    }

    /// The single settlement entry point; no-op once settled
    pub(crate) fn settle(&self, outcome: Outcome, value: Value) {
        let unobserved = {
            let mut slot = self.inner.slot.borrow_mut();
            if slot.state.is_settled() {
                trace!(deferred = %self.inner.id, "already settled, ignoring");
                return;
            }
            slot.state = outcome.into();
            slot.value = value;
            outcome == Outcome::Rejected && slot.pending.is_empty()
        };
        trace!(deferred = %self.id(), state = State::from(outcome).as_str(), "settled");
        if unobserved {
            self.record(|s| s.unobserved_rejections += 1);
            debug!(deferred = %self.id(), "rejected with no reaction registered");
        }
        self.arm();
    }

    /// Snapshot the pending reactions and hand them to one scheduler task
    ///
    /// While a batch is still waiting, the snapshot joins it and keeps its
    /// task and queue position, so each value has at most one live flush task
    /// and never an empty one.
    fn arm(&self) {
        let mut slot = self.inner.slot.borrow_mut();
        if slot.pending.is_empty() {
            return;
        }
        let snapshot = std::mem::take(&mut slot.pending);
        if let Some(batch) = slot.armed.as_mut() {
            trace!(
                deferred = %self.inner.id,
                task = %batch.task,
                added = snapshot.len(),
                "joined waiting batch"
            );
            batch.reactions.extend(snapshot);
            return;
        }

        let Some(scheduler) = self.inner.scheduler.upgrade() else {
            // Release the slot before reaction captures are dropped
            drop(slot);
            trace!(
                deferred = %self.inner.id,
                discarded = snapshot.len(),
                "scheduler dropped, reactions discarded"
            );
            return;
        };
        let this = self.clone();
        let task = scheduler.schedule(move || this.flush());
        trace!(deferred = %self.inner.id, task = %task, reactions = snapshot.len(), "armed");
        slot.armed = Some(ArmedBatch {
            task,
            reactions: snapshot,
        });
    }

    fn flush(&self) {
        let (outcome, value, reactions) = {
            let mut slot = self.inner.slot.borrow_mut();
            let Some(batch) = slot.armed.take() else {
                return;
            };
            let Some(outcome) = slot.state.outcome() else {
                return;
            };
            (outcome, slot.value.clone(), batch.reactions)
        };
        for reaction in reactions {
            reaction.run(outcome, &value);
        }
    }

    /// A `then` member bound to this value, for foreign consumers that treat
    /// it as a thenable
    pub(crate) fn then_function(&self) -> Function {
        let this = self.clone();
        Function::named("then", move |_receiver, args| {
            let on_fulfilled = args.first().cloned().unwrap_or_default();
            let on_rejected = args.get(1).cloned().unwrap_or_default();
            Ok(Value::Deferred(this.register(on_fulfilled, on_rejected)))
        })
    }

    /// Current state
    pub fn state(&self) -> State {
        self.inner.slot.borrow().state
    }

    /// Whether the value has settled
    pub fn is_settled(&self) -> bool {
        self.state().is_settled()
    }

    /// The fulfillment value or rejection reason, once settled
    pub fn settled_value(&self) -> Option<Value> {
        let slot = self.inner.slot.borrow();
        slot.state.is_settled().then(|| slot.value.clone())
    }

    /// Stable identifier
    pub fn id(&self) -> DeferredId {
        self.inner.id
    }

    /// Scheduler this value arms, unless every handle to it has been dropped
    pub fn scheduler(&self) -> Option<Scheduler> {
        self.inner.scheduler.upgrade()
    }

    /// Update the scheduler's counters, if it is still alive
    pub(crate) fn record(&self, update: impl FnOnce(&mut SchedulerStats)) {
        if let Some(scheduler) = self.scheduler() {
            scheduler.record(update);
        }
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Display for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.slot.try_borrow() {
            Ok(slot) => write!(f, "Deferred#{}<{}>", self.inner.id.0, slot.state.as_str()),
            Err(_) => write!(f, "Deferred#{}<busy>", self.inner.id.0),
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Resolve control handed to an initializer
///
/// Shares an already-resolved flag with its [`Rejecter`]: the first call to
/// either wins and later calls are ignored.
#[derive(Clone)]
pub struct Resolver {
    target: Deferred,
    once: OnceGuard,
}

impl Resolver {
    /// Resolve through the resolution procedure (plain values fulfill,
    /// deferred values and thenables are adopted)
    pub fn resolve(&self, value: impl Into<Value>) {
        if self.once.claim() {
            resolution::resolve(&self.target, value.into());
        }
    }

    /// The control as a callable value
    pub fn to_function(&self) -> Function {
        let this = self.clone();
        Function::named("resolve", move |_receiver, args| {
            this.resolve(args.first().cloned().unwrap_or_default());
            Ok(Value::Undefined)
        })
    }
}

/// Reject control handed to an initializer
#[derive(Clone)]
pub struct Rejecter {
    target: Deferred,
    once: OnceGuard,
}

impl Rejecter {
    /// Reject with `reason`
    pub fn reject(&self, reason: impl Into<Value>) {
        if self.once.claim() {
            self.target.settle(Outcome::Rejected, reason.into());
        }
    }

    /// The control as a callable value
    pub fn to_function(&self) -> Function {
        let this = self.clone();
        Function::named("reject", move |_receiver, args| {
            this.reject(args.first().cloned().unwrap_or_default());
            Ok(Value::Undefined)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_new_is_unsettled() {
        let scheduler = Scheduler::new();
        let d = Deferred::new(&scheduler, |_, _| {});
        assert_eq!(d.state(), State::Unsettled);
        assert_eq!(d.settled_value(), None);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_initializer_runs_synchronously() {
        let scheduler = Scheduler::new();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let d = Deferred::new(&scheduler, move |resolve, _| {
            flag.set(true);
            resolve.resolve(1);
        });
        assert!(ran.get());
        assert_eq!(d.state(), State::Fulfilled);
        assert_eq!(d.settled_value(), Some(Value::from(1)));
    }

    #[test]
    fn test_settlement_is_write_once() {
        let scheduler = Scheduler::new();
        let d = Deferred::new(&scheduler, |resolve, reject| {
            resolve.resolve("first");
            resolve.resolve("second");
            reject.reject("third");
        });
        assert_eq!(d.state(), State::Fulfilled);
        assert_eq!(d.settled_value(), Some(Value::from("first")));

        d.settle(Outcome::Rejected, Value::from("internal"));
        assert_eq!(d.settled_value(), Some(Value::from("first")));
    }

    #[test]
    fn test_try_new_rejects_on_error() {
        let scheduler = Scheduler::new();
        let reason = Value::error("init");
        let thrown = reason.clone();
        let d = Deferred::try_new(&scheduler, move |_, _| Err(thrown));
        assert_eq!(d.state(), State::Rejected);
        assert_eq!(d.settled_value(), Some(reason));
    }

    #[test]
    fn test_try_new_error_after_resolve_is_ignored() {
        let scheduler = Scheduler::new();
        let d = Deferred::try_new(&scheduler, |resolve, _| {
            resolve.resolve(7);
            Err(Value::error("late"))
        });
        assert_eq!(d.settled_value(), Some(Value::from(7)));
    }

    #[test]
    fn test_register_never_runs_inline() {
        let scheduler = Scheduler::new();
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let d = Deferred::new(&scheduler, |resolve, _| resolve.resolve(1));
        let downstream = d.then(move |v| {
            seen.set(seen.get() + 1);
            Ok(v)
        });
        assert_eq!(calls.get(), 0);
        assert_eq!(downstream.state(), State::Unsettled);

        scheduler.run_until_idle().unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(downstream.settled_value(), Some(Value::from(1)));
    }

    #[test]
    fn test_rearm_joins_waiting_batch() {
        let scheduler = Scheduler::new();
        let d = Deferred::new(&scheduler, |resolve, _| resolve.resolve(1));
        let a = d.then(Ok);
        let b = d.then(Ok);
        let c = d.then(Ok);

        // One flush task carrying all three records, nothing cancelled
        assert_eq!(scheduler.pending_tasks(), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.tasks_scheduled, 1);
        assert_eq!(stats.tasks_cancelled, 0);

        scheduler.run_until_idle().unwrap();
        for downstream in [a, b, c] {
            assert_eq!(downstream.state(), State::Fulfilled);
        }
    }

    #[test]
    fn test_settle_without_reactions_schedules_nothing() {
        let scheduler = Scheduler::new();
        let _d = Deferred::new(&scheduler, |resolve, _| resolve.resolve(1));
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.stats().tasks_scheduled, 0);
    }

    #[test]
    fn test_unobserved_rejection_is_counted() {
        let scheduler = Scheduler::new();
        let _d = Deferred::new(&scheduler, |_, reject| reject.reject("nobody listens"));
        assert_eq!(scheduler.stats().unobserved_rejections, 1);
    }

    #[test]
    fn test_unobserved_rejection_is_a_settle_time_snapshot() {
        let scheduler = Scheduler::new();
        let d = Deferred::new(&scheduler, |_, reject| reject.reject("late listener"));
        let caught = d.catch(Ok);
        scheduler.run_until_idle().unwrap();
        assert_eq!(caught.settled_value(), Some(Value::from("late listener")));
        assert_eq!(scheduler.stats().unobserved_rejections, 1);
    }

    #[test]
    fn test_dropped_scheduler_frees_queued_reactions() {
        struct DropFlag(Rc<Cell<bool>>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let scheduler = Scheduler::new();
        let dropped = Rc::new(Cell::new(false));
        let flag = DropFlag(dropped.clone());
        let d = Deferred::new(&scheduler, |resolve, _| resolve.resolve(1));
        let downstream = d.then(move |v| {
            let _held = &flag;
            Ok(v)
        });
        assert_eq!(scheduler.pending_tasks(), 1);

        drop(scheduler);
        drop(d);
        drop(downstream);
        assert!(dropped.get());
    }

    #[test]
    fn test_value_outliving_scheduler_still_settles() {
        let scheduler = Scheduler::new();
        let mut controls = None;
        let d = Deferred::new(&scheduler, |resolve, _| controls = Some(resolve));
        let downstream = d.then(Ok);
        drop(scheduler);

        assert!(d.scheduler().is_none());
        controls.unwrap().resolve("late");
        assert_eq!(d.settled_value(), Some(Value::from("late")));
        assert_eq!(downstream.state(), State::Unsettled);
    }

    #[test]
    fn test_non_callable_handlers_pass_through() {
        let scheduler = Scheduler::new();
        let d = Deferred::new(&scheduler, |resolve, _| resolve.resolve("v"));
        let downstream = d.register(Value::from(5), Value::Null);
        scheduler.run_until_idle().unwrap();
        assert_eq!(downstream.settled_value(), Some(Value::from("v")));
    }

    #[test]
    fn test_display() {
        let scheduler = Scheduler::new();
        let d = Deferred::new(&scheduler, |_, _| {});
        assert_eq!(d.to_string(), format!("Deferred#{}<unsettled>", d.id().as_u64()));
    }

    #[test]
    fn test_controls_as_functions() {
        let scheduler = Scheduler::new();
        let mut controls = None;
        let d = Deferred::new(&scheduler, |resolve, reject| {
            controls = Some((resolve.to_function(), reject.to_function()));
        });
        let (resolve, reject) = controls.unwrap();
        reject
            .call(&Value::Undefined, &[Value::from("no")])
            .unwrap();
        resolve
            .call(&Value::Undefined, &[Value::from("yes")])
            .unwrap();
        assert_eq!(d.state(), State::Rejected);
        assert_eq!(d.settled_value(), Some(Value::from("no")));
    }
}
