//! The resolution procedure
//!
//! Normalizes whatever a resolver or a handler produced into one settlement
//! of a downstream value:
//!
//! 1. the downstream value itself: reject with a `TypeError`
//! 2. another [`Deferred`]: adopt its outcome (fulfillment re-enters this
//!    procedure, so nested chains flatten at any depth)
//! 3. an object-like value with a callable `then`: call it with two
//!    once-guarded callbacks
//! 4. anything else: fulfill with it as is
//!
//! Synchronous recursion (a `then` that immediately resolves with another
//! thenable) is bounded by `RuntimeConfig::max_sync_depth`; past the bound
//! the next step continues on a fresh scheduler task.

use crate::deferred::{Deferred, Outcome};
use crate::error::FailureKind;
use crate::value::{Function, Value};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, trace};

/// Flag that lets exactly one of several competing callbacks through
#[derive(Clone, Default)]
pub(crate) struct OnceGuard(Rc<Cell<bool>>);

impl OnceGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Trip the guard; true only for the first caller
    pub(crate) fn claim(&self) -> bool {
        !self.0.replace(true)
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.0.get()
    }
}

/// Resolve `downstream` with `produced`
pub(crate) fn resolve(downstream: &Deferred, produced: Value) {
    let Some(scheduler) = downstream.scheduler() else {
        // Nothing left to trampoline onto
        resolve_now(downstream, produced);
        return;
    };
    match scheduler.enter_resolution() {
        Some(_depth) => resolve_now(downstream, produced),
        None => {
            scheduler.record(|s| s.trampolined_steps += 1);
            debug!(
                downstream = %downstream.id(),
                max_sync_depth = scheduler.config().max_sync_depth,
                "resolution depth reached, continuing on a new task"
            );
            let downstream = downstream.clone();
            scheduler.schedule(move || resolve(&downstream, produced));
        }
    }
}

fn resolve_now(downstream: &Deferred, produced: Value) {
    if let Value::Deferred(source) = &produced {
        if source.ptr_eq(downstream) {
            reject_self_reference(downstream);
        } else {
            adopt(downstream, source);
        }
        return;
    }

    if !produced.is_object_like() {
        downstream.settle(Outcome::Fulfilled, produced);
        return;
    }

    let then = match produced.get("then") {
        Ok(then) => then,
        Err(thrown) => {
            downstream.record(|s| s.then_access_failures += 1);
            debug!(
                downstream = %downstream.id(),
                kind = %FailureKind::ThenAccessFailure,
                reason = %thrown,
                "rejecting downstream"
            );
            downstream.settle(Outcome::Rejected, thrown);
            return;
        }
    };

    match then {
        Value::Function(then) => call_then(downstream, produced, then),
        _ => downstream.settle(Outcome::Fulfilled, produced),
    }
}

fn reject_self_reference(downstream: &Deferred) {
    downstream.record(|s| s.self_references += 1);
    debug!(
        downstream = %downstream.id(),
        kind = %FailureKind::SelfReference,
        "rejecting downstream"
    );
    downstream.settle(
        Outcome::Rejected,
        Value::type_error(FailureKind::SelfReference.to_string()),
    );
}

/// Follow another deferred value of this runtime
fn adopt(downstream: &Deferred, source: &Deferred) {
    trace!(downstream = %downstream.id(), source = %source.id(), "adopting");
    let on_fulfilled = {
        let downstream = downstream.clone();
        Function::unary(move |value| {
            resolve(&downstream, value);
            Ok(Value::Undefined)
        })
    };
    let on_rejected = {
        let downstream = downstream.clone();
        Function::unary(move |reason| {
            downstream.settle(Outcome::Rejected, reason);
            Ok(Value::Undefined)
        })
    };
    source.register_handlers(Some(on_fulfilled), Some(on_rejected));
}

/// Invoke a foreign `then` with `thenable` as receiver
fn call_then(downstream: &Deferred, thenable: Value, then: Function) {
    trace!(downstream = %downstream.id(), "calling foreign then");
    let once = OnceGuard::new();

    let resolve_promise = {
        let downstream = downstream.clone();
        let once = once.clone();
        Function::named("resolvePromise", move |_receiver, args| {
            if once.claim() {
                resolve(&downstream, args.first().cloned().unwrap_or_default());
            }
            Ok(Value::Undefined)
        })
    };
    let reject_promise = {
        let downstream = downstream.clone();
        let once = once.clone();
        Function::named("rejectPromise", move |_receiver, args| {
            if once.claim() {
                downstream.settle(Outcome::Rejected, args.first().cloned().unwrap_or_default());
            }
            Ok(Value::Undefined)
        })
    };

    let args = [
        Value::Function(resolve_promise),
        Value::Function(reject_promise),
    ];
    if let Err(thrown) = then.call(&thenable, &args) {
        if once.claim() {
            downstream.record(|s| s.then_invocation_failures += 1);
            debug!(
                downstream = %downstream.id(),
                kind = %FailureKind::ThenInvocationFailure,
                reason = %thrown,
                "rejecting downstream"
            );
            downstream.settle(Outcome::Rejected, thrown);
        } else {
            debug_assert!(once.is_tripped());
            trace!(downstream = %downstream.id(), "then threw after committing, ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::State;
    use crate::value::{ErrorKind, HostObject, PlainObject, ThrowResult};
    use crate::{RuntimeConfig, Scheduler};
    use std::cell::RefCell;

    fn unsettled(scheduler: &Scheduler) -> Deferred {
        Deferred::unsettled(scheduler)
    }

    fn thenable(then: Function) -> Value {
        Value::object(PlainObject::new().with("then", then))
    }

    #[test]
    fn test_once_guard() {
        let guard = OnceGuard::new();
        assert!(!guard.is_tripped());
        assert!(guard.claim());
        assert!(!guard.claim());
        assert!(guard.clone().is_tripped());
    }

    #[test]
    fn test_plain_values_fulfill_directly() {
        let scheduler = Scheduler::new();
        for value in [
            Value::Undefined,
            Value::Null,
            Value::from(false),
            Value::from(3.5),
            Value::from("s"),
        ] {
            let d = unsettled(&scheduler);
            resolve(&d, value.clone());
            assert_eq!(d.settled_value(), Some(value));
        }
    }

    #[test]
    fn test_object_without_then_fulfills_with_object() {
        let scheduler = Scheduler::new();
        let obj = Value::object(PlainObject::new().with("then", 5));
        let d = unsettled(&scheduler);
        resolve(&d, obj.clone());
        assert_eq!(d.state(), State::Fulfilled);
        assert_eq!(d.settled_value(), Some(obj));
    }

    #[test]
    fn test_self_reference_rejects_with_type_error() {
        let scheduler = Scheduler::new();
        let d = unsettled(&scheduler);
        resolve(&d, Value::Deferred(d.clone()));
        assert_eq!(d.state(), State::Rejected);
        let reason = d.settled_value().unwrap();
        assert_eq!(reason.as_error().map(|e| e.kind()), Some(ErrorKind::TypeError));
        assert_eq!(scheduler.stats().self_references, 1);
    }

    #[test]
    fn test_then_access_failure_rejects() {
        struct Getter;
        impl HostObject for Getter {
            fn get(&self, _key: &str) -> ThrowResult {
                Err(Value::from("getter threw"))
            }
        }

        let scheduler = Scheduler::new();
        let d = unsettled(&scheduler);
        resolve(&d, Value::Object(crate::ObjectRef::new(Getter)));
        assert_eq!(d.state(), State::Rejected);
        assert_eq!(d.settled_value(), Some(Value::from("getter threw")));
        assert_eq!(scheduler.stats().then_access_failures, 1);
    }

    #[test]
    fn test_then_receives_thenable_as_receiver() {
        let scheduler = Scheduler::new();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let obj = thenable(Function::new(move |this, _args| {
            *sink.borrow_mut() = Some(this.clone());
            Ok(Value::Undefined)
        }));
        let d = unsettled(&scheduler);
        resolve(&d, obj.clone());
        assert_eq!(seen.borrow().clone(), Some(obj));
        assert_eq!(d.state(), State::Unsettled);
    }

    #[test]
    fn test_first_callback_wins() {
        let scheduler = Scheduler::new();
        let obj = thenable(Function::new(|_, args| {
            args[0].as_function().unwrap().call(&Value::Undefined, &[Value::from(1)])?;
            args[1].as_function().unwrap().call(&Value::Undefined, &[Value::from(2)])?;
            args[0].as_function().unwrap().call(&Value::Undefined, &[Value::from(3)])?;
            Ok(Value::Undefined)
        }));
        let d = unsettled(&scheduler);
        resolve(&d, obj);
        assert_eq!(d.settled_value(), Some(Value::from(1)));
    }

    #[test]
    fn test_throw_after_commit_is_suppressed() {
        let scheduler = Scheduler::new();
        let obj = thenable(Function::new(|_, args| {
            args[1].as_function().unwrap().call(&Value::Undefined, &[Value::from("r")])?;
            Err(Value::from("late throw"))
        }));
        let d = unsettled(&scheduler);
        resolve(&d, obj);
        assert_eq!(d.state(), State::Rejected);
        assert_eq!(d.settled_value(), Some(Value::from("r")));
        assert_eq!(scheduler.stats().then_invocation_failures, 0);
    }

    #[test]
    fn test_throw_before_commit_rejects() {
        let scheduler = Scheduler::new();
        let obj = thenable(Function::new(|_, _| Err(Value::from("early throw"))));
        let d = unsettled(&scheduler);
        resolve(&d, obj);
        assert_eq!(d.settled_value(), Some(Value::from("early throw")));
        assert_eq!(scheduler.stats().then_invocation_failures, 1);
    }

    #[test]
    fn test_callable_with_then_property_is_thenable() {
        let scheduler = Scheduler::new();
        let callable = Function::new(|_, _| Ok(Value::Undefined));
        callable.properties().set(
            "then",
            Function::new(|_, args| {
                args[0].as_function().unwrap().call(&Value::Undefined, &[Value::from("fn")])
            }),
        );
        let d = unsettled(&scheduler);
        resolve(&d, Value::Function(callable));
        assert_eq!(d.settled_value(), Some(Value::from("fn")));
    }

    #[test]
    fn test_adopting_deferred_waits_for_scheduler() {
        let scheduler = Scheduler::new();
        let source = Deferred::new(&scheduler, |resolve, _| resolve.resolve("inner"));
        let d = unsettled(&scheduler);
        resolve(&d, Value::Deferred(source));
        assert_eq!(d.state(), State::Unsettled);
        scheduler.run_until_idle().unwrap();
        assert_eq!(d.settled_value(), Some(Value::from("inner")));
    }

    #[test]
    fn test_depth_bound_trampolines() {
        // A thenable that synchronously resolves with another thenable, `n` times
        fn chain(n: u32) -> Value {
            if n == 0 {
                return Value::from("bottom");
            }
            thenable(Function::new(move |_, args| {
                args[0]
                    .as_function()
                    .unwrap()
                    .call(&Value::Undefined, &[chain(n - 1)])
            }))
        }

        let scheduler = Scheduler::with_config(RuntimeConfig {
            max_sync_depth: 4,
            ..RuntimeConfig::default()
        });
        let d = unsettled(&scheduler);
        resolve(&d, chain(10));
        assert_eq!(d.state(), State::Unsettled);
        assert!(scheduler.stats().trampolined_steps > 0);

        scheduler.run_until_idle().unwrap();
        assert_eq!(d.settled_value(), Some(Value::from("bottom")));
    }
}
