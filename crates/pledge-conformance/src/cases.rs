//! Conformance case catalogue
//!
//! Each case builds its own scheduler, drives deferred values through the
//! adapter and checks what the handlers observed. Case ids follow the
//! Promises/A+ clause numbering.

use crate::adapter::{deferred, rejected, resolved};
use pledge_core::{
    Deferred, ErrorKind, Function, HostObject, ObjectRef, PlainObject, RuntimeConfig, Scheduler,
    State, ThrowResult, Value,
};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Clause group a case belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// 2.1 deferred-value states
    States,
    /// 2.2 the registration method
    Then,
    /// 2.3 the resolution procedure
    Resolution,
}

impl Section {
    /// Clause number
    pub fn number(self) -> &'static str {
        match self {
            Section::States => "2.1",
            Section::Then => "2.2",
            Section::Resolution => "2.3",
        }
    }

    /// Heading
    pub fn title(self) -> &'static str {
        match self {
            Section::States => "States",
            Section::Then => "The then method",
            Section::Resolution => "The resolution procedure",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number(), self.title())
    }
}

/// Result of one case
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    /// Every check held
    Pass,
    /// A check failed
    Fail(String),
}

impl CaseOutcome {
    /// Whether the case passed
    pub fn is_pass(&self) -> bool {
        matches!(self, CaseOutcome::Pass)
    }
}

type CaseResult = Result<(), String>;

/// A named conformance check
pub struct ConformanceCase {
    /// Clause id plus a short slug, unique within the catalogue
    pub id: &'static str,
    /// Clause group
    pub section: Section,
    /// What the case checks
    pub description: &'static str,
    body: fn(&RuntimeConfig) -> CaseResult,
}

impl ConformanceCase {
    /// Run the case with default settings
    pub fn run(&self) -> CaseOutcome {
        self.run_with(&RuntimeConfig::default())
    }

    /// Run the case on a scheduler built from `config`
    pub fn run_with(&self, config: &RuntimeConfig) -> CaseOutcome {
        match (self.body)(config) {
            Ok(()) => CaseOutcome::Pass,
            Err(message) => CaseOutcome::Fail(message),
        }
    }

    /// Whether `filter` appears in the id or description
    pub fn matches(&self, filter: &str) -> bool {
        self.id.contains(filter) || self.description.contains(filter)
    }
}

macro_rules! case {
    ($id:literal, $section:ident, $description:literal, $body:path) => {
        ConformanceCase {
            id: $id,
            section: Section::$section,
            description: $description,
            body: $body,
        }
    };
}

/// Every built-in case, in clause order
pub fn catalogue() -> Vec<ConformanceCase> {
    vec![
        case!(
            "2.1.2.1-no-reject-after-fulfill",
            States,
            "a fulfilled value cannot become rejected",
            fulfilled_cannot_reject
        ),
        case!(
            "2.1.2.2-value-is-stable",
            States,
            "the fulfillment value never changes",
            fulfillment_value_is_stable
        ),
        case!(
            "2.1.3.1-no-fulfill-after-reject",
            States,
            "a rejected value cannot become fulfilled",
            rejected_cannot_fulfill
        ),
        case!(
            "2.2.1-non-callable-ignored",
            Then,
            "non-callable handlers are ignored",
            non_callable_handlers_ignored
        ),
        case!(
            "2.2.2.2-not-before-fulfilled",
            Then,
            "onFulfilled does not run before fulfillment",
            on_fulfilled_not_early
        ),
        case!(
            "2.2.2.3-fulfilled-once",
            Then,
            "onFulfilled runs exactly once",
            on_fulfilled_once
        ),
        case!(
            "2.2.3.3-rejected-once",
            Then,
            "onRejected runs exactly once",
            on_rejected_once
        ),
        case!(
            "2.2.4-async-when-settled",
            Then,
            "handlers never run on the registering stack",
            handlers_are_async
        ),
        case!(
            "2.2.5-no-receiver",
            Then,
            "handlers are called without a receiver",
            handlers_without_receiver
        ),
        case!(
            "2.2.6.1-fulfilled-order",
            Then,
            "fulfillment handlers run in registration order",
            fulfilled_handlers_in_order
        ),
        case!(
            "2.2.6.2-rejected-order",
            Then,
            "rejection handlers run in registration order",
            rejected_handlers_in_order
        ),
        case!(
            "2.2.7-returns-new-value",
            Then,
            "registration returns a distinct deferred value",
            registration_returns_new_value
        ),
        case!(
            "2.2.7.2-throw-rejects",
            Then,
            "a throwing handler rejects the downstream value",
            throwing_handler_rejects
        ),
        case!(
            "2.2.7.3-fulfillment-passes-through",
            Then,
            "fulfillment passes through a missing onFulfilled",
            fulfillment_passes_through
        ),
        case!(
            "2.2.7.4-rejection-passes-through",
            Then,
            "rejection passes through a missing onRejected",
            rejection_passes_through
        ),
        case!(
            "2.3.1-self-resolution",
            Resolution,
            "resolving with itself rejects with a TypeError",
            self_resolution_rejects
        ),
        case!(
            "2.3.2-adopt-fulfillment",
            Resolution,
            "a pending deferred value is adopted on fulfillment",
            adopt_fulfillment
        ),
        case!(
            "2.3.2-adopt-rejection",
            Resolution,
            "a pending deferred value is adopted on rejection",
            adopt_rejection
        ),
        case!(
            "2.3.2-nested-chain",
            Resolution,
            "nested deferred values flatten to the innermost outcome",
            nested_chain_flattens
        ),
        case!(
            "2.3.3.2-then-getter-throws",
            Resolution,
            "a throwing then getter rejects",
            then_getter_throws
        ),
        case!(
            "2.3.3.3-then-receiver",
            Resolution,
            "then is called with the thenable as receiver",
            then_receives_thenable
        ),
        case!(
            "2.3.3.3.3-first-call-wins",
            Resolution,
            "only the first resolvePromise/rejectPromise call counts",
            first_call_wins
        ),
        case!(
            "2.3.3.3.4-throw-after-resolve",
            Resolution,
            "a throw after resolvePromise is ignored",
            throw_after_resolve_ignored
        ),
        case!(
            "2.3.3.3.4.2-throw-rejects",
            Resolution,
            "a throw before any callback rejects",
            throw_before_callback_rejects
        ),
        case!(
            "2.3.3.4-non-callable-then",
            Resolution,
            "a non-callable then fulfills with the object",
            non_callable_then_fulfills
        ),
        case!(
            "2.3.4-primitives",
            Resolution,
            "primitives fulfill as themselves",
            primitives_fulfill
        ),
    ]
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn drain(scheduler: &Scheduler) -> CaseResult {
    scheduler.run_until_idle().map(|_| ()).map_err(|e| e.to_string())
}

fn ensure(condition: bool, message: impl Into<String>) -> CaseResult {
    if condition {
        Ok(())
    } else {
        Err(message.into())
    }
}

fn expect_settled(d: &Deferred, state: State, expected: &Value) -> CaseResult {
    ensure(
        d.state() == state,
        format!("expected {}, found {}", state.as_str(), d.state().as_str()),
    )?;
    match d.settled_value() {
        Some(actual) if actual.same_value(expected) => Ok(()),
        other => Err(format!("expected {:?}, found {:?}", expected, other)),
    }
}

/// Ordered log of handler observations
#[derive(Clone, Default)]
struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// A handler that records `label:value` and returns its argument
    fn recording(&self, label: &'static str) -> Value {
        let log = self.clone();
        Value::Function(Function::unary(move |v| {
            log.push(format!("{}:{}", label, v));
            Ok(v)
        }))
    }

    fn expect(&self, expected: &[&str]) -> CaseResult {
        let entries = self.entries();
        ensure(
            entries == expected,
            format!("expected {:?}, observed {:?}", expected, entries),
        )
    }
}

fn thenable<F>(body: F) -> Value
where
    F: Fn(&Function, &Function) -> Result<(), Value> + 'static,
{
    let then = Function::new(move |_this, args| {
        match (
            args.first().and_then(Value::as_function),
            args.get(1).and_then(Value::as_function),
        ) {
            (Some(resolve), Some(reject)) => body(resolve, reject)?,
            _ => return Err(Value::type_error("then expects two callbacks")),
        }
        Ok(Value::Undefined)
    });
    Value::object(PlainObject::new().with("then", then))
}

fn call(f: &Function, arg: impl Into<Value>) -> Result<(), Value> {
    f.call(&Value::Undefined, &[arg.into()]).map(|_| ())
}

// ---------------------------------------------------------------------------
// 2.1 States
// ---------------------------------------------------------------------------

fn fulfilled_cannot_reject(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let triple = deferred(&scheduler);
    let log = Log::default();
    triple
        .value
        .register(log.recording("fulfilled"), log.recording("rejected"));
    triple.resolve.resolve("dummy");
    triple.reject.reject("other");
    drain(&scheduler)?;
    log.expect(&["fulfilled:dummy"])
}

fn fulfillment_value_is_stable(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let triple = deferred(&scheduler);
    let first = Value::object(PlainObject::new());
    triple.resolve.resolve(first.clone());
    triple.resolve.resolve(Value::object(PlainObject::new()));
    drain(&scheduler)?;
    expect_settled(&triple.value, State::Fulfilled, &first)
}

fn rejected_cannot_fulfill(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let triple = deferred(&scheduler);
    let log = Log::default();
    triple
        .value
        .register(log.recording("fulfilled"), log.recording("rejected"));
    triple.reject.reject("dummy");
    triple.resolve.resolve("other");
    drain(&scheduler)?;
    log.expect(&["rejected:dummy"])
}

// ---------------------------------------------------------------------------
// 2.2 The then method
// ---------------------------------------------------------------------------

fn non_callable_handlers_ignored(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let ok = resolved(&scheduler, "v").register(Value::from(5), Value::from(false));
    let err = rejected(&scheduler, "r").register(Value::Null, Value::from("not a function"));
    drain(&scheduler)?;
    expect_settled(&ok, State::Fulfilled, &Value::from("v"))?;
    expect_settled(&err, State::Rejected, &Value::from("r"))
}

fn on_fulfilled_not_early(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let triple = deferred(&scheduler);
    let log = Log::default();
    triple.value.register(log.recording("fulfilled"), Value::Undefined);
    drain(&scheduler)?;
    log.expect(&[])?;
    triple.resolve.resolve(1);
    log.expect(&[])?;
    drain(&scheduler)?;
    log.expect(&["fulfilled:1"])
}

fn on_fulfilled_once(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let triple = deferred(&scheduler);
    let log = Log::default();
    triple.value.register(log.recording("fulfilled"), Value::Undefined);
    triple.resolve.resolve(1);
    triple.resolve.resolve(2);
    triple.reject.reject(3);
    drain(&scheduler)?;
    triple.resolve.resolve(4);
    drain(&scheduler)?;
    log.expect(&["fulfilled:1"])
}

fn on_rejected_once(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let triple = deferred(&scheduler);
    let log = Log::default();
    triple.value.register(Value::Undefined, log.recording("rejected"));
    triple.reject.reject(1);
    triple.reject.reject(2);
    triple.resolve.resolve(3);
    drain(&scheduler)?;
    log.expect(&["rejected:1"])
}

fn handlers_are_async(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    resolved(&scheduler, 1).then(move |v| {
        flag.set(true);
        Ok(v)
    });
    ensure(!ran.get(), "handler ran on the registering stack")?;

    let flag = ran.clone();
    rejected(&scheduler, 1).catch(move |v| {
        flag.set(true);
        Ok(v)
    });
    ensure(!ran.get(), "rejection handler ran on the registering stack")?;

    drain(&scheduler)?;
    ensure(ran.get(), "handler never ran")
}

fn handlers_without_receiver(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let receivers = Rc::new(RefCell::new(Vec::new()));
    let observer = |sink: Rc<RefCell<Vec<Value>>>| {
        Value::Function(Function::new(move |this, _args| {
            sink.borrow_mut().push(this.clone());
            Ok(Value::Undefined)
        }))
    };
    resolved(&scheduler, 1).register(observer(receivers.clone()), Value::Undefined);
    rejected(&scheduler, 1).register(Value::Undefined, observer(receivers.clone()));
    drain(&scheduler)?;
    let receivers = receivers.borrow();
    ensure(receivers.len() == 2, format!("expected 2 calls, saw {}", receivers.len()))?;
    ensure(
        receivers.iter().all(|this| *this == Value::Undefined),
        format!("receivers were {:?}", *receivers),
    )
}

fn fulfilled_handlers_in_order(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let triple = deferred(&scheduler);
    let log = Log::default();
    for label in ["a", "b", "c"] {
        triple.value.register(log.recording(label), Value::Undefined);
    }
    triple.resolve.resolve("x");
    // A late registration still runs after the earlier ones
    triple.value.register(log.recording("d"), Value::Undefined);
    drain(&scheduler)?;
    log.expect(&["a:x", "b:x", "c:x", "d:x"])
}

fn rejected_handlers_in_order(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let triple = deferred(&scheduler);
    let log = Log::default();
    for label in ["a", "b", "c"] {
        triple.value.register(Value::Undefined, log.recording(label));
    }
    triple.reject.reject("x");
    drain(&scheduler)?;
    log.expect(&["a:x", "b:x", "c:x"])
}

fn registration_returns_new_value(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let source = resolved(&scheduler, 1);
    let downstream = source.register(Value::Undefined, Value::Undefined);
    ensure(!downstream.ptr_eq(&source), "registration returned the source")?;
    ensure(
        downstream.state() == State::Unsettled,
        "downstream settled synchronously",
    )?;
    drain(&scheduler)?;
    expect_settled(&downstream, State::Fulfilled, &Value::from(1))
}

fn throwing_handler_rejects(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let reason = Value::error("boom");
    let thrown = reason.clone();
    let from_fulfilled = resolved(&scheduler, 1).then(move |_| Err(thrown.clone()));
    let thrown = reason.clone();
    let from_rejected = rejected(&scheduler, 1).catch(move |_| Err(thrown.clone()));
    drain(&scheduler)?;
    expect_settled(&from_fulfilled, State::Rejected, &reason)?;
    expect_settled(&from_rejected, State::Rejected, &reason)
}

fn fulfillment_passes_through(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let value = Value::object(PlainObject::new());
    let downstream = resolved(&scheduler, value.clone()).catch(|_| Ok(Value::from("wrong")));
    drain(&scheduler)?;
    expect_settled(&downstream, State::Fulfilled, &value)
}

fn rejection_passes_through(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let reason = Value::error("x");
    let downstream = rejected(&scheduler, reason.clone()).then(|_| Ok(Value::from("wrong")));
    drain(&scheduler)?;
    expect_settled(&downstream, State::Rejected, &reason)
}

// ---------------------------------------------------------------------------
// 2.3 The resolution procedure
// ---------------------------------------------------------------------------

fn self_resolution_rejects(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let triple = deferred(&scheduler);
    triple.resolve.resolve(triple.value.clone());
    drain(&scheduler)?;
    ensure(triple.value.state() == State::Rejected, "self resolution did not reject")?;
    let kind = triple
        .value
        .settled_value()
        .and_then(|v| v.as_error().map(|e| e.kind()));
    ensure(
        kind == Some(ErrorKind::TypeError),
        format!("expected a TypeError, found {:?}", kind),
    )
}

fn adopt_fulfillment(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let inner = deferred(&scheduler);
    let outer = deferred(&scheduler);
    outer.resolve.resolve(inner.value.clone());
    drain(&scheduler)?;
    ensure(outer.value.state() == State::Unsettled, "settled before the adopted value")?;
    inner.resolve.resolve("adopted");
    drain(&scheduler)?;
    expect_settled(&outer.value, State::Fulfilled, &Value::from("adopted"))
}

fn adopt_rejection(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let inner = deferred(&scheduler);
    let downstream = resolved(&scheduler, 0).then({
        let inner = inner.value.clone();
        move |_| Ok(Value::Deferred(inner.clone()))
    });
    drain(&scheduler)?;
    inner.reject.reject("adopted");
    drain(&scheduler)?;
    expect_settled(&downstream, State::Rejected, &Value::from("adopted"))
}

fn nested_chain_flattens(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let mut current = resolved(&scheduler, "innermost");
    for _ in 0..10 {
        let triple = deferred(&scheduler);
        triple.resolve.resolve(current);
        current = triple.value;
    }
    drain(&scheduler)?;
    expect_settled(&current, State::Fulfilled, &Value::from("innermost"))
}

fn then_getter_throws(config: &RuntimeConfig) -> CaseResult {
    struct ThrowingGetter(Value);

    impl HostObject for ThrowingGetter {
        fn get(&self, _key: &str) -> ThrowResult {
            Err(self.0.clone())
        }
    }

    let scheduler = Scheduler::with_config(config.clone());
    let reason = Value::error("getter");
    let object = Value::Object(ObjectRef::new(ThrowingGetter(reason.clone())));
    let downstream = resolved(&scheduler, 0).then(move |_| Ok(object.clone()));
    drain(&scheduler)?;
    expect_settled(&downstream, State::Rejected, &reason)
}

fn then_receives_thenable(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let receiver = Rc::new(RefCell::new(Value::Undefined));
    let sink = receiver.clone();
    let object = Value::object(PlainObject::new().with(
        "then",
        Function::new(move |this, _args| {
            *sink.borrow_mut() = this.clone();
            Ok(Value::Undefined)
        }),
    ));
    let triple = deferred(&scheduler);
    triple.resolve.resolve(object.clone());
    drain(&scheduler)?;
    let receiver = receiver.borrow();
    ensure(
        receiver.same_value(&object),
        format!("then was called with receiver {:?}", *receiver),
    )
}

fn first_call_wins(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let twice = deferred(&scheduler);
    twice.resolve.resolve(thenable(|resolve, reject| {
        call(resolve, "first")?;
        call(resolve, "second")?;
        call(reject, "third")
    }));
    let mixed = deferred(&scheduler);
    mixed.resolve.resolve(thenable(|resolve, reject| {
        call(reject, "first")?;
        call(resolve, "second")
    }));
    drain(&scheduler)?;
    expect_settled(&twice.value, State::Fulfilled, &Value::from("first"))?;
    expect_settled(&mixed.value, State::Rejected, &Value::from("first"))
}

fn throw_after_resolve_ignored(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let triple = deferred(&scheduler);
    triple.resolve.resolve(thenable(|resolve, _| {
        call(resolve, "kept")?;
        Err(Value::error("ignored"))
    }));
    drain(&scheduler)?;
    expect_settled(&triple.value, State::Fulfilled, &Value::from("kept"))
}

fn throw_before_callback_rejects(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let reason = Value::error("thrown");
    let thrown = reason.clone();
    let triple = deferred(&scheduler);
    triple.resolve.resolve(thenable(move |_, _| Err(thrown.clone())));
    drain(&scheduler)?;
    expect_settled(&triple.value, State::Rejected, &reason)
}

fn non_callable_then_fulfills(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let object = Value::object(PlainObject::new().with("then", 5));
    let triple = deferred(&scheduler);
    triple.resolve.resolve(object.clone());
    drain(&scheduler)?;
    expect_settled(&triple.value, State::Fulfilled, &object)
}

fn primitives_fulfill(config: &RuntimeConfig) -> CaseResult {
    let scheduler = Scheduler::with_config(config.clone());
    let values = [
        Value::Undefined,
        Value::Null,
        Value::from(false),
        Value::from(0),
        Value::Number(f64::NAN),
        Value::from(""),
        Value::from("string"),
    ];
    let downstreams: Vec<_> = values
        .iter()
        .map(|v| {
            let v = v.clone();
            resolved(&scheduler, 0).then(move |_| Ok(v.clone()))
        })
        .collect();
    drain(&scheduler)?;
    for (downstream, value) in downstreams.iter().zip(values.iter()) {
        expect_settled(downstream, State::Fulfilled, value)?;
    }
    Ok(())
}
