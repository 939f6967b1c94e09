//! Shared helpers for integration tests

#![allow(dead_code)]

use pledge_core::{Function, PlainObject, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Install a trace-level subscriber that writes through the test harness
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Ordered log of events observed by handlers
#[derive(Clone, Default)]
pub struct Recorder(Rc<RefCell<Vec<String>>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Object whose `then` runs `body` with (resolvePromise, rejectPromise)
pub fn thenable<F>(body: F) -> Value
where
    F: Fn(&Function, &Function) -> Result<(), Value> + 'static,
{
    let then = Function::new(move |_this, args| {
        let resolve = args[0].as_function().expect("resolvePromise");
        let reject = args[1].as_function().expect("rejectPromise");
        body(resolve, reject)?;
        Ok(Value::Undefined)
    });
    Value::object(PlainObject::new().with("then", then))
}

/// Call a one-argument callback with no receiver
pub fn call(f: &Function, arg: impl Into<Value>) -> Result<Value, Value> {
    f.call(&Value::Undefined, &[arg.into()])
}
