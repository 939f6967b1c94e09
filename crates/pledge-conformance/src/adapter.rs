//! Test adapter: a fresh unsettled value plus its external controls

use pledge_core::{Deferred, Rejecter, Resolver, Scheduler, Value};

/// `{ value, resolve, reject }` for one freshly created deferred value
pub struct DeferredTriple {
    /// Still-unsettled deferred value
    pub value: Deferred,
    /// Its resolve control
    pub resolve: Resolver,
    /// Its reject control
    pub reject: Rejecter,
}

/// Create an unsettled deferred value and hand out its controls
pub fn deferred(scheduler: &Scheduler) -> DeferredTriple {
    let mut controls = None;
    let value = Deferred::new(scheduler, |resolve, reject| controls = Some((resolve, reject)));
    let (resolve, reject) = controls.expect("initializer runs synchronously");
    DeferredTriple {
        value,
        resolve,
        reject,
    }
}

/// A deferred value resolved with `value`
pub fn resolved(scheduler: &Scheduler, value: impl Into<Value>) -> Deferred {
    let triple = deferred(scheduler);
    triple.resolve.resolve(value);
    triple.value
}

/// A deferred value rejected with `reason`
pub fn rejected(scheduler: &Scheduler, reason: impl Into<Value>) -> Deferred {
    let triple = deferred(scheduler);
    triple.reject.reject(reason);
    triple.value
}

#[cfg(test)]
mod tests {
    use super::*;
    use pledge_core::State;

    #[test]
    fn test_deferred_starts_unsettled() {
        let scheduler = Scheduler::new();
        let triple = deferred(&scheduler);
        assert_eq!(triple.value.state(), State::Unsettled);
        triple.resolve.resolve(1);
        assert_eq!(triple.value.state(), State::Fulfilled);
    }

    #[test]
    fn test_helpers() {
        let scheduler = Scheduler::new();
        assert_eq!(resolved(&scheduler, "a").settled_value(), Some(Value::from("a")));
        let r = rejected(&scheduler, "b");
        assert_eq!(r.state(), State::Rejected);
        assert_eq!(r.settled_value(), Some(Value::from("b")));
    }
}
