//! Reaction records

use super::{Deferred, Outcome};
use crate::error::FailureKind;
use crate::resolution;
use crate::value::{Function, Value};
use tracing::debug;

/// A pair of optional handlers and the downstream value they settle
pub(crate) struct Reaction {
    on_fulfilled: Option<Function>,
    on_rejected: Option<Function>,
    downstream: Deferred,
}

impl Reaction {
    pub(crate) fn new(
        on_fulfilled: Option<Function>,
        on_rejected: Option<Function>,
        downstream: Deferred,
    ) -> Self {
        Self {
            on_fulfilled,
            on_rejected,
            downstream,
        }
    }

    /// Consume the record against the source's outcome
    pub(crate) fn run(self, outcome: Outcome, value: &Value) {
        self.downstream.record(|s| s.reactions_run += 1);

        let handler = match outcome {
            Outcome::Fulfilled => self.on_fulfilled,
            Outcome::Rejected => self.on_rejected,
        };
        let Some(handler) = handler else {
            self.downstream.settle(outcome, value.clone());
            return;
        };

        // Handlers run with no receiver
        match handler.call(&Value::Undefined, std::slice::from_ref(value)) {
            Ok(result) => resolution::resolve(&self.downstream, result),
            Err(thrown) => {
                self.downstream.record(|s| s.handler_failures += 1);
                debug!(
                    downstream = %self.downstream.id(),
                    kind = %FailureKind::HandlerFailure,
                    reason = %thrown,
                    "rejecting downstream"
                );
                self.downstream.settle(Outcome::Rejected, thrown);
            }
        }
    }
}
