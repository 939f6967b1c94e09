//! Pledge Core
//!
//! Single-threaded deferred values ("promises") with:
//! - A write-once settlement state machine ([`Deferred`])
//! - The Promises/A+ resolution procedure, including foreign thenables
//! - A cooperative reaction scheduler ([`Scheduler`]) that never runs a
//!   handler on the stack that registered it or settled its source
//!
//! # Example
//!
//! ```ignore
//! use pledge_core::{Deferred, Scheduler, Value};
//!
//! let scheduler = Scheduler::new();
//! let doubled = Deferred::new(&scheduler, |resolve, _reject| resolve.resolve(42))
//!     .then(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) * 2.0)));
//! scheduler.run_until_idle().unwrap();
//! assert_eq!(doubled.settled_value(), Some(Value::from(84)));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod deferred;
pub mod error;
mod resolution;
pub mod scheduler;
pub mod value;

pub use config::RuntimeConfig;
pub use deferred::{Deferred, DeferredId, Outcome, Rejecter, Resolver, State};
pub use error::{ConfigError, FailureKind, SchedulerError};
pub use scheduler::{Scheduler, SchedulerStats, TaskId};
pub use value::{
    ErrorKind, ErrorRef, Function, HostObject, NativeFn, ObjectRef, PlainObject, ThrowResult,
    Value,
};
