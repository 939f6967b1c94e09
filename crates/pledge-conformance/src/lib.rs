//! Pledge conformance
//!
//! The adapter generic Promises/A+ style suites drive ([`deferred`]), and a
//! built-in catalogue of cases grouped by section that exercises it.

#![warn(missing_docs)]

pub mod adapter;
pub mod cases;
pub mod report;

pub use adapter::{deferred, rejected, resolved, DeferredTriple};
pub use cases::{catalogue, CaseOutcome, ConformanceCase, Section};
pub use report::{CaseReport, RunSummary};
