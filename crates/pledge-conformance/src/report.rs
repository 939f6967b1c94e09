//! Run results and their machine-readable form

use crate::cases::{CaseOutcome, ConformanceCase, Section};
use pledge_core::RuntimeConfig;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

/// Result of one case
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    /// Case id
    pub id: &'static str,
    /// Clause group
    pub section: Section,
    /// What the case checks
    pub description: &'static str,
    /// Whether every check held
    pub passed: bool,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Wall time in microseconds
    pub duration_us: u64,
}

/// Results of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Cases run
    pub total: usize,
    /// Cases passed
    pub passed: usize,
    /// Cases failed
    pub failed: usize,
    /// Whether the run stopped at the first failure
    pub stopped_early: bool,
    /// Per-case results, in run order
    pub cases: Vec<CaseReport>,
}

impl RunSummary {
    /// Run `cases` in order on schedulers built from `config`, optionally
    /// stopping at the first failure
    pub fn collect<'a, I>(cases: I, config: &RuntimeConfig, fail_fast: bool) -> Self
    where
        I: IntoIterator<Item = &'a ConformanceCase>,
    {
        let mut summary = RunSummary::default();
        for case in cases {
            let started = Instant::now();
            let outcome = case.run_with(config);
            let duration_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
            debug!(case = case.id, passed = outcome.is_pass(), duration_us, "case finished");

            let failed = !outcome.is_pass();
            summary.push(CaseReport {
                id: case.id,
                section: case.section,
                description: case.description,
                passed: outcome.is_pass(),
                message: match outcome {
                    CaseOutcome::Pass => None,
                    CaseOutcome::Fail(message) => Some(message),
                },
                duration_us,
            });
            if failed && fail_fast {
                summary.stopped_early = true;
                break;
            }
        }
        info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            "conformance run complete"
        );
        summary
    }

    fn push(&mut self, report: CaseReport) {
        self.total += 1;
        if report.passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.cases.push(report);
    }

    /// Whether every case passed
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Render as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
