use crate::types::{Report, RunStatus};
use gantry_core::Plan;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-run execution counters, updated atomically from concurrent step
/// tasks and finalized once into a [`Report`].
///
/// Counters only ever increase; the collector holds no locks, so metric
/// updates never serialize step execution.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    steps_executed: AtomicU64,
    steps_succeeded: AtomicU64,
    steps_failed: AtomicU64,
    steps_skipped: AtomicU64,
    steps_retried: AtomicU64,
    total_attempts: AtomicU64,
    validations_run: AtomicU64,
    auto_corrections_applied: AtomicU64,
}

impl MetricsCollector {
    /// Create a collector with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one execution attempt. The first attempt of a step counts it
    /// as executed; the second marks it as retried.
    pub fn record_attempt(&self, attempt: u32) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        if attempt == 1 {
            self.steps_executed.fetch_add(1, Ordering::Relaxed);
        } else if attempt == 2 {
            self.steps_retried.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a step reaching `Succeeded`.
    pub fn record_step_succeeded(&self) {
        self.steps_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a step reaching `Failed`.
    pub fn record_step_failed(&self) {
        self.steps_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a step reaching `Skipped`.
    pub fn record_step_skipped(&self) {
        self.steps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one validation pass.
    pub fn record_validation(&self) {
        self.validations_run.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one corrective round-trip.
    pub fn record_correction(&self) {
        self.auto_corrections_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Validation passes recorded so far.
    pub fn validations_run(&self) -> u64 {
        self.validations_run.load(Ordering::Relaxed)
    }

    /// Execution attempts recorded so far.
    pub fn total_attempts(&self) -> u64 {
        self.total_attempts.load(Ordering::Relaxed)
    }

    /// Produce the terminal report for a finished run.
    pub fn finalize(&self, plan: &Plan, status: RunStatus, duration: Duration) -> Report {
        Report {
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            status,
            total_steps: plan.step_count() as u64,
            steps_executed: self.steps_executed.load(Ordering::Relaxed),
            steps_succeeded: self.steps_succeeded.load(Ordering::Relaxed),
            steps_failed: self.steps_failed.load(Ordering::Relaxed),
            steps_skipped: self.steps_skipped.load(Ordering::Relaxed),
            steps_retried: self.steps_retried.load(Ordering::Relaxed),
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            validations_run: self.validations_run.load(Ordering::Relaxed),
            auto_corrections_applied: self.auto_corrections_applied.load(Ordering::Relaxed),
            duration_ms: duration.as_millis() as u64,
        }
    }
}
