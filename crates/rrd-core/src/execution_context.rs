// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RrdError;
use crate::constraints::Constraints;
use crate::control::{BudgetMode, BudgetStatus, CancelToken};
use crate::observability::{ProgressSink, TelemetrySink};
use crate::repro::ReproMode;
use std::time::Instant;

/// Execution controls threaded through every pipeline stage.
///
/// Holds only borrowed hooks and limits; the per-run decode state lives in
/// [`crate::DecodeContext`], so one execution context may be shared by
/// concurrent decodes.
pub struct ExecutionContext<'a> {
    pub constraints: &'a Constraints,
    pub cancel: Option<&'a CancelToken>,
    pub budget_mode: BudgetMode,
    pub repro_mode: ReproMode,
    pub progress: Option<&'a dyn ProgressSink>,
    pub telemetry: Option<&'a dyn TelemetrySink>,
}

impl<'a> ExecutionContext<'a> {
    /// Creates a context with safe defaults and no optional hooks.
    pub fn new(constraints: &'a Constraints) -> Self {
        Self {
            constraints,
            cancel: None,
            budget_mode: BudgetMode::HardFail,
            repro_mode: ReproMode::Balanced,
            progress: None,
            telemetry: None,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_budget_mode(mut self, budget_mode: BudgetMode) -> Self {
        self.budget_mode = budget_mode;
        self
    }

    pub fn with_repro_mode(mut self, repro_mode: ReproMode) -> Self {
        self.repro_mode = repro_mode;
        self
    }

    pub fn with_progress_sink(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_telemetry_sink(mut self, telemetry: &'a dyn TelemetrySink) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    /// Returns [`RrdError::Cancelled`] when cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<(), RrdError> {
        if self.is_cancelled() {
            return Err(RrdError::cancelled());
        }
        Ok(())
    }

    /// Checks cancellation every `every` iterations; zero is treated as one.
    pub fn check_cancelled_every(&self, iteration: usize, every: usize) -> Result<(), RrdError> {
        let every = every.max(1);
        if iteration % every != 0 {
            return Ok(());
        }
        self.check_cancelled()
    }

    /// Checks elapsed wall-clock time against `constraints.time_budget_ms`.
    pub fn check_time_budget(&self, started_at: Instant) -> Result<BudgetStatus, RrdError> {
        let Some(limit_ms) = self.constraints.time_budget_ms else {
            return Ok(BudgetStatus::WithinBudget);
        };

        let elapsed_ms = started_at.elapsed().as_millis();
        if elapsed_ms <= u128::from(limit_ms) {
            return Ok(BudgetStatus::WithinBudget);
        }

        match self.budget_mode {
            BudgetMode::HardFail => Err(RrdError::resource_limit(format!(
                "constraints.time_budget_ms exceeded: elapsed_ms={elapsed_ms}, limit_ms={limit_ms}, budget_mode=HardFail"
            ))),
            BudgetMode::SoftDegrade => Ok(BudgetStatus::ExceededSoftDegrade),
        }
    }

    /// Checks a planned design-matrix size against `constraints.max_design_cells`.
    pub fn check_design_budget(&self, cells: usize) -> Result<BudgetStatus, RrdError> {
        let Some(limit) = self.constraints.max_design_cells else {
            return Ok(BudgetStatus::WithinBudget);
        };

        if cells <= limit {
            return Ok(BudgetStatus::WithinBudget);
        }

        match self.budget_mode {
            BudgetMode::HardFail => Err(RrdError::resource_limit(format!(
                "constraints.max_design_cells exceeded: cells={cells}, limit={limit}, budget_mode=HardFail"
            ))),
            BudgetMode::SoftDegrade => Ok(BudgetStatus::ExceededSoftDegrade),
        }
    }

    /// True when work inside a stage may be spread over a thread pool.
    ///
    /// Parallel paths skip per-item cancellation and budget polling, so they
    /// are only taken when neither is attached.
    pub fn allows_parallel(&self) -> bool {
        self.repro_mode.allows_parallel()
            && self.cancel.is_none()
            && self.constraints.time_budget_ms.is_none()
    }

    /// Emits clamped progress to the sink, if configured.
    pub fn report_progress(&self, fraction: f32) {
        if !fraction.is_finite() {
            return;
        }

        if let Some(sink) = self.progress {
            sink.on_progress(fraction.clamp(0.0, 1.0));
        }
    }

    pub fn record_scalar(&self, key: &'static str, value: f64) {
        if let Some(sink) = self.telemetry {
            sink.record_scalar(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionContext;
    use crate::constraints::Constraints;
    use crate::control::{BudgetMode, BudgetStatus, CancelToken};
    use crate::observability::{ProgressSink, TelemetrySink};
    use crate::repro::ReproMode;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct RecordingProgress {
        values: Mutex<Vec<f32>>,
    }

    impl ProgressSink for RecordingProgress {
        fn on_progress(&self, fraction: f32) {
            self.values
                .lock()
                .expect("progress mutex should lock")
                .push(fraction);
        }
    }

    #[derive(Default)]
    struct RecordingTelemetry {
        values: Mutex<Vec<(&'static str, f64)>>,
    }

    impl TelemetrySink for RecordingTelemetry {
        fn record_scalar(&self, key: &'static str, value: f64) {
            self.values
                .lock()
                .expect("telemetry mutex should lock")
                .push((key, value));
        }
    }

    #[test]
    fn new_sets_expected_defaults() {
        let constraints = Constraints::default();
        let ctx = ExecutionContext::new(&constraints);

        assert!(std::ptr::eq(ctx.constraints, &constraints));
        assert!(ctx.cancel.is_none());
        assert_eq!(ctx.budget_mode, BudgetMode::HardFail);
        assert_eq!(ctx.repro_mode, ReproMode::Balanced);
        assert!(ctx.progress.is_none());
        assert!(ctx.telemetry.is_none());
        assert!(ctx.allows_parallel());
    }

    #[test]
    fn cancel_token_is_observed_and_disables_parallel_paths() {
        let constraints = Constraints::default();
        let cancel = CancelToken::new();
        let ctx = ExecutionContext::new(&constraints).with_cancel(&cancel);

        assert!(!ctx.allows_parallel());
        assert!(ctx.check_cancelled().is_ok());
        cancel.cancel();
        let err = ctx
            .check_cancelled()
            .expect_err("cancelled token should return an error");
        assert_eq!(err.to_string(), "cancelled");
    }

    #[test]
    fn check_cancelled_every_zero_interval_is_treated_as_always_poll() {
        let constraints = Constraints::default();
        let cancel = CancelToken::new();
        let ctx = ExecutionContext::new(&constraints).with_cancel(&cancel);

        cancel.cancel();
        assert!(ctx.check_cancelled_every(3, 2).is_ok());
        let err = ctx
            .check_cancelled_every(3, 0)
            .expect_err("every=0 should behave like every=1");
        assert_eq!(err.to_string(), "cancelled");
    }

    #[test]
    fn strict_mode_disables_parallel_paths() {
        let constraints = Constraints::default();
        let ctx = ExecutionContext::new(&constraints).with_repro_mode(ReproMode::Strict);
        assert!(!ctx.allows_parallel());
    }

    #[test]
    fn time_budget_hard_fail_returns_resource_limit_error() {
        let constraints = Constraints {
            time_budget_ms: Some(1),
            ..Constraints::default()
        };
        let ctx = ExecutionContext::new(&constraints);
        let started_at = Instant::now()
            .checked_sub(Duration::from_millis(20))
            .expect("checked_sub should produce a valid earlier instant");

        let err = ctx
            .check_time_budget(started_at)
            .expect_err("hard fail should error on time budget exceed");
        let msg = err.to_string();
        assert!(msg.contains("constraints.time_budget_ms exceeded"));
        assert!(msg.contains("limit_ms=1"));
    }

    #[test]
    fn time_budget_soft_degrade_reports_exceeded_status() {
        let constraints = Constraints {
            time_budget_ms: Some(1),
            ..Constraints::default()
        };
        let ctx = ExecutionContext::new(&constraints).with_budget_mode(BudgetMode::SoftDegrade);
        let started_at = Instant::now()
            .checked_sub(Duration::from_millis(20))
            .expect("checked_sub should produce a valid earlier instant");

        assert_eq!(
            ctx.check_time_budget(started_at)
                .expect("soft mode should not error"),
            BudgetStatus::ExceededSoftDegrade
        );
    }

    #[test]
    fn design_budget_respects_limit_and_mode() {
        let constraints = Constraints {
            max_design_cells: Some(320),
            ..Constraints::default()
        };
        let hard = ExecutionContext::new(&constraints);
        assert_eq!(
            hard.check_design_budget(320).expect("at limit should pass"),
            BudgetStatus::WithinBudget
        );
        let err = hard
            .check_design_budget(321)
            .expect_err("over limit should fail in hard mode");
        assert_eq!(
            err.to_string(),
            "resource limit exceeded: constraints.max_design_cells exceeded: cells=321, limit=320, budget_mode=HardFail"
        );

        let soft = ExecutionContext::new(&constraints).with_budget_mode(BudgetMode::SoftDegrade);
        assert_eq!(
            soft.check_design_budget(321)
                .expect("soft mode should not error"),
            BudgetStatus::ExceededSoftDegrade
        );
    }

    #[test]
    fn report_progress_clamps_and_ignores_non_finite_values() {
        let constraints = Constraints::default();
        let progress = RecordingProgress::default();
        let ctx = ExecutionContext::new(&constraints).with_progress_sink(&progress);

        ctx.report_progress(-0.2);
        ctx.report_progress(0.5);
        ctx.report_progress(1.7);
        ctx.report_progress(f32::NAN);

        let got = progress
            .values
            .lock()
            .expect("progress values should lock")
            .clone();
        assert_eq!(got, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn record_scalar_writes_to_telemetry_sink_when_present() {
        let constraints = Constraints::default();
        ExecutionContext::new(&constraints).record_scalar("selected_lambda", 0.1);

        let telemetry = RecordingTelemetry::default();
        let ctx = ExecutionContext::new(&constraints).with_telemetry_sink(&telemetry);
        ctx.record_scalar("selected_lambda", 0.1);

        let got = telemetry
            .values
            .lock()
            .expect("telemetry values should lock")
            .clone();
        assert_eq!(got, vec![("selected_lambda", 0.1)]);
    }
}
