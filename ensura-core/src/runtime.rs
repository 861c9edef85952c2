//! The enforcement loop. A single-threaded cooperative runner: one step at a
//! time, in plan order, with a cancellation token checked between steps and
//! a `Mutex` guaranteeing at most one `run_once` in flight at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::handlers::{HandlerCtx, HandlerRegistry};
use crate::plan::{Plan, Step};

/// Outcome of one step within a single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepStatus {
    Satisfied,
    Violated,
    Repaired,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    pub steps: Vec<StepResult>,
}

impl RunResult {
    pub fn all_satisfied(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Satisfied | StepStatus::Repaired))
    }

    pub fn any_failed(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Failed)
    }
}

/// A cancellation handle shared between a running loop and whoever wants to
/// stop it. Checked between steps and during the inter-pass sleep, never
/// mid-handler-call.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Runtime {
    registry: Arc<HandlerRegistry>,
    config: RuntimeConfig,
    run_lock: Mutex<()>,
}

impl Runtime {
    pub fn new(registry: Arc<HandlerRegistry>, config: RuntimeConfig) -> Self {
        Self {
            registry,
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// One pass over the plan. Holds `run_lock` for its duration so
    /// overlapping passes are impossible even from another thread.
    pub fn run_once(&self, plan: &Plan, cancel: &CancelToken) -> RunResult {
        let _guard = self.run_lock.lock().expect("run lock poisoned");
        let mut results = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            if cancel.is_cancelled() {
                results.push(StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Cancelled,
                    message: "run cancelled before this step".to_string(),
                    attempts: 0,
                });
                break;
            }
            results.push(self.run_step(step, plan.default_retry, cancel));
        }
        RunResult { steps: results }
    }

    fn run_step(&self, step: &Step, plan_default_retry: Option<u32>, cancel: &CancelToken) -> StepResult {
        let Some(handler) = self.registry.lookup(&step.handler) else {
            return StepResult {
                step_id: step.id.clone(),
                status: StepStatus::Failed,
                message: format!("no handler registered under the name `{}`", step.handler),
                attempts: 0,
            };
        };
        let ctx = self.ctx_for(step);

        let r = handler.check(&ctx);
        if r.success {
            return StepResult {
                step_id: step.id.clone(),
                status: StepStatus::Satisfied,
                message: r.message,
                attempts: 1,
            };
        }
        if self.config.dry_run {
            return StepResult {
                step_id: step.id.clone(),
                status: StepStatus::Violated,
                message: r.message,
                attempts: 1,
            };
        }

        let effective_retries = step
            .retry_override
            .or(plan_default_retry)
            .unwrap_or(self.config.max_retries);
        let mut attempts = 0;
        for attempt in 1..=effective_retries {
            if cancel.is_cancelled() {
                return StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Cancelled,
                    message: "run cancelled mid-retry".to_string(),
                    attempts,
                };
            }
            attempts = attempt + 1;
            let enforce_result = handler.enforce(&ctx);
            if !enforce_result.success {
                continue;
            }
            let recheck = handler.check(&ctx);
            if recheck.success {
                return StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Repaired,
                    message: recheck.message,
                    attempts,
                };
            }
        }
        StepResult {
            step_id: step.id.clone(),
            status: StepStatus::Failed,
            message: format!("exhausted {effective_retries} repair attempt(s) for {}", step.id),
            attempts,
        }
    }

    fn ctx_for<'a>(&self, step: &'a Step) -> HandlerCtx<'a> {
        HandlerCtx {
            subject: &step.subject,
            condition: &step.condition,
            args: &step.args,
        }
    }

    /// Check-only mode: a single dry pass, independent of the configured
    /// `dry_run` flag.
    pub fn check_only(&self, plan: &Plan) -> RunResult {
        let forced = Self {
            registry: Arc::clone(&self.registry),
            config: RuntimeConfig {
                dry_run: true,
                ..self.config.clone()
            },
            run_lock: Mutex::new(()),
        };
        forced.run_once(plan, &CancelToken::new())
    }

    /// Continuous mode: run, report, sleep, repeat until cancelled. The
    /// sleep is chopped into short slices so cancellation wakes it promptly
    /// instead of waiting out the full interval.
    pub fn run_continuous<F: FnMut(&RunResult)>(&self, plan: &Plan, cancel: &CancelToken, mut on_result: F) {
        const SLEEP_SLICE: Duration = Duration::from_millis(200);
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let result = self.run_once(plan, cancel);
            on_result(&result);
            if cancel.is_cancelled() {
                return;
            }
            let mut remaining = Duration::from_secs(self.config.interval_seconds);
            while remaining > Duration::ZERO {
                if cancel.is_cancelled() {
                    return;
                }
                let slice = remaining.min(SLEEP_SLICE);
                thread::sleep(slice);
                remaining -= slice;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ResourceRef, ResourceType};
    use crate::graph::Guarantee;
    use crate::handlers::FilesystemHandler;
    use std::collections::BTreeMap;
    use std::sync::Arc as StdArc;

    fn step(id: &str, path: &str) -> Step {
        Step {
            id: id.to_string(),
            condition: "exists".to_string(),
            subject_key: format!("file:{path}"),
            subject: ResourceRef::Inline {
                res_type: ResourceType::File,
                path: path.to_string(),
            },
            description: "ensure exists".to_string(),
            handler: "fs.native".to_string(),
            args: BTreeMap::new(),
            is_invariant: false,
            retry_override: None,
        }
    }

    #[test]
    fn satisfied_step_reports_satisfied_without_enforcing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("present.txt");
        std::fs::write(&path, b"x").unwrap();

        let registry = StdArc::new(HandlerRegistry::new());
        registry.register(StdArc::new(FilesystemHandler));
        let runtime = Runtime::new(registry, RuntimeConfig::default());
        let plan = Plan {
            steps: vec![step("exists:file", &path.to_string_lossy())],
            ..Default::default()
        };
        let result = runtime.run_once(&plan, &CancelToken::new());
        assert_eq!(result.steps[0].status, StepStatus::Satisfied);
        assert!(result.all_satisfied());
    }

    #[test]
    fn violated_step_is_repaired_and_stays_satisfied_on_next_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");

        let registry = StdArc::new(HandlerRegistry::new());
        registry.register(StdArc::new(FilesystemHandler));
        let runtime = Runtime::new(registry, RuntimeConfig::default());
        let plan = Plan {
            steps: vec![step("exists:file", &path.to_string_lossy())],
            ..Default::default()
        };

        let first = runtime.run_once(&plan, &CancelToken::new());
        assert_eq!(first.steps[0].status, StepStatus::Repaired);

        let second = runtime.run_once(&plan, &CancelToken::new());
        assert_eq!(second.steps[0].status, StepStatus::Satisfied);
    }

    #[test]
    fn dry_run_reports_violated_without_repairing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");

        let registry = StdArc::new(HandlerRegistry::new());
        registry.register(StdArc::new(FilesystemHandler));
        let config = RuntimeConfig {
            dry_run: true,
            ..RuntimeConfig::default()
        };
        let runtime = Runtime::new(registry, config);
        let plan = Plan {
            steps: vec![step("exists:file", &path.to_string_lossy())],
            ..Default::default()
        };
        let result = runtime.run_once(&plan, &CancelToken::new());
        assert_eq!(result.steps[0].status, StepStatus::Violated);
        assert!(!path.exists());
    }

    #[test]
    fn unregistered_handler_fails_without_aborting_the_pass() {
        let registry = StdArc::new(HandlerRegistry::new());
        let runtime = Runtime::new(registry, RuntimeConfig::default());
        let mut s = step("exists:file", "/tmp/whatever");
        s.handler = "no.such.handler".to_string();
        let plan = Plan {
            steps: vec![s],
            ..Default::default()
        };
        let result = runtime.run_once(&plan, &CancelToken::new());
        assert_eq!(result.steps[0].status, StepStatus::Failed);
        assert!(result.any_failed());
    }

    #[test]
    fn cancellation_between_steps_stops_the_pass_early() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.txt");
        std::fs::write(&present, b"x").unwrap();
        let missing = dir.path().join("b.txt");

        let registry = StdArc::new(HandlerRegistry::new());
        registry.register(StdArc::new(FilesystemHandler));
        let runtime = Runtime::new(registry, RuntimeConfig::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let plan = Plan {
            steps: vec![
                step("exists:a", &present.to_string_lossy()),
                step("exists:b", &missing.to_string_lossy()),
            ],
            ..Default::default()
        };
        let result = runtime.run_once(&plan, &cancel);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.steps[0].status, StepStatus::Cancelled);
    }

    #[test]
    fn retry_budget_of_zero_fails_without_attempting_to_enforce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");

        let registry = StdArc::new(HandlerRegistry::new());
        registry.register(StdArc::new(FilesystemHandler));
        let runtime = Runtime::new(registry, RuntimeConfig::default());
        let mut s = step("exists:file", &path.to_string_lossy());
        s.retry_override = Some(0);
        let plan = Plan {
            steps: vec![s],
            ..Default::default()
        };
        let result = runtime.run_once(&plan, &CancelToken::new());
        assert_eq!(result.steps[0].status, StepStatus::Failed);
        assert_eq!(result.steps[0].attempts, 0);
        assert!(!path.exists(), "a zero retry budget must never call enforce");
    }
}
