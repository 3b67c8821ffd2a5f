//! Step Flow
//!
//! Ordered execution of named steps against a shared context, with
//! compensating rollback of the steps that already succeeded.

use crate::error::{Error, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// =============================================================================
// Context
// =============================================================================

/// Partial result produced by a single step
pub type StepOutput = BTreeMap<String, Value>;

/// Accumulated results of every step that has run so far
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    values: BTreeMap<String, Value>,
}

impl FlowContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge a step's output. Keys written by an earlier step are kept.
    fn merge(&mut self, step: &str, output: &StepOutput) {
        for (key, value) in output {
            if self.values.contains_key(key) {
                warn!(
                    "Step {} tried to overwrite context key {}, keeping earlier value",
                    step, key
                );
                continue;
            }
            self.values.insert(key.clone(), value.clone());
        }
    }
}

// =============================================================================
// Steps
// =============================================================================

type StepAction<R> =
    Box<dyn Fn(Arc<R>, FlowContext) -> BoxFuture<'static, Result<StepOutput>> + Send + Sync>;

type StepCompensation = Box<dyn Fn(StepOutput) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Step<R> {
    name: String,
    action: StepAction<R>,
    compensate: Option<StepCompensation>,
}

struct CompletedStep {
    index: usize,
    output: StepOutput,
}

/// A compensation that failed during [`StepFlow::revert`]
#[derive(Debug)]
pub struct CompensationFailure {
    pub step: String,
    pub error: Error,
}

// =============================================================================
// Step Flow
// =============================================================================

/// A named, ordered list of steps run against a request of type `R`.
///
/// Steps run once each, in registration order, with no retry. When a step
/// fails the caller decides whether to [`revert`](StepFlow::revert).
pub struct StepFlow<R> {
    label: String,
    steps: Vec<Step<R>>,
    context: FlowContext,
    completed: Vec<CompletedStep>,
}

impl<R: Send + Sync + 'static> StepFlow<R> {
    /// Create an empty flow
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            context: FlowContext::default(),
            completed: Vec::new(),
        }
    }

    /// Append a step without compensation
    pub fn add_step<A, Fut>(&mut self, name: impl Into<String>, action: A) -> &mut Self
    where
        A: Fn(Arc<R>, FlowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput>> + Send + 'static,
    {
        self.steps.push(Step {
            name: name.into(),
            action: Box::new(move |request: Arc<R>, context: FlowContext| {
                action(request, context).boxed()
            }),
            compensate: None,
        });
        self
    }

    /// Append a step whose effect can be undone.
    ///
    /// `compensate` receives the output the action produced.
    pub fn add_step_with_compensation<A, Fut, C, CFut>(
        &mut self,
        name: impl Into<String>,
        action: A,
        compensate: C,
    ) -> &mut Self
    where
        A: Fn(Arc<R>, FlowContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput>> + Send + 'static,
        C: Fn(StepOutput) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = Result<()>> + Send + 'static,
    {
        self.steps.push(Step {
            name: name.into(),
            action: Box::new(move |request: Arc<R>, context: FlowContext| {
                action(request, context).boxed()
            }),
            compensate: Some(Box::new(move |output: StepOutput| compensate(output).boxed())),
        });
        self
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// The failing step is not recorded as completed; the steps before it
    /// are, for a later [`revert`](StepFlow::revert).
    pub async fn run(&mut self, request: Arc<R>) -> Result<()> {
        self.context = FlowContext::default();
        self.completed.clear();

        info!("Running flow {} ({} steps)", self.label, self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            debug!("Flow {}: running step {}", self.label, step.name);

            match (step.action)(request.clone(), self.context.clone()).await {
                Ok(output) => {
                    self.context.merge(&step.name, &output);
                    self.completed.push(CompletedStep { index, output });
                }
                Err(e) => {
                    error!("Flow {}: step {} failed: {}", self.label, step.name, e);
                    return Err(e);
                }
            }
        }

        info!("Flow {} finished", self.label);
        Ok(())
    }

    /// Undo completed steps, newest first.
    ///
    /// A failing compensation does not stop the rollback; every failure is
    /// logged and returned.
    pub async fn revert(&mut self) -> Vec<CompensationFailure> {
        let mut failures = Vec::new();

        info!(
            "Reverting flow {} ({} completed steps)",
            self.label,
            self.completed.len()
        );

        while let Some(done) = self.completed.pop() {
            let step = &self.steps[done.index];
            let Some(compensate) = &step.compensate else {
                continue;
            };

            debug!("Flow {}: compensating step {}", self.label, step.name);
            if let Err(e) = compensate(done.output).await {
                warn!(
                    "Flow {}: compensation of step {} failed: {}",
                    self.label, step.name, e
                );
                failures.push(CompensationFailure {
                    step: step.name.clone(),
                    error: e,
                });
            }
        }

        failures
    }

    /// Names of the steps that succeeded in the last run, in order
    pub fn completed_steps(&self) -> Vec<&str> {
        self.completed
            .iter()
            .map(|done| self.steps[done.index].name.as_str())
            .collect()
    }

    /// Results accumulated by the last run
    pub fn context(&self) -> &FlowContext {
        &self.context
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}
