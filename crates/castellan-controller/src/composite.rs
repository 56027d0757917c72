//! The multi-step (composite) operation engine.
//!
//! Steps execute in submission order against a clone of the live model.
//! Per-step results land under `step-1…step-N`; once any step fails,
//! later steps are recorded as cancelled without executing. A composite
//! finalizes only when every step has reached a terminal state *and* the
//! model phase is complete: an unfinished-count plus a model-complete
//! latch covers handlers that finish their sinks asynchronously.
//!
//! On full success the working model merges into the live tree and the
//! overall compensating operation is a composite of the per-step
//! compensating operations in reverse order. On failure with rollback
//! (the default) the working model is discarded and every non-cancelled
//! step is marked `rolled-back`. With `rollback-on-runtime-failure`
//! false, the merge still happens and runtime tasks still run, but the
//! envelope reports failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use castellan_value::Value;

use crate::address::{operation as make_operation, PathAddress};
use crate::context::RuntimeTask;
use crate::controller::BasicController;
use crate::error::{ControllerError, PersistenceError};
use crate::handler::{CancelHandle, OperationResult, ResultSink, EMPTY_LOCATION};
use crate::keys;
use crate::persist::ConfigurationPersister;

pub(crate) struct MultiStepController {
    state: Arc<CompositeState>,
}

struct CompositeState {
    steps: Vec<Value>,
    outer_sink: Arc<dyn ResultSink>,
    /// Steps that have not yet reached a terminal state.
    unfinished: AtomicUsize,
    /// Set once the dispatch loop and merge decision are behind us.
    model_complete: AtomicBool,
    finalized: AtomicBool,
    has_failures: AtomicBool,
    /// The overall `result` object, keyed `step-1…step-N`.
    results: Mutex<Value>,
    /// Compensating operations keyed by step index.
    rollback_ops: Mutex<HashMap<usize, Value>>,
    /// Clone of the live model; steps read and mutate this.
    local_model: Arc<Mutex<Value>>,
    /// Set by the recording persister when any step stored a change.
    dirty: Arc<AtomicBool>,
    rollback_on_runtime_failure: bool,
    live_model: Arc<Mutex<Value>>,
    persister: Arc<dyn ConfigurationPersister>,
    /// Runtime tasks registered by step handlers.
    tasks: Arc<Mutex<Vec<RuntimeTask>>>,
    step_cancels: Mutex<Vec<CancelHandle>>,
}

impl MultiStepController {
    pub(crate) fn new(
        operation: &Value,
        outer_sink: Arc<dyn ResultSink>,
        live_model: &Arc<Mutex<Value>>,
        persister: &Arc<dyn ConfigurationPersister>,
    ) -> Result<Self, ControllerError> {
        let steps = operation
            .require(keys::STEPS)
            .and_then(Value::as_list)
            .map_err(|_| {
                ControllerError::InvalidOperationFormat(
                    "a composite operation requires a list of steps".to_string(),
                )
            })?
            .to_vec();
        let rollback_on_runtime_failure = match operation.find(keys::ROLLBACK_ON_RUNTIME_FAILURE) {
            Some(v) if v.is_defined() => v.as_bool().map_err(|_| {
                ControllerError::InvalidOperationFormat(format!(
                    "{} must be a boolean",
                    keys::ROLLBACK_ON_RUNTIME_FAILURE
                ))
            })?,
            _ => true,
        };

        let local_model = live_model.lock().clone();

        // pre-create the step nodes so outcome/result come first and the
        // key order matches submission order
        let mut results = Value::empty_object();
        for index in 0..steps.len() {
            if let Ok(step) = results.get_mut(&step_key(index)) {
                let _ = step.get_mut(keys::OUTCOME);
                let _ = step.get_mut(keys::RESULT);
            }
        }

        let unfinished = steps.len();
        Ok(MultiStepController {
            state: Arc::new(CompositeState {
                steps,
                outer_sink,
                unfinished: AtomicUsize::new(unfinished),
                model_complete: AtomicBool::new(false),
                finalized: AtomicBool::new(false),
                has_failures: AtomicBool::new(false),
                results: Mutex::new(results),
                rollback_ops: Mutex::new(HashMap::new()),
                local_model: Arc::new(Mutex::new(local_model)),
                dirty: Arc::new(AtomicBool::new(false)),
                rollback_on_runtime_failure,
                live_model: Arc::clone(live_model),
                persister: Arc::clone(persister),
                tasks: Arc::new(Mutex::new(Vec::new())),
                step_cancels: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Dispatches every step, then signals model-complete and returns
    /// the overall result. Terminal signals on the outer sink may fire
    /// here or later, once the last asynchronous step lands.
    pub(crate) fn execute(&self, controller: &BasicController) -> OperationResult {
        let state = &self.state;
        let recording: Arc<dyn ConfigurationPersister> = Arc::new(RecordingPersister {
            dirty: Arc::clone(&state.dirty),
        });

        for (index, step) in state.steps.iter().enumerate() {
            if state.has_failures.load(Ordering::SeqCst) {
                state.record_cancellation(index);
                continue;
            }
            let step_sink: Arc<dyn ResultSink> = Arc::new(StepSink {
                index,
                state: Arc::clone(state),
                accumulated: Mutex::new(Value::Undefined),
            });
            let result = controller.execute_with(
                step,
                step_sink,
                &state.local_model,
                &recording,
                &state.tasks,
            );
            state.record_rollback_op(index, result.compensating.clone());
            state.step_cancels.lock().push(result.cancel);
        }

        let compensating = if state.has_failures.load(Ordering::SeqCst) {
            None
        } else {
            Some(state.overall_compensating_operation())
        };

        state.model_complete.store(true, Ordering::SeqCst);
        state.try_finalize();

        let cancel_state = Arc::clone(state);
        OperationResult {
            compensating,
            cancel: CancelHandle::new(move || {
                let handles: Vec<CancelHandle> = cancel_state.step_cancels.lock().clone();
                let mut any = false;
                for handle in handles {
                    any |= handle.cancel();
                }
                any
            }),
        }
    }
}

impl CompositeState {
    fn record_result(&self, index: usize, value: Value) {
        let rollback = self.rollback_ops.lock().get(&index).cloned();
        {
            let mut results = self.results.lock();
            if let Ok(step) = results.get_mut(&step_key(index)) {
                let _ = step.insert(keys::OUTCOME, keys::SUCCESS);
                let _ = step.insert(keys::RESULT, value);
                let _ = step.insert(
                    keys::COMPENSATING_OPERATION,
                    rollback.unwrap_or_default(),
                );
            }
        }
        self.step_finished();
    }

    fn record_failure(&self, index: usize, description: Value) {
        {
            let mut results = self.results.lock();
            if let Ok(step) = results.get_mut(&step_key(index)) {
                let _ = step.insert(keys::OUTCOME, keys::FAILED);
                if !step.has(keys::RESULT) {
                    step.remove(keys::RESULT);
                }
                let _ = step.insert(keys::FAILURE_DESCRIPTION, description);
            }
        }
        self.has_failures.store(true, Ordering::SeqCst);
        self.step_finished();
    }

    fn record_cancellation(&self, index: usize) {
        {
            let mut results = self.results.lock();
            if let Ok(step) = results.get_mut(&step_key(index)) {
                let _ = step.insert(keys::OUTCOME, keys::CANCELLED);
                if !step.has(keys::RESULT) {
                    step.remove(keys::RESULT);
                }
            }
        }
        self.step_finished();
    }

    fn record_rollback_op(&self, index: usize, compensating: Option<Value>) {
        let compensating = compensating.unwrap_or_default();
        self.rollback_ops.lock().insert(index, compensating.clone());
        let mut results = self.results.lock();
        if let Ok(step) = results.get_mut(&step_key(index)) {
            let _ = step.insert(keys::COMPENSATING_OPERATION, compensating);
        }
    }

    fn step_finished(&self) {
        self.unfinished.fetch_sub(1, Ordering::SeqCst);
        self.try_finalize();
    }

    /// Runs the terminal logic exactly once, after the last step has
    /// terminated and the model phase is complete.
    fn try_finalize(&self) {
        if self.unfinished.load(Ordering::SeqCst) != 0
            || !self.model_complete.load(Ordering::SeqCst)
        {
            return;
        }
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }

        let failed = self.has_failures.load(Ordering::SeqCst);
        let merge = !failed || !self.rollback_on_runtime_failure;

        if merge && self.dirty.load(Ordering::SeqCst) {
            let snapshot = self.local_model.lock().clone();
            let mut live = self.live_model.lock();
            *live = snapshot;
            if let Err(e) = self.persister.store(&live) {
                warn!("failed to persist configuration change: {e}");
            }
        }
        if merge {
            let deferred: Vec<RuntimeTask> = std::mem::take(&mut *self.tasks.lock());
            for task in deferred {
                task();
            }
        }

        if failed {
            self.handle_failures(merge);
        } else {
            self.handle_success();
        }
    }

    fn handle_success(&self) {
        let results = self.results.lock().clone();
        self.outer_sink.fragment(EMPTY_LOCATION, results);
        self.outer_sink.complete();
    }

    /// Marks non-cancelled steps failed (and rolled back when the
    /// working model was discarded), then reports a synthesized failure
    /// enumerating each failed step.
    fn handle_failures(&self, merged: bool) {
        let snapshot = {
            let mut results = self.results.lock();
            for index in 0..self.steps.len() {
                if let Ok(step) = results.get_mut(&step_key(index)) {
                    let cancelled = step
                        .find(keys::OUTCOME)
                        .and_then(|o| o.as_str().ok().map(|s| s == keys::CANCELLED))
                        .unwrap_or(false);
                    if cancelled {
                        continue;
                    }
                    if !merged {
                        let _ = step.insert(keys::ROLLED_BACK, true);
                    }
                    let _ = step.insert(keys::OUTCOME, keys::FAILED);
                }
            }
            results.clone()
        };
        self.outer_sink.fragment(EMPTY_LOCATION, snapshot.clone());

        let base = if merged {
            "Composite operation failed but changes were not rolled back. Steps that failed:"
        } else {
            "Composite operation failed and was rolled back. Steps that failed:"
        };
        let mut failure = Value::empty_object();
        for index in 0..self.steps.len() {
            if let Some(step) = snapshot.find(&step_key(index)) {
                if step.has(keys::FAILURE_DESCRIPTION) {
                    if let Ok(slot) = failure
                        .get_mut(base)
                        .and_then(|b| b.get_mut(&format!("Operation {}", step_key(index))))
                    {
                        *slot = step
                            .find(keys::FAILURE_DESCRIPTION)
                            .cloned()
                            .unwrap_or_default();
                    }
                }
            }
        }
        self.outer_sink.failed(failure);
    }

    /// The composite that undoes this one: per-step compensating
    /// operations in reverse order, with rollback-on-runtime-failure
    /// off. If the undo fails it is manual-fix territory.
    fn overall_compensating_operation(&self) -> Value {
        let mut compensating = make_operation(keys::COMPOSITE, &PathAddress::root());
        let mut comp_steps = Value::empty_list();
        let rollback_ops = self.rollback_ops.lock();
        for index in (0..self.steps.len()).rev() {
            if let Some(step) = rollback_ops.get(&index) {
                if step.is_defined() {
                    let _ = comp_steps.push(step.clone());
                }
            }
        }
        let _ = compensating.insert(keys::STEPS, comp_steps);
        let _ = compensating.insert(keys::ROLLBACK_ON_RUNTIME_FAILURE, false);
        compensating
    }
}

/// Per-step sink: accumulates fragments locally, then reports the
/// terminal state into the composite.
struct StepSink {
    index: usize,
    state: Arc<CompositeState>,
    accumulated: Mutex<Value>,
}

impl ResultSink for StepSink {
    fn fragment(&self, location: &[String], value: Value) {
        let mut accumulated = self.accumulated.lock();
        if location.is_empty() {
            *accumulated = value;
        } else if let Ok(slot) = accumulated.get_path_mut(location) {
            *slot = value;
        }
    }

    fn complete(&self) {
        let value = self.accumulated.lock().clone();
        self.state.record_result(self.index, value);
    }

    fn failed(&self, description: Value) {
        self.state.record_failure(self.index, description);
    }

    fn cancelled(&self) {
        self.state.record_cancellation(self.index);
    }
}

/// Stands in for the real persister while steps run against the working
/// model: records that something changed instead of storing it.
struct RecordingPersister {
    dirty: Arc<AtomicBool>,
}

impl ConfigurationPersister for RecordingPersister {
    fn store(&self, _model: &Value) -> Result<(), PersistenceError> {
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> Result<Vec<Value>, PersistenceError> {
        Err(PersistenceError::LoadUnsupported)
    }

    fn marshal_as_xml(
        &self,
        model: &Value,
        out: &mut dyn std::io::Write,
    ) -> Result<(), PersistenceError> {
        crate::persist::NullPersister.marshal_as_xml(model, out)
    }
}

fn step_key(index: usize) -> String {
    format!("step-{}", index + 1)
}
