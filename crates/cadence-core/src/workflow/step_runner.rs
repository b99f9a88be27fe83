//! Step dispatch for a single execution.
//!
//! A `StepRunner` lives for exactly one run. It owns the run's worker cache
//! (one lease per role, released together at the end) and mutates the shared
//! execution record as steps move Pending -> Running -> Completed/Failed/
//! Skipped. Nested sequences (conditional branches, parallel children) are
//! driven recursively through boxed futures.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use cadence_types::error::DocumentError;
use cadence_types::event::WorkflowEvent;
use cadence_types::execution::{StepExecution, StepState};
use cadence_types::workflow::{Step, StepKind, WorkflowSettings};
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::event::EventBus;
use crate::storage::document::DocumentStore;
use crate::worker::{BoxWorker, WorkerError, WorkerPool};

use super::condition::evaluate;
use super::context::{render_template, resolve_inputs, step_context_key};
use super::registry::{SharedExecution, read_execution, write_execution};

/// Role used by quality gates that do not name a reviewer.
pub const DEFAULT_REVIEWER_ROLE: &str = "reviewer";

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Failure of a single step. Whether it is fatal depends on `Step::optional`.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("failed to acquire worker for role '{role}': {source}")]
    Acquire {
        role: String,
        #[source]
        source: WorkerError,
    },

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("required document '{0}' has not been produced")]
    MissingDocument(String),

    #[error("document '{name}': {source}")]
    Document {
        name: String,
        #[source]
        source: DocumentError,
    },

    #[error("quality gate '{step_id}' returned FAIL")]
    GateFailed { step_id: String },

    #[error("parallel child '{child}' failed: {source}")]
    ParallelChild {
        child: String,
        #[source]
        source: Box<StepError>,
    },

    #[error("conditional '{step_id}' {branch} branch failed: {source}")]
    Branch {
        step_id: String,
        branch: &'static str,
        #[source]
        source: Box<StepError>,
    },
}

/// Classification of a quality gate's review text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Pass,
    Concerns,
    Fail,
}

impl GateVerdict {
    /// `FAIL` anywhere wins, then `CONCERNS`, otherwise `PASS`.
    pub fn classify(review: &str) -> Self {
        if review.contains("FAIL") {
            GateVerdict::Fail
        } else if review.contains("CONCERNS") {
            GateVerdict::Concerns
        } else {
            GateVerdict::Pass
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GateVerdict::Pass => "PASS",
            GateVerdict::Concerns => "CONCERNS",
            GateVerdict::Fail => "FAIL",
        }
    }
}

type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Executes steps of one execution against the injected collaborators.
pub struct StepRunner<'a, P: WorkerPool, D: DocumentStore> {
    pool: &'a P,
    documents: &'a D,
    events: &'a EventBus,
    execution: SharedExecution,
    execution_id: Uuid,
    workflow_id: String,
    settings: WorkflowSettings,
    default_wait_secs: u64,
    /// Workers acquired by this run, keyed by role.
    workers: Mutex<HashMap<String, BoxWorker>>,
}

impl<'a, P: WorkerPool, D: DocumentStore> StepRunner<'a, P, D> {
    pub fn new(
        pool: &'a P,
        documents: &'a D,
        events: &'a EventBus,
        execution: SharedExecution,
        settings: WorkflowSettings,
        default_wait_secs: u64,
    ) -> Self {
        let (execution_id, workflow_id) =
            read_execution(&execution, |e| (e.execution_id, e.workflow_id.clone()));
        Self {
            pool,
            documents,
            events,
            execution,
            execution_id,
            workflow_id,
            settings,
            default_wait_secs,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Run a sequence of sibling steps, stopping at the first fatal failure.
    pub fn run_sequence<'s>(&'s self, steps: &'s [Step]) -> StepFuture<'s> {
        Box::pin(async move {
            for step in steps {
                self.run_step(step).await?;
            }
            Ok(())
        })
    }

    /// Run one step and record its outcome.
    ///
    /// Optional steps that fail are marked `Skipped` and reported as success
    /// to the caller. Non-optional failures are marked `Failed` and returned.
    pub fn run_step<'s>(&'s self, step: &'s Step) -> StepFuture<'s> {
        Box::pin(async move {
            self.mark_running(step);
            let started = Instant::now();

            match self.dispatch(step).await {
                Ok(output) => {
                    self.mark_completed(step, output, started);
                    Ok(())
                }
                Err(e) if step.optional => {
                    self.mark_skipped(step, &e);
                    Ok(())
                }
                Err(e) => {
                    self.mark_failed(step, &e);
                    Err(e)
                }
            }
        })
    }

    /// Release every worker acquired during this run.
    pub async fn release_workers(&self) {
        let roles: Vec<String> = self.workers.lock().await.drain().map(|(r, _)| r).collect();
        for role in roles {
            self.pool.release(&role).await;
        }
    }

    async fn dispatch(&self, step: &Step) -> Result<Value, StepError> {
        match &step.kind {
            StepKind::AgentTask {
                role,
                task,
                inputs,
                requires,
                creates,
            } => {
                self.run_agent_task(step, role, task, inputs, requires, creates.as_deref())
                    .await
            }
            StepKind::Conditional {
                condition,
                then_steps,
                else_steps,
            } => {
                let met = read_execution(&self.execution, |e| {
                    evaluate(condition, &e.context)
                });
                let (branch, steps) = if met {
                    ("then", then_steps)
                } else {
                    ("else", else_steps)
                };
                tracing::debug!(
                    execution_id = %self.execution_id,
                    step_id = step.id.as_str(),
                    condition_met = met,
                    branch,
                    "evaluated condition"
                );
                self.run_sequence(steps)
                    .await
                    .map_err(|source| StepError::Branch {
                        step_id: step.id.clone(),
                        branch,
                        source: Box::new(source),
                    })?;
                let executed: Vec<&str> = steps.iter().map(|s| s.id.as_str()).collect();
                Ok(json!({
                    "condition_met": met,
                    "branch": branch,
                    "executed": executed,
                }))
            }
            StepKind::Parallel { steps } => self.run_parallel(steps).await,
            StepKind::DocumentCreate {
                template,
                inputs,
                creates,
            } => {
                self.run_document_create(step, template.as_deref(), inputs, creates)
                    .await
            }
            StepKind::QualityGate {
                role,
                checklist,
                requires,
            } => self.run_quality_gate(step, role, checklist, requires).await,
            StepKind::Wait { timeout_secs } => {
                let secs = timeout_secs.unwrap_or(self.default_wait_secs);
                tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
                Ok(json!({ "waited": secs }))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Step kinds
    // -----------------------------------------------------------------------

    async fn run_agent_task(
        &self,
        step: &Step,
        role: &str,
        task: &str,
        inputs: &HashMap<String, String>,
        requires: &[String],
        creates: Option<&str>,
    ) -> Result<Value, StepError> {
        let worker = self.worker_for(step, role).await?;

        let values = read_execution(&self.execution, |e| resolve_inputs(inputs, &e.context));
        let mut payload = render_template(task, &values);
        payload.push_str(&self.required_documents(step, requires).await?);

        let text = worker.run(&payload).await?;

        let mut output = json!({ "role": role, "output": text });
        if let Some(name) = creates {
            self.persist_document(step, name, &text).await?;
            output["document"] = json!(name);
        }
        Ok(output)
    }

    async fn run_quality_gate(
        &self,
        step: &Step,
        role: &str,
        checklist: &str,
        requires: &[String],
    ) -> Result<Value, StepError> {
        let role = if role.is_empty() {
            DEFAULT_REVIEWER_ROLE
        } else {
            role
        };
        let worker = self.worker_for(step, role).await?;

        let mut payload = format!(
            "Review the documents below against the '{checklist}' checklist. \
             Answer with PASS, CONCERNS or FAIL and explain why."
        );
        payload.push_str(&self.required_documents(step, requires).await?);

        let review = worker.run(&payload).await?;
        let verdict = GateVerdict::classify(&review);
        tracing::debug!(
            execution_id = %self.execution_id,
            step_id = step.id.as_str(),
            verdict = verdict.as_str(),
            "quality gate reviewed"
        );

        if verdict == GateVerdict::Fail && !step.optional {
            return Err(StepError::GateFailed {
                step_id: step.id.clone(),
            });
        }
        Ok(json!({
            "verdict": verdict.as_str(),
            "review": review,
            "checklist": checklist,
        }))
    }

    async fn run_document_create(
        &self,
        step: &Step,
        template: Option<&str>,
        inputs: &HashMap<String, String>,
        creates: &str,
    ) -> Result<Value, StepError> {
        let values = read_execution(&self.execution, |e| resolve_inputs(inputs, &e.context));

        // A template naming a produced document is loaded; anything else is
        // used as inline template text.
        let body = match template {
            Some(t) => {
                let handle = read_execution(&self.execution, |e| e.documents.get(t).cloned());
                match handle {
                    Some(handle) => {
                        self.record_consumed(step, t);
                        self.load_document(t, &handle).await?
                    }
                    None => t.to_string(),
                }
            }
            None => {
                let mut keys: Vec<&String> = values.keys().collect();
                keys.sort();
                keys.iter()
                    .map(|k| format!("{k}: {{{{{k}}}}}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        let content = render_template(&body, &values);
        let handle = self.persist_document(step, creates, &content).await?;
        Ok(json!({
            "document": creates,
            "handle": handle,
            "content_length": content.len(),
        }))
    }

    async fn run_parallel(&self, steps: &[Step]) -> Result<Value, StepError> {
        let width = self.settings.max_parallel_agents.max(1);
        let mut outcomes = Vec::with_capacity(steps.len());
        for chunk in steps.chunks(width) {
            let results = join_all(chunk.iter().map(|s| self.run_step(s))).await;
            outcomes.extend(chunk.iter().zip(results));
        }

        let mut summary = serde_json::Map::new();
        let mut first_failure = None;
        for (child, result) in outcomes {
            let entry = match result {
                Ok(()) => match self.skip_reason(&child.id) {
                    Some(reason) => format!("skipped: {reason}"),
                    None => "success".to_string(),
                },
                Err(e) => {
                    let text = format!("error: {e}");
                    if first_failure.is_none() {
                        first_failure = Some((child.id.clone(), e));
                    }
                    text
                }
            };
            summary.insert(child.id.clone(), Value::String(entry));
        }

        match first_failure {
            Some((child, source)) if !self.settings.allow_partial_success => {
                Err(StepError::ParallelChild {
                    child,
                    source: Box::new(source),
                })
            }
            _ => Ok(json!({ "results": summary })),
        }
    }

    // -----------------------------------------------------------------------
    // Collaborator helpers
    // -----------------------------------------------------------------------

    /// Acquire (once per run) the worker bound to `role` and record it on the step.
    async fn worker_for(&self, step: &Step, role: &str) -> Result<BoxWorker, StepError> {
        let worker = {
            let mut workers = self.workers.lock().await;
            match workers.get(role) {
                Some(w) => w.clone(),
                None => {
                    let w = self
                        .pool
                        .acquire(role)
                        .await
                        .map_err(|source| StepError::Acquire {
                            role: role.to_string(),
                            source,
                        })?;
                    workers.insert(role.to_string(), w.clone());
                    w
                }
            }
        };
        self.update_step(&step.id, |s| s.worker = Some(worker.id().to_string()));
        Ok(worker)
    }

    /// Load every required document and format them as payload sections.
    async fn required_documents(
        &self,
        step: &Step,
        requires: &[String],
    ) -> Result<String, StepError> {
        let mut sections = String::new();
        for name in requires {
            let handle = read_execution(&self.execution, |e| e.documents.get(name).cloned())
                .ok_or_else(|| StepError::MissingDocument(name.clone()))?;
            let content = self.load_document(name, &handle).await?;
            self.record_consumed(step, name);
            sections.push_str(&format!("\n\n## {name}\n\n{content}"));
        }
        Ok(sections)
    }

    async fn load_document(&self, name: &str, handle: &str) -> Result<String, StepError> {
        self.documents
            .load(handle)
            .await
            .map_err(|source| StepError::Document {
                name: name.to_string(),
                source,
            })
    }

    /// Save a document and register it by name on the execution.
    async fn persist_document(
        &self,
        step: &Step,
        name: &str,
        content: &str,
    ) -> Result<String, StepError> {
        let handle = self
            .documents
            .save(&self.workflow_id, name, content)
            .await
            .map_err(|source| StepError::Document {
                name: name.to_string(),
                source,
            })?;
        write_execution(&self.execution, |e| {
            e.documents.insert(name.to_string(), handle.clone());
            if let Some(s) = e.step_executions.get_mut(&step.id) {
                s.documents_created.push(name.to_string());
            }
        });
        tracing::debug!(
            execution_id = %self.execution_id,
            step_id = step.id.as_str(),
            document = name,
            handle = handle.as_str(),
            "registered document"
        );
        Ok(handle)
    }

    fn record_consumed(&self, step: &Step, name: &str) {
        self.update_step(&step.id, |s| s.documents_consumed.push(name.to_string()));
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    fn update_step(
        &self,
        step_id: &str,
        f: impl FnOnce(&mut StepExecution),
    ) {
        write_execution(&self.execution, |e| {
            if let Some(s) = e.step_executions.get_mut(step_id) {
                f(s);
            }
        });
    }

    fn mark_running(&self, step: &Step) {
        write_execution(&self.execution, |e| {
            let entry = e
                .step_executions
                .entry(step.id.clone())
                .or_insert_with(|| StepExecution::pending(step.id.clone()));
            entry.state = StepState::Running;
            entry.started_at = Some(Utc::now());
            entry.completed_at = None;
            entry.error = None;
        });
        tracing::debug!(
            execution_id = %self.execution_id,
            step_id = step.id.as_str(),
            step_type = step.kind.label(),
            "step started"
        );
        self.events.publish(WorkflowEvent::StepStarted {
            execution_id: self.execution_id,
            step_id: step.id.clone(),
            step_type: step.kind.label().to_string(),
        });
    }

    fn mark_completed(&self, step: &Step, output: Value, started: Instant) {
        write_execution(&self.execution, |e| {
            e.context.insert(step_context_key(&step.id), output.clone());
            if let Some(s) = e.step_executions.get_mut(&step.id) {
                s.state = StepState::Completed;
                s.completed_at = Some(Utc::now());
                s.output = Some(output);
            }
        });
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            execution_id = %self.execution_id,
            step_id = step.id.as_str(),
            duration_ms,
            "step completed"
        );
        self.events.publish(WorkflowEvent::StepCompleted {
            execution_id: self.execution_id,
            step_id: step.id.clone(),
            duration_ms,
        });
    }

    fn mark_failed(&self, step: &Step, error: &StepError) {
        self.finish_unsuccessful(step, StepState::Failed, error);
        tracing::warn!(
            execution_id = %self.execution_id,
            step_id = step.id.as_str(),
            error = %error,
            "step failed"
        );
        self.events.publish(WorkflowEvent::StepFailed {
            execution_id: self.execution_id,
            step_id: step.id.clone(),
            error: error.to_string(),
        });
    }

    fn mark_skipped(&self, step: &Step, error: &StepError) {
        self.finish_unsuccessful(step, StepState::Skipped, error);
        tracing::warn!(
            execution_id = %self.execution_id,
            step_id = step.id.as_str(),
            error = %error,
            "optional step failed, skipping"
        );
        self.events.publish(WorkflowEvent::StepSkipped {
            execution_id: self.execution_id,
            step_id: step.id.clone(),
            reason: error.to_string(),
        });
    }

    /// Error recorded on a step that ended `Skipped`, if it did.
    fn skip_reason(&self, step_id: &str) -> Option<String> {
        read_execution(&self.execution, |e| {
            e.step_executions
                .get(step_id)
                .filter(|s| s.state == StepState::Skipped)
                .map(|s| s.error.clone().unwrap_or_default())
        })
    }

    fn finish_unsuccessful(&self, step: &Step, state: StepState, error: &StepError) {
        let message = error.to_string();
        self.update_step(&step.id, |s| {
            s.state = state;
            s.completed_at = Some(Utc::now());
            s.error = Some(message);
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_verdict_precedence() {
        assert_eq!(GateVerdict::classify("All good. PASS"), GateVerdict::Pass);
        assert_eq!(GateVerdict::classify("nothing to say"), GateVerdict::Pass);
        assert_eq!(
            GateVerdict::classify("Some CONCERNS about naming"),
            GateVerdict::Concerns
        );
        assert_eq!(
            GateVerdict::classify("CONCERNS first, but overall FAIL"),
            GateVerdict::Fail
        );
        assert_eq!(GateVerdict::classify("PASS... no, FAIL"), GateVerdict::Fail);
    }

    #[test]
    fn test_step_error_messages_nest() {
        let inner = StepError::MissingDocument("prd.md".to_string());
        let err = StepError::Branch {
            step_id: "s3".to_string(),
            branch: "then",
            source: Box::new(inner),
        };
        assert_eq!(
            err.to_string(),
            "conditional 's3' then branch failed: required document 'prd.md' has not been produced"
        );
    }
}
