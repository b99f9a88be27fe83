//! Workflow definition types for Cadence.
//!
//! `WorkflowDefinition` is the validated, typed tree produced by the
//! definition parser. Steps are a closed tagged union over their kind; some
//! kinds (conditional, parallel) embed child step sequences. Definitions are
//! immutable once parsed and owned by whoever hands them to the engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A parsed and validated workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Definition identifier (e.g. "greenfield-service").
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form version string.
    #[serde(default)]
    pub version: String,
    /// Role name -> agent profile configuration.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub agents: HashMap<String, AgentProfile>,
    /// Top-level steps, executed in declaration order.
    pub steps: Vec<Step>,
    /// Execution settings.
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl WorkflowDefinition {
    /// Total number of steps in the tree, nested children included.
    pub fn step_count(&self) -> usize {
        self.iter_steps().count()
    }

    /// Depth-first iterator over every step in the tree.
    pub fn iter_steps(&self) -> StepIter<'_> {
        StepIter {
            stack: self.steps.iter().rev().collect(),
        }
    }

    /// Find a step anywhere in the tree by its ID.
    pub fn find_step(&self, id: &str) -> Option<&Step> {
        self.iter_steps().find(|s| s.id == id)
    }
}

/// Depth-first, declaration-order iterator over a step tree.
pub struct StepIter<'a> {
    stack: Vec<&'a Step>,
}

impl<'a> Iterator for StepIter<'a> {
    type Item = &'a Step;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.stack.pop()?;
        self.stack.extend(step.children().into_iter().rev());
        Some(step)
    }
}

/// Configuration for an agent role.
///
/// Only `command` is interpreted (by the command-backed worker factory);
/// everything else is carried through untouched for the worker backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Shell command that performs tasks for this role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Workflow-level execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Upper bound on concurrently running branches of a parallel step.
    #[serde(default = "default_max_parallel_agents", alias = "maxParallelAgents")]
    pub max_parallel_agents: usize,
    /// Advisory default timeout in seconds (not enforced by the engine).
    #[serde(default = "default_timeout_secs", alias = "defaultTimeout")]
    pub default_timeout_secs: u64,
    /// Whether a failing parallel branch may leave its parent completed.
    #[serde(default, alias = "allowPartialSuccess")]
    pub allow_partial_success: bool,
}

fn default_max_parallel_agents() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_parallel_agents: default_max_parallel_agents(),
            default_timeout_secs: default_timeout_secs(),
            allow_partial_success: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A single node in the workflow's control-flow tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the definition (nested steps included).
    pub id: String,
    pub name: String,
    /// Failure downgrades to `Skipped` instead of failing the execution.
    #[serde(default)]
    pub optional: bool,
    /// Declared retry budget. Read by the monitor; never applied by the engine.
    #[serde(default)]
    pub retry_count: u32,
    /// Declared delay between retries in seconds. Not applied by the engine.
    #[serde(default)]
    pub retry_delay_secs: u64,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    /// Direct children of this step (empty for leaf kinds).
    pub fn children(&self) -> Vec<&Step> {
        match &self.kind {
            StepKind::Conditional {
                then_steps,
                else_steps,
                ..
            } => then_steps.iter().chain(else_steps.iter()).collect(),
            StepKind::Parallel { steps } => steps.iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// Step-kind specific payload, internally tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Hand a task to a worker bound to `role`.
    AgentTask {
        role: String,
        task: String,
        /// Placeholder name -> binding. Bindings starting with `$` are context paths.
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        inputs: HashMap<String, String>,
        /// Documents whose contents are fed into the task payload.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        requires: Vec<String>,
        /// Document the worker's result is persisted as.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        creates: Option<String>,
    },
    /// Branch on a condition evaluated against the execution context.
    Conditional {
        condition: Condition,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        then_steps: Vec<Step>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        else_steps: Vec<Step>,
    },
    /// Run all children concurrently and join.
    Parallel { steps: Vec<Step> },
    /// Render a template into a named document.
    DocumentCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        inputs: HashMap<String, String>,
        creates: String,
    },
    /// Ask a reviewer to run a checklist over required documents.
    QualityGate {
        role: String,
        checklist: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        requires: Vec<String>,
    },
    /// Suspend for a number of seconds (default 1).
    Wait {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
}

impl StepKind {
    /// Stable snake_case label for logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::AgentTask { .. } => "agent_task",
            StepKind::Conditional { .. } => "conditional",
            StepKind::Parallel { .. } => "parallel",
            StepKind::DocumentCreate { .. } => "document_create",
            StepKind::QualityGate { .. } => "quality_gate",
            StepKind::Wait { .. } => "wait",
        }
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A comparison between a context path and a literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-separated key path into the execution context.
    pub field: String,
    #[serde(alias = "op")]
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

/// Comparison operator for a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = "==", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "ne")]
    Ne,
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = ">=", alias = "gte")]
    Gte,
    #[serde(rename = "<=", alias = "lte")]
    Lte,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "not_exists")]
    NotExists,
}

impl ConditionOperator {
    /// Canonical textual form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Eq => "==",
            ConditionOperator::Ne => "!=",
            ConditionOperator::Gt => ">",
            ConditionOperator::Lt => "<",
            ConditionOperator::Gte => ">=",
            ConditionOperator::Lte => "<=",
            ConditionOperator::Contains => "contains",
            ConditionOperator::Exists => "exists",
            ConditionOperator::NotExists => "not_exists",
        }
    }
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wait(id: &str) -> Step {
        Step {
            id: id.to_string(),
            name: id.to_string(),
            optional: false,
            retry_count: 0,
            retry_delay_secs: 0,
            kind: StepKind::Wait { timeout_secs: None },
        }
    }

    fn sample_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".to_string(),
            name: "Sample".to_string(),
            description: None,
            version: "1".to_string(),
            agents: HashMap::new(),
            steps: vec![
                wait("a"),
                Step {
                    kind: StepKind::Conditional {
                        condition: Condition {
                            field: "step_a.waited".to_string(),
                            operator: ConditionOperator::Exists,
                            value: Value::Null,
                        },
                        then_steps: vec![wait("b")],
                        else_steps: vec![Step {
                            kind: StepKind::Parallel {
                                steps: vec![wait("c"), wait("d")],
                            },
                            ..wait("p")
                        }],
                    },
                    ..wait("cond")
                },
            ],
            settings: WorkflowSettings::default(),
        }
    }

    #[test]
    fn test_iter_steps_is_depth_first_in_declaration_order() {
        let def = sample_definition();
        let ids: Vec<&str> = def.iter_steps().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "cond", "b", "p", "c", "d"]);
        assert_eq!(def.step_count(), 6);
    }

    #[test]
    fn test_find_nested_step() {
        let def = sample_definition();
        let step = def.find_step("d").expect("nested step");
        assert!(matches!(step.kind, StepKind::Wait { .. }));
        assert!(def.find_step("missing").is_none());
    }

    #[test]
    fn test_step_kind_tagged_serde() {
        let step = Step {
            kind: StepKind::AgentTask {
                role: "analyst".to_string(),
                task: "Write a brief".to_string(),
                inputs: HashMap::new(),
                requires: vec![],
                creates: Some("brief.md".to_string()),
            },
            ..wait("brief")
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "agent_task");
        assert_eq!(json["role"], "analyst");
        let parsed: Step = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, step);
    }

    #[test]
    fn test_condition_operator_symbols_and_aliases() {
        let c: Condition =
            serde_json::from_value(json!({"field": "x", "operator": ">=", "value": 3})).unwrap();
        assert_eq!(c.operator, ConditionOperator::Gte);

        let c: Condition =
            serde_json::from_value(json!({"field": "x", "op": "not_exists"})).unwrap();
        assert_eq!(c.operator, ConditionOperator::NotExists);
        assert_eq!(c.value, Value::Null);

        let c: Condition =
            serde_json::from_value(json!({"field": "x", "op": "ne", "value": "a"})).unwrap();
        assert_eq!(c.operator, ConditionOperator::Ne);
        assert_eq!(serde_json::to_value(c.operator).unwrap(), json!("!="));
    }

    #[test]
    fn test_settings_defaults_and_camel_case_aliases() {
        let s: WorkflowSettings = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(s, WorkflowSettings::default());
        assert_eq!(s.max_parallel_agents, 4);

        let s: WorkflowSettings =
            serde_yaml_ng::from_str("maxParallelAgents: 2\nallowPartialSuccess: true").unwrap();
        assert_eq!(s.max_parallel_agents, 2);
        assert!(s.allow_partial_success);
        assert_eq!(s.default_timeout_secs, 300);
    }

    #[test]
    fn test_agent_profile_keeps_unknown_fields() {
        let p: AgentProfile = serde_yaml_ng::from_str(
            "name: Mary\ncommand: ./analyst.sh\npersona: business analyst",
        )
        .unwrap();
        assert_eq!(p.command.as_deref(), Some("./analyst.sh"));
        assert_eq!(p.extra["persona"], json!("business analyst"));
    }
}
