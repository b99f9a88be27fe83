//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Accepts a loosely-shaped YAML/JSON document with either an explicit
//! `steps` tree or a flattened `sequence` shorthand, normalizes both into the
//! typed `WorkflowDefinition` tree, then validates it. Validation collects
//! every violation and reports them together in one error.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use cadence_types::workflow::{
    AgentProfile, Condition, ConditionOperator, Step, StepKind, WorkflowDefinition, WorkflowSettings,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::condition::{parse_condition_expr, parse_operator};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced while loading a workflow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// One or more structural violations.
    #[error("invalid workflow definition: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DefinitionError {
    /// Individual violations, empty for parse and I/O errors.
    pub fn violations(&self) -> &[String] {
        match self {
            DefinitionError::Invalid(v) => v,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Raw document shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawDefinition {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    agents: HashMap<String, AgentProfile>,
    #[serde(default)]
    steps: Option<Vec<RawStep>>,
    #[serde(default)]
    sequence: Option<Vec<RawSequenceEntry>>,
    #[serde(default)]
    settings: WorkflowSettings,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    step_type: Option<String>,
    #[serde(default)]
    optional: bool,
    #[serde(default, alias = "retryCount")]
    retry_count: u32,
    #[serde(default, alias = "retryDelay", alias = "retry_delay")]
    retry_delay_secs: u64,

    #[serde(default, alias = "agent")]
    role: Option<String>,
    #[serde(default)]
    task: Option<String>,
    #[serde(default)]
    inputs: HashMap<String, Value>,
    #[serde(default)]
    requires: Option<OneOrMany>,
    #[serde(default)]
    creates: Option<String>,

    #[serde(default)]
    condition: Option<RawCondition>,
    #[serde(default, alias = "thenSteps", alias = "then")]
    then_steps: Vec<RawStep>,
    #[serde(default, alias = "elseSteps", alias = "else")]
    else_steps: Vec<RawStep>,
    #[serde(default, alias = "parallelSteps", alias = "parallel_steps")]
    steps: Vec<RawStep>,

    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    checklist: Option<String>,
    #[serde(default, alias = "timeout_secs", alias = "timeoutSeconds")]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawSequenceEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "role")]
    agent: Option<String>,
    #[serde(default)]
    task: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    creates: Option<String>,
    #[serde(default)]
    requires: Option<OneOrMany>,
    #[serde(default)]
    inputs: HashMap<String, Value>,
    #[serde(default)]
    validates: Option<String>,
    #[serde(default, alias = "uses")]
    checklist: Option<String>,
    #[serde(default)]
    optional: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCondition {
    Expr(String),
    Structured {
        field: String,
        #[serde(alias = "op")]
        operator: String,
        #[serde(default)]
        value: Value,
    },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML (or JSON) string into a validated `WorkflowDefinition`.
pub fn parse_definition_yaml(text: &str) -> Result<WorkflowDefinition, DefinitionError> {
    let raw: RawDefinition =
        serde_yaml_ng::from_str(text).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    normalize(raw)
}

/// Serialize a `WorkflowDefinition` to YAML in its canonical tree form.
pub fn serialize_definition_yaml(def: &WorkflowDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

fn normalize(raw: RawDefinition) -> Result<WorkflowDefinition, DefinitionError> {
    let mut violations = Vec::new();

    let steps = match (raw.steps, raw.sequence) {
        (Some(steps), _) if !steps.is_empty() => steps
            .into_iter()
            .map(|s| normalize_step(s, &mut violations))
            .collect(),
        (_, Some(sequence)) => sequence
            .into_iter()
            .enumerate()
            .map(|(i, entry)| normalize_sequence_entry(i + 1, entry))
            .collect(),
        _ => Vec::new(),
    };

    let version = match raw.version {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    };

    let def = WorkflowDefinition {
        id: raw.id.unwrap_or_default(),
        name: raw.name.unwrap_or_default(),
        description: raw.description,
        version,
        agents: raw.agents,
        steps,
        settings: raw.settings,
    };

    violations.extend(collect_violations(&def));
    if violations.is_empty() {
        Ok(def)
    } else {
        Err(DefinitionError::Invalid(violations))
    }
}

fn normalize_step(raw: RawStep, violations: &mut Vec<String>) -> Step {
    let id = raw.id.unwrap_or_default();
    let label = if id.is_empty() {
        raw.name.clone().unwrap_or_else(|| "<unnamed>".to_string())
    } else {
        id.clone()
    };
    let name = raw.name.unwrap_or_else(|| id.clone());
    let inputs = stringify_inputs(raw.inputs);
    let requires = raw.requires.map(OneOrMany::into_vec).unwrap_or_default();

    let type_key = raw
        .step_type
        .as_deref()
        .map(|t| t.to_ascii_lowercase().replace(['_', '-'], ""));

    let kind = match type_key.as_deref() {
        Some("agenttask") | Some("agent") | Some("task") => StepKind::AgentTask {
            role: raw.role.unwrap_or_default(),
            task: raw.task.unwrap_or_default(),
            inputs,
            requires,
            creates: raw.creates,
        },
        Some("conditional") | Some("condition") => {
            let condition = match raw.condition {
                Some(c) => normalize_condition(&label, c, violations),
                None => {
                    violations.push(format!("conditional step '{label}' has no condition"));
                    None
                }
            };
            StepKind::Conditional {
                condition: condition.unwrap_or_else(|| Condition {
                    field: String::new(),
                    operator: ConditionOperator::Exists,
                    value: Value::Null,
                }),
                then_steps: raw
                    .then_steps
                    .into_iter()
                    .map(|s| normalize_step(s, violations))
                    .collect(),
                else_steps: raw
                    .else_steps
                    .into_iter()
                    .map(|s| normalize_step(s, violations))
                    .collect(),
            }
        }
        Some("parallel") => StepKind::Parallel {
            steps: raw
                .steps
                .into_iter()
                .map(|s| normalize_step(s, violations))
                .collect(),
        },
        Some("documentcreate") | Some("document") => StepKind::DocumentCreate {
            template: raw.template,
            inputs,
            creates: raw
                .creates
                .unwrap_or_else(|| format!("{}.md", if id.is_empty() { "document" } else { id.as_str() })),
        },
        Some("qualitygate") | Some("gate") => StepKind::QualityGate {
            role: raw.role.unwrap_or_else(|| "reviewer".to_string()),
            checklist: raw.checklist.unwrap_or_default(),
            requires,
        },
        Some("wait") => StepKind::Wait {
            timeout_secs: raw.timeout,
        },
        Some(_) => {
            violations.push(format!(
                "step '{label}' has unknown type '{}'",
                raw.step_type.unwrap_or_default()
            ));
            StepKind::Wait { timeout_secs: None }
        }
        None => {
            violations.push(format!("step '{label}' has no type"));
            StepKind::Wait { timeout_secs: None }
        }
    };

    Step {
        id,
        name,
        optional: raw.optional,
        retry_count: raw.retry_count,
        retry_delay_secs: raw.retry_delay_secs,
        kind,
    }
}

fn normalize_condition(
    label: &str,
    raw: RawCondition,
    violations: &mut Vec<String>,
) -> Option<Condition> {
    let parsed = match raw {
        RawCondition::Expr(text) => parse_condition_expr(&text),
        RawCondition::Structured {
            field,
            operator,
            value,
        } => parse_operator(&operator).map(|operator| Condition {
            field,
            operator,
            value,
        }),
    };
    match parsed {
        Ok(c) => Some(c),
        Err(e) => {
            violations.push(format!("conditional step '{label}': {e}"));
            None
        }
    }
}

/// Translate one `sequence` entry. Entries with `validates` become quality
/// gates reviewing the validated document; everything else is an agent task.
fn normalize_sequence_entry(position: usize, entry: RawSequenceEntry) -> Step {
    let id = entry.id.unwrap_or_else(|| format!("step_{position}"));
    let name = entry.name.unwrap_or_else(|| id.clone());
    let role = entry.agent.unwrap_or_default();
    let requires = entry.requires.map(OneOrMany::into_vec).unwrap_or_default();

    let kind = match entry.validates {
        Some(target) => {
            let mut docs = vec![target];
            docs.extend(requires);
            StepKind::QualityGate {
                role: if role.is_empty() {
                    "reviewer".to_string()
                } else {
                    role
                },
                checklist: entry.checklist.unwrap_or_default(),
                requires: docs,
            }
        }
        None => {
            let task = entry
                .task
                .or(entry.notes)
                .or_else(|| entry.creates.as_ref().map(|doc| format!("Create {doc}")))
                .unwrap_or_default();
            StepKind::AgentTask {
                role,
                task,
                inputs: stringify_inputs(entry.inputs),
                requires,
                creates: entry.creates,
            }
        }
    };

    Step {
        id,
        name,
        optional: entry.optional,
        retry_count: 0,
        retry_delay_secs: 0,
        kind,
    }
}

fn stringify_inputs(inputs: HashMap<String, Value>) -> HashMap<String, String> {
    inputs
        .into_iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, s)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a typed definition.
///
/// Checks: non-empty id and name, at least one step, unique step ids across
/// the whole tree, agent tasks with role and task, parallel steps with
/// children, quality gates with a checklist.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    let violations = collect_violations(def);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(DefinitionError::Invalid(violations))
    }
}

fn collect_violations(def: &WorkflowDefinition) -> Vec<String> {
    let mut violations = Vec::new();

    if def.id.trim().is_empty() {
        violations.push("workflow id must not be empty".to_string());
    }
    if def.name.trim().is_empty() {
        violations.push("workflow name must not be empty".to_string());
    }
    if def.steps.is_empty() {
        violations.push("workflow must have at least one step".to_string());
    }
    if def.settings.max_parallel_agents == 0 {
        violations.push("settings.max_parallel_agents must be >= 1".to_string());
    }

    let mut seen = HashSet::new();
    for (index, step) in def.iter_steps().enumerate() {
        let label = if step.id.is_empty() {
            format!("#{}", index + 1)
        } else {
            format!("'{}'", step.id)
        };

        if step.id.trim().is_empty() {
            violations.push(format!("step {label} has no id"));
        } else if !seen.insert(step.id.as_str()) {
            violations.push(format!("duplicate step id: '{}'", step.id));
        }

        match &step.kind {
            StepKind::AgentTask { role, task, .. } => {
                if role.trim().is_empty() {
                    violations.push(format!("agent task {label} has no role"));
                }
                if task.trim().is_empty() {
                    violations.push(format!("agent task {label} has no task"));
                }
            }
            // Missing conditions are reported while normalizing.
            StepKind::Conditional { .. } => {}
            StepKind::Parallel { steps } => {
                if steps.is_empty() {
                    violations.push(format!("parallel step {label} has no child steps"));
                }
            }
            StepKind::QualityGate { checklist, .. } => {
                if checklist.trim().is_empty() {
                    violations.push(format!("quality gate {label} has no checklist"));
                }
            }
            StepKind::DocumentCreate { creates, .. } => {
                if creates.trim().is_empty() {
                    violations.push(format!("document step {label} has no target document"));
                }
            }
            StepKind::Wait { .. } => {}
        }
    }

    violations
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML or JSON file.
pub fn load_definition_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_definition_yaml(&content)
}

/// Discover all workflow definition files under `base_dir`.
///
/// Scans `.yaml`, `.yml` and `.json` files recursively. Files that fail to
/// parse are skipped with a warning.
pub fn discover_definitions(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if matches!(ext, "yaml" | "yml" | "json") {
                match load_definition_file(&path) {
                    Ok(def) => results.push((path, def)),
                    Err(e) => {
                        tracing::warn!(?path, error = %e, "skipping unparseable workflow file");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
