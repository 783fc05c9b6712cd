//! Tool registry — the contract surface exposed to the calling agent
//!
//! A static registry maps each tool name to its connector, argument
//! schema, and step plan. Lookup happens once per call; unknown names
//! and schema violations fail before any connector is touched.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use toolgate_connectors::ConnectorKind;
use tracing::debug;

/// How the engine drives one workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Invoke the operation once (through retry policy)
    Invoke,
    /// Re-invoke the operation until its output reports a terminal
    /// job status, bounded by the call deadline
    PollUntilTerminal,
}

/// One ordered unit of execution within a tool call
#[derive(Debug, Clone)]
pub struct WorkflowStep {
    /// Connector operation to invoke
    pub operation: String,
    /// Execution mode
    pub kind: StepKind,
}

impl WorkflowStep {
    /// Single invocation step
    #[must_use]
    pub fn invoke(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            kind: StepKind::Invoke,
        }
    }

    /// Poll-until-terminal step
    #[must_use]
    pub fn poll(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            kind: StepKind::PollUntilTerminal,
        }
    }
}

/// Tool metadata, schema, and step plan
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Unique tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Connector that serves this tool
    pub connector: ConnectorKind,
    /// JSON schema for arguments
    pub parameters: serde_json::Value,
    /// Ordered step plan; output of each step feeds the next
    pub steps: Vec<WorkflowStep>,
}

/// Registry entry shape served to the calling agent
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Description
    pub description: String,
    /// Connector identifier
    pub connector: ConnectorKind,
    /// Argument schema
    pub parameters: serde_json::Value,
}

/// Static tool registry
pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry with the built-in tool set
    #[must_use]
    pub fn builtins() -> Self {
        let mut registry = Self::new();
        for spec in builtin_specs() {
            registry.register(spec);
        }
        registry
    }

    /// Register a tool
    pub fn register(&mut self, spec: ToolSpec) {
        debug!(tool = %spec.name, connector = %spec.connector, "Registering tool");
        self.tools.insert(spec.name.clone(), spec);
    }

    /// Get a tool spec by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// Check if a tool exists
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List descriptors for all registered tools, sorted by name
    #[must_use]
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut list: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|spec| ToolDescriptor {
                name: spec.name.clone(),
                description: spec.description.clone(),
                connector: spec.connector,
                parameters: spec.parameters.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Get tool count
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate arguments against a tool's schema.
    ///
    /// Checks that arguments form an object, every `required` field is
    /// present, and each known property matches its declared primitive
    /// type. The failing field is named in the error.
    pub fn validate_arguments(spec: &ToolSpec, arguments: &serde_json::Value) -> Result<()> {
        let Some(args) = arguments.as_object() else {
            return Err(Error::InvalidArguments {
                field: "<root>".to_string(),
                message: "arguments must be an object".to_string(),
            });
        };

        let schema = &spec.parameters;
        if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
            for field in required.iter().filter_map(|v| v.as_str()) {
                if !args.contains_key(field) {
                    return Err(Error::InvalidArguments {
                        field: field.to_string(),
                        message: "required field is missing".to_string(),
                    });
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
            for (field, value) in args {
                let Some(prop) = properties.get(field) else {
                    continue;
                };
                let Some(expected) = prop.get("type").and_then(|v| v.as_str()) else {
                    continue;
                };
                if !matches_type(value, expected) {
                    return Err(Error::InvalidArguments {
                        field: field.clone(),
                        message: format!("expected {expected}"),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Check a JSON value against a JSON-schema primitive type name
fn matches_type(value: &serde_json::Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

/// Default interval between job-status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn builtin_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "list_issues".to_string(),
            description: "List issues in a repository".to_string(),
            connector: ConnectorKind::SourceControl,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string", "description": "Repository owner"},
                    "repo": {"type": "string", "description": "Repository name"},
                    "state": {"type": "string", "description": "Issue state filter (open, closed, all)"}
                },
                "required": ["owner", "repo"]
            }),
            steps: vec![WorkflowStep::invoke("list_issues")],
        },
        ToolSpec {
            name: "get_issue".to_string(),
            description: "Fetch a single issue by number".to_string(),
            connector: ConnectorKind::SourceControl,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string", "description": "Repository owner"},
                    "repo": {"type": "string", "description": "Repository name"},
                    "number": {"type": "integer", "description": "Issue number"}
                },
                "required": ["owner", "repo", "number"]
            }),
            steps: vec![WorkflowStep::invoke("get_issue")],
        },
        ToolSpec {
            name: "create_issue".to_string(),
            description: "Create a new issue".to_string(),
            connector: ConnectorKind::SourceControl,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string", "description": "Repository owner"},
                    "repo": {"type": "string", "description": "Repository name"},
                    "title": {"type": "string", "description": "Issue title"},
                    "body": {"type": "string", "description": "Issue body"}
                },
                "required": ["owner", "repo", "title"]
            }),
            steps: vec![WorkflowStep::invoke("create_issue")],
        },
        ToolSpec {
            name: "list_pull_requests".to_string(),
            description: "List pull requests in a repository".to_string(),
            connector: ConnectorKind::SourceControl,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string", "description": "Repository owner"},
                    "repo": {"type": "string", "description": "Repository name"},
                    "state": {"type": "string", "description": "Pull request state filter"}
                },
                "required": ["owner", "repo"]
            }),
            steps: vec![WorkflowStep::invoke("list_pull_requests")],
        },
        ToolSpec {
            name: "create_pull_request".to_string(),
            description: "Open a pull request".to_string(),
            connector: ConnectorKind::SourceControl,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string", "description": "Repository owner"},
                    "repo": {"type": "string", "description": "Repository name"},
                    "title": {"type": "string", "description": "Pull request title"},
                    "head": {"type": "string", "description": "Source branch"},
                    "base": {"type": "string", "description": "Target branch"},
                    "body": {"type": "string", "description": "Pull request body"}
                },
                "required": ["owner", "repo", "title", "head", "base"]
            }),
            steps: vec![WorkflowStep::invoke("create_pull_request")],
        },
        ToolSpec {
            name: "extract_entity_records".to_string(),
            description: "Extract records from an enterprise entity set, scoped by company code and fiscal period".to_string(),
            connector: ConnectorKind::EnterpriseData,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "entity_set": {"type": "string", "description": "Entity set name (e.g. ACDOCA, MBEW, CKML)"},
                    "company_code": {"type": "string", "description": "Company code scope"},
                    "fiscal_year": {"type": "string", "description": "Fiscal year (e.g. 2025)"},
                    "fiscal_period": {"type": "string", "description": "Fiscal period (e.g. 003)"},
                    "max_rows": {"type": "integer", "description": "Row limit for the extraction"}
                },
                "required": ["entity_set", "company_code", "fiscal_year"]
            }),
            steps: vec![WorkflowStep::invoke("extract_entity_records")],
        },
        ToolSpec {
            name: "run_circuit".to_string(),
            description: "Submit a quantum circuit and wait for the job to reach a terminal state".to_string(),
            connector: ConnectorKind::QuantumExec,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "circuit": {"type": "object", "description": "Circuit definition"},
                    "shots": {"type": "integer", "description": "Shot count"},
                    "backend": {"type": "string", "description": "Execution backend name"}
                },
                "required": ["circuit"]
            }),
            steps: vec![WorkflowStep::invoke("submit"), WorkflowStep::poll("poll")],
        },
    ]
}
