//! Workflow and phase-graph definitions, as loaded from workflow YAML.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    Execute,
    Evaluate,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpEnforcement {
    Strict,
    AllowDegraded,
}

impl Default for McpEnforcement {
    fn default() -> Self {
        McpEnforcement::Strict
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    PlanOnly,
    ReadOnly,
    Full,
}

/// One outbound edge from a phase. Either `when` holds a predicate string
/// evaluated against `status.*`, or the phase is marked `auto` (always-true).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub to: String,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub auto: bool,
}

impl Transition {
    pub fn is_auto(&self) -> bool {
        self.auto || self.when.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDef {
    pub name: String,
    #[serde(rename = "type")]
    pub phase_type: PhaseType,
    pub prompt: String,
    #[serde(default)]
    pub mcp_profile: Option<String>,
    #[serde(default)]
    pub mcp_enforcement: Option<McpEnforcement>,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// Whether this phase fans work out across the worker sandbox manager.
    /// Declared in the YAML as `fan_out: true`.
    #[serde(default)]
    pub fan_out: bool,
    #[serde(default)]
    pub max_wallclock_secs: Option<u64>,
    #[serde(default)]
    pub inactivity_timeout_secs: Option<u64>,
}

impl PhaseDef {
    pub fn mcp_enforcement(&self) -> McpEnforcement {
        self.mcp_enforcement.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub name: String,
    pub version: String,
    pub start: String,
    pub phases: HashMap<String, PhaseDef>,
}

/// Metadata nested under the `workflow:` key in the YAML file (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkflowMeta {
    name: String,
    version: String,
    start: String,
}

/// On-disk shape: `{workflow: {name, version, start}, phases: {...}}`.
/// [`WorkflowDef`] flattens this for everything downstream that just wants
/// `workflow.start`/`workflow.phases`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkflowFile {
    workflow: WorkflowMeta,
    phases: HashMap<String, PhaseDef>,
}

impl WorkflowDef {
    /// Structural validation performed once at load time: phase names
    /// unique by construction (map keys), every non-terminal phase has at
    /// least one outbound transition, the start phase exists, and every
    /// transition target exists. Loops are permitted (not required acyclic).
    pub fn validate(&self) -> Result<(), String> {
        if !self.phases.contains_key(&self.start) {
            return Err(format!("start phase '{}' is not defined", self.start));
        }
        for (name, phase) in &self.phases {
            if phase.phase_type != PhaseType::Terminal && phase.transitions.is_empty() {
                return Err(format!(
                    "non-terminal phase '{}' has no outbound transitions",
                    name
                ));
            }
            for transition in &phase.transitions {
                if !self.phases.contains_key(&transition.to) {
                    return Err(format!(
                        "phase '{}' transitions to unknown phase '{}'",
                        name, transition.to
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseDef> {
        self.phases.get(name)
    }

    /// Parse a workflow definition from YAML text and validate its graph.
    pub fn from_yaml(text: &str) -> Result<Self, String> {
        let file: WorkflowFile =
            serde_yaml::from_str(text).map_err(|e| format!("invalid workflow YAML: {e}"))?;
        let workflow = WorkflowDef {
            name: file.workflow.name,
            version: file.workflow.version,
            start: file.workflow.start,
            phases: file.phases,
        };
        workflow.validate()?;
        Ok(workflow)
    }

    /// Serialize back to the on-disk `{workflow: {...}, phases: {...}}`
    /// shape (used by the CLI's `workflow show` command).
    pub fn to_yaml(&self) -> Result<String, String> {
        let file = WorkflowFile {
            workflow: WorkflowMeta {
                name: self.name.clone(),
                version: self.version.clone(),
                start: self.start.clone(),
            },
            phases: self.phases.clone(),
        };
        serde_yaml::to_string(&file).map_err(|e| format!("failed to serialize workflow: {e}"))
    }

    /// Load and validate a workflow definition by name from
    /// `<workflows_dir>/<name>.yaml`.
    pub fn load(workflows_dir: &std::path::Path, name: &str) -> Result<Self, String> {
        let path = workflows_dir.join(format!("{name}.yaml"));
        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read workflow '{name}' at {path:?}: {e}"))?;
        Self::from_yaml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal(name: &str) -> PhaseDef {
        PhaseDef {
            name: name.into(),
            phase_type: PhaseType::Terminal,
            prompt: String::new(),
            mcp_profile: None,
            mcp_enforcement: None,
            permission_mode: None,
            transitions: vec![],
            fan_out: false,
            max_wallclock_secs: None,
            inactivity_timeout_secs: None,
        }
    }

    #[test]
    fn trivial_workflow_validates() {
        let mut phases = HashMap::new();
        phases.insert("hello".to_string(), terminal("hello"));
        let workflow = WorkflowDef {
            name: "fixture-trivial".into(),
            version: "1".into(),
            start: "hello".into(),
            phases,
        };
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn unknown_start_phase_is_invalid() {
        let mut phases = HashMap::new();
        phases.insert("hello".to_string(), terminal("hello"));
        let workflow = WorkflowDef {
            name: "fixture".into(),
            version: "1".into(),
            start: "missing".into(),
            phases,
        };
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn non_terminal_phase_needs_transition() {
        let mut phases = HashMap::new();
        let mut non_terminal = terminal("design");
        non_terminal.phase_type = PhaseType::Execute;
        phases.insert("design".to_string(), non_terminal);
        let workflow = WorkflowDef {
            name: "fixture".into(),
            version: "1".into(),
            start: "design".into(),
            phases,
        };
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn loops_are_permitted() {
        let mut phases = HashMap::new();
        let mut retry = terminal("retry");
        retry.phase_type = PhaseType::Execute;
        retry.transitions.push(Transition {
            to: "retry".into(),
            when: None,
            auto: true,
        });
        phases.insert("retry".to_string(), retry);
        let workflow = WorkflowDef {
            name: "fixture".into(),
            version: "1".into(),
            start: "retry".into(),
            phases,
        };
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn parses_from_yaml() {
        let yaml = r#"
workflow:
  name: default
  version: "1"
  start: design
phases:
  design:
    type: execute
    prompt: "draft a design"
    transitions:
      - to: implement
        when: "status.designApproved == true"
      - to: design
        auto: true
  implement:
    type: terminal
    prompt: "done"
"#;
        let workflow = WorkflowDef::from_yaml(yaml).unwrap();
        assert_eq!(workflow.start, "design");
        assert_eq!(workflow.phases.len(), 2);
        assert_eq!(workflow.phase("design").unwrap().transitions.len(), 2);
    }

    #[test]
    fn yaml_with_unknown_transition_target_fails_validation() {
        let yaml = r#"
workflow:
  name: broken
  version: "1"
  start: design
phases:
  design:
    type: execute
    prompt: "draft"
    transitions:
      - to: nowhere
        auto: true
"#;
        assert!(WorkflowDef::from_yaml(yaml).is_err());
    }
}
