use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One verification command run against the agent's workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationGate {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub on_failure: OnFailure,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    #[default]
    Continue,
    Terminate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VerificationConfig {
    #[serde(default)]
    pub gates: Vec<VerificationGate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_gate_failures: Option<u32>,
    /// Minimum coverage in [0,1]; absent means no coverage gate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    ImportPresent,
    FileExists,
    NoPattern,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeterministicCheck {
    #[serde(rename = "type")]
    pub check_type: CheckType,
    pub pattern: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeCriterion {
    pub criterion: String,
    #[serde(default = "default_criterion_weight")]
    pub weight: f64,
}

fn default_criterion_weight() -> f64 {
    1.0
}

/// A task requirement with its implementation check and the test patterns
/// expected to exercise it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequirementSpec {
    pub id: String,
    pub description: String,
    pub check: DeterministicCheck,
    #[serde(default)]
    pub required_test_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComplianceConfig {
    #[serde(default)]
    pub deterministic_checks: Vec<DeterministicCheck>,
    #[serde(default)]
    pub judge_rubric: Vec<JudgeCriterion>,
    #[serde(default)]
    pub requirements: Vec<RequirementSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualConfig {
    pub reference_image: String,
    pub screenshot_command: Vec<String>,
    #[serde(default = "default_visual_threshold")]
    pub threshold: f64,
}

fn default_visual_threshold() -> f64 {
    0.95
}

/// Complete task definition, loaded from YAML by the task-definition
/// collaborator and consumed here read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_task_timeout")]
    pub timeout_sec: u64,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub compliance: ComplianceConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual: Option<VisualConfig>,
    #[serde(default)]
    pub prompt: String,
}

fn default_task_timeout() -> u64 {
    1800
}

impl TaskDefinition {
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file {:?}", path))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid task definition in {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TASK_YAML: &str = r#"
name: homepage
description: Build the marketing homepage.
category: greenfield-ui
verification:
  max_gate_failures: 3
  coverage_threshold: 0.8
  gates:
    - name: typecheck
      command: ["tsc", "--noEmit"]
      on_failure: terminate
    - name: test
      command: ["npm", "test"]
compliance:
  deterministic_checks:
    - type: import_present
      pattern: "@/components/ui"
      description: Uses the shared component library
  requirements:
    - id: hero-section
      description: Hero section renders
      check:
        type: file_exists
        pattern: "src/components/Hero.*"
        description: Hero component exists
      required_test_patterns: ["hero"]
visual:
  reference_image: design/home.png
  screenshot_command: ["npm", "run", "screenshot"]
prompt: Implement the homepage.
"#;

    #[test]
    fn parses_full_task_yaml() {
        let task: TaskDefinition = serde_yaml::from_str(TASK_YAML).unwrap();
        assert_eq!(task.name, "homepage");
        assert_eq!(task.verification.gates.len(), 2);
        assert_eq!(task.verification.gates[0].on_failure, OnFailure::Terminate);
        assert_eq!(task.verification.gates[1].on_failure, OnFailure::Continue);
        assert_eq!(task.verification.coverage_threshold, Some(0.8));
        assert_eq!(task.compliance.requirements[0].required_test_patterns, ["hero"]);
        assert!(task.visual.is_some());
    }

    #[test]
    fn minimal_task_gets_defaults() {
        let task: TaskDefinition =
            serde_yaml::from_str("name: t\ndescription: d\n").unwrap();
        assert_eq!(task.timeout_sec, 1800);
        assert!(task.verification.gates.is_empty());
        assert!(task.visual.is_none());
    }
}
