use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Dimension weights for the composite score. Must sum to 1.0; when the
/// optional visual dimension is absent its weight is redistributed
/// proportionally across the rest at composition time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoringWeights {
    #[serde(default = "default_w_functional")]
    pub functional: f64,
    #[serde(default = "default_w_compliance")]
    pub compliance: f64,
    #[serde(default = "default_w_visual")]
    pub visual: f64,
    #[serde(default = "default_w_efficiency")]
    pub efficiency: f64,
    #[serde(default = "default_w_coverage")]
    pub coverage: f64,
    #[serde(default = "default_w_requirements")]
    pub requirements: f64,
}

fn default_w_functional() -> f64 {
    0.35
}
fn default_w_compliance() -> f64 {
    0.20
}
fn default_w_visual() -> f64 {
    0.15
}
fn default_w_efficiency() -> f64 {
    0.10
}
fn default_w_coverage() -> f64 {
    0.10
}
fn default_w_requirements() -> f64 {
    0.10
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            functional: default_w_functional(),
            compliance: default_w_compliance(),
            visual: default_w_visual(),
            efficiency: default_w_efficiency(),
            coverage: default_w_coverage(),
            requirements: default_w_requirements(),
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.functional
            + self.compliance
            + self.visual
            + self.efficiency
            + self.coverage
            + self.requirements
    }

    pub fn validate(&self) -> Result<()> {
        if (self.sum() - 1.0).abs() > 1e-9 {
            bail!("scoring weights must sum to 1.0, got {}", self.sum());
        }
        Ok(())
    }
}

/// Timeouts in seconds for the external commands the engine runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeoutSettings {
    #[serde(default = "default_timeout_build")]
    pub build: u64,
    #[serde(default = "default_timeout_test")]
    pub test: u64,
    #[serde(default = "default_timeout_gate")]
    pub gate: u64,
    #[serde(default = "default_timeout_screenshot")]
    pub screenshot: u64,
    #[serde(default = "default_timeout_image_compare")]
    pub image_compare: u64,
    #[serde(default = "default_timeout_command")]
    pub command_default: u64,
}

fn default_timeout_build() -> u64 {
    120
}
fn default_timeout_test() -> u64 {
    120
}
fn default_timeout_gate() -> u64 {
    60
}
fn default_timeout_screenshot() -> u64 {
    60
}
fn default_timeout_image_compare() -> u64 {
    30
}
fn default_timeout_command() -> u64 {
    60
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            build: default_timeout_build(),
            test: default_timeout_test(),
            gate: default_timeout_gate(),
            screenshot: default_timeout_screenshot(),
            image_compare: default_timeout_image_compare(),
            command_default: default_timeout_command(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GateSettings {
    /// Cumulative gate failures before the watcher halts the trial.
    #[serde(default = "default_gate_max_failures")]
    pub max_failures: u32,
    /// Captured stdout/stderr bytes kept before truncation.
    #[serde(default = "default_gate_max_output")]
    pub max_output_length: usize,
}

fn default_gate_max_failures() -> u32 {
    3
}
fn default_gate_max_output() -> usize {
    2000
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            max_failures: default_gate_max_failures(),
            max_output_length: default_gate_max_output(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EfficiencySettings {
    /// Failure-count divisor in the efficiency formula.
    #[serde(default = "default_eff_max_failures")]
    pub max_gate_failures: u32,
    /// Extra penalty per failure category seen more than once.
    #[serde(default = "default_eff_repeat_penalty")]
    pub repeat_penalty: f64,
}

fn default_eff_max_failures() -> u32 {
    4
}
fn default_eff_repeat_penalty() -> f64 {
    0.2
}

impl Default for EfficiencySettings {
    fn default() -> Self {
        Self {
            max_gate_failures: default_eff_max_failures(),
            repeat_penalty: default_eff_repeat_penalty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeSettings {
    #[serde(default = "default_judge_model")]
    pub model: String,
    #[serde(default = "default_judge_max_tokens")]
    pub max_tokens: u32,
    /// Source characters collected for the judge prompt.
    #[serde(default = "default_judge_max_source_chars")]
    pub max_source_chars: usize,
    /// Retries after a judge call errors, before failing conservatively.
    #[serde(default = "default_judge_max_retries")]
    pub max_retries: u32,
}

fn default_judge_model() -> String {
    "anthropic/claude-sonnet-4-20250514".to_string()
}
fn default_judge_max_tokens() -> u32 {
    200
}
fn default_judge_max_source_chars() -> usize {
    10_000
}
fn default_judge_max_retries() -> u32 {
    2
}

impl Default for JudgeSettings {
    fn default() -> Self {
        Self {
            model: default_judge_model(),
            max_tokens: default_judge_max_tokens(),
            max_source_chars: default_judge_max_source_chars(),
            max_retries: default_judge_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VisualSettings {
    /// Anti-aliasing tolerance passed to the pixel-diff tool.
    #[serde(default = "default_visual_diff_threshold")]
    pub diff_threshold: f64,
    #[serde(default = "default_visual_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_visual_diff_threshold() -> f64 {
    0.1
}
fn default_visual_similarity_threshold() -> f64 {
    0.95
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self {
            diff_threshold: default_visual_diff_threshold(),
            similarity_threshold: default_visual_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SuiteSettings {
    #[serde(default = "default_suite_repeats")]
    pub repeats: u32,
    #[serde(default = "default_suite_parallel")]
    pub repeat_parallel: u32,
    /// Extra retry rounds for voided trials, not extra trial count.
    #[serde(default)]
    pub retry_void_limit: u32,
}

fn default_suite_repeats() -> u32 {
    1
}
fn default_suite_parallel() -> u32 {
    1
}

impl Default for SuiteSettings {
    fn default() -> Self {
        Self {
            repeats: default_suite_repeats(),
            repeat_parallel: default_suite_parallel(),
            retry_void_limit: 0,
        }
    }
}

/// Root configuration, constructed explicitly and passed by value into the
/// watcher, scorers, composer and orchestrator. Suites with different
/// policies can run concurrently because nothing here is ambient state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvalSettings {
    #[serde(default)]
    pub weights: ScoringWeights,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub gate: GateSettings,
    #[serde(default)]
    pub efficiency: EfficiencySettings,
    #[serde(default)]
    pub judge: JudgeSettings,
    #[serde(default)]
    pub visual: VisualSettings,
    #[serde(default)]
    pub suite: SuiteSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        ScoringWeights::default().validate().unwrap();
    }

    #[test]
    fn unbalanced_weights_rejected() {
        let weights = ScoringWeights {
            functional: 0.9,
            ..Default::default()
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: EvalSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.gate.max_failures, 3);
        assert_eq!(settings.efficiency.max_gate_failures, 4);
        assert_eq!(settings.judge.max_retries, 2);
    }
}
