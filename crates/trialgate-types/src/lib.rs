use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::Tabled;

/// Event from a single verification-gate execution. Immutable once created;
/// the gate watcher appends these to a timestamp-ordered log owned by one trial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateEvent {
	pub timestamp: String,
	pub gate_name: String,
	pub command: String,
	pub exit_code: i32,
	pub stdout: String,
	pub stderr: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failure_category: Option<String>,
	#[serde(default)]
	pub is_repeat: bool,
}

impl GateEvent {
	pub fn passed(&self) -> bool {
		self.exit_code == 0
	}
}

/// Normalized event from an agent session transcript. Every harness adapter
/// produces this one tagged shape regardless of its native log format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
	UserPrompt { timestamp: String, data: Value },
	AssistantMessage { timestamp: String, data: Value },
	FileChange { timestamp: String, data: Value },
	BashCommand { timestamp: String, data: Value },
	ToolCall { timestamp: String, data: Value },
	GateResult { timestamp: String, data: Value },
}

impl SessionEvent {
	pub fn timestamp(&self) -> &str {
		match self {
			SessionEvent::UserPrompt { timestamp, .. }
			| SessionEvent::AssistantMessage { timestamp, .. }
			| SessionEvent::FileChange { timestamp, .. }
			| SessionEvent::BashCommand { timestamp, .. }
			| SessionEvent::ToolCall { timestamp, .. }
			| SessionEvent::GateResult { timestamp, .. } => timestamp,
		}
	}
}

/// Build and test outcomes for one trial.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FunctionalScore {
	pub passed: bool,
	pub tests_passed: u32,
	pub tests_total: u32,
	pub build_succeeded: bool,
	pub gates_passed: u32,
	pub gates_total: u32,
}

impl FunctionalScore {
	/// 1.0 iff build ok and all tests pass; else pass ratio. With no
	/// discovered tests, build success alone decides.
	pub fn score(&self) -> f64 {
		if !self.build_succeeded {
			return 0.0;
		}
		if self.tests_total == 0 {
			return if self.passed { 1.0 } else { 0.0 };
		}
		f64::from(self.tests_passed) / f64::from(self.tests_total)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceCheck {
	pub rule: String,
	/// "deterministic" or "judge".
	pub check_type: String,
	pub passed: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub evidence: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComplianceScore {
	pub checks: Vec<ComplianceCheck>,
	/// Weighted 60/40 deterministic/judge blend, fixed at evaluation time.
	pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VisualScore {
	pub similarity: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub diff_path: Option<String>,
	pub capture_succeeded: bool,
	pub threshold: f64,
}

impl VisualScore {
	pub fn score(&self) -> f64 {
		self.similarity
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EfficiencyScore {
	pub total_gate_failures: u32,
	pub unique_failure_categories: u32,
	pub repeat_failures: u32,
	pub max_gate_failures: u32,
	pub repeat_penalty: f64,
}

impl EfficiencyScore {
	/// max(0, 1 - failures/max_failures - repeats * penalty), clamped to
	/// [0, 1] and rounded to 3 decimals.
	pub fn score(&self) -> f64 {
		let max_failures = f64::from(self.max_gate_failures.max(1));
		let raw = 1.0
			- f64::from(self.total_gate_failures) / max_failures
			- f64::from(self.repeat_failures) * self.repeat_penalty;
		(raw.clamp(0.0, 1.0) * 1000.0).round() / 1000.0
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoverageScore {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub threshold: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub measured: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source: Option<String>,
	pub passed: bool,
}

impl CoverageScore {
	pub fn score(&self) -> f64 {
		match self.threshold {
			None => 1.0,
			Some(_) if self.passed => 1.0,
			Some(threshold) => {
				let measured = self.measured.unwrap_or(0.0);
				(measured / threshold.max(f64::EPSILON)).clamp(0.0, 1.0)
			}
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequirementCoverageScore {
	pub total_requirements: u32,
	pub satisfied_requirements: u32,
	pub mapped_requirements: u32,
	pub mapped_satisfied_requirements: u32,
	#[serde(default)]
	pub missing_requirement_ids: Vec<String>,
	/// Requirements satisfied in code but without a matching test pattern.
	#[serde(default)]
	pub requirement_gap_ids: Vec<String>,
	#[serde(default)]
	pub requirement_pattern_gaps: BTreeMap<String, Vec<String>>,
}

impl RequirementCoverageScore {
	pub fn score(&self) -> f64 {
		if self.total_requirements == 0 {
			return 1.0;
		}
		f64::from(self.satisfied_requirements) / f64::from(self.total_requirements)
	}

	pub fn has_mapping_gaps(&self) -> bool {
		!self.requirement_gap_ids.is_empty()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerdictCheck {
	pub name: String,
	pub passed: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub evidence: Option<String>,
}

/// Named pass/fail checks; an empty list passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
	pub checks: Vec<VerdictCheck>,
}

impl Verdict {
	pub fn passed(&self) -> bool {
		self.checks.iter().all(|c| c.passed)
	}
}

/// Full evaluation of one trial. Created once after gate execution completes;
/// corrections require a new Scorecard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Scorecard {
	pub run_id: String,
	pub task_name: String,
	pub harness: String,
	pub model: String,
	pub rules_variant: String,
	pub duration_sec: f64,
	pub terminated_early: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub termination_reason: Option<String>,
	#[serde(default)]
	pub metadata: BTreeMap<String, Value>,

	pub functional: FunctionalScore,
	pub compliance: ComplianceScore,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub visual: Option<VisualScore>,
	pub efficiency: EfficiencyScore,
	pub coverage: CoverageScore,
	pub requirements: RequirementCoverageScore,

	pub run_validity: Verdict,
	pub performance_gates: Verdict,

	pub voided: bool,
	#[serde(default)]
	pub void_reasons: Vec<String>,

	/// Weighted quality number; 0.0 when the run is voided or invalid.
	pub composite_score: f64,
	/// Same weighted blend computed unconditionally; ranks invalid runs only.
	pub diagnostic_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvalConfig {
	pub model: String,
	pub harness: String,
	pub rules_variant: String,
	pub task_name: String,
	pub scaffold_template: String,
	pub scaffold_version: String,
}

/// Durable record of one trial.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvalRun {
	pub id: String,
	pub timestamp: String,
	pub config: EvalConfig,
	pub duration_sec: f64,
	#[serde(default)]
	pub terminated_early: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub termination_reason: Option<String>,
	pub scores: Scorecard,
	#[serde(default)]
	pub events: Vec<SessionEvent>,
	#[serde(default)]
	pub gate_history: Vec<GateEvent>,
}

impl EvalRun {
	/// Uncached input tokens recorded by the harness adapter, if any.
	pub fn uncached_input_tokens(&self) -> u64 {
		self.scores
			.metadata
			.get("process")
			.and_then(|v| v.get("uncached_input_tokens"))
			.and_then(Value::as_u64)
			.unwrap_or(0)
	}
}

/// mean/median/population-stddev/min/max block, 6-decimal rounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatBlock {
	pub mean: f64,
	pub median: f64,
	pub stddev: f64,
	pub min: f64,
	pub max: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuiteConfig {
	pub task_name: String,
	pub harness: String,
	pub model: String,
	pub rules_variant: String,
	pub repeats: u32,
	pub repeat_parallel: u32,
	pub retry_void_limit: u32,
	pub retries_used: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuiteAggregate {
	pub run_count_total: u32,
	pub run_count_scored: u32,
	pub void_count: u32,
	pub valid_count: u32,
	/// valid / scored; voided runs are excluded from the denominator.
	pub validity_rate: f64,
	pub validity_rate_total: f64,
	pub performance_pass_count: u32,
	pub performance_pass_rate: f64,
	pub composite_score: StatBlock,
	pub diagnostic_score: StatBlock,
	pub duration_sec: StatBlock,
	pub uncached_input_tokens: StatBlock,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunPointer {
	pub run_id: String,
	pub timestamp: String,
	pub voided: bool,
	#[serde(default)]
	pub void_reasons: Vec<String>,
	pub run_valid: bool,
	pub performance_gates_passed: bool,
	pub composite_score: f64,
	pub diagnostic_score: f64,
	pub duration_sec: f64,
	pub terminated_early: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub termination_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetryBlock {
	pub target_scored_runs: u32,
	pub achieved_scored_runs: u32,
	pub target_met: bool,
	pub unresolved_void_count: u32,
}

/// Aggregate over all trials of one (task, harness, model, rules-variant)
/// configuration. Recomputed fresh from the run list, never incrementally.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuiteSummary {
	pub suite_id: String,
	pub started_at_utc: String,
	pub completed_at_utc: String,
	pub config: SuiteConfig,
	pub aggregate: SuiteAggregate,
	pub runs: Vec<RunPointer>,
	pub retry: RetryBlock,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct SuiteRow {
	run_id: String,
	scored: String,
	valid: String,
	composite: f64,
	diagnostic: f64,
	duration_sec: f64,
}

impl SuiteSummary {
	pub fn summary_table(&self) -> String {
		use tabled::Table;
		let rows: Vec<SuiteRow> = self
			.runs
			.iter()
			.map(|r| SuiteRow {
				run_id: r.run_id.clone(),
				scored: if r.voided { " ".to_string() } else { "✓".to_string() },
				valid: if r.run_valid { "✓".to_string() } else { " ".to_string() },
				composite: r.composite_score,
				diagnostic: r.diagnostic_score,
				duration_sec: r.duration_sec,
			})
			.collect();

		let table = Table::new(rows).to_string();
		let footer = format!(
			"Runs: {}  Scored: {}  Void: {}  Valid: {}  Composite mean: {:.3}",
			self.aggregate.run_count_total,
			self.aggregate.run_count_scored,
			self.aggregate.void_count,
			self.aggregate.valid_count,
			self.aggregate.composite_score.mean,
		);
		format!("{}\n\n{}\n", table, footer)
	}
}
