use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trialgate_core::scoring::compliance::{evaluate_compliance, HttpJudge, Judge};
use trialgate_core::scoring::coverage::{evaluate_coverage, evaluate_requirements};
use trialgate_core::scoring::efficiency::evaluate_efficiency;
use trialgate_core::scoring::functional::evaluate_functional;
use trialgate_core::scoring::visual::evaluate_visual;
use trialgate_core::{
	compose_scorecard, create_suite_summary, EvalRun, EvalSettings, GateWatcher, ScorecardInputs,
	TaskDefinition,
};
use trialgate_core::{report, summary};
use trialgate_store::{Index, RunStore};
use trialgate_types::{EvalConfig, SuiteConfig};

#[derive(Debug, Parser)]
#[command(name = "trialgate", about = "Score coding-agent trials and aggregate repeat suites")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Run verification gates and scorers against one finished workspace
	Score(ScoreArgs),
	/// Aggregate stored runs into a suite summary
	Summarize(SummarizeArgs),
	/// Cross-run comparison table over everything in the store
	Compare(CompareArgs),
}

#[derive(Debug, Clone, Parser)]
struct ScoreArgs {
	/// Task definition YAML
	#[arg(long)]
	task: PathBuf,

	/// Workspace the agent produced
	#[arg(long)]
	workspace: PathBuf,

	/// Run store directory
	#[arg(long, default_value = "results")]
	store: PathBuf,

	/// Settings JSON; defaults apply when omitted
	#[arg(long)]
	settings: Option<PathBuf>,

	#[arg(long)]
	harness: String,

	#[arg(long)]
	model: String,

	#[arg(long, default_value = "baseline")]
	rules_variant: String,

	/// Rules file shown to the compliance judge
	#[arg(long)]
	rules_file: Option<PathBuf>,

	/// Chat-completions endpoint for the compliance judge; deterministic
	/// checks only when omitted
	#[arg(long)]
	judge_url: Option<String>,

	/// Pixel-diff tool invocation, e.g. "npx pixelmatch"
	#[arg(long, value_delimiter = ' ', default_value = "npx pixelmatch")]
	diff_command: Vec<String>,

	/// Wall-clock seconds the trial took, as reported by the harness
	#[arg(long, default_value_t = 0.0)]
	duration_sec: f64,

	/// Termination reason when the harness cut the trial short
	#[arg(long)]
	termination_reason: Option<String>,
}

#[derive(Debug, Clone, Parser)]
struct SummarizeArgs {
	#[arg(long, default_value = "results")]
	store: PathBuf,

	/// Scored-run target the suite was configured for
	#[arg(long, default_value_t = 1)]
	repeats: u32,

	#[arg(long, default_value_t = 0)]
	retry_void_limit: u32,

	#[arg(long, default_value_t = 0)]
	retries_used: u32,
}

#[derive(Debug, Clone, Parser)]
struct CompareArgs {
	#[arg(long, default_value = "results")]
	store: PathBuf,

	#[arg(long)]
	csv_out: Option<PathBuf>,

	#[arg(long)]
	md_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Score(args) => score(args).await?,
		Commands::Summarize(args) => summarize(args)?,
		Commands::Compare(args) => compare(args)?,
	}
	Ok(())
}

async fn score(args: ScoreArgs) -> Result<()> {
	let task = TaskDefinition::from_yaml(&args.task)?;
	let settings = match &args.settings {
		Some(path) => {
			let content = std::fs::read_to_string(path)
				.with_context(|| format!("reading settings {}", path.display()))?;
			serde_json::from_str::<EvalSettings>(&content)?
		}
		None => EvalSettings::default(),
	};
	settings.weights.validate()?;

	let mut watcher = GateWatcher::new(settings.gate, settings.timeouts.gate);
	let (gate_history, _status) = watcher
		.run_all_gates(&task.verification.gates, &args.workspace)
		.await;
	let watcher_summary = watcher.summary();

	let mut functional = evaluate_functional(
		&args.workspace,
		task.verification.build_command.as_deref(),
		task.verification.test_command.as_deref(),
		&settings.timeouts,
	)
	.await;
	functional.gates_passed = watcher_summary.passed;
	functional.gates_total = watcher_summary.total_gates;

	let rules_content = match &args.rules_file {
		Some(path) => std::fs::read_to_string(path)
			.with_context(|| format!("reading rules {}", path.display()))?,
		None => String::new(),
	};
	let judge = args
		.judge_url
		.as_ref()
		.map(|url| HttpJudge::new(url.clone(), settings.judge.clone()));
	let compliance = evaluate_compliance(
		&args.workspace,
		&task.compliance,
		judge.as_ref().map(|j| j as &dyn Judge),
		&rules_content,
		&settings.judge,
	)
	.await;

	let visual = match &task.visual {
		Some(config) => Some(
			evaluate_visual(
				&args.workspace,
				config,
				&args.diff_command,
				&settings.visual,
				&settings.timeouts,
			)
			.await,
		),
		None => None,
	};

	let coverage = evaluate_coverage(
		&args.workspace,
		&gate_history,
		task.verification.coverage_threshold,
	);
	let requirements = evaluate_requirements(&args.workspace, &task.compliance.requirements);
	let efficiency = evaluate_efficiency(&watcher_summary, &settings.efficiency);

	let timestamp = Utc::now();
	let run_id = format!(
		"{}-{}",
		timestamp.format("%Y%m%d-%H%M%S"),
		task.name.replace(' ', "-"),
	);
	let terminated_early = args.termination_reason.is_some();

	let inputs = ScorecardInputs {
		run_id: run_id.clone(),
		task_name: task.name.clone(),
		harness: args.harness.clone(),
		model: args.model.clone(),
		rules_variant: args.rules_variant.clone(),
		duration_sec: args.duration_sec,
		terminated_early,
		termination_reason: args.termination_reason.clone(),
		functional,
		compliance,
		visual,
		efficiency,
		coverage,
		requirements,
		gate_names: task.verification.gates.iter().map(|g| g.name.clone()).collect(),
		gate_history: gate_history.clone(),
		..Default::default()
	};
	let scores = compose_scorecard(inputs, &settings.weights)?;

	let run = EvalRun {
		id: run_id,
		timestamp: timestamp.to_rfc3339(),
		config: EvalConfig {
			model: args.model,
			harness: args.harness,
			rules_variant: args.rules_variant,
			task_name: task.name.clone(),
			..Default::default()
		},
		duration_sec: args.duration_sec,
		terminated_early,
		termination_reason: args.termination_reason,
		scores,
		events: Vec::new(),
		gate_history,
	};

	let store = RunStore::new(&args.store)?;
	let path = store.save_run(&run)?;
	let index = Index::open(args.store.join("index.db"))?;
	index.index_run(&run)?;

	println!(
		"{}  composite {:.3}  diagnostic {:.3}{}",
		run.id,
		run.scores.composite_score,
		run.scores.diagnostic_score,
		if run.scores.voided {
			format!("  VOID [{}]", run.scores.void_reasons.join(", "))
		} else {
			String::new()
		},
	);
	println!("saved {}", path.display());
	Ok(())
}

fn summarize(args: SummarizeArgs) -> Result<()> {
	let store = RunStore::new(&args.store)?;
	let runs = store.load_all_runs()?;
	anyhow::ensure!(!runs.is_empty(), "no runs in {}", args.store.display());

	let first = &runs[0].config;
	let config = SuiteConfig {
		task_name: first.task_name.clone(),
		harness: first.harness.clone(),
		model: first.model.clone(),
		rules_variant: first.rules_variant.clone(),
		..Default::default()
	};
	let mut settings = EvalSettings::default();
	settings.suite.repeats = args.repeats;
	settings.suite.retry_void_limit = args.retry_void_limit;

	let started_at = runs
		.iter()
		.filter_map(|r| r.timestamp.parse().ok())
		.min()
		.unwrap_or_else(Utc::now);
	let unresolved = runs.iter().filter(|r| r.scores.voided).count() as u32;
	let suite = create_suite_summary(
		&runs,
		&settings.suite,
		config,
		args.retries_used,
		unresolved,
		started_at,
		Utc::now(),
	);

	let readme = summary::render_markdown(&suite);
	let dir = store.persist_suite(&suite, &readme)?;

	println!("{}", suite.summary_table());
	println!("saved {}", dir.display());
	Ok(())
}

fn compare(args: CompareArgs) -> Result<()> {
	let store = RunStore::new(&args.store)?;
	let runs = store.load_all_runs()?;
	anyhow::ensure!(!runs.is_empty(), "no runs in {}", args.store.display());

	let comparison = report::build_report(&runs);
	print!("{}", report::to_markdown(&comparison));

	if let Some(path) = &args.csv_out {
		std::fs::write(path, report::to_csv(&comparison))?;
		println!("wrote {}", path.display());
	}
	if let Some(path) = &args.md_out {
		std::fs::write(path, report::to_markdown(&comparison))?;
		println!("wrote {}", path.display());
	}
	Ok(())
}
