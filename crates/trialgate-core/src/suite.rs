use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{info, warn};
use trialgate_types::EvalRun;

use crate::config::SuiteSettings;

/// Executes one trial end to end: provision a workspace, drive the agent,
/// run the gates and scorers, and hand back the finished run record. The
/// orchestrator never looks inside a trial; it only reads the void flag.
#[async_trait]
pub trait TrialRunner: Send + Sync {
	/// `index` is the 0-based position within the whole suite, stable
	/// across retry rounds so workspaces never collide.
	async fn run_trial(&self, index: u32) -> Result<EvalRun, SuiteError>;
}

#[derive(Debug, Error)]
pub enum SuiteError {
	/// Configuration or environment error that would fail every trial the
	/// same way. Aborts the suite instead of burning the retry budget.
	#[error("fatal suite error: {0}")]
	Fatal(#[from] anyhow::Error),
}

#[derive(Debug)]
pub struct SuiteOutcome {
	/// Every run executed, voided ones included, in trial-index order.
	pub runs: Vec<EvalRun>,
	pub retries_used: u32,
	pub unresolved_void_count: u32,
}

/// Isolated workspace path for one trial of a repeat suite.
pub fn repeat_workspace(base: &Path, index: u32) -> PathBuf {
	let name = base
		.file_name()
		.and_then(|n| n.to_str())
		.unwrap_or("workspace");
	base.with_file_name(format!("{name}-repeat-{index:02}"))
}

async fn run_batch(
	runner: &Arc<dyn TrialRunner>,
	indices: Vec<u32>,
	parallel: usize,
) -> Result<Vec<EvalRun>, SuiteError> {
	let results: Vec<(u32, Result<EvalRun, SuiteError>)> = stream::iter(indices)
		.map(|index| {
			let runner = runner.clone();
			async move { (index, runner.run_trial(index).await) }
		})
		.buffer_unordered(parallel.max(1))
		.collect()
		.await;

	// buffer_unordered yields in completion order; put trials back in
	// index order before anything downstream sees them.
	let mut results = results;
	results.sort_by_key(|(index, _)| *index);
	results
		.into_iter()
		.map(|(_, result)| result)
		.collect()
}

/// Run `repeats` trials, then up to `retry_void_limit` extra rounds, each
/// replacing exactly the trials the previous round voided. All runs are
/// kept; retries add runs rather than overwrite them.
pub async fn run_with_void_retries(
	runner: Arc<dyn TrialRunner>,
	settings: &SuiteSettings,
) -> Result<SuiteOutcome, SuiteError> {
	let repeats = settings.repeats.max(1);
	let parallel = settings.repeat_parallel.max(1) as usize;

	let mut runs = run_batch(&runner, (0..repeats).collect(), parallel).await?;
	let mut void_count = runs.iter().filter(|r| r.scores.voided).count() as u32;
	let mut next_index = repeats;
	let mut retries_used = 0;

	while void_count > 0 && retries_used < settings.retry_void_limit {
		retries_used += 1;
		info!(
			round = retries_used,
			voided = void_count,
			"retrying voided trials"
		);
		let indices: Vec<u32> = (next_index..next_index + void_count).collect();
		next_index += void_count;
		let retry_runs = run_batch(&runner, indices, parallel).await?;
		void_count = retry_runs.iter().filter(|r| r.scores.voided).count() as u32;
		runs.extend(retry_runs);
	}

	if void_count > 0 {
		warn!(unresolved = void_count, "retry budget exhausted with voided trials");
	}

	Ok(SuiteOutcome {
		runs,
		retries_used,
		unresolved_void_count: void_count,
	})
}
