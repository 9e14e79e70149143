use chrono::{DateTime, Utc};
use trialgate_types::{
    EvalRun, RetryBlock, RunPointer, StatBlock, SuiteAggregate, SuiteConfig, SuiteSummary,
};

use crate::config::SuiteSettings;

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// mean/median/population-stddev/min/max over a sample, every field rounded
/// to 6 decimals. All zeros for an empty sample.
pub fn stat_summary(values: &[f64]) -> StatBlock {
    if values.is_empty() {
        return StatBlock::default();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    StatBlock {
        mean: round6(mean),
        median: round6(median),
        stddev: round6(variance.sqrt()),
        min: round6(sorted[0]),
        max: round6(*sorted.last().unwrap_or(&0.0)),
    }
}

/// Split a run list into (scored, void) without reordering.
pub fn partition_runs(runs: &[EvalRun]) -> (Vec<&EvalRun>, Vec<&EvalRun>) {
    runs.iter().partition(|r| !r.scores.voided)
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Stable suite directory name carrying everything needed to find a suite
/// on disk without opening it.
pub fn suite_id(started_at: DateTime<Utc>, config: &SuiteConfig) -> String {
    format!(
        "{}__{}__{}__{}__x{}",
        started_at.format("%Y%m%d-%H%M%SZ"),
        slug(&config.task_name),
        slug(&config.harness),
        config.model.replace('/', "-"),
        config.repeats,
    )
}

fn ratio(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        round6(f64::from(numerator) / f64::from(denominator))
    }
}

fn aggregate(runs: &[EvalRun]) -> SuiteAggregate {
    let (scored, voided) = partition_runs(runs);
    let valid: Vec<&&EvalRun> = scored
        .iter()
        .filter(|r| r.scores.run_validity.passed())
        .collect();
    let performance_passes = scored
        .iter()
        .filter(|r| r.scores.performance_gates.passed())
        .count() as u32;

    let composites: Vec<f64> = scored.iter().map(|r| r.scores.composite_score).collect();
    let diagnostics: Vec<f64> = scored.iter().map(|r| r.scores.diagnostic_score).collect();
    let durations: Vec<f64> = scored.iter().map(|r| r.duration_sec).collect();
    let tokens: Vec<f64> = scored
        .iter()
        .map(|r| r.uncached_input_tokens() as f64)
        .collect();

    let scored_count = scored.len() as u32;
    SuiteAggregate {
        run_count_total: runs.len() as u32,
        run_count_scored: scored_count,
        void_count: voided.len() as u32,
        valid_count: valid.len() as u32,
        validity_rate: ratio(valid.len() as u32, scored_count),
        validity_rate_total: ratio(valid.len() as u32, runs.len() as u32),
        performance_pass_count: performance_passes,
        performance_pass_rate: ratio(performance_passes, scored_count),
        composite_score: stat_summary(&composites),
        diagnostic_score: stat_summary(&diagnostics),
        duration_sec: stat_summary(&durations),
        uncached_input_tokens: stat_summary(&tokens),
    }
}

fn run_pointer(run: &EvalRun) -> RunPointer {
    RunPointer {
        run_id: run.id.clone(),
        timestamp: run.timestamp.clone(),
        voided: run.scores.voided,
        void_reasons: run.scores.void_reasons.clone(),
        run_valid: run.scores.run_validity.passed(),
        performance_gates_passed: run.scores.performance_gates.passed(),
        composite_score: run.scores.composite_score,
        diagnostic_score: run.scores.diagnostic_score,
        duration_sec: run.duration_sec,
        terminated_early: run.terminated_early,
        termination_reason: run.termination_reason.clone(),
    }
}

/// Build the complete summary for one finished suite. Pure over its inputs
/// so a summary can always be regenerated from stored runs.
pub fn create_suite_summary(
    runs: &[EvalRun],
    settings: &SuiteSettings,
    mut config: SuiteConfig,
    retries_used: u32,
    unresolved_void_count: u32,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
) -> SuiteSummary {
    config.repeats = settings.repeats;
    config.repeat_parallel = settings.repeat_parallel;
    config.retry_void_limit = settings.retry_void_limit;
    config.retries_used = retries_used;

    let aggregate = aggregate(runs);
    let retry = RetryBlock {
        target_scored_runs: settings.repeats,
        achieved_scored_runs: aggregate.run_count_scored,
        target_met: aggregate.run_count_scored >= settings.repeats,
        unresolved_void_count,
    };

    SuiteSummary {
        suite_id: suite_id(started_at, &config),
        started_at_utc: started_at.to_rfc3339(),
        completed_at_utc: completed_at.to_rfc3339(),
        config,
        aggregate,
        runs: runs.iter().map(run_pointer).collect(),
        retry,
    }
}

/// Human-readable suite report, written next to summary.json.
pub fn render_markdown(summary: &SuiteSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Suite {}\n\n", summary.suite_id));
    out.push_str(&format!(
        "- Task: {} | Harness: {} | Model: {} | Rules: {}\n",
        summary.config.task_name,
        summary.config.harness,
        summary.config.model,
        summary.config.rules_variant,
    ));
    out.push_str(&format!(
        "- Repeats: {} (parallel {}), retry budget {} (used {})\n",
        summary.config.repeats,
        summary.config.repeat_parallel,
        summary.config.retry_void_limit,
        summary.config.retries_used,
    ));
    out.push_str(&format!(
        "- Runs: {} total, {} scored, {} void, {} valid (validity {:.1}%)\n",
        summary.aggregate.run_count_total,
        summary.aggregate.run_count_scored,
        summary.aggregate.void_count,
        summary.aggregate.valid_count,
        summary.aggregate.validity_rate * 100.0,
    ));
    out.push_str(&format!(
        "- Composite: mean {:.3}, median {:.3}, stddev {:.3}, range [{:.3}, {:.3}]\n",
        summary.aggregate.composite_score.mean,
        summary.aggregate.composite_score.median,
        summary.aggregate.composite_score.stddev,
        summary.aggregate.composite_score.min,
        summary.aggregate.composite_score.max,
    ));
    if summary.retry.unresolved_void_count > 0 {
        out.push_str(&format!(
            "- Unresolved voids after retries: {}\n",
            summary.retry.unresolved_void_count,
        ));
    }

    out.push_str("\n| run | scored | valid | composite | diagnostic | duration (s) |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for run in &summary.runs {
        out.push_str(&format!(
            "| {} | {} | {} | {:.3} | {:.3} | {:.1} |\n",
            run.run_id,
            if run.voided { "void" } else { "yes" },
            if run.run_valid { "yes" } else { "no" },
            run.composite_score,
            run.diagnostic_score,
            run.duration_sec,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use trialgate_types::{Verdict, VerdictCheck};

    use super::*;

    fn run(id: &str, composite: f64, voided: bool, valid: bool) -> EvalRun {
        let mut run = EvalRun {
            id: id.to_string(),
            timestamp: "2026-08-29T12:00:00Z".to_string(),
            duration_sec: 100.0,
            ..Default::default()
        };
        run.scores.composite_score = if voided || !valid { 0.0 } else { composite };
        run.scores.diagnostic_score = composite;
        run.scores.voided = voided;
        if !valid {
            run.scores.run_validity = Verdict {
                checks: vec![VerdictCheck {
                    name: "coverage_threshold_met".to_string(),
                    passed: false,
                    evidence: None,
                }],
            };
        }
        run
    }

    #[test]
    fn stat_summary_uses_population_stddev() {
        let block = stat_summary(&[0.2, 0.4, 0.6, 0.8]);
        assert_eq!(block.mean, 0.5);
        assert_eq!(block.median, 0.5);
        // population stddev of this sample, not the n-1 sample stddev
        assert_eq!(block.stddev, 0.223607);
        assert_eq!(block.min, 0.2);
        assert_eq!(block.max, 0.8);
    }

    #[test]
    fn stat_summary_empty_is_zeroed() {
        assert_eq!(stat_summary(&[]), StatBlock::default());
    }

    #[test]
    fn stat_summary_single_value() {
        let block = stat_summary(&[0.75]);
        assert_eq!(block.mean, 0.75);
        assert_eq!(block.median, 0.75);
        assert_eq!(block.stddev, 0.0);
    }

    #[test]
    fn validity_rate_excludes_void_from_denominator() {
        let runs = vec![
            run("a", 0.9, false, true),
            run("b", 0.7, false, false),
            run("c", 0.8, true, true),
        ];
        let summary = create_suite_summary(
            &runs,
            &SuiteSettings { repeats: 3, repeat_parallel: 1, retry_void_limit: 1 },
            SuiteConfig { task_name: "landing".to_string(), ..Default::default() },
            1,
            1,
            Utc.with_ymd_and_hms(2026, 8, 29, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 29, 13, 0, 0).unwrap(),
        );

        assert_eq!(summary.aggregate.run_count_total, 3);
        assert_eq!(summary.aggregate.run_count_scored, 2);
        assert_eq!(summary.aggregate.void_count, 1);
        assert_eq!(summary.aggregate.valid_count, 1);
        assert_eq!(summary.aggregate.validity_rate, 0.5);
        assert_eq!(summary.aggregate.validity_rate_total, 0.333333);
        // invalid run contributes 0 composite but its real diagnostic
        assert_eq!(summary.aggregate.composite_score.mean, 0.45);
        assert_eq!(summary.aggregate.diagnostic_score.mean, 0.8);
        assert!(!summary.retry.target_met);
        assert_eq!(summary.retry.unresolved_void_count, 1);
        assert_eq!(summary.runs.len(), 3);
    }

    #[test]
    fn suite_id_encodes_config() {
        let started = Utc.with_ymd_and_hms(2026, 8, 29, 12, 30, 5).unwrap();
        let config = SuiteConfig {
            task_name: "Landing Page".to_string(),
            harness: "pilot".to_string(),
            model: "anthropic/claude-sonnet-4".to_string(),
            repeats: 5,
            ..Default::default()
        };
        assert_eq!(
            suite_id(started, &config),
            "20260829-123005Z__landing-page__pilot__anthropic-claude-sonnet-4__x5"
        );
    }

    #[test]
    fn markdown_report_lists_every_run() {
        let runs = vec![run("a", 0.9, false, true), run("b", 0.5, true, true)];
        let summary = create_suite_summary(
            &runs,
            &SuiteSettings::default(),
            SuiteConfig::default(),
            0,
            1,
            Utc.with_ymd_and_hms(2026, 8, 29, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 8, 29, 12, 30, 0).unwrap(),
        );
        let md = render_markdown(&summary);
        assert!(md.contains("| a | yes | yes |"));
        assert!(md.contains("| b | void |"));
        assert!(md.contains("Unresolved voids after retries: 1"));
    }
}
