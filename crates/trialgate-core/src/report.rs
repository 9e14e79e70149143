//! Cross-run comparison: flatten stored runs into rows, rank them, and
//! export CSV/Markdown for side-by-side harness and model analysis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trialgate_types::EvalRun;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonRow {
    pub run_id: String,
    pub task_name: String,
    pub harness: String,
    pub model: String,
    pub rules_variant: String,
    pub scaffold_template: String,
    pub voided: bool,
    pub composite: f64,
    pub diagnostic: f64,
    pub functional: f64,
    pub compliance: f64,
    pub visual: Option<f64>,
    pub efficiency: f64,
    pub coverage: f64,
    pub requirements: f64,
    pub gates_passed: u32,
    pub gates_total: u32,
    pub duration_sec: f64,
}

impl ComparisonRow {
    fn from_run(run: &EvalRun) -> Self {
        let scores = &run.scores;
        Self {
            run_id: run.id.clone(),
            task_name: run.config.task_name.clone(),
            harness: run.config.harness.clone(),
            model: run.config.model.clone(),
            rules_variant: run.config.rules_variant.clone(),
            scaffold_template: run.config.scaffold_template.clone(),
            voided: scores.voided,
            composite: scores.composite_score,
            diagnostic: scores.diagnostic_score,
            functional: scores.functional.score(),
            compliance: scores.compliance.score,
            visual: scores.visual.as_ref().map(|v| v.score()),
            efficiency: scores.efficiency.score(),
            coverage: scores.coverage.score(),
            requirements: scores.requirements.score(),
            gates_passed: scores.functional.gates_passed,
            gates_total: scores.functional.gates_total,
            duration_sec: run.duration_sec,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonReport {
    pub rows: Vec<ComparisonRow>,
    /// Dimension name to the run id that scored highest on it.
    pub best_by_dimension: BTreeMap<String, String>,
    pub averages_by_harness: BTreeMap<String, f64>,
    pub averages_by_model: BTreeMap<String, f64>,
    pub averages_by_rules: BTreeMap<String, f64>,
    pub averages_by_scaffold: BTreeMap<String, f64>,
}

fn best_run(rows: &[ComparisonRow], value: impl Fn(&ComparisonRow) -> Option<f64>) -> Option<String> {
    rows.iter()
        .filter_map(|r| value(r).map(|v| (r, v)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(r, _)| r.run_id.clone())
}

fn averages_by(
    rows: &[ComparisonRow],
    key: impl Fn(&ComparisonRow) -> &str,
) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, u32)> = BTreeMap::new();
    for row in rows {
        let entry = sums.entry(key(row).to_string()).or_default();
        entry.0 += row.composite;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(k, (sum, n))| (k, sum / f64::from(n)))
        .collect()
}

/// Build a comparison over any set of stored runs. Rows are sorted by
/// composite score descending so exports read best-first.
pub fn build_report(runs: &[EvalRun]) -> ComparisonReport {
    let mut rows: Vec<ComparisonRow> = runs.iter().map(ComparisonRow::from_run).collect();
    rows.sort_by(|a, b| b.composite.total_cmp(&a.composite));

    let mut best_by_dimension = BTreeMap::new();
    let dims: [(&str, fn(&ComparisonRow) -> Option<f64>); 7] = [
        ("composite", |r| Some(r.composite)),
        ("functional", |r| Some(r.functional)),
        ("compliance", |r| Some(r.compliance)),
        ("visual", |r| r.visual),
        ("efficiency", |r| Some(r.efficiency)),
        ("coverage", |r| Some(r.coverage)),
        ("requirements", |r| Some(r.requirements)),
    ];
    for (name, value) in dims {
        if let Some(run_id) = best_run(&rows, value) {
            best_by_dimension.insert(name.to_string(), run_id);
        }
    }

    ComparisonReport {
        averages_by_harness: averages_by(&rows, |r| &r.harness),
        averages_by_model: averages_by(&rows, |r| &r.model),
        averages_by_rules: averages_by(&rows, |r| &r.rules_variant),
        averages_by_scaffold: averages_by(&rows, |r| &r.scaffold_template),
        rows,
        best_by_dimension,
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// CSV export, one row per run, scores at two decimals.
pub fn to_csv(report: &ComparisonReport) -> String {
    let mut out = String::from(
        "run_id,task,harness,model,rules,scaffold,voided,composite,diagnostic,functional,compliance,visual,efficiency,coverage,requirements,gates,duration_sec\n",
    );
    for row in &report.rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{:.2},{:.2},{:.2},{:.2},{},{:.2},{:.2},{:.2},{}/{},{:.1}\n",
            csv_field(&row.run_id),
            csv_field(&row.task_name),
            csv_field(&row.harness),
            csv_field(&row.model),
            csv_field(&row.rules_variant),
            csv_field(&row.scaffold_template),
            row.voided,
            row.composite,
            row.diagnostic,
            row.functional,
            row.compliance,
            row.visual.map_or(String::from(""), |v| format!("{v:.2}")),
            row.efficiency,
            row.coverage,
            row.requirements,
            row.gates_passed,
            row.gates_total,
            row.duration_sec,
        ));
    }
    out
}

/// Markdown comparison table with the grouped averages below it.
pub fn to_markdown(report: &ComparisonReport) -> String {
    let mut out = String::from(
        "| run | harness | model | rules | composite | functional | compliance | efficiency | coverage | reqs | gates |\n\
         |---|---|---|---|---|---|---|---|---|---|---|\n",
    );
    for row in &report.rows {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} | {:.2} | {}/{} |\n",
            row.run_id,
            row.harness,
            row.model,
            row.rules_variant,
            row.composite,
            row.functional,
            row.compliance,
            row.efficiency,
            row.coverage,
            row.requirements,
            row.gates_passed,
            row.gates_total,
        ));
    }
    for (title, averages) in [
        ("harness", &report.averages_by_harness),
        ("model", &report.averages_by_model),
        ("rules variant", &report.averages_by_rules),
        ("scaffold", &report.averages_by_scaffold),
    ] {
        if averages.len() < 2 {
            continue;
        }
        out.push_str(&format!("\nAverage composite by {title}:\n"));
        for (key, avg) in averages {
            out.push_str(&format!("- {key}: {avg:.2}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use trialgate_types::{EvalConfig, FunctionalScore, VisualScore};

    use super::*;

    fn run(id: &str, harness: &str, model: &str, composite: f64, visual: Option<f64>) -> EvalRun {
        let mut run = EvalRun {
            id: id.to_string(),
            config: EvalConfig {
                task_name: "landing".to_string(),
                harness: harness.to_string(),
                model: model.to_string(),
                rules_variant: "baseline".to_string(),
                ..Default::default()
            },
            duration_sec: 60.0,
            ..Default::default()
        };
        run.scores.composite_score = composite;
        run.scores.diagnostic_score = composite;
        run.scores.functional = FunctionalScore {
            passed: true,
            build_succeeded: true,
            gates_passed: 3,
            gates_total: 3,
            ..Default::default()
        };
        run.scores.visual = visual.map(|similarity| VisualScore {
            similarity,
            capture_succeeded: true,
            threshold: 0.95,
            ..Default::default()
        });
        run
    }

    #[test]
    fn rows_sorted_by_composite_descending() {
        let runs = vec![
            run("low", "pilot", "m1", 0.3, None),
            run("high", "pilot", "m1", 0.9, None),
            run("mid", "pilot", "m2", 0.6, None),
        ];
        let report = build_report(&runs);
        let order: Vec<&str> = report.rows.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(order, ["high", "mid", "low"]);

        let csv = to_csv(&report);
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[1].starts_with("high,"));
        assert!(lines[3].starts_with("low,"));
        assert!(lines[1].contains("0.90"));
    }

    #[test]
    fn best_by_dimension_skips_runs_without_visual() {
        let runs = vec![
            run("a", "pilot", "m1", 0.9, None),
            run("b", "pilot", "m1", 0.4, Some(0.8)),
        ];
        let report = build_report(&runs);
        assert_eq!(report.best_by_dimension["composite"], "a");
        assert_eq!(report.best_by_dimension["visual"], "b");
    }

    #[test]
    fn averages_grouped_per_key() {
        let runs = vec![
            run("a", "pilot", "m1", 1.0, None),
            run("b", "pilot", "m2", 0.5, None),
            run("c", "copilot", "m1", 0.2, None),
        ];
        let report = build_report(&runs);
        assert!((report.averages_by_harness["pilot"] - 0.75).abs() < 1e-9);
        assert!((report.averages_by_harness["copilot"] - 0.2).abs() < 1e-9);
        assert!((report.averages_by_model["m1"] - 0.6).abs() < 1e-9);

        let md = to_markdown(&report);
        assert!(md.contains("Average composite by harness:"));
        assert!(md.contains("- pilot: 0.75"));
    }

    #[test]
    fn csv_quotes_fields_with_commas() {
        let mut r = run("a", "pilot", "m,1", 0.5, None);
        r.config.model = "m,1".to_string();
        let report = build_report(&[r]);
        assert!(to_csv(&report).contains("\"m,1\""));
    }
}
