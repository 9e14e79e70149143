use std::path::{Path, PathBuf};

use regex::Regex;
use trialgate_types::{CoverageScore, GateEvent, RequirementCoverageScore};

use crate::scoring::compliance::run_deterministic_check;
use crate::task::RequirementSpec;

fn coverage_from_summary_file(workspace: &Path) -> Option<(f64, String)> {
    let summary_path = workspace.join("coverage").join("coverage-summary.json");
    let content = std::fs::read_to_string(&summary_path).ok()?;
    let payload: serde_json::Value = serde_json::from_str(&content).ok()?;
    let total = payload.get("total")?.as_object()?;

    let mut values = Vec::new();
    for key in ["lines", "statements", "functions", "branches"] {
        if let Some(pct) = total.get(key).and_then(|m| m.get("pct")).and_then(|v| v.as_f64()) {
            values.push(pct);
        }
    }
    let min = values.iter().copied().reduce(f64::min)?;
    Some((min / 100.0, summary_path.display().to_string()))
}

/// Pull a coverage fraction out of textual reporter output: labeled
/// percentage lines and the istanbul "All files" table row. The weakest
/// metric wins.
pub fn parse_coverage_percent(output: &str) -> Option<f64> {
    let mut values: Vec<f64> = Vec::new();

    for pattern in [
        r"(?i)Lines\s*:\s*([0-9]+(?:\.[0-9]+)?)%",
        r"(?i)Statements\s*:\s*([0-9]+(?:\.[0-9]+)?)%",
        r"(?i)Functions\s*:\s*([0-9]+(?:\.[0-9]+)?)%",
        r"(?i)Branches\s*:\s*([0-9]+(?:\.[0-9]+)?)%",
    ] {
        let re = Regex::new(pattern).unwrap();
        for caps in re.captures_iter(output) {
            if let Ok(v) = caps[1].parse() {
                values.push(v);
            }
        }
    }

    let table_re = Regex::new(
        r"All files\s*\|\s*([0-9]+(?:\.[0-9]+)?)\s*\|\s*([0-9]+(?:\.[0-9]+)?)\s*\|\s*([0-9]+(?:\.[0-9]+)?)\s*\|\s*([0-9]+(?:\.[0-9]+)?)",
    )
    .unwrap();
    if let Some(caps) = table_re.captures(output) {
        for i in 1..=4 {
            if let Ok(v) = caps[i].parse() {
                values.push(v);
            }
        }
    }

    values.iter().copied().reduce(f64::min).map(|v| v / 100.0)
}

fn coverage_from_gate_history(gate_history: &[GateEvent]) -> Option<(f64, String)> {
    for event in gate_history.iter().rev() {
        let hint = format!("{} {}", event.gate_name, event.command).to_lowercase();
        if !hint.contains("coverage") {
            continue;
        }
        let combined = format!("{}\n{}", event.stdout, event.stderr);
        if let Some(measured) = parse_coverage_percent(&combined) {
            return Some((measured, format!("gate:{}", event.gate_name)));
        }
    }
    None
}

/// Measure coverage from the workspace summary file, falling back to the
/// most recent coverage gate's output, and compare against the threshold.
pub fn evaluate_coverage(
    workspace: &Path,
    gate_history: &[GateEvent],
    threshold: Option<f64>,
) -> CoverageScore {
    let measured = coverage_from_summary_file(workspace)
        .or_else(|| coverage_from_gate_history(gate_history));
    let (measured, source) = match measured {
        Some((value, source)) => (Some(value), Some(source)),
        None => (None, None),
    };
    let passed = match threshold {
        None => true,
        Some(t) => measured.is_some_and(|m| m >= t),
    };
    CoverageScore {
        threshold,
        measured,
        source,
        passed,
    }
}

fn test_file_paths(workspace: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = entries.flatten().map(|e| e.path()).collect();
        entries.sort();
        for path in entries {
            if path.is_dir() {
                walk(&path, out);
            } else {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if name.contains(".test.") || name.contains(".spec.") {
                    out.push(path);
                }
            }
        }
    }
    let mut paths = Vec::new();
    walk(&workspace.join("src"), &mut paths);
    walk(&workspace.join("tests"), &mut paths);
    paths
}

fn has_test_pattern(test_sources: &[String], pattern: &str) -> bool {
    let needle = pattern.to_lowercase();
    test_sources
        .iter()
        .any(|s| s.to_lowercase().contains(&needle))
}

/// Check each requirement's implementation and its requirement-to-test
/// mapping. A requirement without all its test patterns is a mapping gap
/// even when the implementation check itself passes.
pub fn evaluate_requirements(
    workspace: &Path,
    requirements: &[RequirementSpec],
) -> RequirementCoverageScore {
    if requirements.is_empty() {
        return RequirementCoverageScore {
            total_requirements: 0,
            ..Default::default()
        };
    }

    let test_sources: Vec<String> = test_file_paths(workspace)
        .iter()
        .filter_map(|p| std::fs::read_to_string(p).ok())
        .collect();

    let mut score = RequirementCoverageScore {
        total_requirements: requirements.len() as u32,
        ..Default::default()
    };

    for requirement in requirements {
        let check = run_deterministic_check(&requirement.check, workspace);
        let missing_patterns: Vec<String> = requirement
            .required_test_patterns
            .iter()
            .filter(|p| !has_test_pattern(&test_sources, p))
            .cloned()
            .collect();

        if check.passed {
            score.satisfied_requirements += 1;
        } else {
            score.missing_requirement_ids.push(requirement.id.clone());
        }

        let mapped = !requirement.required_test_patterns.is_empty() && missing_patterns.is_empty();
        if mapped {
            score.mapped_requirements += 1;
            if check.passed {
                score.mapped_satisfied_requirements += 1;
            }
        } else {
            score.requirement_gap_ids.push(requirement.id.clone());
            if !missing_patterns.is_empty() {
                score
                    .requirement_pattern_gaps
                    .insert(requirement.id.clone(), missing_patterns);
            }
        }
    }

    score
}
